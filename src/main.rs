use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use quill::config::Settings;
use quill::identity::HttpIdentityGateway;
use quill::media::S3MediaHost;
use quill::openapi::ApiDoc;
use quill::repo::Repo;
use quill::routes::{config, AppState};
use quill::SecurityHeaders;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // .env only in debug builds; production gets its environment from the supervisor
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = Settings::from_env()?;
    info!("Bootstrapping quill");
    info!(frontend = %settings.frontend_url, identity_api = %settings.identity.api_url, "configuration loaded");

    let repo = build_repo(&settings).await?;
    let identity = Arc::new(HttpIdentityGateway::new(&settings.identity.api_url, &settings.identity.api_key));
    let media = Arc::new(S3MediaHost::new(&settings.media).await?);
    let state = AppState { repo, identity, media };

    let openapi = ApiDoc::openapi();
    let frontend = settings.frontend_url.clone();
    let headers = SecurityHeaders::default()
        .with_hsts(settings.enable_hsts)
        .with_image_origin(&settings.media.public_url);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_origin("http://127.0.0.1:3000")
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(headers.clone())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((settings.bind_addr.as_str(), settings.port))?;

    info!("Listening on http://{}:{}", settings.bind_addr, settings.port);
    server.run().await?;
    Ok(())
}

// Postgres when compiled in and DATABASE_URL is set, otherwise the in-memory store.
#[allow(unreachable_code)]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    #[cfg(feature = "postgres-store")]
    if let Some(url) = &settings.database_url {
        use anyhow::Context as _;
        use sqlx::postgres::PgPoolOptions;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("failed to connect to DATABASE_URL")?;
        let repo = quill::repo::pg::PgRepo::new(pool);
        repo.migrate().await.context("database migration failed")?;
        info!("Using Postgres repository backend");
        return Ok(Arc::new(repo));
    }

    #[cfg(feature = "inmem-store")]
    {
        let repo = match &settings.data_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "Using in-memory repository backend with snapshots");
                quill::repo::inmem::InMemRepo::with_snapshot(dir)
            }
            None => {
                info!("Using in-memory repository backend");
                quill::repo::inmem::InMemRepo::new()
            }
        };
        return Ok(Arc::new(repo));
    }

    anyhow::bail!("no repository backend: build with `inmem-store`, or `postgres-store` and set DATABASE_URL")
}
