#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Duration;
use quill::auth::{create_jwt, Identity};
use quill::identity::{GatewayError, IdentityGateway, UserProfile, UNKNOWN_AUTHOR};
use quill::media::{MediaError, MediaHost};
use quill::repo::inmem::InMemRepo;
use quill::routes::{config, AppState};
use serde_json::{json, Value};
use serial_test::serial;

// ---------------- test doubles ----------------

#[derive(Default)]
struct MockGateway {
    users: HashMap<String, UserProfile>,
    batch_calls: AtomicUsize,
}

impl MockGateway {
    fn with_user(mut self, id: &str, first: &str) -> Self {
        self.users.insert(
            id.into(),
            UserProfile {
                id: id.into(),
                first_name: Some(first.into()),
                email: Some(format!("{id}@example.com")),
                created_at: Some(1_700_000_000_000),
                ..Default::default()
            },
        );
        self
    }
}

#[async_trait]
impl IdentityGateway for MockGateway {
    async fn get_user(&self, subject: &str) -> Result<UserProfile, GatewayError> {
        self.users.get(subject).cloned().ok_or(GatewayError::NotFound)
    }

    async fn get_users(&self, subjects: &[String]) -> Result<HashMap<String, UserProfile>, GatewayError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(subjects.iter().filter_map(|s| self.users.get(s).map(|u| (s.clone(), u.clone()))).collect())
    }
}

#[derive(Default)]
struct MockMedia {
    uploads: Mutex<Vec<(usize, String)>>,
}

#[async_trait]
impl MediaHost for MockMedia {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<String, MediaError> {
        self.uploads.lock().unwrap().push((bytes.len(), mime.to_string()));
        Ok(format!("https://media.test/blog-posts/{}", bytes.len()))
    }
}

fn setup_env() {
    std::env::remove_var("JWT_PUBLIC_KEY_PEM");
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn token(subject: &str) -> String {
    create_jwt(&Identity::new(subject), Duration::hours(1)).unwrap()
}

fn bearer(subject: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token(subject)))
}

fn state(repo: &InMemRepo, gateway: Arc<MockGateway>, media: Arc<MockMedia>) -> web::Data<AppState> {
    web::Data::new(AppState { repo: Arc::new(repo.clone()), identity: gateway, media })
}

fn build_multipart(field: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "quill-test-boundary";
    let mut body: Vec<u8> = Vec::new();
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

// 1x1 transparent PNG
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00,
        0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00,
        0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D,
        0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

// ---------------- tests ----------------

#[actix_web::test]
#[serial]
async fn post_lifecycle_with_author_names() {
    setup_env();
    let repo = InMemRepo::new();
    let gateway = Arc::new(MockGateway::default().with_user("user_ada", "Ada"));
    let app = test::init_service(
        App::new().app_data(state(&repo, gateway.clone(), Arc::default())).configure(config),
    )
    .await;

    // empty feed, anonymous
    let req = test::TestRequest::get().uri("/api/posts").to_request();
    let posts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(posts, json!([]));

    // create
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"title": "Hello", "content": "First post", "imageUrl": "https://img/1.png"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["author"], "user_ada");
    assert_eq!(created["imageUrl"], "https://img/1.png");
    let id = created["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("posts:"));
    let key = id.trim_start_matches("posts:").to_string();

    // a post by someone the gateway does not know
    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(bearer("user_ghost"))
        .set_json(json!({"title": "Boo", "content": "From nowhere"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    // list: newest first, one batched name lookup for both authors
    let before = gateway.batch_calls.load(Ordering::SeqCst);
    let req = test::TestRequest::get().uri("/api/posts").to_request();
    let posts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(gateway.batch_calls.load(Ordering::SeqCst), before + 1);
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["title"], "Boo");
    assert_eq!(posts[0]["authorName"], UNKNOWN_AUTHOR);
    assert_eq!(posts[1]["authorName"], "Ada");

    let req = test::TestRequest::get().uri("/api/posts?limit=1").to_request();
    let limited: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(limited.as_array().unwrap().len(), 1);

    // get by bare key and by prefixed id
    for path in [format!("/api/posts/{key}"), format!("/api/posts/{id}")] {
        let req = test::TestRequest::get().uri(&path).insert_header(bearer("user_bob")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "{path}");
        let post: Value = test::read_body_json(resp).await;
        assert_eq!(post["id"], id);
        assert_eq!(post["authorName"], "Ada");
    }

    // id from another collection
    let req = test::TestRequest::get().uri("/api/posts/comments:abc").insert_header(bearer("user_bob")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get().uri("/api/posts/doesnotexist").insert_header(bearer("user_bob")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // update keeps the image when imageUrl is omitted
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{key}/update"))
        .insert_header(bearer("user_ada"))
        .set_json(json!({"title": "Hello again", "content": "Edited"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(updated["title"], "Hello again");
    assert_eq!(updated["imageUrl"], "https://img/1.png");
    assert!(updated["updated_at"].is_string());

    // explicit null clears it
    let req = test::TestRequest::put()
        .uri(&format!("/api/posts/{key}/update"))
        .insert_header(bearer("user_ada"))
        .set_json(json!({"title": "Hello again", "content": "Edited", "imageUrl": null}))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["imageUrl"], Value::Null);

    // by author / own posts
    let req = test::TestRequest::get().uri("/api/posts/by-author/user_ada").to_request();
    let by_author: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(by_author.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri("/api/user-posts").insert_header(bearer("user_ghost")).to_request();
    let mine: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["title"], "Boo");

    // delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/posts/{key}/delete"))
        .insert_header(bearer("user_ada"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], id);
    assert!(body["message"].is_string());

    let req = test::TestRequest::get().uri(&format!("/api/posts/{key}")).insert_header(bearer("user_ada")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn likes_and_favorites_toggle_and_report_status() {
    setup_env();
    let repo = InMemRepo::new();
    let gateway = Arc::new(MockGateway::default().with_user("user_ada", "Ada"));
    let app = test::init_service(App::new().app_data(state(&repo, gateway, Arc::default())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"title": "Likeable", "content": "body"}))
        .to_request();
    let post: Value = test::call_and_read_body_json(&app, req).await;
    let key = post["id"].as_str().unwrap().trim_start_matches("posts:").to_string();

    // anonymous status
    let req = test::TestRequest::get().uri(&format!("/api/likes/{key}")).to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status, json!({"likesCount": 0, "userLiked": false}));

    // anonymous toggle is rejected
    let req = test::TestRequest::post().uri(&format!("/api/likes/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    // like
    let req = test::TestRequest::post().uri(&format!("/api/likes/{key}")).insert_header(bearer("user_bob")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["liked"], true);
    assert_eq!(body["likesCount"], 1);
    assert_eq!(body["like"]["userId"], "user_bob");
    assert_eq!(body["like"]["postId"], post["id"]);

    let req = test::TestRequest::get().uri(&format!("/api/likes/{key}")).insert_header(bearer("user_bob")).to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status, json!({"likesCount": 1, "userLiked": true}));

    // someone else sees the count but not the flag
    let req = test::TestRequest::get().uri(&format!("/api/likes/{key}")).insert_header(bearer("user_eve")).to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status, json!({"likesCount": 1, "userLiked": false}));

    // unlike
    let req = test::TestRequest::post().uri(&format!("/api/likes/{key}")).insert_header(bearer("user_bob")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["liked"], false);
    assert_eq!(body["likesCount"], 0);
    assert!(body.get("like").is_none());

    // favorites
    let req = test::TestRequest::post()
        .uri(&format!("/api/favorites/{key}"))
        .insert_header(bearer("user_bob"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["favorited"], true);
    assert_eq!(body["favoritesCount"], 1);

    let req = test::TestRequest::get().uri(&format!("/api/favorites/{key}")).insert_header(bearer("user_bob")).to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status, json!({"favoritesCount": 1, "userFavorited": true}));

    // favorites list, with and without a filter
    let req = test::TestRequest::get().uri("/api/favorites/user").insert_header(bearer("user_bob")).to_request();
    let favs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(favs.as_array().unwrap().len(), 1);
    assert_eq!(favs[0]["id"], post["id"]);
    assert_eq!(favs[0]["authorName"], "Ada");
    assert!(favs[0]["favorited_at"].is_string());

    let req = test::TestRequest::get().uri("/api/favorites/user?q=LIKE").insert_header(bearer("user_bob")).to_request();
    let favs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(favs.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get().uri("/api/favorites/user?q=zebra").insert_header(bearer("user_bob")).to_request();
    let favs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(favs, json!([]));

    let req = test::TestRequest::get().uri("/api/favorites/user").insert_header(bearer("user_eve")).to_request();
    let favs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(favs, json!([]));

    let req = test::TestRequest::post()
        .uri(&format!("/api/favorites/{key}"))
        .insert_header(bearer("user_bob"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["favorited"], false);
    assert_eq!(body["favoritesCount"], 0);
}

#[actix_web::test]
#[serial]
async fn top_posts_rank_by_likes_then_age() {
    setup_env();
    let repo = InMemRepo::new();
    let gateway = Arc::new(MockGateway::default().with_user("user_ada", "Ada"));
    let app = test::init_service(App::new().app_data(state(&repo, gateway, Arc::default())).configure(config)).await;

    let mut keys = Vec::new();
    for title in ["oldest", "middle", "newest", "unloved"] {
        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(bearer("user_ada"))
            .set_json(json!({"title": title, "content": "x"}))
            .to_request();
        let post: Value = test::call_and_read_body_json(&app, req).await;
        keys.push(post["id"].as_str().unwrap().to_string());
        actix_web::rt::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let likes = [("oldest", 2), ("middle", 2), ("newest", 5), ("unloved", 0)];
    for (i, (_, n)) in likes.iter().enumerate() {
        for u in 0..*n {
            let req = test::TestRequest::post()
                .uri(&format!("/api/likes/{}", keys[i]))
                .insert_header(bearer(&format!("user_{u}")))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 201);
        }
    }

    let req = test::TestRequest::get().uri("/api/posts/top").to_request();
    let top: Value = test::call_and_read_body_json(&app, req).await;
    let titles: Vec<&str> = top.as_array().unwrap().iter().map(|p| p["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["newest", "oldest", "middle"]);
    assert_eq!(top[0]["likesCount"], 5);
    assert_eq!(top[0]["authorName"], "Ada");
}

#[actix_web::test]
#[serial]
async fn comments_form_a_forest() {
    setup_env();
    let repo = InMemRepo::new();
    let gateway = Arc::new(MockGateway::default().with_user("user_ada", "Ada").with_user("user_bob", "Bob"));
    let app = test::init_service(App::new().app_data(state(&repo, gateway, Arc::default())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"title": "Discuss", "content": "body"}))
        .to_request();
    let post: Value = test::call_and_read_body_json(&app, req).await;
    let post_id = post["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(bearer("user_bob"))
        .set_json(json!({"postId": post_id, "content": "root"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let root: Value = test::read_body_json(resp).await;
    assert_eq!(root["parentId"], Value::Null);

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"postId": post_id, "content": "reply", "parentId": root["id"]}))
        .to_request();
    let reply: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(reply["parentId"], root["id"]);

    // orphan: parent never existed
    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"postId": post_id, "content": "orphan", "parentId": "comments:missing"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/comments")
        .insert_header(bearer("user_ada"))
        .set_json(json!({"postId": post_id, "content": "   "}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let key = post_id.trim_start_matches("posts:");
    let req = test::TestRequest::get().uri(&format!("/api/comments/post/{key}")).insert_header(bearer("user_eve")).to_request();
    let forest: Value = test::call_and_read_body_json(&app, req).await;
    let forest = forest.as_array().unwrap();
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0]["content"], "root");
    assert_eq!(forest[0]["authorName"], "Bob");
    let replies = forest[0]["replies"].as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["content"], "reply");
    assert_eq!(replies[0]["authorName"], "Ada");
    assert_eq!(replies[0]["replies"], json!([]));

    let req = test::TestRequest::get().uri(&format!("/api/comments/post/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn user_profile_lookup() {
    setup_env();
    let repo = InMemRepo::new();
    let gateway = Arc::new(MockGateway::default().with_user("user_ada", "Ada"));
    let app = test::init_service(App::new().app_data(state(&repo, gateway, Arc::default())).configure(config)).await;

    let req = test::TestRequest::get().uri("/api/users/user_ada").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let profile: Value = test::read_body_json(resp).await;
    assert_eq!(profile["firstName"], "Ada");
    assert_eq!(profile["email"], "user_ada@example.com");
    assert_eq!(profile["createdAt"], 1_700_000_000_000i64);

    let req = test::TestRequest::get().uri("/api/users/user_nobody").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let err: Value = test::read_body_json(resp).await;
    assert!(err["error"].is_string());
}

#[actix_web::test]
#[serial]
async fn image_upload_validates_and_forwards() {
    setup_env();
    let repo = InMemRepo::new();
    let media = Arc::new(MockMedia::default());
    let app = test::init_service(
        App::new().app_data(state(&repo, Arc::default(), media.clone())).configure(config),
    )
    .await;

    for field in ["image", "file"] {
        let (ct, body) = build_multipart(field, &sample_png());
        let req = test::TestRequest::post()
            .uri("/api/upload-image")
            .insert_header(("Content-Type", ct))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "field {field}");
        let body: Value = test::read_body_json(resp).await;
        assert!(body["url"].as_str().unwrap().starts_with("https://media.test/"));
    }
    assert_eq!(media.uploads.lock().unwrap()[0].1, "image/png");

    // not an image
    let (ct, body) = build_multipart("image", b"plain text, definitely not a picture");
    let req = test::TestRequest::post().uri("/api/upload-image").insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 415);

    // wrong field name
    let (ct, body) = build_multipart("avatar", &sample_png());
    let req = test::TestRequest::post().uri("/api/upload-image").insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // over the limit
    let mut big = sample_png();
    big.resize(quill::routes::IMAGE_SIZE_LIMIT + 1, 0);
    let (ct, body) = build_multipart("image", &big);
    let req = test::TestRequest::post().uri("/api/upload-image").insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 413);

    assert_eq!(media.uploads.lock().unwrap().len(), 2);
}
