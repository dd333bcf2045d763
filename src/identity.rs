//! Client side of the identity provider: profile lookups for subjects other
//! than the caller (author names, public profile pages).

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Shown wherever a subject's profile cannot be resolved.
pub const UNKNOWN_AUTHOR: &str = "Unknown author";

// Upper bound on `user_id` parameters per directory request.
const BATCH_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("user not found")]
    NotFound,
    #[error("identity provider returned status {0}")]
    Status(u16),
    #[error("identity provider request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    /// Milliseconds since the epoch, as reported by the provider.
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl UserProfile {
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    /// First name, then full name, then email.
    pub fn display_name(&self) -> Option<String> {
        non_empty(self.first_name.clone())
            .or_else(|| self.full_name())
            .or_else(|| non_empty(self.email.clone()))
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn get_user(&self, subject: &str) -> Result<UserProfile, GatewayError>;
    /// Profiles keyed by subject; unknown subjects are simply absent.
    async fn get_users(&self, subjects: &[String]) -> Result<HashMap<String, UserProfile>, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct ProviderEmail {
    #[serde(default)]
    id: Option<String>,
    email_address: String,
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ProviderEmail>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

impl From<ProviderUser> for UserProfile {
    fn from(u: ProviderUser) -> Self {
        let primary = u
            .primary_email_address_id
            .as_ref()
            .and_then(|pid| u.email_addresses.iter().find(|e| e.id.as_ref() == Some(pid)))
            .or_else(|| u.email_addresses.first())
            .map(|e| e.email_address.clone());
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: primary,
            image_url: u.image_url,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Clerk-compatible backend API client.
pub struct HttpIdentityGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpIdentityGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl IdentityGateway for HttpIdentityGateway {
    async fn get_user(&self, subject: &str) -> Result<UserProfile, GatewayError> {
        let url = format!("{}/v1/users/{}", self.base_url, urlencoding::encode(subject));
        let resp = self.client.get(url).bearer_auth(&self.api_key).send().await?;
        match resp.status() {
            s if s == reqwest::StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
            s if !s.is_success() => Err(GatewayError::Status(s.as_u16())),
            _ => Ok(resp.json::<ProviderUser>().await?.into()),
        }
    }

    async fn get_users(&self, subjects: &[String]) -> Result<HashMap<String, UserProfile>, GatewayError> {
        let mut out = HashMap::with_capacity(subjects.len());
        for chunk in subjects.chunks(BATCH_SIZE) {
            let mut query: Vec<(&str, String)> = chunk.iter().map(|s| ("user_id", s.clone())).collect();
            query.push(("limit", chunk.len().to_string()));
            let resp = self
                .client
                .get(format!("{}/v1/users", self.base_url))
                .bearer_auth(&self.api_key)
                .query(&query)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(GatewayError::Status(resp.status().as_u16()));
            }
            for user in resp.json::<Vec<ProviderUser>>().await? {
                out.insert(user.id.clone(), user.into());
            }
        }
        Ok(out)
    }
}

/// Display names for every subject in one response, resolved with a single
/// batched gateway call. A failed lookup degrades to [`UNKNOWN_AUTHOR`] per
/// item rather than failing the request.
#[derive(Debug, Default)]
pub struct DisplayNames(HashMap<String, String>);

impl DisplayNames {
    pub async fn resolve<'a, I>(gateway: &dyn IdentityGateway, subjects: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: Vec<String> = subjects
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Self::default();
        }
        match gateway.get_users(&ids).await {
            Ok(profiles) => Self(
                profiles
                    .into_iter()
                    .filter_map(|(id, p)| p.display_name().map(|name| (id, name)))
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, subjects = ids.len(), "display name lookup failed, using placeholders");
                Self::default()
            }
        }
    }

    pub fn name_for(&self, subject: &str) -> String {
        self.0.get(subject).cloned().unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
    }
}

/// Public profile payload of `GET /users/{userId}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileView {
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl From<UserProfile> for UserProfileView {
    fn from(p: UserProfile) -> Self {
        Self {
            full_name: p.full_name(),
            first_name: p.first_name,
            email: p.email,
            image_url: p.image_url,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first: Option<&str>, last: Option<&str>, email: Option<&str>) -> UserProfile {
        UserProfile {
            id: "user_1".into(),
            first_name: first.map(Into::into),
            last_name: last.map(Into::into),
            email: email.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn display_name_prefers_first_then_full_then_email() {
        assert_eq!(profile(Some("Ada"), Some("Lovelace"), Some("a@x.io")).display_name().as_deref(), Some("Ada"));
        assert_eq!(profile(None, Some("Lovelace"), Some("a@x.io")).display_name().as_deref(), Some("Lovelace"));
        assert_eq!(profile(Some(""), None, Some("a@x.io")).display_name().as_deref(), Some("a@x.io"));
        assert_eq!(profile(None, None, None).display_name(), None);
    }

    #[test]
    fn provider_user_picks_primary_email() {
        let raw = serde_json::json!({
            "id": "user_2",
            "first_name": "Grace",
            "last_name": "Hopper",
            "email_addresses": [
                {"id": "e1", "email_address": "old@x.io"},
                {"id": "e2", "email_address": "grace@x.io"}
            ],
            "primary_email_address_id": "e2",
            "created_at": 1700000000000i64
        });
        let user: UserProfile = serde_json::from_value::<ProviderUser>(raw).unwrap().into();
        assert_eq!(user.email.as_deref(), Some("grace@x.io"));
        assert_eq!(user.full_name().as_deref(), Some("Grace Hopper"));
        let view = UserProfileView::from(user);
        assert_eq!(serde_json::to_value(&view).unwrap()["fullName"], "Grace Hopper");
    }
}
