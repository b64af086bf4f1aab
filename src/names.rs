//! Display-name resolution — external lookup service seam.

use async_trait::async_trait;
use tracing::warn;

use crate::error::NameError;

/// Sentinel filled in when resolution keeps failing; distribution never
/// blocks on a name.
pub const INVALID_NAME: &str = "invalid name";

/// Maps an opaque user identifier to a display name. `Ok(None)` means the
/// service answered but knows no name for the id.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<Option<String>, NameError>;
}

/// HTTP client for the external name service.
pub struct HttpNameResolver {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNameResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NameResolver for HttpNameResolver {
    async fn resolve(&self, user_id: &str) -> Result<Option<String>, NameError> {
        let url = format!("{}/api/name/{user_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NameError::RequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(NameError::InvalidResponse(format!(
                "status {}",
                response.status()
            )));
        }

        let name = response
            .text()
            .await
            .map_err(|e| NameError::InvalidResponse(e.to_string()))?;
        let name = name.trim().trim_matches('"').to_string();
        Ok(if name.is_empty() { None } else { Some(name) })
    }
}

/// Resolve a display name with a bounded retry budget, falling back to the
/// [`INVALID_NAME`] sentinel after exhaustion.
pub async fn resolve_with_retries(
    resolver: &dyn NameResolver,
    user_id: &str,
    attempts: usize,
) -> String {
    for attempt in 0..attempts {
        match resolver.resolve(user_id).await {
            Ok(Some(name)) if !name.is_empty() => return name,
            Ok(_) => {}
            Err(e) => {
                warn!(user_id, attempt, error = %e, "Name resolution attempt failed");
            }
        }
    }
    INVALID_NAME.to_string()
}

/// Best-effort single lookup used for notification text: the raw id is an
/// acceptable stand-in when the service is down.
pub async fn resolve_or_id(resolver: &dyn NameResolver, user_id: &str) -> String {
    match resolver.resolve(user_id).await {
        Ok(Some(name)) if !name.is_empty() => name,
        Ok(_) => user_id.to_string(),
        Err(e) => {
            warn!(user_id, error = %e, "Could not resolve name, using id");
            user_id.to_string()
        }
    }
}
