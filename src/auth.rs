use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{response_text, RelayError, RelayResult};

/// Identity of the caller that triggered a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub team_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Issues per-team access tokens and validates inbound callers.
///
/// One instance is built per process and shared by every invocation, so
/// implementations must be safe to call concurrently.
#[async_trait]
pub trait AuthenticationGateway: Send + Sync {
    async fn authenticate(&self, token: Option<&str>) -> RelayResult<AuthenticatedUser>;

    async fn get_token(&self, team_id: &str) -> RelayResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    refresh_token: &'a str,
    team_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Gateway backed by the ChatDaddy authentication service.
pub struct HttpAuthGateway {
    client: reqwest::Client,
    refresh_token: String,
    service_url: String,
}

impl HttpAuthGateway {
    pub fn new(refresh_token: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), refresh_token, service_url)
    }

    pub fn with_client(
        client: reqwest::Client,
        refresh_token: impl Into<String>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            refresh_token: refresh_token.into(),
            service_url: service_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AuthenticationGateway for HttpAuthGateway {
    async fn authenticate(&self, token: Option<&str>) -> RelayResult<AuthenticatedUser> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::Authentication("missing bearer token".to_string()))?;

        let url = format!("{}/user", self.service_url);
        debug!("Validating caller token against {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RelayError::Authentication(format!("auth service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response_text(response).await;
            warn!("Caller token rejected ({}): {}", status, body);
            return Err(RelayError::Authentication(format!(
                "token rejected ({}): {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<AuthenticatedUser>()
            .await
            .map_err(|e| RelayError::Authentication(format!("invalid auth response: {e}")))
    }

    async fn get_token(&self, team_id: &str) -> RelayResult<String> {
        let url = format!("{}/token", self.service_url);
        debug!("Requesting access token for team {}", team_id);

        let response = self
            .client
            .post(&url)
            .json(&TokenRequest {
                refresh_token: &self.refresh_token,
                team_id,
            })
            .send()
            .await
            .map_err(|e| RelayError::Authentication(format!("auth service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response_text(response).await;
            return Err(RelayError::Authentication(format!(
                "could not refresh token for team {team_id} ({}): {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Authentication(format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }
}
