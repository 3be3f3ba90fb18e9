use chrono::{Duration, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{AppConfig, CurrentUser, Session};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("supabase is not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(String),
    #[error("identity provider error: {0}")]
    Api(String),
    #[error("redirect url has no access token")]
    MissingToken,
}

impl From<AuthError> for crate::error::AdminError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotConfigured => crate::error::AdminError::Config(err.to_string()),
            other => crate::error::AdminError::Remote(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: UserResponse,
}

/// Client for the hosted identity endpoints under `/auth/v1`.
pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    client: Client,
}

impl SupabaseAuth {
    pub fn from_config(config: &AppConfig) -> Result<Self, AuthError> {
        let (url, key) = config
            .supabase_credentials()
            .map_err(|_| AuthError::NotConfigured)?;
        Ok(Self::new(url, key))
    }

    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        Url::parse(&format!("{}/auth/v1/{path}", self.base_url))
            .map_err(|err| AuthError::Api(err.to_string()))
    }

    /// URL to open in a browser to start the OAuth redirect flow.
    pub fn oauth_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<Url, AuthError> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut().append_pair("provider", provider);
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        Ok(url)
    }

    pub async fn send_magic_link(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::Api("email is required".to_string()));
        }
        let mut url = self.endpoint("otp")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "create_user": true }))
            .send()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    /// Exchanges the one-time code from a sign-in email for a session.
    pub async fn verify_otp(&self, email: &str, token: &str) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(self.endpoint("verify")?)
            .header("apikey", &self.anon_key)
            .json(&json!({ "type": "email", "email": email.trim(), "token": token.trim() }))
            .send()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Api(format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| AuthError::Api(err.to_string()))?;
        Ok(session_from_token(token))
    }

    /// Completes the redirect flow from the URL the browser landed on.
    pub async fn session_from_redirect(&self, redirect: &str) -> Result<Session, AuthError> {
        let fragment = parse_redirect(redirect)?;
        let user = self.current_user(&fragment.access_token).await?;
        Ok(Session {
            access_token: fragment.access_token,
            refresh_token: fragment.refresh_token,
            expires_at: fragment.expires_in.map(expires_at),
            user,
        })
    }

    pub async fn current_user(&self, access_token: &str) -> Result<CurrentUser, AuthError> {
        let response = self
            .client
            .get(self.endpoint("user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Api(format!("HTTP {status}: {body}")));
        }
        let user: UserResponse =
            serde_json::from_str(&body).map_err(|err| AuthError::Api(err.to_string()))?;
        Ok(CurrentUser {
            id: user.id,
            email: user.email,
        })
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| AuthError::Http(err.to_string()))?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "sign out was not acknowledged");
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
struct RedirectTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

fn parse_redirect(redirect: &str) -> Result<RedirectTokens, AuthError> {
    let url = Url::parse(redirect.trim()).map_err(|err| AuthError::Api(err.to_string()))?;
    let fragment = url.fragment().unwrap_or_default();
    let params = url::form_urlencoded::parse(fragment.as_bytes())
        .chain(url.query_pairs())
        .collect::<Vec<_>>();
    let get = |name: &str| {
        params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.to_string())
    };
    if let Some(description) = get("error_description") {
        return Err(AuthError::Api(description));
    }
    Ok(RedirectTokens {
        access_token: get("access_token").ok_or(AuthError::MissingToken)?,
        refresh_token: get("refresh_token"),
        expires_in: get("expires_in").and_then(|s| s.parse().ok()),
    })
}

fn expires_at(seconds: i64) -> String {
    (Utc::now() + Duration::seconds(seconds)).to_rfc3339()
}

fn session_from_token(token: TokenResponse) -> Session {
    Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at: token.expires_in.map(expires_at),
        user: CurrentUser {
            id: token.user.id,
            email: token.user.email,
        },
    }
}
