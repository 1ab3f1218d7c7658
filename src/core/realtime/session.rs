//! Session negotiation: trade the server-side session endpoint for an
//! ephemeral realtime secret.
//!
//! The endpoint answers with either
//!
//! ```json
//! { "client_secret": "ek_...", "tools": [...], "prompts": {...} }
//! ```
//!
//! or `{ "error": "..." }`. `client_secret` may also arrive in the object form
//! `{ "value": "ek_...", "expires_at": 1700000000 }`. No retries happen here.

use std::time::Instant;

use reqwest::header::COOKIE;
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::base::{VoiceChatError, VoiceChatResult};
use super::openai::ToolDef;

/// A short-lived secret authorizing one realtime session.
pub struct SessionCredential {
    pub secret: Zeroizing<String>,
    pub issued_at: Instant,
    /// Unix timestamp, when the endpoint reports one
    pub expires_at: Option<u64>,
    /// Tools the server wants announced with every connection
    pub tools: Vec<ToolDef>,
    /// Opaque prompt material, kept for callers
    pub prompts: Option<serde_json::Value>,
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl SessionCredential {
    /// First and last few characters only, for display.
    pub fn masked_secret(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClientSecret {
    Plain(String),
    Object {
        value: String,
        #[serde(default)]
        expires_at: Option<u64>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SessionErrorBody {
    Message(String),
    Object {
        #[serde(default)]
        message: String,
    },
}

impl SessionErrorBody {
    fn into_message(self) -> String {
        match self {
            SessionErrorBody::Message(m) | SessionErrorBody::Object { message: m } => m,
        }
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default)]
    error: Option<SessionErrorBody>,
    #[serde(default)]
    tools: Vec<ToolDef>,
    #[serde(default)]
    prompts: Option<serde_json::Value>,
}

/// Fetches session credentials from the host's session endpoint.
#[derive(Clone)]
pub struct SessionNegotiator {
    http: reqwest::Client,
    url: String,
    cookie: Option<Zeroizing<String>>,
}

impl SessionNegotiator {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cookie: None,
        }
    }

    /// Send this cookie header with the request, standing in for the
    /// browser's same-origin credentials.
    pub fn with_cookie(mut self, cookie: Option<Zeroizing<String>>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> VoiceChatResult<SessionCredential> {
        debug!("Requesting session credential from {}", self.url);

        let mut request = self.http.get(self.url.as_str());
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| VoiceChatError::SessionError(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VoiceChatError::SessionError(format!("Failed to read response: {e}")))?;

        let mut parsed = serde_json::from_str::<SessionResponse>(&body);

        if let Some(error) = parsed.as_mut().ok().and_then(|r| r.error.take()) {
            let message = error.into_message();
            return Err(VoiceChatError::SessionError(if message.is_empty() {
                format!("Session endpoint error ({status})")
            } else {
                message
            }));
        }

        if !status.is_success() {
            return Err(VoiceChatError::SessionError(format!(
                "Session endpoint returned {status}"
            )));
        }

        let parsed = parsed.map_err(|e| {
            VoiceChatError::SessionError(format!("Invalid session response: {e}"))
        })?;

        let (secret, expires_at) = match parsed.client_secret {
            Some(ClientSecret::Plain(secret)) => (secret, None),
            Some(ClientSecret::Object { value, expires_at }) => (value, expires_at),
            None => {
                return Err(VoiceChatError::SessionError(
                    "No session token available".to_string(),
                ));
            }
        };
        if secret.is_empty() {
            return Err(VoiceChatError::SessionError(
                "Empty session token".to_string(),
            ));
        }

        info!(
            "Session credential received ({} server tools)",
            parsed.tools.len()
        );

        Ok(SessionCredential {
            secret: Zeroizing::new(secret),
            issued_at: Instant::now(),
            expires_at,
            tools: parsed.tools,
            prompts: parsed.prompts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn negotiator(server: &MockServer) -> SessionNegotiator {
        SessionNegotiator::new(reqwest::Client::new(), format!("{}/session", server.uri()))
    }

    #[tokio::test]
    async fn test_fetch_plain_secret_with_tools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_secret": "ek_test_1234567890",
                "tools": [{"type": "function", "name": "create_flashcard", "parameters": {"type": "object"}}],
                "prompts": {"system": "be brief"}
            })))
            .mount(&server)
            .await;

        let credential = negotiator(&server).await.fetch().await.unwrap();
        assert_eq!(credential.secret.as_str(), "ek_test_1234567890");
        assert_eq!(credential.tools.len(), 1);
        assert_eq!(credential.tools[0].name, "create_flashcard");
        assert_eq!(credential.prompts, Some(json!({"system": "be brief"})));
        assert_eq!(credential.masked_secret(), "ek_t...7890");
    }

    #[tokio::test]
    async fn test_fetch_object_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_secret": {"value": "ek_obj", "expires_at": 1700000000u64}
            })))
            .mount(&server)
            .await;

        let credential = negotiator(&server).await.fetch().await.unwrap();
        assert_eq!(credential.secret.as_str(), "ek_obj");
        assert_eq!(credential.expires_at, Some(1700000000));
        assert!(credential.tools.is_empty());
    }

    #[tokio::test]
    async fn test_error_payload_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Not signed in"})),
            )
            .mount(&server)
            .await;

        let err = negotiator(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, VoiceChatError::SessionError(ref m) if m == "Not signed in"));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = negotiator(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, VoiceChatError::SessionError(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_cookie_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cookie", "_session=abc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"client_secret": "ek_cookie"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credential = negotiator(&server)
            .await
            .with_cookie(Some(Zeroizing::new("_session=abc".to_string())))
            .fetch()
            .await
            .unwrap();
        assert_eq!(credential.secret.as_str(), "ek_cookie");
    }
}
