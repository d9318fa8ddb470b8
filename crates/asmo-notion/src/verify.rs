use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;

use crate::client::{NotionClient, NOTION_API_URL};
use crate::error::NotionError;

/// Checks whether an integration token is accepted by Notion.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `users/me` succeeds with this token.
    async fn validate_token(&self, token: &str) -> Result<bool, NotionError>;

    /// `search` succeeds with this token.
    async fn validate_key(&self, token: &str) -> Result<bool, NotionError>;
}

/// Verifier that asks the real API (or whatever `base_url` points at).
#[derive(Clone, Debug)]
pub struct NotionVerifier {
    base_url: String,
}

impl Default for NotionVerifier {
    fn default() -> Self {
        Self::new(NOTION_API_URL)
    }
}

impl NotionVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn client(&self, token: &str) -> Result<NotionClient, NotionError> {
        NotionClient::with_base_url(SecretString::from(token), self.base_url.clone())
    }
}

// An auth rejection means "invalid"; anything else is a real failure.
fn to_validity(result: Result<serde_json::Value, NotionError>) -> Result<bool, NotionError> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_unauthorized() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl TokenVerifier for NotionVerifier {
    async fn validate_token(&self, token: &str) -> Result<bool, NotionError> {
        to_validity(self.client(token)?.users_me().await)
    }

    async fn validate_key(&self, token: &str) -> Result<bool, NotionError> {
        to_validity(self.client(token)?.search(json!({ "query": "" })).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "user"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "object": "error", "status": 401, "code": "unauthorized", "message": "bad"
            })))
            .mount(&server)
            .await;

        let verifier = NotionVerifier::new(server.uri());
        assert!(verifier.validate_token("good").await.unwrap());
        assert!(!verifier.validate_token("bad").await.unwrap());
    }

    #[tokio::test]
    async fn server_error_is_not_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let verifier = NotionVerifier::new(server.uri());
        assert!(verifier.validate_key("any").await.is_err());
    }

    #[tokio::test]
    async fn valid_key_via_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let verifier = NotionVerifier::new(server.uri());
        assert!(verifier.validate_key("secret_ok").await.unwrap());
    }
}
