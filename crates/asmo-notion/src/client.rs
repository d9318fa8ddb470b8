use std::time::Duration;

use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::NotionError;

pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A database as listed to the UI.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatabaseSummary {
    pub id: String,
    pub name: String,
    pub icon: String,
}

impl DatabaseSummary {
    pub fn from_search_result(db: &Value) -> Self {
        let name = db
            .pointer("/title/0/plain_text")
            .and_then(Value::as_str)
            .unwrap_or("Untitled");
        let icon = db
            .pointer("/icon/emoji")
            .and_then(Value::as_str)
            .unwrap_or("📄");
        Self {
            id: db.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
        }
    }
}

/// Authenticated client for one integration token.
#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl std::fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(token: SecretString) -> Result<Self, NotionError> {
        Self::with_base_url(token, NOTION_API_URL)
    }

    pub fn with_base_url(
        token: SecretString,
        base_url: impl Into<String>,
    ) -> Result<Self, NotionError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotionError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, NotionError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(self.token.expose_secret())
            .header("Notion-Version", NOTION_VERSION)
            .header("accept", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<Value>().await?);
        }

        // Notion errors look like {"object":"error","status":..,"code":..,"message":..}
        let text = resp.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let code = parsed
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(text);
        tracing::warn!(%method, path, status = status.as_u16(), code = %code, "Notion request failed");
        Err(NotionError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// The bot user behind the token. Cheapest authenticated call.
    pub async fn users_me(&self) -> Result<Value, NotionError> {
        self.request(Method::GET, "/users/me", None).await
    }

    pub async fn search(&self, body: Value) -> Result<Value, NotionError> {
        self.request(Method::POST, "/search", Some(&body)).await
    }

    /// Databases shared with the integration.
    #[instrument(skip(self))]
    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, NotionError> {
        let response = self
            .search(json!({ "filter": { "property": "object", "value": "database" } }))
            .await?;
        let results = response
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| NotionError::Decode("search response without results".into()))?;
        Ok(results.iter().map(DatabaseSummary::from_search_result).collect())
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<Value, NotionError> {
        self.request(Method::GET, &format!("/databases/{database_id}"), None)
            .await
    }

    /// `body` carries any of `filter`, `sorts`, `page_size`, `start_cursor`.
    #[instrument(skip(self, body))]
    pub async fn query_database(&self, database_id: &str, body: Value) -> Result<Value, NotionError> {
        self.request(
            Method::POST,
            &format!("/databases/{database_id}/query"),
            Some(&body),
        )
        .await
    }

    #[instrument(skip(self, properties))]
    pub async fn create_page(&self, database_id: &str, properties: Value) -> Result<Value, NotionError> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.request(Method::POST, "/pages", Some(&body)).await
    }

    #[instrument(skip(self, properties))]
    pub async fn update_page(&self, page_id: &str, properties: Value) -> Result<Value, NotionError> {
        let body = json!({ "properties": properties });
        self.request(Method::PATCH, &format!("/pages/{page_id}"), Some(&body))
            .await
    }

    /// Notion has no hard delete for pages; archiving is the delete.
    pub async fn archive_page(&self, page_id: &str) -> Result<Value, NotionError> {
        let body = json!({ "archived": true });
        self.request(Method::PATCH, &format!("/pages/{page_id}"), Some(&body))
            .await
    }

    pub async fn retrieve_page(&self, page_id: &str) -> Result<Value, NotionError> {
        self.request(Method::GET, &format!("/pages/{page_id}"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NotionClient {
        NotionClient::with_base_url(SecretString::from("secret_test"), server.uri()).unwrap()
    }

    #[tokio::test]
    async fn sends_auth_and_version_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer secret_test"))
            .and(header("notion-version", NOTION_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "user"})))
            .expect(1)
            .mount(&server)
            .await;

        let me = client(&server).users_me().await.unwrap();
        assert_eq!(me["object"], "user");
    }

    #[tokio::test]
    async fn api_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "object": "error",
                "status": 401,
                "code": "unauthorized",
                "message": "API token is invalid."
            })))
            .mount(&server)
            .await;

        let err = client(&server).users_me().await.unwrap_err();
        assert!(err.is_unauthorized());
        match err {
            NotionError::Api { code, message, .. } => {
                assert_eq!(code, "unauthorized");
                assert_eq!(message, "API token is invalid.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_kept_as_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pages/p1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).retrieve_page("p1").await.unwrap_err();
        assert!(matches!(
            err,
            NotionError::Api { status: 502, ref message, .. } if message == "bad gateway"
        ));
    }

    #[tokio::test]
    async fn create_page_wraps_parent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(body_json(json!({
                "parent": { "database_id": "db1" },
                "properties": { "Name": { "title": [] } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page1"})))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server)
            .create_page("db1", json!({ "Name": { "title": [] } }))
            .await
            .unwrap();
        assert_eq!(page["id"], "page1");
    }

    #[tokio::test]
    async fn archive_page_patches_archived_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/pages/page1"))
            .and(body_json(json!({ "archived": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"archived": true})))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server).archive_page("page1").await.unwrap();
        assert_eq!(page["archived"], true);
    }

    #[tokio::test]
    async fn list_databases_maps_title_and_icon() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": "db1", "title": [{"plain_text": "Memories"}], "icon": {"emoji": "🧠"}},
                    {"id": "db2", "title": [], "icon": null}
                ]
            })))
            .mount(&server)
            .await;

        let dbs = client(&server).list_databases().await.unwrap();
        assert_eq!(
            dbs,
            vec![
                DatabaseSummary { id: "db1".into(), name: "Memories".into(), icon: "🧠".into() },
                DatabaseSummary { id: "db2".into(), name: "Untitled".into(), icon: "📄".into() },
            ]
        );
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = NotionClient::with_base_url(SecretString::from("t"), "http://localhost:1/").unwrap();
        assert_eq!(c.base_url(), "http://localhost:1");
    }
}
