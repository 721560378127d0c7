use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use stream_api::{DependencyClient, DependencyKind, FormatId, StreamError};

/// Default request timeout for the dependency server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(serde::Deserialize)]
struct PutResponse {
    id: FormatId,
}

/// Dependency server over HTTP.
///
/// - `GET  {base_uri}/{kind}/{id}?group={group}` → JSON document
/// - `POST {base_uri}/{kind}?group={group}`      → `{"id": "..."}`
#[derive(Debug, Clone)]
pub struct HttpDependencyClient {
    http: reqwest::Client,
    base_uri: String,
    group: String,
}

impl HttpDependencyClient {
    pub fn new(base_uri: impl Into<String>, group: impl Into<String>) -> Result<Self, StreamError> {
        Self::with_timeout(base_uri, group, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_uri: impl Into<String>,
        group: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StreamError::config(format!("dependency http client: {e}")))?;
        let base_uri = base_uri.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_uri,
            group: group.into(),
        })
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    fn collection_url(&self, kind: DependencyKind) -> String {
        format!("{}/{}", self.base_uri, kind.path())
    }

    fn document_url(&self, kind: DependencyKind, id: &FormatId) -> String {
        format!("{}/{}/{}", self.base_uri, kind.path(), id)
    }

    async fn fetch(&self, kind: DependencyKind, id: &FormatId) -> Result<serde_json::Value, StreamError> {
        let url = self.document_url(kind, id);
        let resp = self
            .http
            .get(&url)
            .query(&[("group", self.group.as_str())])
            .send()
            .await
            .map_err(|e| StreamError::unresolved(id, format!("HTTP request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StreamError::unresolved(
                id,
                format!("unknown {kind} in group '{}'", self.group),
            ));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| StreamError::unresolved(id, format!("read response body: {e}")))?;

        if !status.is_success() {
            return Err(StreamError::unresolved(id, format!("dependency server HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| StreamError::unresolved(id, format!("parse JSON: {e}")))
    }

    async fn store(&self, kind: DependencyKind, document: &serde_json::Value) -> Result<FormatId, StreamError> {
        let url = self.collection_url(kind);
        let body = serde_json::to_vec(document).map_err(|e| StreamError::encode(e.to_string()))?;
        let resp = self
            .http
            .post(&url)
            .query(&[("group", self.group.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("POST {url}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StreamError::transport(format!("read response body: {e}")))?;

        if !status.is_success() {
            return Err(StreamError::transport(format!("dependency server HTTP {status}: {body}")));
        }

        let parsed: PutResponse =
            serde_json::from_str(&body).map_err(|e| StreamError::transport(format!("parse put response: {e}")))?;
        tracing::debug!(%kind, id = %parsed.id, group = %self.group, "stored dependency");
        Ok(parsed.id)
    }
}

impl DependencyClient for HttpDependencyClient {
    fn get(
        &self,
        kind: DependencyKind,
        id: &FormatId,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, StreamError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move { self.fetch(kind, &id).await })
    }

    fn put(
        &self,
        kind: DependencyKind,
        document: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<FormatId, StreamError>> + Send + '_>> {
        let document = document.clone();
        Box::pin(async move { self.store(kind, &document).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_strip_trailing_slash() {
        let client = HttpDependencyClient::new("http://localhost:8180/api/dependencies/", "dev").unwrap();
        assert_eq!(client.base_uri(), "http://localhost:8180/api/dependencies");
        assert_eq!(
            client.document_url(DependencyKind::DataFormat, &FormatId::new("ab12")),
            "http://localhost:8180/api/dependencies/dataformat/ab12"
        );
        assert_eq!(
            client.collection_url(DependencyKind::AtlasConfiguration),
            "http://localhost:8180/api/dependencies/atlasconfiguration"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_unresolved() {
        let client =
            HttpDependencyClient::with_timeout("http://127.0.0.1:1/api", "dev", Duration::from_millis(500)).unwrap();
        let err = client.get(DependencyKind::DataFormat, &FormatId::new("ab12")).await.unwrap_err();
        assert!(matches!(err, StreamError::UnresolvedFormat { ref id, .. } if id == "ab12"), "{err:?}");
    }
}
