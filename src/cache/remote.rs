//! HTTP client for the backend's shared cache endpoints.

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::error::CacheError;
use super::traits::RemoteCache;

/// Per-request timeout, so a hung backend cannot stall the fail-open path.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct HealthResponse {
  #[serde(default)]
  healthy: bool,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
  #[serde(default)]
  data: Option<Value>,
}

/// Remote cache tier served by `{backend}/api/cache`.
#[derive(Clone)]
pub struct HttpRemoteCache {
  client: Client,
  endpoint: String,
}

impl HttpRemoteCache {
  pub fn new(backend_url: &str) -> Result<Self, CacheError> {
    let client = Client::builder().timeout(REMOTE_TIMEOUT).build()?;
    Ok(Self::with_client(client, backend_url))
  }

  pub fn with_client(client: Client, backend_url: &str) -> Self {
    Self {
      client,
      endpoint: format!("{}/api/cache", backend_url.trim_end_matches('/')),
    }
  }
}

/// Map non-2xx responses to [`CacheError::Status`].
fn check_status(response: Response) -> Result<Response, CacheError> {
  let status = response.status();
  if status.is_success() {
    Ok(response)
  } else {
    Err(CacheError::Status(status))
  }
}

impl RemoteCache for HttpRemoteCache {
  async fn health(&self) -> Result<bool, CacheError> {
    let response = self
      .client
      .get(format!("{}/health", self.endpoint))
      .send()
      .await?;
    let body: HealthResponse = check_status(response)?.json().await?;
    Ok(body.healthy)
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    let response = self
      .client
      .get(&self.endpoint)
      .query(&[("key", key)])
      .send()
      .await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let body: GetResponse = check_status(response)?.json().await?;
    Ok(body.data.filter(|v| !v.is_null()))
  }

  async fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
    let response = self
      .client
      .post(&self.endpoint)
      .json(&json!({ "key": key, "value": value }))
      .send()
      .await?;
    check_status(response)?;
    Ok(())
  }

  async fn del(&self, key: &str) -> Result<(), CacheError> {
    let response = self
      .client
      .delete(&self.endpoint)
      .query(&[("key", key)])
      .send()
      .await?;
    check_status(response)?;
    Ok(())
  }

  async fn clear(&self, prefix: Option<&str>) -> Result<(), CacheError> {
    let response = self
      .client
      .delete(&self.endpoint)
      .query(&[("prefix", prefix.unwrap_or(""))])
      .send()
      .await?;
    check_status(response)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::{Matcher, Server};

  #[tokio::test]
  async fn test_health_parses_flag() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/api/cache/health")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"healthy":true}"#)
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&server.url()).unwrap();
    assert!(remote.health().await.unwrap());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_health_non_2xx_is_error() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/api/cache/health")
      .with_status(503)
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&server.url()).unwrap();
    let err = remote.health().await.unwrap_err();
    assert!(matches!(err, CacheError::Status(StatusCode::SERVICE_UNAVAILABLE)));
  }

  #[tokio::test]
  async fn test_health_malformed_body_is_error() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/api/cache/health")
      .with_status(200)
      .with_body("<html>oops</html>")
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&server.url()).unwrap();
    assert!(remote.health().await.is_err());
  }

  #[tokio::test]
  async fn test_get_hit_and_null_miss() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/api/cache")
      .match_query(Matcher::UrlEncoded("key".into(), "table_data:A:1".into()))
      .with_status(200)
      .with_body(r#"{"data":{"rows":[1,2]}}"#)
      .create_async()
      .await;
    server
      .mock("GET", "/api/cache")
      .match_query(Matcher::UrlEncoded("key".into(), "missing".into()))
      .with_status(200)
      .with_body(r#"{"data":null}"#)
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&format!("{}/", server.url())).unwrap();
    assert_eq!(
      remote.get("table_data:A:1").await.unwrap(),
      Some(json!({"rows": [1, 2]}))
    );
    assert_eq!(remote.get("missing").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_set_posts_key_and_value() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/api/cache")
      .match_body(Matcher::Json(json!({"key": "k", "value": [1, 2]})))
      .with_status(201)
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&server.url()).unwrap();
    remote.set("k", &json!([1, 2])).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_del_and_clear_use_query_params() {
    let mut server = Server::new_async().await;
    let del = server
      .mock("DELETE", "/api/cache")
      .match_query(Matcher::UrlEncoded("key".into(), "k".into()))
      .with_status(200)
      .create_async()
      .await;
    let clear = server
      .mock("DELETE", "/api/cache")
      .match_query(Matcher::UrlEncoded("prefix".into(), "table_data:".into()))
      .with_status(200)
      .create_async()
      .await;

    let remote = HttpRemoteCache::new(&server.url()).unwrap();
    remote.del("k").await.unwrap();
    remote.clear(Some("table_data:")).await.unwrap();
    del.assert_async().await;
    clear.assert_async().await;
  }
}
