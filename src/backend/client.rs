use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::dynamo::decode_value;
use super::error::BackendError;
use crate::executions::ExecutionLogRow;

/// Table holding execution log rows.
pub const EXECUTIONS_TABLE: &str = "executions";

#[derive(Debug, Deserialize)]
struct QueryResponse {
  #[serde(default, alias = "Items")]
  items: Vec<Value>,
}

/// BRMH backend API client
#[derive(Clone)]
pub struct BackendClient {
  client: Client,
  base_url: String,
}

impl BackendClient {
  pub fn new(base_url: &str) -> Result<Self, BackendError> {
    let client = Client::builder().build()?;
    Ok(Self::with_client(client, base_url))
  }

  pub fn with_client(client: Client, base_url: &str) -> Self {
    Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub(crate) fn http(&self) -> &Client {
    &self.client
  }

  pub(crate) fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  /// Send a request, turning non-2xx responses into [`BackendError::Status`]
  /// carrying the response body.
  pub(crate) async fn send(request: RequestBuilder) -> Result<Response, BackendError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status { status, body })
  }

  /// All log rows of one execution, parent and children alike.
  ///
  /// Rows may come back as DynamoDB attribute values or as plain JSON;
  /// both are accepted.
  pub async fn query_executions(
    &self,
    exec_id: &str,
  ) -> Result<Vec<ExecutionLogRow>, BackendError> {
    let body = json!({
      "KeyConditionExpression": "execId = :execId",
      "ExpressionAttributeValues": {
        ":execId": exec_id
      }
    });

    let request = self
      .client
      .post(self.url(&format!("dynamodb/tables/{}/query", EXECUTIONS_TABLE)))
      .json(&body);
    let response: QueryResponse = Self::send(request).await?.json().await?;

    response
      .items
      .iter()
      .map(|item| serde_json::from_value(decode_value(item)).map_err(BackendError::from))
      .collect()
  }
}
