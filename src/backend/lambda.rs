//! Lambda function management through the AWS-facing proxy.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::error::BackendError;

/// Upload attempts while the function is still being created.
pub const DEPLOY_MAX_ATTEMPTS: u32 = 5;

/// Fixed pause between upload attempts.
pub const DEPLOY_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFunctionRequest {
  pub function_name: String,
  pub runtime: String,
  pub handler: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_size: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u32>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,
}

impl CreateFunctionRequest {
  pub fn new(
    function_name: impl Into<String>,
    runtime: impl Into<String>,
    handler: impl Into<String>,
  ) -> Self {
    Self {
      function_name: function_name.into(),
      runtime: runtime.into(),
      handler: handler.into(),
      role: None,
      memory_size: None,
      timeout: None,
      environment: BTreeMap::new(),
    }
  }
}

/// Function state as reported by the proxy. Both camelCase and AWS's own
/// PascalCase field names are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
  #[serde(default, alias = "FunctionName")]
  pub function_name: Option<String>,
  #[serde(default, alias = "State")]
  pub state: Option<String>,
  #[serde(default, alias = "StateReason")]
  pub state_reason: Option<String>,
  #[serde(default, alias = "LastUpdateStatus")]
  pub last_update_status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl FunctionStatus {
  /// Unwrap `{"Configuration": {...}}` style payloads.
  fn from_payload(payload: Value) -> Result<Self, BackendError> {
    let inner = match payload {
      Value::Object(mut obj) => match obj.remove("Configuration").or_else(|| obj.remove("configuration")) {
        Some(config @ Value::Object(_)) => config,
        Some(other) => {
          obj.insert("configuration".to_string(), other);
          Value::Object(obj)
        }
        None => Value::Object(obj),
      },
      other => other,
    };
    Ok(serde_json::from_value(inner)?)
  }
}

/// Outcome of [`LambdaClient::deploy`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentReport {
  pub function_name: String,
  /// Upload attempts used, including the successful one
  pub attempts: u32,
  pub status: FunctionStatus,
}

#[derive(Clone)]
pub struct LambdaClient {
  client: Client,
  base_url: Url,
  max_attempts: u32,
  retry_delay: Duration,
}

impl LambdaClient {
  pub fn new(aws_url: &str) -> Result<Self, BackendError> {
    let mut base_url = Url::parse(aws_url)?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      client: Client::builder().build()?,
      base_url,
      max_attempts: DEPLOY_MAX_ATTEMPTS,
      retry_delay: DEPLOY_RETRY_DELAY,
    })
  }

  pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
    self.max_attempts = max_attempts.max(1);
    self.retry_delay = retry_delay;
    self
  }

  /// `{aws}/api/aws/lambda[/<name>[/<suffix>]]`, with the name escaped.
  fn endpoint(&self, name: Option<&str>, suffix: Option<&str>) -> Result<Url, BackendError> {
    let mut url = self.base_url.join("api/aws/lambda")?;
    {
      let mut segments = url
        .path_segments_mut()
        .map_err(|_| BackendError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
      segments.extend(name);
      segments.extend(suffix);
    }
    Ok(url)
  }

  pub async fn create_function(
    &self,
    request: &CreateFunctionRequest,
  ) -> Result<FunctionStatus, BackendError> {
    let response = super::BackendClient::send(self.client.post(self.endpoint(None, None)?).json(request)).await?;
    let payload: Value = response.json().await.unwrap_or(Value::Null);
    match payload {
      Value::Null => Ok(FunctionStatus {
        function_name: Some(request.function_name.clone()),
        ..Default::default()
      }),
      payload => FunctionStatus::from_payload(payload),
    }
  }

  pub async fn get_function(&self, name: &str) -> Result<FunctionStatus, BackendError> {
    let response = super::BackendClient::send(self.client.get(self.endpoint(Some(name), None)?)).await?;
    FunctionStatus::from_payload(response.json().await?)
  }

  /// Upload a zipped deployment package.
  pub async fn upload_code(&self, name: &str, zip: Vec<u8>) -> Result<(), BackendError> {
    let part = Part::bytes(zip)
      .file_name(format!("{}.zip", name))
      .mime_str("application/zip")?;
    let form = Form::new().part("file", part);

    super::BackendClient::send(
      self
        .client
        .put(self.endpoint(Some(name), Some("code"))?)
        .multipart(form),
    )
    .await?;
    Ok(())
  }

  /// Create the function, then upload its code, retrying the upload while
  /// the proxy reports that the function is still being created.
  pub async fn deploy(&self, request: &CreateFunctionRequest, zip: Vec<u8>) -> Result<DeploymentReport, BackendError> {
    let name = request.function_name.as_str();
    self.create_function(request).await?;
    info!(function = name, "lambda function created");

    let mut attempts = 0;
    loop {
      attempts += 1;
      match self.upload_code(name, zip.clone()).await {
        Ok(()) => break,
        Err(e) if e.is_still_creating() && attempts < self.max_attempts => {
          warn!(
            function = name,
            attempt = attempts,
            max_attempts = self.max_attempts,
            error = %e,
            "function not ready for code upload, retrying"
          );
          tokio::time::sleep(self.retry_delay).await;
        }
        Err(e) => return Err(e),
      }
    }
    info!(function = name, attempts, "lambda code uploaded");

    let status = self.get_function(name).await?;
    Ok(DeploymentReport {
      function_name: name.to_string(),
      attempts,
      status,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::{Matcher, Server};
  use serde_json::json;

  fn client(server: &Server) -> LambdaClient {
    LambdaClient::new(&server.url())
      .unwrap()
      .with_retry(DEPLOY_MAX_ATTEMPTS, Duration::from_millis(1))
  }

  #[test]
  fn test_status_accepts_aws_configuration_shape() {
    let status = FunctionStatus::from_payload(json!({
      "Configuration": {"FunctionName": "orders", "State": "Active", "LastUpdateStatus": "Successful"}
    }))
    .unwrap();
    assert_eq!(status.function_name.as_deref(), Some("orders"));
    assert_eq!(status.state.as_deref(), Some("Active"));
    assert_eq!(status.last_update_status.as_deref(), Some("Successful"));
  }

  #[test]
  fn test_create_request_shape() {
    let mut request = CreateFunctionRequest::new("orders", "nodejs18.x", "index.handler");
    request.memory_size = Some(256);
    assert_eq!(
      serde_json::to_value(&request).unwrap(),
      json!({"functionName": "orders", "runtime": "nodejs18.x", "handler": "index.handler", "memorySize": 256})
    );
  }

  #[tokio::test]
  async fn test_get_function_escapes_name() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/api/aws/lambda/my%20fn")
      .with_status(200)
      .with_body(r#"{"functionName":"my fn","state":"Pending"}"#)
      .create_async()
      .await;

    let status = client(&server).get_function("my fn").await.unwrap();
    mock.assert_async().await;
    assert_eq!(status.state.as_deref(), Some("Pending"));
  }

  #[tokio::test]
  async fn test_deploy_retries_while_still_creating() {
    let mut server = Server::new_async().await;
    server
      .mock("POST", "/api/aws/lambda")
      .with_status(201)
      .with_body(r#"{"functionName":"orders","state":"Pending"}"#)
      .create_async()
      .await;
    let busy = server
      .mock("PUT", "/api/aws/lambda/orders/code")
      .with_status(409)
      .with_body("ResourceConflictException: The function is currently being created")
      .expect(2)
      .create_async()
      .await;
    let ok = server
      .mock("PUT", "/api/aws/lambda/orders/code")
      .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
      .with_status(200)
      .create_async()
      .await;
    server
      .mock("GET", "/api/aws/lambda/orders")
      .with_status(200)
      .with_body(r#"{"Configuration":{"FunctionName":"orders","State":"Active"}}"#)
      .create_async()
      .await;

    let request = CreateFunctionRequest::new("orders", "nodejs18.x", "index.handler");
    let report = client(&server).deploy(&request, b"PK\x03\x04".to_vec()).await.unwrap();

    busy.assert_async().await;
    ok.assert_async().await;
    assert_eq!(report.attempts, 3);
    assert_eq!(report.status.state.as_deref(), Some("Active"));
  }

  #[tokio::test]
  async fn test_deploy_gives_up_after_max_attempts() {
    let mut server = Server::new_async().await;
    server
      .mock("POST", "/api/aws/lambda")
      .with_status(201)
      .create_async()
      .await;
    let busy = server
      .mock("PUT", "/api/aws/lambda/orders/code")
      .with_status(409)
      .with_body("still creating, state Pending")
      .expect(5)
      .create_async()
      .await;

    let request = CreateFunctionRequest::new("orders", "nodejs18.x", "index.handler");
    let err = client(&server).deploy(&request, Vec::new()).await.unwrap_err();

    busy.assert_async().await;
    assert!(err.is_still_creating());
  }

  #[tokio::test]
  async fn test_deploy_does_not_retry_permanent_failures() {
    let mut server = Server::new_async().await;
    server
      .mock("POST", "/api/aws/lambda")
      .with_status(201)
      .create_async()
      .await;
    let denied = server
      .mock("PUT", "/api/aws/lambda/orders/code")
      .with_status(403)
      .with_body("AccessDenied")
      .expect(1)
      .create_async()
      .await;

    let request = CreateFunctionRequest::new("orders", "nodejs18.x", "index.handler");
    let err = client(&server).deploy(&request, Vec::new()).await.unwrap_err();

    denied.assert_async().await;
    assert_eq!(err.to_string(), "Backend returned 403 Forbidden: AccessDenied");
  }
}
