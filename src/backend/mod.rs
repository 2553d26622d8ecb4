//! Clients for the BRMH backend and its AWS-facing proxy.

mod client;
pub mod dynamo;
mod error;
pub mod lambda;
pub mod llm;

pub use client::{BackendClient, EXECUTIONS_TABLE};
pub use error::BackendError;
pub use lambda::{CreateFunctionRequest, DeploymentReport, FunctionStatus, LambdaClient};
