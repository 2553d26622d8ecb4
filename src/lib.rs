//! brmh - client toolkit for the BRMH API-management backend
//!
//! - [`cache`]: two-tier cache (backend shared cache + durable local store)
//!   with throttled health probing and fail-open semantics
//! - [`executions`]: execution-log polling, grouping and termination
//! - [`backend`]: REST client, DynamoDB attribute decoding, LLM schema
//!   streaming and Lambda deployment

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod executions;

pub use backend::{BackendClient, BackendError};
pub use cache::{CacheError, HttpRemoteCache, LocalStore, TwoTierCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use executions::{ExecutionPoller, TerminalReason};
