//! HTTP client layer — `PanelHttp` with per-request retry policies.

pub mod client;
pub mod retry;

pub use client::{Credential, PanelHttp};
pub use retry::{RetryConfig, RetryPolicy};
