//! # apilink Core
//!
//! Core types, traits, and error handling for the apilink gateway client.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - The [`GatewayError`] taxonomy shared by every component
//! - Request context and per-request options
//! - The [`HttpTransport`] capability the orchestrator is built against

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod request;
pub mod response;
pub mod transport;

// Re-export commonly used types
pub use error::{GatewayError, GatewayResult, TransportFailure};
pub use request::{RequestContext, RequestOptions};
pub use response::GatewayResponse;
pub use transport::{HttpTransport, TransportRequest, TransportResponse};
