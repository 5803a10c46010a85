//! Manuscripta Core Types and Traits
//!
//! This crate provides the fundamental types shared by the Manuscripta SDK:
//! - Tenant context value object
//! - SDK configuration and its loaders
//! - HTTP request/response types and the transport abstraction
//! - Core error types

pub mod config;
pub mod error;
pub mod http;
pub mod retry_after;
pub mod tenant;

pub use config::{LoggingConfig, SdkConfig};
pub use error::{Error, Result};
pub use crate::http::{HttpRequest, HttpResponse, Transport, TransportError};
pub use tenant::{TenantContext, UserClaim};
