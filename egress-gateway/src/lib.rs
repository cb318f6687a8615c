//! Credential-injecting HTTP gateway
//!
//! Accepts plain HTTP from the sandboxed process on a local port and
//! relays each request to one fixed upstream API over TLS, attaching the
//! configured secret as the `x-api-key` header.

pub mod config;
pub mod error;
pub mod inject;
pub mod server;
pub mod signal;
pub mod upstream;

pub use config::{CredentialInjection, GatewaySettings, Upstream, INJECTION_HEADER};
pub use error::{GatewayError, Result};
pub use server::{Gateway, GatewayBody, GatewayHandle};
pub use signal::ShutdownSignal;
