//! Metasys Client Library
//!
//! Typed access to a Metasys-style building automation API: logon and token
//! refresh, present value subscription, trend samples, and the long-lived
//! push stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use metasys_client::MetasysClient;
//! use metasys_core::Credentials;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = MetasysClient::new("https://adx.example.com/api/v4/")?;
//!
//!     let token = client.logon(&Credentials::new("user", "secret")).await?;
//!
//!     // Current value of one object
//!     let value = client.read_present_value(&token, "a1b2c3").await?;
//!     println!("{}", value);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides an in-process upstream for integration tests:
//!
//! ```rust,ignore
//! use metasys_client::testing::MockUpstream;
//!
//! let upstream = MockUpstream::start().await?;
//! let token = upstream.client.logon(&credentials).await?;
//! upstream.push_frame(Some("1"), "heartbeat", "\"2024-05-01T12:00:00Z\"");
//! ```

mod client;
mod error;
pub mod mapper;
pub mod streaming;
pub mod testing;
mod types;

pub use client::{MetasysClient, SUBSCRIBE_HEADER};
pub use error::{MetasysClientError, Result};
pub use types::*;

// Re-export streaming types for convenience
pub use streaming::{ConnectionState, SessionEnd, StreamError, StreamingClient};

// Re-export core types for convenience
pub use metasys_core::{Credentials, Frame, PresentValue, StreamEvent, Token};
