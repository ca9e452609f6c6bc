//! Push-stream support
//!
//! Provides the long-lived, bearer-authenticated SSE connection that delivers
//! heartbeats, subscription confirmations and value updates.
//!
//! # Example
//!
//! ```no_run
//! use metasys_client::{mapper, MetasysClient, StreamingClient};
//! use metasys_core::Credentials;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MetasysClient::new("https://adx.example.com/api/v4/")?;
//! let token = client.logon(&Credentials::new("user", "secret")).await?;
//!
//! let stream = StreamingClient::new()?;
//! stream
//!     .open_stream(&client.stream_url()?, &token, None, |frame| {
//!         println!("{:?}", mapper::to_stream_event(&frame));
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod parser;
mod types;

pub use client::{StreamingClient, LAST_EVENT_ID_HEADER};
pub use parser::SseParser;
pub use types::{ConnectionState, SessionEnd, StreamError, StreamResult};
