//! Proton client
//!
//! Async client for the Proton request/response protocol over mutually
//! authenticated TLS.
//!
//! The server answers requests on a connection strictly in order and never
//! pipelines, so [`Client::request`] sends one request and waits for its
//! response before returning. Use one client per concurrent conversation.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), proton_client::ClientError> {
//! use proton_client::{Client, ClientTls};
//! use proton_proto::{Action, Request};
//!
//! let tls = ClientTls::from_pem_files("ca.pem", "client.pem", "client.key")?;
//! let mut client = Client::connect("127.0.0.1:6666", "localhost", tls).await?;
//!
//! let login = Request::new(Action::Login)
//!     .with_param("username", "alice")
//!     .with_param("password", "hunter2");
//! let response = client.request(&login).await?;
//! assert!(response.status.is_ok());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;

pub use client::{Client, ClientTls, DEFAULT_TIMEOUT};
pub use error::ClientError;
pub use proton_proto::{Action, Request, Response, Status};
