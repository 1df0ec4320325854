//! Outbound side of the gateway.
//!
//! Everything that talks to the upstream collector lives here: the
//! composable [`Transport`] stack, the optional OAuth2 client-credentials
//! leg, and the [`UpstreamProxy`] that relays accepted write requests.
//!
//! # Architecture
//!
//! The transport stack is assembled once at startup:
//!
//! 1. **Base** - [`HttpTransport`], a pooled `reqwest` client
//! 2. **Instrumentation** - [`InstrumentedTransport`] counts every attempt
//! 3. **Credentials** - [`OutboundCredentials::wrap_transport`] stamps a
//!    bearer token, when enabled
//!
//! The credentials layer is outermost so that a token fetch happens before
//! the attempt is counted and sent.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use promgate_forward::{
//!     ClientConfig, ForwardRequest, HttpTransport, OutboundCredentials, UpstreamProxy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = Arc::new(HttpTransport::new(&ClientConfig::default())?);
//! let transport = OutboundCredentials::disabled().wrap_transport(base);
//! let proxy = UpstreamProxy::new("http://receive:19291/api/v1/receive".parse()?, transport);
//!
//! let response = proxy.forward(ForwardRequest::default()).await?;
//! println!("upstream answered {}", response.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod credentials;
pub mod error;
pub mod proxy;
pub mod transport;

pub use credentials::{CredentialProvider, OidcConfig, OutboundCredentials};
pub use error::{CredentialError, ForwardError, Result};
pub use proxy::{ForwardRequest, UpstreamProxy, UpstreamResponse};
pub use transport::{ClientConfig, HttpTransport, InstrumentedTransport, SharedTransport, Transport};
