//! Error types for payload decoding and tenant validation.
//!
//! Both families are local to a single request: the gateway maps them to an
//! HTTP status and never lets them affect other in-flight requests.

use std::collections::BTreeMap;

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Failures while turning request bytes into a [`WriteRequest`] or back.
///
/// [`WriteRequest`]: crate::models::WriteRequest
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The body is not a valid snappy block.
    #[error("snappy decompression failed: {0}")]
    Decompress(#[source] snap::Error),

    /// The decompressed bytes are not a valid protobuf write request.
    #[error("malformed write request: {0}")]
    Malformed(#[source] prost::DecodeError),

    /// The snappy header announces more data than the gateway accepts.
    #[error("decompressed payload of {size_bytes} bytes exceeds {limit_bytes} byte limit")]
    TooLarge {
        /// Decompressed size announced by the snappy header
        size_bytes: usize,
        /// Configured ceiling
        limit_bytes: usize,
    },

    /// The serialized request could not be compressed.
    #[error("snappy compression failed: {0}")]
    Compress(#[source] snap::Error),
}

impl CodecError {
    /// Returns `true` for errors raised while reading a client payload.
    pub fn is_decode(&self) -> bool {
        !matches!(self, Self::Compress(_))
    }
}

/// Violations of the one-tenant-per-request invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No series carries a `cluster_id` label.
    #[error("no cluster_id label found in write request")]
    NoTenant,

    /// Series carry more than one distinct `cluster_id` value.
    #[error("write request mixes {} cluster ids: {tenants:?}", tenants.len())]
    MultiTenant {
        /// Occurrence count per distinct `cluster_id` value
        tenants: BTreeMap<String, usize>,
    },
}
