//! Remote-write wire model, codec and tenant validation.
//!
//! Leaf crate of the gateway: everything here is synchronous and free of
//! I/O, so it can be exercised directly by the HTTP layer, benchmarks and
//! fuzz targets.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod models;
pub mod tenant;

pub use codec::{decode, encode};
pub use error::{CodecError, ValidationError};
pub use models::{Label, MetricMetadata, MetricType, Sample, TimeSeries, WriteRequest};
pub use tenant::{TenantId, CLUSTER_ID_LABEL};
