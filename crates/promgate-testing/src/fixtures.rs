//! Write request builders with sensible defaults.

use bytes::Bytes;
use promgate_core::{
    codec,
    models::{Label, MetricMetadata, MetricType, Sample, TimeSeries, WriteRequest},
    CLUSTER_ID_LABEL,
};

/// Fixed sample timestamp, so fixtures are deterministic.
pub const SAMPLE_TIMESTAMP_MS: i64 = 1_700_000_000_000;

/// Builder for remote-write payloads.
///
/// ```
/// use promgate_testing::WriteRequestBuilder;
///
/// let request = WriteRequestBuilder::new()
///     .tenant_series("cluster-1", 3)
///     .build();
/// assert_eq!(request.timeseries.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WriteRequestBuilder {
    request: WriteRequest,
}

impl WriteRequestBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a series with the given labels and a single sample.
    #[must_use]
    pub fn series(mut self, labels: &[(&str, &str)], value: f64) -> Self {
        self.request.timeseries.push(TimeSeries {
            labels: labels.iter().map(|(name, value)| Label::new(*name, *value)).collect(),
            samples: vec![Sample::new(value, SAMPLE_TIMESTAMP_MS)],
            ..TimeSeries::default()
        });
        self
    }

    /// Adds `count` series all labelled `cluster_id=<tenant>`.
    #[must_use]
    pub fn tenant_series(mut self, tenant: &str, count: usize) -> Self {
        for i in 0..count {
            let instance = format!("node-{i}");
            self = self.series(
                &[("__name__", "up"), (CLUSTER_ID_LABEL, tenant), ("instance", &instance)],
                1.0,
            );
        }
        self
    }

    /// Adds a series without any `cluster_id` label.
    #[must_use]
    pub fn untenanted_series(self) -> Self {
        self.series(&[("__name__", "up"), ("job", "node")], 1.0)
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, family: &str, metric_type: MetricType) -> Self {
        self.request.metadata.push(MetricMetadata {
            r#type: metric_type as i32,
            metric_family_name: family.to_string(),
            help: format!("{family} help"),
            unit: String::new(),
        });
        self
    }

    /// Returns the request.
    pub fn build(self) -> WriteRequest {
        self.request
    }

    /// Returns the request as a snappy-compressed protobuf body.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which only happens for payloads the
    /// compressor cannot handle.
    #[allow(clippy::expect_used)]
    pub fn encoded(self) -> Bytes {
        codec::encode(&self.request).expect("fixture request should encode")
    }
}
