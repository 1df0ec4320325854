//! Tenant extraction and the one-tenant-per-request invariant.
//!
//! Every series names its origin through the reserved `cluster_id` label.
//! A write request is attributable to a tenant only when all of its
//! `cluster_id` labels agree on a single value; this is what lets the
//! gateway authorize the request for exactly that tenant.

use std::{collections::BTreeMap, fmt};

use crate::{error::ValidationError, models::WriteRequest};

/// Reserved label carrying the tenant identity.
pub const CLUSTER_ID_LABEL: &str = "cluster_id";

/// Tenant identity extracted from a write request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    /// Wraps a raw `cluster_id` value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Returns `true` when the request carries metadata and no series.
///
/// Such requests have no labels to attribute and bypass tenant checks.
pub fn is_metadata_only(request: &WriteRequest) -> bool {
    request.timeseries.is_empty() && !request.metadata.is_empty()
}

/// Counts occurrences of each distinct `cluster_id` value.
pub fn extract_tenants(request: &WriteRequest) -> BTreeMap<String, usize> {
    let mut tenants = BTreeMap::new();
    for label in request.timeseries.iter().flat_map(|ts| &ts.labels) {
        if label.name == CLUSTER_ID_LABEL {
            *tenants.entry(label.value.clone()).or_insert(0) += 1;
        }
    }
    tenants
}

/// Resolves the single tenant a request belongs to.
///
/// # Errors
///
/// Returns [`ValidationError::NoTenant`] when no `cluster_id` label is
/// present and [`ValidationError::MultiTenant`] when more than one distinct
/// value is found.
pub fn validate(request: &WriteRequest) -> Result<TenantId, ValidationError> {
    let tenants = extract_tenants(request);

    if tenants.len() > 1 {
        return Err(ValidationError::MultiTenant { tenants });
    }

    tenants.into_keys().next().map(TenantId::new).ok_or(ValidationError::NoTenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, MetricMetadata, MetricType, TimeSeries};

    fn series(labels: &[(&str, &str)]) -> TimeSeries {
        TimeSeries {
            labels: labels.iter().map(|(name, value)| Label::new(*name, *value)).collect(),
            ..Default::default()
        }
    }

    fn request(timeseries: Vec<TimeSeries>) -> WriteRequest {
        WriteRequest { timeseries, metadata: vec![] }
    }

    #[test]
    fn counts_repeated_cluster_ids_within_one_series() {
        let req = request(vec![series(&[
            ("cluster_id", "cluster-1"),
            ("cluster_id", "cluster-2"),
            ("cluster_id", "cluster-2"),
        ])]);

        let expected = BTreeMap::from([("cluster-1".to_string(), 1), ("cluster-2".to_string(), 2)]);
        assert_eq!(extract_tenants(&req), expected);
    }

    #[test]
    fn counts_distinct_cluster_ids() {
        let req = request(vec![series(&[("cluster_id", "cluster-1"), ("cluster_id", "cluster-2")])]);

        let expected = BTreeMap::from([("cluster-1".to_string(), 1), ("cluster-2".to_string(), 1)]);
        assert_eq!(extract_tenants(&req), expected);
    }

    #[test]
    fn empty_request_has_no_tenants() {
        assert!(extract_tenants(&request(vec![])).is_empty());
    }

    #[test]
    fn series_without_cluster_id_is_no_tenant() {
        let req = request(vec![series(&[("job", "node"), ("instance", "a:9100")])]);
        assert_eq!(validate(&req), Err(ValidationError::NoTenant));
    }

    #[test]
    fn repeated_single_tenant_is_accepted() {
        let req = request(vec![
            series(&[("cluster_id", "cluster-1"), ("job", "a")]),
            series(&[("cluster_id", "cluster-1"), ("job", "b")]),
            series(&[("cluster_id", "cluster-1"), ("job", "c")]),
        ]);

        assert_eq!(extract_tenants(&req).get("cluster-1"), Some(&3));
        assert_eq!(validate(&req), Ok(TenantId::new("cluster-1")));
    }

    #[test]
    fn series_missing_the_label_do_not_break_a_single_tenant() {
        let req = request(vec![series(&[("cluster_id", "cluster-1")]), series(&[("job", "b")])]);
        assert_eq!(validate(&req).unwrap().as_str(), "cluster-1");
    }

    #[test]
    fn mixed_tenants_are_rejected_with_counts() {
        let req = request(vec![
            series(&[("cluster_id", "cluster-1")]),
            series(&[("cluster_id", "cluster-2")]),
            series(&[("cluster_id", "cluster-2")]),
        ]);

        let expected = BTreeMap::from([("cluster-1".to_string(), 1), ("cluster-2".to_string(), 2)]);
        assert_eq!(validate(&req), Err(ValidationError::MultiTenant { tenants: expected }));
    }

    #[test]
    fn label_name_match_is_exact() {
        let req = request(vec![series(&[("Cluster_ID", "cluster-1"), ("cluster_id_x", "x")])]);
        assert_eq!(validate(&req), Err(ValidationError::NoTenant));
    }

    #[test]
    fn metadata_only_requires_metadata_and_no_series() {
        let metadata = MetricMetadata {
            r#type: MetricType::Gauge as i32,
            metric_family_name: "up".to_string(),
            ..Default::default()
        };

        let only_metadata = WriteRequest { timeseries: vec![], metadata: vec![metadata.clone()] };
        assert!(is_metadata_only(&only_metadata));

        let both = WriteRequest { timeseries: vec![series(&[])], metadata: vec![metadata] };
        assert!(!is_metadata_only(&both));

        assert!(!is_metadata_only(&WriteRequest::default()));
    }
}
