//! Gateway counters and their Prometheus exposition.
//!
//! Each [`Metrics`] owns its registry so that several gateways (as in
//! tests) never collide on a process-wide default registry.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

/// Namespace of every gateway metric.
pub const NAMESPACE: &str = "observability_proxy";

/// Subsystem of every gateway metric.
pub const SUBSYSTEM: &str = "remote_write";

/// Registry plus the two request counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    incoming: IntCounter,
    outgoing: IntCounter,
}

impl Metrics {
    /// Creates the counters and registers them with a fresh registry.
    ///
    /// The process collector is registered too where the platform supports
    /// it.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] if registration fails.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let incoming = IntCounter::with_opts(
            Opts::new("incoming_request_count", "number of received remote write requests")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(incoming.clone()))?;

        let outgoing = IntCounter::with_opts(
            Opts::new("outgoing_request_count", "number of forwarded remote write requests")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
        )?;
        registry.register(Box::new(outgoing.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self { registry, incoming, outgoing })
    }

    /// Counter bumped once per accepted `POST /`.
    pub fn incoming(&self) -> &IntCounter {
        &self.incoming
    }

    /// Counter bumped once per attempted upstream call.
    pub fn outgoing(&self) -> &IntCounter {
        &self.outgoing
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered family in the text exposition format.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] if encoding fails.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Content type of [`Metrics::render`] output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}
