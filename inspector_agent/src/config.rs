use serde::Deserialize;

pub const DEFAULT_INGESTION_URL: &str = "https://ingest.inspector.dev";

/// How finished transaction batches travel to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Deliver inline on `flush()`, blocking the caller.
    Sync,
    /// Hand the batch to a background task and return immediately.
    Async,
}

/// Whether database transaction boundaries are traced once per outermost
/// begin/commit/rollback or on every call.
///
/// Drivers that manage nesting above the wrapped connection only reach it at
/// the outer boundary, which makes `EveryLevel` equivalent there; drivers
/// that pass nested calls through need `OuterOnly` to avoid duplicate
/// boundary segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryTracing {
    OuterOnly,
    EveryLevel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,

    /// Authentication key for the ingestion endpoint. Without one the tracer
    /// degrades to a disabled no-op rather than failing the host application.
    pub ingestion_key: Option<String>,

    pub url: String,

    pub transport: TransportMode,

    /// Fraction of transactions the collector is asked to keep, 0..1.
    /// Forwarded with each batch; 0 means "no server-side sampling".
    pub server_sampling_ratio: f64,

    /// Capture bound parameters on SQL query segments.
    pub query_bindings: bool,

    /// Wildcard patterns matched against the resolved route.
    pub ignore_routes: Vec<String>,

    /// Wildcard patterns matched against the command name.
    pub ignore_commands: Vec<String>,

    /// Wildcard patterns matched against the message class.
    pub ignore_messages: Vec<String>,

    pub sql_transaction_tracing: BoundaryTracing,
}

impl Config {
    pub fn new(ingestion_key: impl Into<String>) -> Self {
        Self {
            ingestion_key: Some(ingestion_key.into()),
            ..Self::default()
        }
    }

    /// A configuration can be recorded against only when monitoring is
    /// enabled and an ingestion key is present.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && self
                .ingestion_key
                .as_deref()
                .is_some_and(|key| !key.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            ingestion_key: None,
            url: DEFAULT_INGESTION_URL.to_string(),
            transport: TransportMode::Async,
            server_sampling_ratio: 0.0,
            query_bindings: false,
            ignore_routes: Vec::new(),
            ignore_commands: Vec::new(),
            ignore_messages: Vec::new(),
            sql_transaction_tracing: BoundaryTracing::OuterOnly,
        }
    }
}
