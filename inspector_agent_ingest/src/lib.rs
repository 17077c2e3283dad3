//! HTTP delivery of [`inspector-agent`] transaction batches to an Inspector
//! ingestion endpoint.
//!
//! Batches are flattened into the ingestion wire format (one JSON entry per
//! transaction, one per segment) and POSTed with the ingestion key as a
//! header. Two delivery modes match the tracer's configuration: sync blocks
//! the flushing caller, async hands the batch to a background tokio task so
//! the primary path never waits on the network.
//!
//! # Examples
//!
//! ```rust,no_run
//! use inspector_agent::{Config, Inspector};
//! use inspector_agent_ingest::ingest_transport;
//!
//! let config = Config::new(std::env::var("INSPECTOR_INGESTION_KEY").unwrap_or_default());
//! let transport = ingest_transport(&config);
//! let inspector = Inspector::new(config, transport);
//!
//! // Trace units of work, then hand them off.
//! inspector.start_transaction("app:import");
//! inspector.flush();
//! ```

mod ingest_transport;
mod payload;

#[cfg(test)]
pub(crate) mod testing;

pub use ingest_transport::ingest_transport;
pub use ingest_transport::AsyncIngestTransport;
pub use ingest_transport::SyncIngestTransport;
pub use payload::batch_entries;
pub use payload::IngestEntry;
