//! A transaction and segment tracing client for the Inspector monitoring
//! service.
//!
//! [`inspector-agent`] records one [`Transaction`] per logical unit of work,
//! such as an HTTP request, a console command, or a handled message, with a tree of
//! timed [`Segment`]s inside it, and hands completed transactions to a
//! [`Transport`] in batches. The [`listeners`] module carries ready-made
//! adapters for the usual web-application lifecycles; the [`sql`] module
//! wraps database connections to time every statement.
//!
//! A tracer without a usable configuration is a disabled no-op: monitoring
//! must never break the application it observes.
//!
//! # Examples
//!
//! ```rust
//! use inspector_agent::{Config, Inspector, Transaction, Transport, TransportError};
//!
//! // First, we implement delivery. The ingest crate ships an HTTP transport;
//! // anything implementing `Transport` works.
//! struct StdoutTransport;
//! impl Transport for StdoutTransport {
//!     fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError> {
//!         for transaction in &batch {
//!             println!("{} -> {}", transaction.name, transaction.result);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! // Next, we configure the tracer.
//! let inspector = Inspector::new(Config::new("your-ingestion-key"), Box::new(StdoutTransport));
//!
//! // Finally, we trace a unit of work.
//! inspector.start_transaction("GET /checkout");
//! {
//!     let segment = inspector.segment("process", "checkout");
//!     segment.add_context("Cart", serde_json::json!({"items": 3}));
//! }
//! inspector.with_transaction(|transaction| {
//!     transaction.set_result("200");
//! });
//! inspector.flush();
//! ```

mod config;
mod filters;
mod inspector;
mod transaction;
mod transport;

pub mod listeners;
pub mod sql;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BoundaryTracing;
pub use config::Config;
pub use config::TransportMode;
pub use config::DEFAULT_INGESTION_URL;
pub use filters::is_ignored;
pub use filters::match_with_wildcard;
pub use inspector::Inspector;
pub use inspector::SegmentGuard;
pub use transaction::ExceptionInfo;
pub use transaction::Segment;
pub use transaction::SegmentId;
pub use transaction::Transaction;
pub use transaction::TransactionType;
pub use transport::NullTransport;
pub use transport::Transport;
pub use transport::TransportError;
