use thiserror::Error;

use crate::Transaction;

/// Delivers finished transaction batches to a collector.
///
/// The tracer's contract is hand-off only: a batch given to `send` is gone
/// from the pending buffer whether or not delivery ultimately succeeds.
/// Retry policy belongs to the transport.
pub trait Transport: Send + Sync {
    fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode transaction batch: {0}")]
    Encoding(String),

    #[error("failed to deliver transaction batch: {0}")]
    Delivery(String),
}

/// Discards every batch. Backs the disabled tracer and benchmarks.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _batch: Vec<Transaction>) -> Result<(), TransportError> {
        Ok(())
    }
}
