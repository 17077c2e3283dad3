//! Shared fixtures for the crate's tests.

use std::sync::{Arc, Mutex};

use crate::{
    transport::{Transport, TransportError},
    Config, Inspector, Transaction,
};

/// Captures every delivered batch for assertions.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    batches: Mutex<Vec<Vec<Transaction>>>,
}

impl RecordingTransport {
    pub(crate) fn sends(&self) -> usize {
        self.batches.lock().expect("local lock should work").len()
    }

    /// The one and only delivered batch.
    pub(crate) fn single_batch(&self) -> Vec<Transaction> {
        let batches = self.batches.lock().expect("local lock should work");
        assert_eq!(1, batches.len(), "expected exactly one delivered batch");
        batches[0].clone()
    }

    pub(crate) fn drain_after_flush(&self, inspector: &Inspector) -> Vec<Transaction> {
        inspector.flush();
        self.single_batch()
    }
}

impl Transport for Arc<RecordingTransport> {
    fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError> {
        self.batches
            .lock()
            .expect("local lock should work")
            .push(batch);
        Ok(())
    }
}

fn initialize_logging() {
    static INITIALIZE_LOGGER_ONCE: std::sync::Once = std::sync::Once::new();
    INITIALIZE_LOGGER_ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub(crate) fn inspector_with_config(config: Config) -> (Arc<Inspector>, Arc<RecordingTransport>) {
    initialize_logging();
    let transport = Arc::new(RecordingTransport::default());
    let inspector = Arc::new(Inspector::new(config, Box::new(transport.clone())));
    (inspector, transport)
}

pub(crate) fn recording_inspector() -> (Arc<Inspector>, Arc<RecordingTransport>) {
    inspector_with_config(Config::new("test-ingestion-key"))
}

/// No ingestion key: the tracer degrades to a disabled no-op.
pub(crate) fn disabled_inspector() -> (Arc<Inspector>, Arc<RecordingTransport>) {
    inspector_with_config(Config::default())
}
