//! Shared fixtures for the crate's tests.

use std::sync::{Arc, Mutex};

use inspector_agent::{Config, Inspector, Transaction, Transport, TransportError};

struct CaptureTransport {
    batch: Arc<Mutex<Vec<Transaction>>>,
}

impl Transport for CaptureTransport {
    fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError> {
        *self.batch.lock().expect("local lock should work") = batch;
        Ok(())
    }
}

fn initialize_logging() {
    static INITIALIZE_LOGGER_ONCE: std::sync::Once = std::sync::Once::new();
    INITIALIZE_LOGGER_ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// One finished "GET /checkout" transaction with a process and a sql
/// segment, produced through the real tracer.
pub(crate) fn traced_transactions() -> Vec<Transaction> {
    initialize_logging();
    let batch = Arc::new(Mutex::new(Vec::new()));
    let inspector = Inspector::new(
        Config::new("test-ingestion-key"),
        Box::new(CaptureTransport {
            batch: batch.clone(),
        }),
    );

    inspector.start_transaction("GET /checkout");
    {
        let _request = inspector.segment("process", "kernel.request");
        let query = inspector.segment("sql", "SELECT 1");
        query.end();
    }
    inspector.with_transaction(|transaction| {
        transaction.set_result("200");
    });
    inspector.flush();

    let captured = batch.lock().expect("local lock should work").clone();
    assert_eq!(1, captured.len());
    captured
}
