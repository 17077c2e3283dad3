use inspector_agent::{Config, Transaction, Transport, TransportError, TransportMode};

use crate::payload::batch_entries;

const INGESTION_KEY_HEADER: &str = "X-Inspector-Key";
const SAMPLING_HEADER: &str = "X-Inspector-Server-Sampling";

#[derive(Clone)]
struct Endpoint {
    url: String,
    ingestion_key: String,
    server_sampling_ratio: f64,
}

impl Endpoint {
    fn from_config(config: &Config) -> Self {
        Self {
            url: config.url.clone(),
            ingestion_key: config.ingestion_key.clone().unwrap_or_default(),
            server_sampling_ratio: config.server_sampling_ratio,
        }
    }
}

/// Delivers batches inline, blocking the flushing caller until the collector
/// answers. Failures surface to the tracer, which logs and drops the batch.
pub struct SyncIngestTransport {
    client: reqwest::blocking::Client,
    endpoint: Endpoint,
}

impl SyncIngestTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: Endpoint::from_config(config),
        }
    }
}

impl Transport for SyncIngestTransport {
    fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError> {
        let body = encode(&batch)?;
        self.client
            .post(&self.endpoint.url)
            .header(INGESTION_KEY_HEADER, &self.endpoint.ingestion_key)
            .header(
                SAMPLING_HEADER,
                self.endpoint.server_sampling_ratio.to_string(),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|error| TransportError::Delivery(error.to_string()))?;
        Ok(())
    }
}

/// Hands each batch to a background task and returns immediately, so the
/// request/command/message path never waits on the collector. Failures are
/// logged, not retried.
///
/// Must be used from within a tokio runtime; the spawned delivery task runs
/// on it.
pub struct AsyncIngestTransport {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl AsyncIngestTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: Endpoint::from_config(config),
        }
    }
}

impl Transport for AsyncIngestTransport {
    fn send(&self, batch: Vec<Transaction>) -> Result<(), TransportError> {
        let body = encode(&batch)?;
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(deliver(client, endpoint, body));
        Ok(())
    }
}

async fn deliver(client: reqwest::Client, endpoint: Endpoint, body: Vec<u8>) {
    let result = client
        .post(&endpoint.url)
        .header(INGESTION_KEY_HEADER, &endpoint.ingestion_key)
        .header(SAMPLING_HEADER, endpoint.server_sampling_ratio.to_string())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .and_then(|response| response.error_for_status());
    match result {
        Ok(response) => log::debug!("delivered transaction batch: {}", response.status()),
        Err(error) => log::error!("failed to deliver transaction batch: {error}"),
    }
}

fn encode(batch: &[Transaction]) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(&batch_entries(batch))
        .map_err(|error| TransportError::Encoding(error.to_string()))
}

/// The transport matching the configured [`TransportMode`].
pub fn ingest_transport(config: &Config) -> Box<dyn Transport> {
    match config.transport {
        TransportMode::Sync => Box::new(SyncIngestTransport::new(config)),
        TransportMode::Async => Box::new(AsyncIngestTransport::new(config)),
    }
}
