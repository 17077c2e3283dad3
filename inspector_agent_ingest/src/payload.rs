//! Conversions from the agent's data model to the ingestion wire format.
//!
//! A batch flattens into one entry per transaction plus one entry per
//! segment; segments reference their transaction by hash. Timestamps travel
//! as float seconds since the UNIX epoch, durations as milliseconds.

use std::{collections::HashMap, time::SystemTime};

use serde::Serialize;
use serde_json::Value;

use inspector_agent::{Segment, Transaction};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IngestEntry {
    Transaction(TransactionEntry),
    Segment(SegmentEntry),
}

#[derive(Debug, Serialize)]
pub struct TransactionEntry {
    model: &'static str,
    hash: String,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    result: String,
    timestamp: f64,
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    context: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SegmentEntry {
    model: &'static str,
    #[serde(rename = "type")]
    kind: String,
    label: String,
    timestamp: f64,
    duration: f64,
    context: HashMap<String, Value>,
    transaction: TransactionRef,
}

#[derive(Debug, Serialize)]
pub struct TransactionRef {
    hash: String,
}

impl From<&Transaction> for TransactionEntry {
    fn from(transaction: &Transaction) -> Self {
        Self {
            model: "transaction",
            hash: transaction.hash.clone(),
            name: transaction.name.clone(),
            kind: transaction.kind.as_str(),
            result: transaction.result.clone(),
            timestamp: unix_seconds(transaction.start),
            duration: duration_millis(transaction.start, transaction.end),
            user: transaction.user.clone(),
            context: transaction.context.clone(),
        }
    }
}

impl SegmentEntry {
    fn new(segment: &Segment, transaction_hash: &str) -> Self {
        Self {
            model: "segment",
            kind: segment.kind.clone(),
            label: segment.label.clone(),
            timestamp: unix_seconds(segment.start),
            duration: duration_millis(segment.start, segment.end),
            context: segment.context.clone(),
            transaction: TransactionRef {
                hash: transaction_hash.to_owned(),
            },
        }
    }
}

pub fn batch_entries(batch: &[Transaction]) -> Vec<IngestEntry> {
    let mut entries = Vec::new();
    for transaction in batch {
        entries.push(IngestEntry::Transaction(TransactionEntry::from(transaction)));
        for segment in transaction.segments() {
            entries.push(IngestEntry::Segment(SegmentEntry::new(
                segment,
                &transaction.hash,
            )));
        }
    }
    entries
}

fn unix_seconds(instant: SystemTime) -> f64 {
    instant
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn duration_millis(start: SystemTime, end: Option<SystemTime>) -> f64 {
    end.map(|end| end.duration_since(start).unwrap_or_default().as_secs_f64() * 1000.0)
        .unwrap_or_default()
}
