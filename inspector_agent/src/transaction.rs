use std::{collections::HashMap, time::Duration, time::SystemTime};

use serde_json::Value;

/// Opaque identifier of a segment within the tracer's lifetime.
///
/// Ids are never reused, so a stale id held across a transaction boundary is
/// detected instead of silently ending somebody else's segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Request,
    Command,
    Message,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Command => "command",
            Self::Message => "message",
        }
    }
}

impl Default for TransactionType {
    fn default() -> Self {
        Self::Request
    }
}

/// The root timed unit for one logical operation: an HTTP request, a console
/// command or a handled message. It owns every segment opened while it was
/// current, in insertion order, with parent links forming the segment tree.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// A unique identifier for the transaction. 32 lowercase hex characters.
    pub hash: String,

    /// Human-readable label: route, command name, message class.
    pub name: String,

    pub kind: TransactionType,

    /// Free-form outcome: "success", "error", "terminated" or an HTTP status
    /// code. Empty until a lifecycle adapter decides.
    pub result: String,

    pub start: SystemTime,

    /// None while the transaction is still open.
    pub end: Option<SystemTime>,

    /// Identity of the authenticated user, when the host application has one.
    pub user: Option<String>,

    /// Grouped key-value payloads attached by instrumentation call sites.
    pub context: HashMap<String, Value>,

    pub(crate) segments: Vec<Segment>,
}

impl Transaction {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            hash: random_hash(),
            name: name.into(),
            kind: TransactionType::default(),
            result: String::new(),
            start: SystemTime::now(),
            end: None,
            user: None,
            context: HashMap::new(),
            segments: Vec::new(),
        }
    }

    pub fn set_kind(&mut self, kind: TransactionType) -> &mut Self {
        self.kind = kind;
        self
    }

    pub fn set_result(&mut self, result: impl Into<String>) -> &mut Self {
        self.result = result.into();
        self
    }

    pub fn add_context(&mut self, group: impl Into<String>, payload: Value) -> &mut Self {
        self.context.insert(group.into(), payload);
        self
    }

    pub fn with_user(&mut self, user: impl Into<String>) -> &mut Self {
        self.user = Some(user.into());
        self
    }

    pub fn is_ended(&self) -> bool {
        self.end.is_some()
    }

    /// Wall-clock duration, available once the transaction has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.end
            .map(|end| end.duration_since(self.start).unwrap_or_default())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn close(&mut self) {
        if self.end.is_none() {
            self.end = Some(SystemTime::now());
        }
    }
}

/// A timed unit of work nested inside a transaction.
#[derive(Debug, Clone)]
pub struct Segment {
    pub(crate) id: SegmentId,

    /// The innermost segment that was still open when this one started.
    pub(crate) parent: Option<SegmentId>,

    /// Category tag: "process", "sql", "view", "command", "message",
    /// "exception".
    pub kind: String,

    pub label: String,

    pub start: SystemTime,

    /// None while the segment is still open.
    pub end: Option<SystemTime>,

    pub context: HashMap<String, Value>,
}

impl Segment {
    pub(crate) fn new(id: SegmentId, parent: Option<SegmentId>, kind: &str, label: &str) -> Self {
        Self {
            id,
            parent,
            kind: kind.to_owned(),
            label: label.to_owned(),
            start: SystemTime::now(),
            end: None,
            context: HashMap::new(),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    pub fn is_ended(&self) -> bool {
        self.end.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end
            .map(|end| end.duration_since(self.start).unwrap_or_default())
    }

    pub(crate) fn close(&mut self) {
        self.end = Some(SystemTime::now());
    }
}

/// A captured application error, decoupled from any concrete error type so
/// adapters at the framework boundary can report whatever they catch.
#[derive(Debug, Clone)]
pub struct ExceptionInfo {
    /// Error type name, also used to name an implicitly started transaction.
    pub class: String,

    pub message: String,

    /// Messages of the `source()` chain, outermost first.
    pub chain: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            chain: Vec::new(),
        }
    }

    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            class: std::any::type_name::<E>().to_owned(),
            message: error.to_string(),
            chain,
        }
    }
}

fn random_hash() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
