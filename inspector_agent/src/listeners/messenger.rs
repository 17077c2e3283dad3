//! Message-bus middleware: wraps message handling with the transaction and
//! segment lifecycle plus error capture.

use std::sync::Arc;

use serde_json::json;

use crate::{
    filters::is_ignored, transaction::SegmentId, transaction::TransactionType, Inspector,
};

/// What the middleware needs to know about a message without depending on
/// any concrete bus.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Message type name, matched against the ignore list and used to name
    /// the transaction.
    pub class: String,

    /// True when the message was consumed from an asynchronous transport
    /// (it arrived already queued), false for synchronous dispatch.
    pub queued: bool,
}

impl MessageEnvelope {
    pub fn dispatched(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            queued: false,
        }
    }

    pub fn received(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            queued: true,
        }
    }
}

/// Produced by a successful handler chain.
#[derive(Debug, Clone)]
pub struct HandledMessage {
    /// Names of the handlers that processed the message.
    pub handlers: Vec<String>,
}

/// A failure raised by a handler chain. Composite failures, where several
/// handlers fail independently, expose their parts through `nested` and
/// are flattened into individual reports.
pub trait HandlerError: std::error::Error {
    /// Inner errors of a composite failure; empty for a leaf.
    fn nested(&self) -> Vec<&dyn HandlerError> {
        Vec::new()
    }

    /// How this error shows up in the monitoring backend. Override to carry
    /// the concrete error class name.
    fn exception(&self) -> crate::ExceptionInfo {
        crate::ExceptionInfo::new("HandlerError", self.to_string())
    }
}

/// Middleware wrapping one message-handling execution.
///
/// Instrumentation never alters control flow: the handler's result or error
/// is returned unchanged. Buffered transactions are flushed only for
/// messages consumed from an asynchronous transport, so request-scoped
/// synchronous dispatch does not pay a network call per message.
pub struct MessengerMonitor {
    inspector: Arc<Inspector>,
}

impl MessengerMonitor {
    pub fn new(inspector: Arc<Inspector>) -> Self {
        Self { inspector }
    }

    pub fn handle<E: HandlerError>(
        &self,
        envelope: &MessageEnvelope,
        next: impl FnOnce() -> Result<HandledMessage, E>,
    ) -> Result<HandledMessage, E> {
        if !self.inspector.is_recording()
            || is_ignored(&self.inspector.config().ignore_messages, &envelope.class)
        {
            return next();
        }

        let segment = self.before_handle(&envelope.class);

        let result = next();
        match &result {
            Ok(handled) => self.after_handle(segment, &handled.handlers),
            Err(error) => {
                self.report_error_tree(error);
                self.inspector.with_transaction(|transaction| {
                    transaction.set_result("error");
                });
            }
        }

        if let Some(id) = segment {
            self.inspector.end_segment(id);
        }
        if envelope.queued {
            self.inspector.flush();
        }

        result
    }

    /// A transaction when none is open; a nested segment otherwise.
    fn before_handle(&self, class: &str) -> Option<SegmentId> {
        if self.inspector.need_transaction() {
            self.inspector.start_transaction(class);
            self.inspector.with_transaction(|transaction| {
                transaction.set_kind(TransactionType::Message);
            });
            None
        } else if self.inspector.can_add_segments() {
            Some(self.inspector.start_segment("message", class))
        } else {
            None
        }
    }

    fn after_handle(&self, segment: Option<SegmentId>, handlers: &[String]) {
        match segment {
            Some(id) => self
                .inspector
                .add_segment_context(id, "Handlers", json!(handlers)),
            None => {
                self.inspector.with_transaction(|transaction| {
                    transaction
                        .add_context("Handlers", json!(handlers))
                        .set_result("success");
                });
            }
        }
    }

    /// Flattens a tree of wrapped failures and reports each leaf.
    fn report_error_tree(&self, error: &dyn HandlerError) {
        let nested = error.nested();
        if nested.is_empty() {
            self.inspector.report_exception(&error.exception(), false);
            return;
        }
        for inner in nested {
            self.report_error_tree(inner);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{inspector_with_config, recording_inspector};
    use crate::{Config, ExceptionInfo};

    #[derive(Debug)]
    enum TestError {
        Leaf(&'static str),
        Composite(Vec<TestError>),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Leaf(message) => write!(f, "{message}"),
                Self::Composite(parts) => write!(f, "{} handler(s) failed", parts.len()),
            }
        }
    }

    impl std::error::Error for TestError {}

    impl HandlerError for TestError {
        fn nested(&self) -> Vec<&dyn HandlerError> {
            match self {
                Self::Leaf(_) => Vec::new(),
                Self::Composite(parts) => {
                    parts.iter().map(|part| part as &dyn HandlerError).collect()
                }
            }
        }

        fn exception(&self) -> ExceptionInfo {
            ExceptionInfo::new("TestError", self.to_string())
        }
    }

    fn handled_by(handler: &str) -> Result<HandledMessage, TestError> {
        Ok(HandledMessage {
            handlers: vec![handler.to_string()],
        })
    }

    #[test]
    fn queued_message_becomes_a_transaction_and_flushes() {
        let (inspector, transport) = recording_inspector();
        let monitor = MessengerMonitor::new(inspector.clone());

        let result = monitor.handle(&MessageEnvelope::received("app::SendInvoice"), || {
            handled_by("app::SendInvoiceHandler")
        });
        assert!(result.is_ok());

        // Flushed by the middleware itself, no explicit flush.
        let batch = transport.single_batch();
        let transaction = &batch[0];
        assert_eq!("app::SendInvoice", transaction.name);
        assert_eq!(TransactionType::Message, transaction.kind);
        assert_eq!("success", transaction.result);
        assert_eq!(
            json!(["app::SendInvoiceHandler"]),
            transaction.context["Handlers"]
        );
    }

    #[test]
    fn synchronous_dispatch_does_not_flush() {
        let (inspector, transport) = recording_inspector();
        let monitor = MessengerMonitor::new(inspector.clone());

        monitor
            .handle(&MessageEnvelope::dispatched("app::SendInvoice"), || {
                handled_by("app::SendInvoiceHandler")
            })
            .expect("handler should succeed");

        assert_eq!(0, transport.sends());
        assert!(inspector.has_transaction());
    }

    #[test]
    fn message_inside_an_open_transaction_becomes_a_segment() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /checkout");
        let monitor = MessengerMonitor::new(inspector.clone());

        monitor
            .handle(&MessageEnvelope::dispatched("app::SendInvoice"), || {
                handled_by("app::SendInvoiceHandler")
            })
            .expect("handler should succeed");

        let batch = transport.drain_after_flush(&inspector);
        let transaction = &batch[0];
        assert_eq!("GET /checkout", transaction.name);
        // Segments carry no result; the transaction keeps its own.
        assert_eq!("", transaction.result);
        assert_eq!(1, transaction.segments().len());
        let segment = &transaction.segments()[0];
        assert_eq!("message", segment.kind);
        assert!(segment.is_ended());
        assert_eq!(json!(["app::SendInvoiceHandler"]), segment.context["Handlers"]);
    }

    #[test]
    fn ignored_message_skips_instrumentation_but_still_runs() {
        let (inspector, transport) = inspector_with_config(Config {
            ignore_messages: vec!["app::Telemetry*".to_string()],
            ..Config::new("test-ingestion-key")
        });
        let monitor = MessengerMonitor::new(inspector.clone());

        let mut ran = false;
        monitor
            .handle(&MessageEnvelope::received("app::TelemetryPing"), || {
                ran = true;
                handled_by("app::TelemetryPingHandler")
            })
            .expect("handler should succeed");

        assert!(ran);
        assert!(!inspector.has_transaction());
        inspector.flush();
        assert_eq!(0, transport.sends());
    }

    #[test]
    fn composite_failure_is_flattened_into_individual_reports() {
        let (inspector, transport) = recording_inspector();
        let monitor = MessengerMonitor::new(inspector.clone());

        let result = monitor.handle(&MessageEnvelope::received("app::SendInvoice"), || {
            Err::<HandledMessage, _>(TestError::Composite(vec![
                TestError::Leaf("smtp refused"),
                TestError::Composite(vec![TestError::Leaf("pdf renderer crashed")]),
            ]))
        });

        // The error comes back unchanged.
        match result {
            Err(TestError::Composite(parts)) => assert_eq!(2, parts.len()),
            other => panic!("expected the composite error back, got {other:?}"),
        }

        let batch = transport.single_batch();
        let transaction = &batch[0];
        assert_eq!("error", transaction.result);

        let messages: Vec<&str> = transaction
            .segments()
            .iter()
            .filter(|segment| segment.kind == "exception")
            .map(|segment| segment.context["Exception"]["message"].as_str().unwrap())
            .collect();
        assert_eq!(vec!["smtp refused", "pdf renderer crashed"], messages);
    }

    #[test]
    fn failed_nested_message_still_ends_its_segment() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /checkout");
        let monitor = MessengerMonitor::new(inspector.clone());

        let result = monitor.handle(&MessageEnvelope::dispatched("app::SendInvoice"), || {
            Err::<HandledMessage, _>(TestError::Leaf("smtp refused"))
        });
        assert!(result.is_err());

        let batch = transport.drain_after_flush(&inspector);
        let transaction = &batch[0];
        assert_eq!("error", transaction.result);
        let message_segment = transaction
            .segments()
            .iter()
            .find(|segment| segment.kind == "message")
            .expect("the message segment should exist");
        assert!(message_segment.is_ended());
    }
}
