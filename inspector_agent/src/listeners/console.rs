//! Console command lifecycle instrumentation.

use std::{collections::HashMap, sync::Arc};

use serde_json::{json, Value};

use crate::{
    filters::is_ignored, transaction::SegmentId, transaction::TransactionType, ExceptionInfo,
    Inspector,
};

#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    CommandStarted {
        command: String,
        arguments: Vec<String>,
        options: HashMap<String, Value>,
    },
    CommandError {
        exception: ExceptionInfo,
    },
    CommandTerminated {
        exit_code: i32,
    },
    /// External interrupt (e.g. SIGINT/SIGTERM) before normal termination.
    CommandSignaled {
        signal: i32,
    },
}

/// Opens a transaction per command run, or a nested segment when a
/// transaction is already open, e.g. a command invoked from inside a web
/// request. Command names are wildcard-matched against the configured ignore
/// list; an ignored command produces no transactions and no segments.
pub struct ConsoleListener {
    inspector: Arc<Inspector>,
    eligible: bool,
    owns_transaction: bool,
    segment: Option<SegmentId>,
}

impl ConsoleListener {
    pub fn new(inspector: Arc<Inspector>) -> Self {
        Self {
            inspector,
            eligible: false,
            owns_transaction: false,
            segment: None,
        }
    }

    pub fn handle(&mut self, event: ConsoleEvent) {
        match event {
            ConsoleEvent::CommandStarted {
                command,
                arguments,
                options,
            } => self.on_started(command, arguments, options),
            ConsoleEvent::CommandError { exception } => self.on_error(exception),
            ConsoleEvent::CommandTerminated { exit_code } => self.on_terminated(exit_code),
            ConsoleEvent::CommandSignaled { signal } => self.on_signaled(signal),
        }
    }

    fn on_started(
        &mut self,
        command: String,
        arguments: Vec<String>,
        options: HashMap<String, Value>,
    ) {
        self.eligible = self.inspector.is_recording()
            && !is_ignored(&self.inspector.config().ignore_commands, &command);
        if !self.eligible {
            return;
        }

        let invocation = json!({
            "arguments": arguments,
            "options": options,
        });

        if self.inspector.need_transaction() {
            self.inspector.start_transaction(&command);
            self.inspector.with_transaction(|transaction| {
                transaction
                    .set_kind(TransactionType::Command)
                    .add_context("Command", invocation);
            });
            self.owns_transaction = true;
        } else if self.inspector.can_add_segments() {
            let id = self.inspector.start_segment("command", &command);
            self.inspector.add_segment_context(id, "Command", invocation);
            self.segment = Some(id);
        }
    }

    fn on_error(&mut self, exception: ExceptionInfo) {
        if !self.eligible {
            return;
        }
        self.inspector.with_transaction(|transaction| {
            transaction.set_result("error");
        });
        self.inspector.report_exception(&exception, false);
    }

    fn on_terminated(&mut self, exit_code: i32) {
        if !self.eligible {
            return;
        }
        match self.segment.take() {
            Some(id) => self.inspector.end_segment(id),
            None => {
                self.inspector.with_transaction(|transaction| {
                    transaction.add_context("Exit", json!({ "code": exit_code }));
                    transaction.set_result(if exit_code == 0 { "success" } else { "error" });
                });
                if self.owns_transaction {
                    self.inspector.end_transaction();
                    self.inspector.flush();
                }
            }
        }
    }

    fn on_signaled(&mut self, signal: i32) {
        if !self.eligible {
            return;
        }
        // A nested command only owns its segment; the enclosing transaction
        // keeps its own outcome.
        if let Some(id) = self.segment.take() {
            self.inspector.end_segment(id);
            return;
        }
        self.inspector.with_transaction(|transaction| {
            transaction.add_context("Signal", json!(signal));
            transaction.set_result("terminated");
        });
        if self.owns_transaction {
            self.inspector.end_transaction();
            self.inspector.flush();
        }
    }
}
