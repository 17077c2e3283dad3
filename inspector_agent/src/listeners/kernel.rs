//! HTTP request lifecycle instrumentation.

use std::{collections::HashMap, sync::Arc};

use crate::{filters::is_ignored, transaction::SegmentId, ExceptionInfo, Inspector};

const SEGMENT_TYPE_PROCESS: &str = "process";
const SEGMENT_TYPE_CONTROLLER: &str = "controller";

// Slot keys for the open-segment map. The controller slot carries a dynamic
// label, every other slot is labeled by its key.
const REQUEST: &str = "kernel.request";
const CONTROLLER: &str = "kernel.controller";
const CONTROLLER_ARGUMENTS: &str = "kernel.controller_arguments";
const CONTROLLER_HANDLER: &str = "controller";
const VIEW: &str = "kernel.view";
const RESPONSE: &str = "kernel.response";

/// One logical occurrence in the life of an HTTP request, resolved at the
/// framework boundary.
#[derive(Debug, Clone)]
pub enum HttpEvent {
    RequestReceived {
        method: String,
        path: String,
        /// Resolved route, when routing succeeded; the raw path otherwise.
        route: Option<String>,
        /// False for framework-internal sub-requests, which are not traced.
        main_request: bool,
    },
    Authenticated {
        username: String,
    },
    ControllerResolved,
    ControllerArgumentsResolving,
    ControllerArgumentsResolved {
        controller: String,
    },
    ViewRendering,
    ResponseReady,
    RequestFinished,
    ExceptionRaised {
        exception: ExceptionInfo,
    },
    Terminated {
        status_code: u16,
    },
}

/// Drives the transaction and the nested segment chain of one HTTP request:
/// routing, controller resolution, argument resolution, the controller
/// itself, then view rendering or response building.
///
/// Only the main request of a request tree is instrumented, and routes
/// matching the configured ignore patterns produce no transaction at all.
/// Exceptions are reported without altering their propagation to the host
/// framework's own error rendering.
pub struct KernelListener {
    inspector: Arc<Inspector>,
    segments: HashMap<&'static str, SegmentId>,
    eligible: bool,
    /// Depth of framework-internal sub-requests currently in flight, such as
    /// error-page renders, forwards, and fragments. While non-zero, lifecycle
    /// events belong to the sub-request and must neither advance nor disable
    /// the main chain.
    sub_requests: u32,
}

impl KernelListener {
    pub fn new(inspector: Arc<Inspector>) -> Self {
        Self {
            inspector,
            segments: HashMap::new(),
            eligible: false,
            sub_requests: 0,
        }
    }

    pub fn handle(&mut self, event: HttpEvent) {
        match event {
            HttpEvent::RequestReceived {
                main_request: false, ..
            } => self.sub_requests += 1,
            HttpEvent::RequestFinished if self.sub_requests > 0 => self.sub_requests -= 1,
            HttpEvent::ExceptionRaised { exception } => self.on_exception(exception),
            _ if self.sub_requests > 0 => {}
            HttpEvent::RequestReceived {
                method, path, route, ..
            } => self.on_request(method, path, route),
            HttpEvent::Authenticated { username } => self.on_authenticated(username),
            HttpEvent::ControllerResolved => self.advance(REQUEST, CONTROLLER),
            HttpEvent::ControllerArgumentsResolving => {
                self.advance(CONTROLLER, CONTROLLER_ARGUMENTS)
            }
            HttpEvent::ControllerArgumentsResolved { controller } => {
                if self.eligible {
                    self.end_slot(CONTROLLER_ARGUMENTS);
                    self.start_slot(CONTROLLER_HANDLER, SEGMENT_TYPE_CONTROLLER, &controller);
                }
            }
            HttpEvent::ViewRendering => self.advance(CONTROLLER_HANDLER, VIEW),
            HttpEvent::ResponseReady => self.on_response(),
            HttpEvent::RequestFinished => {
                if self.eligible {
                    self.end_slot(RESPONSE);
                }
            }
            HttpEvent::Terminated { status_code } => self.on_terminated(status_code),
        }
    }

    fn on_request(&mut self, method: String, path: String, route: Option<String>) {
        let route_label = route.unwrap_or(path);
        self.eligible = !is_ignored(&self.inspector.config().ignore_routes, &route_label);
        if !self.eligible {
            return;
        }

        if self.inspector.need_transaction() {
            self.inspector
                .start_transaction(&format!("{method} {route_label}"));
        }
        self.start_slot(REQUEST, SEGMENT_TYPE_PROCESS, REQUEST);
    }

    fn on_authenticated(&mut self, username: String) {
        if !self.eligible {
            return;
        }
        self.inspector.with_transaction(|transaction| {
            transaction.with_user(username);
        });
    }

    fn on_response(&mut self) {
        if !self.eligible || !self.inspector.is_recording() {
            return;
        }
        // Whichever of these is still open, depending on whether a view was
        // rendered or the controller produced the response directly.
        self.end_slot(CONTROLLER_HANDLER);
        self.end_slot(REQUEST);
        self.end_slot(VIEW);

        self.start_slot(RESPONSE, SEGMENT_TYPE_PROCESS, RESPONSE);
    }

    /// Not gated on eligibility: an error is worth a transaction even on a
    /// request that never got one.
    fn on_exception(&mut self, exception: ExceptionInfo) {
        if !self.inspector.is_recording() {
            return;
        }
        if self.inspector.need_transaction() {
            self.inspector.start_transaction(&exception.class);
            self.eligible = true;
        }
        self.inspector.with_transaction(|transaction| {
            transaction.set_result("error");
        });
        self.inspector.report_exception(&exception, false);
    }

    fn on_terminated(&mut self, status_code: u16) {
        if !self.eligible {
            return;
        }
        self.inspector.with_transaction(|transaction| {
            // A reported error outranks the status code.
            if transaction.result != "error" {
                transaction.set_result(status_code.to_string());
            }
        });
        self.inspector.end_transaction();
        self.inspector.flush();
    }

    /// Closes one lifecycle segment and opens the next.
    fn advance(&mut self, from: &'static str, to: &'static str) {
        if !self.eligible {
            return;
        }
        self.end_slot(from);
        self.start_slot(to, SEGMENT_TYPE_PROCESS, to);
    }

    fn start_slot(&mut self, slot: &'static str, kind: &str, label: &str) {
        if !self.inspector.can_add_segments() {
            return;
        }
        let id = self.inspector.start_segment(kind, label);
        self.segments.insert(slot, id);
    }

    fn end_slot(&mut self, slot: &'static str) {
        if let Some(id) = self.segments.remove(slot) {
            self.inspector.end_segment(id);
        }
    }
}
