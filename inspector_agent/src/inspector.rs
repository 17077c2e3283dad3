use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard,
};

use serde_json::{json, Value};

use crate::{
    config::Config,
    transaction::{ExceptionInfo, Segment, SegmentId, Transaction},
    transport::Transport,
};

/// Single authority over "is there a current transaction" and "can a segment
/// be opened" for one logical execution context.
///
/// At most one transaction is open at any time; nested units of work (a
/// message handled inside a web request, a command invoked from a controller)
/// degrade to segments of the transaction already open. Completed
/// transactions accumulate in a pending buffer until [`Inspector::flush`]
/// hands them to the transport.
///
/// A misconfigured tracer (monitoring disabled, ingestion key missing) is a
/// disabled no-op: instrumentation absence must never break the host
/// application.
///
/// # Examples
///
/// ```rust
/// use inspector_agent::{Config, Inspector, NullTransport};
///
/// let inspector = Inspector::new(Config::new("your-ingestion-key"), Box::new(NullTransport));
///
/// inspector.start_transaction("GET /checkout");
/// {
///     let segment = inspector.segment("process", "checkout");
///     segment.add_context("Cart", serde_json::json!({"items": 3}));
///     // the segment ends when the guard goes out of scope
/// }
/// inspector.with_transaction(|transaction| {
///     transaction.set_result("200");
/// });
/// inspector.flush();
/// ```
pub struct Inspector {
    config: Config,
    recording: bool,
    transport: Box<dyn Transport>,
    segment_ids: AtomicU64,
    state: Mutex<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    current: Option<Transaction>,
    /// Stack of still-open segment ids, innermost last.
    open_segments: Vec<SegmentId>,
    pending: Vec<Transaction>,
}

impl Inspector {
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Self {
        let recording = config.is_usable();
        if !recording && config.enabled {
            log::warn!("inspector is disabled: no ingestion key configured");
        }
        Self {
            config,
            recording,
            transport,
            segment_ids: AtomicU64::new(1),
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// True when recording is enabled and no transaction is currently open.
    pub fn need_transaction(&self) -> bool {
        self.recording && self.state().current.is_none()
    }

    pub fn has_transaction(&self) -> bool {
        self.state().current.is_some()
    }

    /// True when a transaction is open and recording is enabled.
    pub fn can_add_segments(&self) -> bool {
        self.recording && self.state().current.is_some()
    }

    /// Opens a transaction. If one is already open it is kept: there is never
    /// a second concurrently open transaction, callers degrade to segments.
    pub fn start_transaction(&self, name: &str) {
        if !self.recording {
            return;
        }
        let mut state = self.state();
        match &state.current {
            Some(existing) => {
                log::debug!(
                    "transaction {existing} already open, ignoring start of {name}",
                    existing = existing.name
                );
            }
            None => {
                log::debug!("starting transaction: {name}");
                state.current = Some(Transaction::new(name));
            }
        }
    }

    /// Runs `use_it` against the current transaction, if any.
    pub fn with_transaction<T>(&self, use_it: impl FnOnce(&mut Transaction) -> T) -> Option<T> {
        self.state().current.as_mut().map(use_it)
    }

    /// Opens a segment nested under the innermost open segment.
    ///
    /// # Panics
    ///
    /// Opening a segment without an open transaction is a defect at the
    /// instrumentation call site; gate on [`Inspector::can_add_segments`].
    pub fn start_segment(&self, kind: &str, label: &str) -> SegmentId {
        let mut state = self.state();
        let parent = state.open_segments.last().copied();
        let id = SegmentId(self.segment_ids.fetch_add(1, Ordering::Relaxed));

        let Some(transaction) = state.current.as_mut() else {
            panic!("cannot start segment '{label}' without an open transaction");
        };
        log::debug!("starting segment {id:?}: {kind} / {label}");
        transaction.segments.push(Segment::new(id, parent, kind, label));
        state.open_segments.push(id);
        id
    }

    /// Ends an open segment.
    ///
    /// # Panics
    ///
    /// Ending a segment that is not open (never started, already ended, or
    /// belonging to a transaction that is gone) is a defect at the
    /// instrumentation call site, not a runtime condition to swallow.
    pub fn end_segment(&self, id: SegmentId) {
        if !self.close_segment(id) {
            panic!("attempt to end segment {id:?} which is not open");
        }
    }

    /// Attaches a context group to an open or ended segment of the current
    /// transaction. Quietly does nothing when the segment is gone.
    pub fn add_segment_context(&self, id: SegmentId, group: &str, payload: Value) {
        let mut state = self.state();
        let segment = state
            .current
            .as_mut()
            .and_then(|transaction| transaction.segments.iter_mut().find(|s| s.id == id));
        match segment {
            Some(segment) => {
                segment.context.insert(group.to_owned(), payload);
            }
            None => log::debug!("dropping context group '{group}' for unknown segment {id:?}"),
        }
    }

    /// Scoped segment: ends on every exit path, including unwinding.
    ///
    /// # Panics
    ///
    /// Same precondition as [`Inspector::start_segment`].
    pub fn segment(&self, kind: &str, label: &str) -> SegmentGuard<'_> {
        SegmentGuard {
            inspector: self,
            id: self.start_segment(kind, label),
            ended: false,
        }
    }

    /// Records an application error on the current transaction, starting one
    /// named after the error class first when none is open.
    pub fn report_exception(&self, exception: &ExceptionInfo, ends_transaction: bool) {
        if !self.recording {
            return;
        }
        if self.need_transaction() {
            self.start_transaction(&exception.class);
            self.with_transaction(|transaction| {
                transaction.set_result("error");
            });
        }

        let id = self.start_segment("exception", &exception.class);
        self.add_segment_context(
            id,
            "Exception",
            json!({
                "class": exception.class,
                "message": exception.message,
                "chain": exception.chain,
            }),
        );
        self.end_segment(id);

        if ends_transaction {
            self.with_transaction(|transaction| {
                transaction.set_result("error");
            });
            self.end_transaction();
        }
    }

    /// Ends the current transaction and queues it for delivery.
    pub fn end_transaction(&self) {
        let mut state = self.state();
        if let Some(mut transaction) = state.current.take() {
            state.open_segments.clear();
            transaction.close();
            state.pending.push(transaction);
        }
    }

    /// Hands every completed transaction to the transport and clears the
    /// pending buffer. A still-open transaction is ended implicitly. Safe to
    /// call with nothing pending: no transport call is made.
    ///
    /// Delivery failures are logged and dropped; retrying is the transport's
    /// concern.
    pub fn flush(&self) {
        if !self.recording {
            return;
        }
        self.end_transaction();

        let batch = std::mem::take(&mut self.state().pending);
        if batch.is_empty() {
            return;
        }
        log::debug!("flushing {} transaction(s)", batch.len());
        if let Err(error) = self.transport.send(batch) {
            log::error!("transaction batch lost: {error}");
        }
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state
            .lock()
            .expect("recorder mutex should not be poisoned")
    }

    /// Forgiving close used by guard teardown; false when the segment is not
    /// open anymore.
    fn close_segment(&self, id: SegmentId) -> bool {
        let mut state = self.state();
        if !state.open_segments.contains(&id) {
            return false;
        }
        state.open_segments.retain(|open| *open != id);

        let segment = state
            .current
            .as_mut()
            .and_then(|transaction| transaction.segments.iter_mut().find(|s| s.id == id));
        match segment {
            Some(segment) if !segment.is_ended() => {
                segment.close();
                true
            }
            _ => false,
        }
    }
}

/// Scoped handle to an open segment. Dropping the guard ends the segment, so
/// the matching end fires on every exit path including panics; the drop path
/// never panics itself.
pub struct SegmentGuard<'a> {
    inspector: &'a Inspector,
    id: SegmentId,
    ended: bool,
}

impl SegmentGuard<'_> {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn add_context(&self, group: &str, payload: Value) {
        self.inspector.add_segment_context(self.id, group, payload);
    }

    pub fn end(mut self) {
        self.ended = true;
        self.inspector.end_segment(self.id);
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        if !self.ended && !self.inspector.close_segment(self.id) {
            log::error!("segment {id:?} vanished before its guard was dropped", id = self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{disabled_inspector, recording_inspector};

    #[test]
    fn starting_twice_keeps_the_first_transaction() {
        let (inspector, _transport) = recording_inspector();

        inspector.start_transaction("GET /checkout");
        inspector.start_transaction("GET /cart");

        let name = inspector.with_transaction(|transaction| transaction.name.clone());
        assert_eq!(Some("GET /checkout".to_string()), name);
    }

    #[test]
    fn need_transaction_flips_once_one_is_open() {
        let (inspector, _transport) = recording_inspector();

        assert!(inspector.need_transaction());
        assert!(!inspector.can_add_segments());

        inspector.start_transaction("app:import");

        assert!(!inspector.need_transaction());
        assert!(inspector.can_add_segments());
    }

    #[test]
    fn segments_nest_under_the_innermost_open_segment() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /");

        let outer = inspector.start_segment("process", "kernel.request");
        let inner = inspector.start_segment("sql", "SELECT 1");
        inspector.end_segment(inner);
        inspector.end_segment(outer);
        let sibling = inspector.start_segment("process", "kernel.response");
        inspector.end_segment(sibling);

        inspector.flush();
        let batch = transport.single_batch();
        let segments = batch[0].segments();
        assert_eq!(3, segments.len());
        assert_eq!(None, segments[0].parent());
        assert_eq!(Some(outer), segments[1].parent());
        assert_eq!(None, segments[2].parent());
    }

    #[test]
    #[should_panic(expected = "without an open transaction")]
    fn starting_a_segment_without_a_transaction_is_a_logic_error() {
        let (inspector, _transport) = recording_inspector();
        inspector.start_segment("process", "orphan");
    }

    #[test]
    #[should_panic(expected = "which is not open")]
    fn ending_a_segment_twice_is_a_logic_error() {
        let (inspector, _transport) = recording_inspector();
        inspector.start_transaction("GET /");

        let id = inspector.start_segment("process", "kernel.request");
        inspector.end_segment(id);
        inspector.end_segment(id);
    }

    #[test]
    #[should_panic(expected = "which is not open")]
    fn ending_a_segment_that_never_started_is_a_logic_error() {
        let (inspector, _transport) = recording_inspector();
        inspector.start_transaction("GET /");

        inspector.end_segment(crate::SegmentId(4242));
    }

    #[test]
    fn guard_ends_the_segment_on_drop() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /");

        {
            let _segment = inspector.segment("process", "kernel.request");
        }

        inspector.flush();
        let batch = transport.single_batch();
        assert!(batch[0].segments()[0].is_ended());
    }

    #[test]
    fn guard_ends_the_segment_when_the_call_site_panics() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /");

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _segment = inspector.segment("process", "kernel.request");
            panic!("handler blew up");
        }));
        assert!(panicked.is_err());

        inspector.flush();
        let batch = transport.single_batch();
        assert!(batch[0].segments()[0].is_ended());
    }

    #[test]
    fn explicit_guard_end_does_not_end_twice_on_drop() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /");

        let segment = inspector.segment("process", "kernel.request");
        segment.end();

        inspector.flush();
        assert_eq!(1, transport.single_batch()[0].segments().len());
    }

    #[test]
    fn flush_with_nothing_pending_makes_no_transport_call() {
        let (inspector, transport) = recording_inspector();

        inspector.flush();
        inspector.flush();

        assert_eq!(0, transport.sends());
    }

    #[test]
    fn flush_ends_the_open_transaction_and_clears_the_buffer() {
        let (inspector, transport) = recording_inspector();

        inspector.start_transaction("app:import");
        inspector.flush();

        assert_eq!(1, transport.sends());
        let batch = transport.single_batch();
        assert!(batch[0].is_ended());
        assert!(!inspector.has_transaction());

        // Nothing left behind for a second flush.
        inspector.flush();
        assert_eq!(1, transport.sends());
    }

    #[test]
    fn delivery_failure_is_dropped_not_raised() {
        use crate::transport::{Transport, TransportError};

        struct FailingTransport;
        impl Transport for FailingTransport {
            fn send(&self, _batch: Vec<Transaction>) -> Result<(), TransportError> {
                Err(TransportError::Delivery("collector unreachable".into()))
            }
        }

        let inspector = Inspector::new(crate::Config::new("ikey"), Box::new(FailingTransport));
        inspector.start_transaction("GET /");
        inspector.flush();

        assert!(!inspector.has_transaction());
    }

    #[test]
    fn report_exception_starts_a_transaction_named_after_the_class() {
        let (inspector, transport) = recording_inspector();

        let exception = ExceptionInfo::new("PaymentDeclined", "card expired");
        inspector.report_exception(&exception, true);

        let batch = transport.drain_after_flush(&inspector);
        assert_eq!("PaymentDeclined", batch[0].name);
        assert_eq!("error", batch[0].result);
        assert_eq!(1, batch[0].segments().len());
        assert_eq!("exception", batch[0].segments()[0].kind);
    }

    #[test]
    fn report_exception_attaches_to_the_open_transaction() {
        let (inspector, transport) = recording_inspector();
        inspector.start_transaction("GET /checkout");

        let exception = ExceptionInfo::new("PaymentDeclined", "card expired");
        inspector.report_exception(&exception, false);

        // The transaction stays open, result untouched.
        assert!(inspector.has_transaction());

        let batch = transport.drain_after_flush(&inspector);
        assert_eq!("GET /checkout", batch[0].name);
        assert_eq!("", batch[0].result);
        let context = &batch[0].segments()[0].context["Exception"];
        assert_eq!("card expired", context["message"]);
    }

    #[test]
    fn disabled_inspector_is_a_no_op() {
        let (inspector, transport) = disabled_inspector();

        assert!(!inspector.is_recording());
        assert!(!inspector.need_transaction());

        inspector.start_transaction("GET /");
        assert!(!inspector.has_transaction());

        inspector.report_exception(&ExceptionInfo::new("Boom", "no-op"), true);
        inspector.flush();

        assert_eq!(0, transport.sends());
    }
}
