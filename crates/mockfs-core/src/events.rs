//! Before/after operation interception
//!
//! Every engine operation publishes a [`Phase::Before`] event, performs its
//! work unless a handler responded, then publishes a [`Phase::After`] event.
//! Dispatch iterates a snapshot of the registrations taken under the lock and
//! calls handlers with no lock held, so handlers may subscribe or unsubscribe
//! (themselves or others) freely.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::{AggregateError, FsError, FsResult};

/// Kinds of intercepted operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileOperation {
    CreateFile,
    CreateDirectory,
    CreateSymlink,
    Open,
    Read,
    Write,
    Delete,
    Move,
    Copy,
    SetAttributes,
    SetTimes,
    SetAccessControl,
    SetCurrentDirectory,
    Enumerate,
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOperation::CreateFile => "create file",
            FileOperation::CreateDirectory => "create directory",
            FileOperation::CreateSymlink => "create symlink",
            FileOperation::Open => "open",
            FileOperation::Read => "read",
            FileOperation::Write => "write",
            FileOperation::Delete => "delete",
            FileOperation::Move => "move",
            FileOperation::Copy => "copy",
            FileOperation::SetAttributes => "set attributes",
            FileOperation::SetTimes => "set times",
            FileOperation::SetAccessControl => "set access control",
            FileOperation::SetCurrentDirectory => "set current directory",
            FileOperation::Enumerate => "enumerate",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

#[derive(Debug)]
enum Response {
    Cancel,
    Fail(FsError),
}

/// One notification delivered to subscribers
#[derive(Debug)]
pub struct OperationEvent {
    operation: FileOperation,
    path: String,
    destination: Option<String>,
    phase: Phase,
    response: Mutex<Option<Response>>,
}

impl OperationEvent {
    pub(crate) fn new(
        operation: FileOperation,
        path: impl Into<String>,
        destination: Option<String>,
        phase: Phase,
    ) -> Self {
        Self {
            operation,
            path: path.into(),
            destination,
            phase,
            response: Mutex::new(None),
        }
    }

    pub(crate) fn after(&self) -> Self {
        Self::new(
            self.operation,
            self.path.clone(),
            self.destination.clone(),
            Phase::After,
        )
    }

    pub fn operation(&self) -> FileOperation {
        self.operation
    }

    /// Normalized path the operation targets.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Destination of a move or copy.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Abort the pending operation; the caller receives [`FsError::Cancelled`].
    pub fn cancel(&self) -> FsResult<()> {
        self.respond(Response::Cancel)
    }

    /// Abort the pending operation and raise `error` to the caller instead.
    pub fn fail_with(&self, error: FsError) -> FsResult<()> {
        self.respond(Response::Fail(error))
    }

    pub fn has_response(&self) -> bool {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn respond(&self, response: Response) -> FsResult<()> {
        if self.phase == Phase::After {
            return Err(FsError::invalid_state(format!(
                "cannot respond to {} after it has completed",
                self.operation
            )));
        }
        // Last responder wins.
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
        Ok(())
    }

    fn take_response(&self) -> Option<Response> {
        self.response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Receives operation events
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &OperationEvent) -> FsResult<()>;
}

impl<F> EventSink for F
where
    F: Fn(&OperationEvent) -> FsResult<()> + Send + Sync,
{
    fn on_event(&self, event: &OperationEvent) -> FsResult<()> {
        self(event)
    }
}

/// Which operations a subscription receives
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Only(Vec<FileOperation>),
}

impl EventFilter {
    pub fn matches(&self, operation: FileOperation) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(operations) => operations.contains(&operation),
        }
    }
}

impl From<FileOperation> for EventFilter {
    fn from(operation: FileOperation) -> Self {
        EventFilter::Only(vec![operation])
    }
}

impl From<Vec<FileOperation>> for EventFilter {
    fn from(operations: Vec<FileOperation>) -> Self {
        EventFilter::Only(operations)
    }
}

impl From<&[FileOperation]> for EventFilter {
    fn from(operations: &[FileOperation]) -> Self {
        EventFilter::Only(operations.to_vec())
    }
}

/// Subscription identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct Registration {
    id: SubscriptionId,
    filter: EventFilter,
    sink: Arc<dyn EventSink>,
    active: AtomicBool,
}

struct BusInner {
    registrations: Mutex<Vec<Arc<Registration>>>,
    next_subscription_id: AtomicU64,
    enabled: bool,
}

impl BusInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match registrations.iter().position(|r| r.id == id) {
            Some(idx) => {
                let registration = registrations.remove(idx);
                // A dispatch already holding a snapshot must skip it from now on.
                registration.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

/// Subscriber registry and dispatcher
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("enabled", &self.inner.enabled)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventBus {
    /// A disabled bus accepts subscriptions but never dispatches.
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: Mutex::new(Vec::new()),
                next_subscription_id: AtomicU64::new(1),
                enabled,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn subscribe<F, S>(&self, filter: F, sink: S) -> Subscription
    where
        F: Into<EventFilter>,
        S: EventSink + 'static,
    {
        self.subscribe_sink(filter, Arc::new(sink))
    }

    pub fn subscribe_sink<F>(&self, filter: F, sink: Arc<dyn EventSink>) -> Subscription
    where
        F: Into<EventFilter>,
    {
        let id = SubscriptionId(self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            id,
            filter: filter.into(),
            sink,
            active: AtomicBool::new(true),
        });
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration);
        tracing::trace!(subscription = id.0, "event subscription added");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription by id. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every matching subscriber, then turn handler
    /// failures and responses into the caller's result.
    pub(crate) fn publish(&self, event: &OperationEvent) -> FsResult<()> {
        if !self.inner.enabled {
            return Ok(());
        }

        let snapshot: Vec<Arc<Registration>> = self
            .inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.filter.matches(event.operation))
            .cloned()
            .collect();

        let mut errors = Vec::new();
        for registration in snapshot {
            if !registration.active.load(Ordering::Acquire) {
                continue;
            }
            tracing::trace!(
                subscription = registration.id.0,
                operation = %event.operation,
                phase = ?event.phase,
                path = %event.path,
                "dispatching event"
            );
            if let Err(err) = registration.sink.on_event(event) {
                errors.push(err);
            }
        }

        match errors.len() {
            0 => {}
            1 => return Err(errors.remove(0)),
            n => {
                tracing::warn!(operation = %event.operation, failures = n, "multiple event handlers failed");
                return Err(AggregateError::new(errors).into());
            }
        }

        match event.take_response() {
            None => Ok(()),
            Some(Response::Cancel) => Err(FsError::Cancelled {
                operation: event.operation,
                path: event.path.clone(),
            }),
            Some(Response::Fail(err)) => Err(err),
        }
    }
}

/// Live subscription; dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id.0).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn before(op: FileOperation) -> OperationEvent {
        OperationEvent::new(op, "C:\\f", None, Phase::Before)
    }

    #[test]
    fn test_filtered_fan_out() {
        let bus = EventBus::default();
        let all = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));

        let a = all.clone();
        let _s1 = bus.subscribe(EventFilter::All, move |_: &OperationEvent| -> FsResult<()> {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let d = deletes.clone();
        let _s2 = bus.subscribe(FileOperation::Delete, move |_: &OperationEvent| -> FsResult<()> {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&before(FileOperation::Delete)).unwrap();
        bus.publish(&before(FileOperation::Write)).unwrap();

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_and_fail_with() {
        let bus = EventBus::default();
        let _s = bus.subscribe(FileOperation::Delete, |e: &OperationEvent| e.cancel());
        let err = bus.publish(&before(FileOperation::Delete)).unwrap_err();
        assert!(matches!(
            err,
            FsError::Cancelled {
                operation: FileOperation::Delete,
                ..
            }
        ));

        let _s2 = bus.subscribe(FileOperation::Write, |e: &OperationEvent| {
            e.fail_with(FsError::access_denied(e.path()))
        });
        let err = bus.publish(&before(FileOperation::Write)).unwrap_err();
        assert!(matches!(err, FsError::AccessDenied { .. }));
    }

    #[test]
    fn test_response_in_after_phase_is_state_error() {
        let event = before(FileOperation::Copy).after();
        assert!(matches!(event.cancel(), Err(FsError::InvalidState { .. })));
        assert!(matches!(
            event.fail_with(FsError::NotLegalForm),
            Err(FsError::InvalidState { .. })
        ));
        assert!(!event.has_response());
    }

    #[test]
    fn test_single_error_propagates_directly() {
        let bus = EventBus::default();
        let _s = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Err(FsError::NotLegalForm) });
        let _ok = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Ok(()) });
        assert!(matches!(
            bus.publish(&before(FileOperation::Read)),
            Err(FsError::NotLegalForm)
        ));
    }

    #[test]
    fn test_multiple_errors_aggregate_in_order() {
        let bus = EventBus::default();
        let _s1 = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Err(FsError::NotLegalForm) });
        let _s2 = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Err(FsError::IllegalCharacters) });
        match bus.publish(&before(FileOperation::Read)) {
            Err(FsError::Aggregate(agg)) => {
                assert_eq!(agg.errors().len(), 2);
                assert!(matches!(agg.errors()[0], FsError::NotLegalForm));
                assert!(matches!(agg.errors()[1], FsError::IllegalCharacters));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::default();
        let s = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Ok(()) });
        assert_eq!(bus.subscription_count(), 1);
        drop(s);
        assert_eq!(bus.subscription_count(), 0);

        let s = bus.subscribe(EventFilter::All, |_: &OperationEvent| -> FsResult<()> { Ok(()) });
        let id = s.id();
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        s.unsubscribe();
    }

    #[test]
    fn test_handler_can_dispose_other_subscription_mid_dispatch() {
        let bus = EventBus::default();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let v = victim.clone();
        let _first = bus.subscribe(EventFilter::All, move |_: &OperationEvent| -> FsResult<()> {
            v.lock().unwrap().take();
            Ok(())
        });
        let c = second_calls.clone();
        let second = bus.subscribe(EventFilter::All, move |_: &OperationEvent| -> FsResult<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *victim.lock().unwrap() = Some(second);

        bus.publish(&before(FileOperation::Open)).unwrap();
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscription_count(), 1);
    }

    #[test]
    fn test_disabled_bus_never_dispatches() {
        let bus = EventBus::new(false);
        let _s = bus.subscribe(EventFilter::All, |e: &OperationEvent| e.cancel());
        assert!(bus.publish(&before(FileOperation::Delete)).is_ok());
    }
}
