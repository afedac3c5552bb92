//! Worker messaging proxy
//!
//! The owner-side mediator for all communication between a worker object
//! and its execution unit. All state lives on the owner thread; the
//! worker thread reaches it only through posted `HostEvent`s, so no field
//! needs a lock. The proxy buffers messages sent before the unit's thread
//! exists, tracks the unconfirmed-message count behind the
//! pending-activity signal, and drives the termination/destruction state
//! machine: either side may ask to stop first, and the proxy is disposed
//! only once the worker object is gone *and* the thread has fully
//! terminated.

use std::rc::{Rc, Weak};

use crate::inspector::WorkerInspector;
use crate::task::{TaskReceiver, TaskSender, task_channel};
use crate::worker::object_proxy::HostEvent;
use crate::worker::queue::EarlyTaskQueue;
use crate::worker::{
    ConsoleMessage, OwnerContext, ScriptException, StartupOptions, WorkerError, WorkerId,
    WorkerMessage, WorkerObjectProxy, WorkerTask,
};

/// Owner-side worker object: receives delivered messages and error events.
pub trait WorkerHandle {
    fn deliver_message(&self, message: WorkerMessage);
    fn deliver_error(&self, error: &ScriptException);
}

/// A started worker execution unit, as seen from the owner thread.
pub trait WorkerUnit {
    /// Post a task into the unit's cooperative loop.
    fn post_task(&self, task: WorkerTask);

    /// Ask the unit to stop. Tasks already posted are not retracted.
    fn request_stop(&self);
}

/// Everything a worker execution unit needs to start.
pub struct WorkerStartup {
    pub id: WorkerId,
    pub script_url: String,
    pub script_source: String,
    pub options: StartupOptions,
    pub object_proxy: WorkerObjectProxy,
}

/// One-shot constructor for the execution unit. The loader and engine
/// behind it are the embedder's; failures come back as `WorkerError`.
pub type WorkerUnitFactory = Box<dyn FnOnce(WorkerStartup) -> Result<Box<dyn WorkerUnit>, WorkerError>>;

/// Lifecycle of the proxy. Termination is monotonic: once requested it
/// never reverts, and `Disposed` is reachable only after the thread is
/// gone and the worker object has been destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LifecyclePhase {
    Active,
    TerminationRequested,
    ThreadTerminated,
    Disposed,
}

/// Owner-side mediator between a worker object and its execution unit.
pub struct WorkerMessagingProxy {
    owner: Rc<OwnerContext>,
    id: WorkerId,
    handle: Option<Weak<dyn WorkerHandle>>,
    inspector: Rc<dyn WorkerInspector>,
    factory: Option<WorkerUnitFactory>,
    unit: Option<Box<dyn WorkerUnit>>,
    early_tasks: EarlyTaskQueue,
    events_tx: TaskSender<HostEvent>,
    events_rx: TaskReceiver<HostEvent>,
    unconfirmed_message_count: u32,
    worker_reported_activity: bool,
    may_be_destroyed: bool,
    phase: LifecyclePhase,
    teardown_done: bool,
    disposer: Option<Box<dyn FnOnce(WorkerId)>>,
}

impl WorkerMessagingProxy {
    /// Create a proxy bound 1:1 to `handle`. Must be called on the thread
    /// that owns `owner`.
    pub fn new(
        owner: Rc<OwnerContext>,
        handle: Weak<dyn WorkerHandle>,
        inspector: Rc<dyn WorkerInspector>,
        factory: WorkerUnitFactory,
    ) -> WorkerMessagingProxy {
        owner.thread().check("WorkerMessagingProxy::new");
        let (events_tx, events_rx) = task_channel();
        WorkerMessagingProxy {
            owner,
            id: WorkerId::next(),
            handle: Some(handle),
            inspector,
            factory: Some(factory),
            unit: None,
            early_tasks: EarlyTaskQueue::new(),
            events_tx,
            events_rx,
            unconfirmed_message_count: 0,
            worker_reported_activity: false,
            may_be_destroyed: false,
            phase: LifecyclePhase::Active,
            teardown_done: false,
            disposer: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Register the one-shot disposal action run when both halves have
    /// released the proxy. Typically removes the proxy from its owner's
    /// live set.
    pub fn on_dispose(&mut self, disposer: impl FnOnce(WorkerId) + 'static) {
        self.disposer = Some(Box::new(disposer));
    }

    /// The relay the worker thread uses to reach this proxy.
    pub fn object_proxy(&self) -> WorkerObjectProxy {
        WorkerObjectProxy::new(self.events_tx.clone())
    }

    /// Whether termination has been requested (by either side).
    pub fn asked_to_terminate(&self) -> bool {
        self.phase >= LifecyclePhase::TerminationRequested
    }

    /// Whether both halves released the proxy and it has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.phase == LifecyclePhase::Disposed
    }

    /// Messages handed to the worker unit and not yet acknowledged.
    pub fn unconfirmed_message_count(&self) -> u32 {
        self.unconfirmed_message_count
    }

    /// Start the worker execution unit. Callable at most once; a no-op if
    /// termination was requested before the unit came up. The moment the
    /// unit exists, every buffered task is posted to it in arrival order.
    pub fn start_worker_unit(
        &mut self,
        script_url: &str,
        script_source: String,
        options: StartupOptions,
    ) -> Result<(), WorkerError> {
        self.check_entry("start_worker_unit");
        if self.asked_to_terminate() {
            // Terminate won the race against startup.
            return Ok(());
        }
        let factory = self
            .factory
            .take()
            .expect("worker execution unit started twice");
        let startup = WorkerStartup {
            id: self.id,
            script_url: script_url.to_string(),
            script_source,
            options,
            object_proxy: self.object_proxy(),
        };
        let unit = factory(startup)?;
        self.inspector.unit_created(self.id, unit.as_ref(), script_url);

        // Buffered messages were already counted as sent when queued.
        debug_assert_eq!(
            self.unconfirmed_message_count as usize,
            self.early_tasks.len()
        );
        self.unconfirmed_message_count = self.early_tasks.len() as u32;
        for task in self.early_tasks.drain_once() {
            unit.post_task(task);
        }
        self.unit = Some(unit);
        log::debug!(
            "{}: started unit for {} ({})",
            self.id,
            script_url,
            self.owner.label()
        );
        Ok(())
    }

    /// Send a message to the worker's global scope. Dropped silently once
    /// termination was requested; buffered while the unit's thread does
    /// not exist yet.
    pub fn post_message_to_worker_unit(&mut self, mut message: WorkerMessage) {
        self.check_entry("post_message_to_worker_unit");
        if self.asked_to_terminate() {
            log::trace!("{}: dropping message posted after terminate", self.id);
            return;
        }
        message.disentangle();
        self.unconfirmed_message_count += 1;
        let task = WorkerTask::DeliverMessage(message);
        match &self.unit {
            Some(unit) => unit.post_task(task),
            None => self.early_tasks.push(task),
        }
    }

    /// Acknowledge one processed message. Arriving after termination the
    /// count is meaningless and left alone, which also guards underflow.
    pub fn confirm_message_processed(&mut self, still_has_pending_activity: bool) {
        self.check_entry("confirm_message_processed");
        if !self.asked_to_terminate() {
            self.unconfirmed_message_count = self.unconfirmed_message_count.saturating_sub(1);
        }
        self.worker_reported_activity = still_has_pending_activity;
    }

    /// Record the worker side's own pending-activity check.
    pub fn report_pending_activity(&mut self, has_pending_activity: bool) {
        self.check_entry("report_pending_activity");
        self.worker_reported_activity = has_pending_activity;
    }

    /// Liveness signal for the owner-side worker object: true while
    /// acknowledgments are outstanding or the worker scope reports work,
    /// and never once termination was requested.
    pub fn has_pending_activity(&self) -> bool {
        self.owner.thread().check("has_pending_activity");
        (self.unconfirmed_message_count > 0 || self.worker_reported_activity)
            && !self.asked_to_terminate()
    }

    /// Ask the worker to stop. Idempotent; callable from the explicit
    /// terminate path or the handle-destruction path.
    pub fn request_termination(&mut self) {
        self.check_entry("request_termination");
        if self.asked_to_terminate() {
            return;
        }
        self.phase = LifecyclePhase::TerminationRequested;
        if let Some(unit) = &self.unit {
            unit.request_stop();
        }
        self.notify_teardown();
    }

    /// The worker thread has fully exited. If the worker object is
    /// already gone, the proxy is disposed here.
    pub fn worker_unit_terminated(&mut self) {
        self.check_entry("worker_unit_terminated");
        self.unit = None;
        self.notify_teardown();
        if self.phase < LifecyclePhase::ThreadTerminated {
            self.phase = LifecyclePhase::ThreadTerminated;
        }
        if self.may_be_destroyed {
            self.dispose();
        }
    }

    /// The owner-side worker object was destroyed. With no observer left,
    /// a running unit is asked to stop; with no unit to wait for, the
    /// proxy is disposed immediately.
    pub fn worker_handle_destroyed(&mut self) {
        self.check_entry("worker_handle_destroyed");
        self.handle = None;
        self.may_be_destroyed = true;
        if self.unit.is_some() {
            self.request_termination();
        } else {
            self.notify_teardown();
            self.dispose();
        }
    }

    /// Drain and dispatch every event the worker thread has posted.
    /// Called from the owner thread's cooperative loop.
    pub fn drain_host_events(&mut self) {
        self.check_entry("drain_host_events");
        for event in self.events_rx.drain() {
            match event {
                HostEvent::Message(message) => self.post_message_to_worker_handle(message),
                HostEvent::MessageProcessed {
                    has_pending_activity,
                } => self.confirm_message_processed(has_pending_activity),
                HostEvent::PendingActivity(has_pending_activity) => {
                    self.report_pending_activity(has_pending_activity)
                }
                HostEvent::Exception(exception) => self.report_exception(&exception),
                HostEvent::Console(message) => self.report_console_message(&message),
                HostEvent::UnitTerminated => self.worker_unit_terminated(),
            }
        }
    }

    /// Deliver a worker-originated message to the worker object. Dropped
    /// if the object is gone or termination was requested.
    fn post_message_to_worker_handle(&mut self, mut message: WorkerMessage) {
        if self.asked_to_terminate() {
            return;
        }
        let Some(handle) = self.live_handle() else {
            return;
        };
        message.re_entangle();
        handle.deliver_message(message);
    }

    /// Script exceptions keep flowing even after termination was
    /// requested; only a destroyed handle silences them.
    fn report_exception(&mut self, exception: &ScriptException) {
        log::debug!(
            "{}: uncaught exception at {}:{}: {}",
            self.id,
            exception.source_url,
            exception.line,
            exception.message
        );
        if let Some(handle) = self.live_handle() {
            handle.deliver_error(exception);
        }
    }

    fn report_console_message(&mut self, message: &ConsoleMessage) {
        log::log!(
            message.level.as_log_level(),
            "[{}] {}",
            self.id,
            message.text
        );
        self.inspector.forward_message(self.id, &message.text);
    }

    fn live_handle(&self) -> Option<Rc<dyn WorkerHandle>> {
        self.handle.as_ref()?.upgrade()
    }

    /// Shared teardown notification, performed exactly once no matter
    /// which side initiated the shutdown.
    fn notify_teardown(&mut self) {
        if self.teardown_done {
            return;
        }
        self.teardown_done = true;
        self.inspector.unit_terminated(self.id);
        log::debug!("{}: shutting down", self.id);
    }

    fn dispose(&mut self) {
        assert!(
            self.phase != LifecyclePhase::Disposed,
            "worker messaging proxy disposed twice"
        );
        debug_assert!(self.may_be_destroyed && self.unit.is_none());
        self.phase = LifecyclePhase::Disposed;
        self.factory = None;
        self.handle = None;
        log::debug!("{}: disposed", self.id);
        if let Some(disposer) = self.disposer.take() {
            disposer(self.id);
        }
    }

    fn check_entry(&self, operation: &str) {
        self.owner.thread().check(operation);
        assert!(
            self.phase != LifecyclePhase::Disposed,
            "{} called on a disposed worker messaging proxy",
            operation
        );
    }
}
