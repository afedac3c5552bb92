//! Thread-backed worker execution unit
//!
//! Spawns the worker's own OS thread and runs its cooperative loop:
//! evaluate the script through the embedder's global scope, then drain
//! delivery tasks in posting order, confirming each one. The loop watches
//! a stop flag instead of being interrupted; tasks already posted when a
//! stop arrives are abandoned, and the relay's fully-terminated
//! notification is always the loop's final action.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::task::{TaskReceiver, TaskSender, task_channel};
use crate::worker::{
    ScriptException, StartMode, WorkerMessage, WorkerResult, WorkerStartup, WorkerTask, WorkerUnit,
};

/// How long the loop sleeps waiting for tasks before re-checking the stop
/// flag and the scope's liveness.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// The worker's global scope: the seam where the embedder's script loader
/// and engine plug in. Lives entirely on the worker thread.
pub trait WorkerGlobalScope: Send {
    /// Run the worker script. A script-level failure is reported, not
    /// fatal to the unit.
    fn evaluate(&mut self, script_url: &str, source: &str) -> Result<(), ScriptException>;

    /// Dispatch one delivered message to the scope's handlers.
    fn handle_message(&mut self, message: WorkerMessage) -> Result<(), ScriptException>;

    /// Whether the scope has outstanding work of its own (timers, ports)
    /// that should keep the owner-side handle alive.
    fn has_pending_activity(&self) -> bool {
        false
    }

    /// Whether the scope asked to shut its own unit down.
    fn is_closing(&self) -> bool {
        false
    }
}

/// A worker execution unit running on its own OS thread.
pub struct WorkerThread {
    tasks: TaskSender<WorkerTask>,
    stop: Arc<AtomicBool>,
    /// Kept so the unit owns its thread; the loop signals its own exit
    /// through the relay rather than being joined.
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

impl WorkerThread {
    /// Spawn the unit's thread and start its cooperative loop.
    pub fn spawn(
        startup: WorkerStartup,
        scope: Box<dyn WorkerGlobalScope>,
    ) -> WorkerResult<WorkerThread> {
        let (tasks_tx, tasks_rx) = task_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name(startup.id.to_string())
            .spawn(move || run_unit_loop(startup, scope, tasks_rx, loop_stop))?;
        Ok(WorkerThread {
            tasks: tasks_tx,
            stop,
            join,
        })
    }

    /// Lift a paused start. Also delivered through the task queue, so
    /// messages sent while paused keep their order.
    pub fn resume(&self) {
        self.tasks.post(WorkerTask::Resume);
    }
}

impl WorkerUnit for WorkerThread {
    fn post_task(&self, task: WorkerTask) {
        self.tasks.post(task);
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.tasks.wake();
    }
}

fn run_unit_loop(
    startup: WorkerStartup,
    mut scope: Box<dyn WorkerGlobalScope>,
    tasks: TaskReceiver<WorkerTask>,
    stop: Arc<AtomicBool>,
) {
    let WorkerStartup {
        id,
        script_url,
        script_source,
        options,
        object_proxy,
    } = startup;

    let mut backlog: VecDeque<WorkerTask> = VecDeque::new();
    if options.start_mode == StartMode::Paused {
        backlog.extend(wait_for_resume(&tasks, &stop));
    }

    if !stop.load(Ordering::SeqCst) {
        log::debug!("{}: evaluating {}", id, script_url);
        if let Err(exception) = scope.evaluate(&script_url, &script_source) {
            object_proxy.exception_from_worker(exception);
        }
    }

    let mut reported_activity = false;
    'run: loop {
        if stop.load(Ordering::SeqCst) || scope.is_closing() {
            break;
        }
        backlog.extend(tasks.drain());
        if backlog.is_empty() {
            tasks.wait_timeout(IDLE_WAIT);
            let activity = scope.has_pending_activity();
            if activity != reported_activity {
                reported_activity = activity;
                object_proxy.report_pending_activity(activity);
            }
            continue;
        }
        while let Some(task) = backlog.pop_front() {
            if stop.load(Ordering::SeqCst) {
                break 'run;
            }
            match task {
                WorkerTask::DeliverMessage(mut message) => {
                    message.re_entangle();
                    if let Err(exception) = scope.handle_message(message) {
                        object_proxy.exception_from_worker(exception);
                    }
                    let activity = scope.has_pending_activity();
                    reported_activity = activity;
                    object_proxy.confirm_message_processed(activity);
                }
                WorkerTask::Resume => {}
            }
        }
    }

    log::debug!("{}: unit loop exiting", id);
    object_proxy.notify_fully_terminated();
}

/// Hold before the first evaluation until a resume task arrives, keeping
/// any messages delivered in the meantime in their posting order.
fn wait_for_resume(tasks: &TaskReceiver<WorkerTask>, stop: &Arc<AtomicBool>) -> Vec<WorkerTask> {
    let mut held = Vec::new();
    loop {
        if stop.load(Ordering::SeqCst) {
            return held;
        }
        let mut resumed = false;
        for task in tasks.drain() {
            match task {
                WorkerTask::Resume => resumed = true,
                other => held.push(other),
            }
        }
        if resumed {
            return held;
        }
        tasks.wait_timeout(IDLE_WAIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::NoopWorkerInspector;
    use crate::worker::object_proxy::HostEvent;
    use crate::worker::{
        MessagePayload, OwnerContext, StartupOptions, WorkerHandle, WorkerId, WorkerMessagingProxy,
        WorkerObjectProxy,
    };
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};
    use std::time::Instant;

    const TEST_DEADLINE: Duration = Duration::from_secs(5);

    /// Scope that reflects every delivered message back to the host.
    struct EchoScope {
        relay: WorkerObjectProxy,
    }

    impl WorkerGlobalScope for EchoScope {
        fn evaluate(&mut self, _script_url: &str, _source: &str) -> Result<(), ScriptException> {
            Ok(())
        }

        fn handle_message(&mut self, message: WorkerMessage) -> Result<(), ScriptException> {
            self.relay.message_from_worker(message);
            Ok(())
        }
    }

    /// Scope whose script fails to evaluate.
    struct FaultyScope;

    impl WorkerGlobalScope for FaultyScope {
        fn evaluate(&mut self, script_url: &str, _source: &str) -> Result<(), ScriptException> {
            Err(ScriptException {
                message: "SyntaxError: unexpected token".to_string(),
                script_id: 1,
                source_url: script_url.to_string(),
                line: 1,
                column: 14,
            })
        }

        fn handle_message(&mut self, _message: WorkerMessage) -> Result<(), ScriptException> {
            Ok(())
        }
    }

    /// Scope that closes its own unit after the first message.
    struct OneShotScope {
        done: bool,
    }

    impl WorkerGlobalScope for OneShotScope {
        fn evaluate(&mut self, _script_url: &str, _source: &str) -> Result<(), ScriptException> {
            Ok(())
        }

        fn handle_message(&mut self, _message: WorkerMessage) -> Result<(), ScriptException> {
            self.done = true;
            Ok(())
        }

        fn is_closing(&self) -> bool {
            self.done
        }
    }

    fn direct_startup(options: StartupOptions) -> (WorkerStartup, crate::task::TaskReceiver<HostEvent>) {
        let (tx, rx) = crate::task::task_channel();
        let startup = WorkerStartup {
            id: WorkerId::next(),
            script_url: "echo.js".to_string(),
            script_source: String::new(),
            options,
            object_proxy: WorkerObjectProxy::new(tx),
        };
        (startup, rx)
    }

    fn wait_for_event(
        rx: &crate::task::TaskReceiver<HostEvent>,
        collected: &mut Vec<HostEvent>,
        matches: impl Fn(&HostEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + TEST_DEADLINE;
        loop {
            collected.extend(rx.drain());
            if collected.iter().any(&matches) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_unit_echoes_and_confirms() {
        let (startup, rx) = direct_startup(StartupOptions::default());
        let relay = startup.object_proxy.clone();
        let unit = WorkerThread::spawn(startup, Box::new(EchoScope { relay })).expect("spawn");

        unit.post_task(WorkerTask::DeliverMessage(WorkerMessage::text("ping")));

        let mut events = Vec::new();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::MessageProcessed { .. }
        )));
        let echoed = events.iter().find_map(|event| match event {
            HostEvent::Message(message) => Some(message.payload.clone()),
            _ => None,
        });
        assert_eq!(echoed, Some(MessagePayload::Text("ping".to_string())));

        unit.request_stop();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::UnitTerminated
        )));
    }

    #[test]
    fn test_evaluation_failure_is_reported_not_fatal() {
        let (startup, rx) = direct_startup(StartupOptions::default());
        let unit = WorkerThread::spawn(startup, Box::new(FaultyScope)).expect("spawn");

        let mut events = Vec::new();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::Exception(exception) if exception.column == 14
        )));

        // The unit is still alive and shuts down cleanly on request.
        unit.request_stop();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::UnitTerminated
        )));
    }

    #[test]
    fn test_paused_start_holds_messages_until_resume() {
        let options = StartupOptions {
            start_mode: StartMode::Paused,
            ..StartupOptions::default()
        };
        let (startup, rx) = direct_startup(options);
        let relay = startup.object_proxy.clone();
        let unit = WorkerThread::spawn(startup, Box::new(EchoScope { relay })).expect("spawn");

        unit.post_task(WorkerTask::DeliverMessage(WorkerMessage::text("held")));
        thread::sleep(Duration::from_millis(100));
        assert!(
            rx.is_empty(),
            "paused unit must not process tasks before resume"
        );

        unit.resume();
        let mut events = Vec::new();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::Message(message)
                if message.payload == MessagePayload::Text("held".to_string())
        )));

        unit.request_stop();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::UnitTerminated
        )));
    }

    #[test]
    fn test_scope_initiated_close_terminates_unit() {
        let (startup, rx) = direct_startup(StartupOptions::default());
        let unit =
            WorkerThread::spawn(startup, Box::new(OneShotScope { done: false })).expect("spawn");

        unit.post_task(WorkerTask::DeliverMessage(WorkerMessage::text("only")));
        let mut events = Vec::new();
        assert!(wait_for_event(&rx, &mut events, |event| matches!(
            event,
            HostEvent::UnitTerminated
        )));
    }

    // ------------------------------------------------------------------
    // End-to-end: proxy + real thread
    // ------------------------------------------------------------------

    struct RecordingHandle {
        messages: RefCell<Vec<WorkerMessage>>,
        errors: RefCell<Vec<ScriptException>>,
    }

    impl WorkerHandle for RecordingHandle {
        fn deliver_message(&self, message: WorkerMessage) {
            self.messages.borrow_mut().push(message);
        }

        fn deliver_error(&self, error: &ScriptException) {
            self.errors.borrow_mut().push(error.clone());
        }
    }

    fn echo_proxy(handle: &Rc<RecordingHandle>) -> WorkerMessagingProxy {
        let handle_dyn: Rc<dyn WorkerHandle> = handle.clone();
        let weak: Weak<dyn WorkerHandle> = Rc::downgrade(&handle_dyn);
        WorkerMessagingProxy::new(
            Rc::new(OwnerContext::for_current_thread("e2e-test")),
            weak,
            Rc::new(NoopWorkerInspector::new()),
            Box::new(|startup| {
                let relay = startup.object_proxy.clone();
                let unit = WorkerThread::spawn(startup, Box::new(EchoScope { relay }))?;
                Ok(Box::new(unit))
            }),
        )
    }

    #[test]
    fn test_end_to_end_early_messages_echo_in_order() {
        let handle = Rc::new(RecordingHandle {
            messages: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
        });
        let mut proxy = echo_proxy(&handle);

        proxy.post_message_to_worker_unit(WorkerMessage::text("one"));
        proxy.post_message_to_worker_unit(WorkerMessage::text("two"));
        proxy.post_message_to_worker_unit(WorkerMessage::text("three"));
        assert_eq!(proxy.unconfirmed_message_count(), 3);

        proxy
            .start_worker_unit("echo.js", String::new(), StartupOptions::default())
            .expect("startup");

        let deadline = Instant::now() + TEST_DEADLINE;
        while Instant::now() < deadline
            && (handle.messages.borrow().len() < 3 || proxy.unconfirmed_message_count() > 0)
        {
            proxy.drain_host_events();
            thread::sleep(Duration::from_millis(5));
        }

        let texts: Vec<_> = handle
            .messages
            .borrow()
            .iter()
            .map(|message| match &message.payload {
                MessagePayload::Text(text) => text.clone(),
                other => panic!("unexpected payload: {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(proxy.unconfirmed_message_count(), 0);
        assert!(!proxy.has_pending_activity());

        // Tear down: handle gone, then wait for the thread to report in.
        proxy.worker_handle_destroyed();
        let deadline = Instant::now() + TEST_DEADLINE;
        while !proxy.is_disposed() && Instant::now() < deadline {
            proxy.drain_host_events();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(proxy.is_disposed());
    }
}
