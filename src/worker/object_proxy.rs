//! Worker object proxy
//!
//! The worker-thread-resident relay. Every method is called from the
//! worker thread and does nothing except build a `HostEvent` and post it
//! through the task channel; the messaging proxy dispatches the event on
//! the owner thread. The facade holds no state beyond the sender, so it
//! stays valid for the worker thread's entire lifetime - its last duty is
//! posting the fully-terminated notification.

use crate::task::TaskSender;
use crate::worker::{ConsoleMessage, ScriptException, WorkerMessage};

/// Events sent to the host from the worker thread.
#[derive(Debug)]
pub(crate) enum HostEvent {
    /// A message for the owner-side worker object
    Message(WorkerMessage),
    /// One delivered message was processed by the worker scope
    MessageProcessed { has_pending_activity: bool },
    /// Periodic liveness report from the worker loop
    PendingActivity(bool),
    /// A script exception to surface as an error event
    Exception(ScriptException),
    /// Console output to relay to the host logger and inspector
    Console(ConsoleMessage),
    /// The worker thread has fully exited
    UnitTerminated,
}

/// Relay from the worker thread back to the owner thread.
#[derive(Clone)]
pub struct WorkerObjectProxy {
    events: TaskSender<HostEvent>,
}

impl WorkerObjectProxy {
    pub(crate) fn new(events: TaskSender<HostEvent>) -> WorkerObjectProxy {
        WorkerObjectProxy { events }
    }

    /// Forward a message from the worker scope to the owner-side handle.
    /// Transfers are detached from the worker side before posting.
    pub fn message_from_worker(&self, mut message: WorkerMessage) {
        message.disentangle();
        self.events.post(HostEvent::Message(message));
    }

    /// Acknowledge one processed message, carrying the scope's current
    /// liveness along with the confirmation.
    pub fn confirm_message_processed(&self, still_has_pending_activity: bool) {
        self.events.post(HostEvent::MessageProcessed {
            has_pending_activity: still_has_pending_activity,
        });
    }

    /// Report the scope's own pending-activity check.
    pub fn report_pending_activity(&self, has_pending_activity: bool) {
        self.events
            .post(HostEvent::PendingActivity(has_pending_activity));
    }

    /// Surface a script exception to the owner side.
    pub fn exception_from_worker(&self, exception: ScriptException) {
        self.events.post(HostEvent::Exception(exception));
    }

    /// Relay console output produced on the worker thread.
    pub fn console_message_from_worker(&self, message: ConsoleMessage) {
        self.events.post(HostEvent::Console(message));
    }

    /// Tell the owner side the worker thread has fully exited. Posted as
    /// the worker loop's final action.
    pub fn notify_fully_terminated(&self) {
        self.events.post(HostEvent::UnitTerminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_channel;

    #[test]
    fn test_events_arrive_in_posting_order() {
        let (tx, rx) = task_channel();
        let facade = WorkerObjectProxy::new(tx);

        facade.message_from_worker(WorkerMessage::text("first"));
        facade.confirm_message_processed(true);
        facade.report_pending_activity(false);
        facade.notify_fully_terminated();

        let events = rx.drain();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], HostEvent::Message(_)));
        assert!(matches!(
            events[1],
            HostEvent::MessageProcessed {
                has_pending_activity: true
            }
        ));
        assert!(matches!(events[2], HostEvent::PendingActivity(false)));
        assert!(matches!(events[3], HostEvent::UnitTerminated));
    }

    #[test]
    fn test_facade_survives_owner_side_teardown() {
        let (tx, rx) = task_channel();
        let facade = WorkerObjectProxy::new(tx);
        drop(rx);
        // Posting into a torn-down channel is silently dropped.
        facade.notify_fully_terminated();
    }
}
