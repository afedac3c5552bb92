//! Early task buffer
//!
//! Tasks destined for the worker execution unit that arrive before its
//! thread exists are parked here, on the owner thread, and handed over by
//! posting the drained contents the instant the unit appears. The buffer
//! drains exactly once, in arrival order.

use crate::worker::WorkerTask;

pub(crate) struct EarlyTaskQueue {
    tasks: Vec<WorkerTask>,
    drained: bool,
}

impl EarlyTaskQueue {
    pub fn new() -> EarlyTaskQueue {
        EarlyTaskQueue {
            tasks: Vec::new(),
            drained: false,
        }
    }

    /// Park a task until the unit exists. Invalid once the buffer has
    /// been drained; from that point tasks go to the unit directly.
    pub fn push(&mut self, task: WorkerTask) {
        debug_assert!(!self.drained, "early task buffered after drain");
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Take every buffered task, in arrival order. One-shot: a second
    /// drain is a programming error.
    pub fn drain_once(&mut self) -> Vec<WorkerTask> {
        assert!(!self.drained, "early task buffer drained twice");
        self.drained = true;
        std::mem::take(&mut self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerMessage;

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = EarlyTaskQueue::new();
        for i in 0..3 {
            queue.push(WorkerTask::DeliverMessage(WorkerMessage::text(format!(
                "m{}",
                i
            ))));
        }
        assert_eq!(queue.len(), 3);

        let drained = queue.drain_once();
        let texts: Vec<_> = drained
            .iter()
            .map(|task| match task {
                WorkerTask::DeliverMessage(message) => match &message.payload {
                    crate::worker::MessagePayload::Text(text) => text.clone(),
                    other => panic!("unexpected payload: {:?}", other),
                },
                other => panic!("unexpected task: {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    #[should_panic(expected = "drained twice")]
    fn test_second_drain_panics() {
        let mut queue = EarlyTaskQueue::new();
        queue.drain_once();
        queue.drain_once();
    }
}
