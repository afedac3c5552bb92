//! Inspector collaborator seam
//!
//! Devtools integration point for worker lifecycles. Every notification
//! is best-effort: an embedder with no inspector attached plugs in the
//! noop implementation and nothing is ever treated as an error.

use crate::worker::{WorkerId, WorkerUnit};

/// Observer for worker execution unit lifecycles and console traffic.
pub trait WorkerInspector {
    /// A worker execution unit was created. The unit reference lets an
    /// attached debugger post tasks into the new thread.
    fn unit_created(&self, id: WorkerId, unit: &dyn WorkerUnit, script_url: &str);

    /// A worker execution unit is shutting down.
    fn unit_terminated(&self, id: WorkerId);

    /// Console output relayed from the worker thread.
    fn forward_message(&self, id: WorkerId, text: &str);
}

/// An inspector that ignores every notification.
pub struct NoopWorkerInspector;

impl NoopWorkerInspector {
    pub fn new() -> NoopWorkerInspector {
        NoopWorkerInspector
    }
}

impl Default for NoopWorkerInspector {
    fn default() -> Self {
        NoopWorkerInspector::new()
    }
}

impl WorkerInspector for NoopWorkerInspector {
    fn unit_created(&self, _id: WorkerId, _unit: &dyn WorkerUnit, _script_url: &str) {}

    fn unit_terminated(&self, _id: WorkerId) {}

    fn forward_message(&self, _id: WorkerId, _text: &str) {}
}
