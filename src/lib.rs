//! Krait - dedicated worker messaging
//!
//! Krait lets a host execution context run a logically separate worker on
//! its own thread and its own cooperative scheduler, when the only
//! permitted cross-thread interaction is posting asynchronous tasks:
//! - Worker messaging proxy: owner-side mediator, message buffering
//!   before the worker thread exists, pending-activity tracking
//! - Worker object proxy: worker-side relay back to the owner thread
//! - Thread-backed execution unit with a cooperative task loop
//! - Transferable MessagePort pairs
//!
//! The script engine, script loader, owner-side worker object and
//! devtools channel stay behind traits (`WorkerGlobalScope`,
//! `WorkerHandle`, `WorkerInspector`).

pub mod inspector;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use inspector::{NoopWorkerInspector, WorkerInspector};
pub use task::{TaskReceiver, TaskSender, ThreadAffinity, task_channel};
pub use worker::{
    ConsoleLevel, ConsoleMessage, CspHeader, MessagePayload, MessagePort, MessageSource,
    OwnerContext, ScriptException, StartMode, StartupOptions, Transferable, WorkerError,
    WorkerGlobalScope, WorkerHandle, WorkerId, WorkerMessage, WorkerMessagingProxy,
    WorkerObjectProxy, WorkerResult, WorkerStartup, WorkerTask, WorkerThread, WorkerUnit,
    WorkerUnitFactory, message_channel,
};
