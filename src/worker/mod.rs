//! Dedicated worker plumbing
//!
//! Everything needed to run a logically separate worker next to a host
//! execution context when the only permitted cross-thread interaction is
//! posting asynchronous tasks:
//! - `WorkerMessagingProxy` - owner-side mediator for both directions
//! - `WorkerObjectProxy` - worker-side relay back to the owner thread
//! - `WorkerThread` - thread-backed execution unit with a cooperative loop
//! - `MessagePort` / `message_channel` - transferable port pairs
//!
//! The script engine itself stays behind the `WorkerGlobalScope` trait;
//! the owner-side Worker object stays behind the `WorkerHandle` trait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

use crate::task::ThreadAffinity;

pub mod messaging_proxy;
pub mod object_proxy;
pub mod port;
mod queue;
pub mod thread;

pub use messaging_proxy::{
    WorkerHandle, WorkerMessagingProxy, WorkerStartup, WorkerUnit, WorkerUnitFactory,
};
pub use object_proxy::WorkerObjectProxy;
pub use port::{MessagePort, message_channel};
pub use thread::{WorkerGlobalScope, WorkerThread};

/// Global counter for unique worker IDs
static WORKER_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Identifier of one worker, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Allocate the next free worker ID.
    pub fn next() -> WorkerId {
        WorkerId(WORKER_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Message body, with fast paths the dispatcher can pick without parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// String fast path - no serialization overhead
    Text(String),
    /// Structured clone of an arbitrary value
    Json(serde_json::Value),
    /// Binary buffer whose ownership moves with the message
    Bytes(Vec<u8>),
}

/// A resource handed over with a message. Transferred resources are
/// disentangled from the sending side before the message is enqueued, so
/// the same resource is never live on both threads at once.
#[derive(Debug)]
pub enum Transferable {
    /// Buffer transfer - the allocation simply moves with the message
    Buffer(Vec<u8>),
    /// Port transfer - the endpoint is neutered until it arrives
    Port(MessagePort),
}

/// One message crossing the owner/worker boundary, in either direction.
#[derive(Debug)]
pub struct WorkerMessage {
    pub payload: MessagePayload,
    pub transfers: Vec<Transferable>,
}

impl WorkerMessage {
    /// Message carrying a plain string (the fast path).
    pub fn text(text: impl Into<String>) -> WorkerMessage {
        WorkerMessage {
            payload: MessagePayload::Text(text.into()),
            transfers: Vec::new(),
        }
    }

    /// Message carrying a structured clone of `value`.
    pub fn json<T: Serialize>(value: &T) -> WorkerResult<WorkerMessage> {
        Ok(WorkerMessage {
            payload: MessagePayload::Json(serde_json::to_value(value)?),
            transfers: Vec::new(),
        })
    }

    /// Message carrying a binary buffer.
    pub fn bytes(bytes: Vec<u8>) -> WorkerMessage {
        WorkerMessage {
            payload: MessagePayload::Bytes(bytes),
            transfers: Vec::new(),
        }
    }

    /// Attach transferred resources to this message.
    pub fn with_transfers(mut self, transfers: Vec<Transferable>) -> WorkerMessage {
        self.transfers = transfers;
        self
    }

    /// Detach transferred resources from the sending side. Must happen
    /// before the message is enqueued.
    pub(crate) fn disentangle(&mut self) {
        for transfer in &self.transfers {
            if let Transferable::Port(port) = transfer {
                port.disentangle();
            }
        }
    }

    /// Re-attach transferred resources on the receiving side.
    pub(crate) fn re_entangle(&mut self) {
        for transfer in &self.transfers {
            if let Transferable::Port(port) = transfer {
                port.re_entangle();
            }
        }
    }
}

/// A unit of work posted to the worker execution unit's loop.
#[derive(Debug)]
pub enum WorkerTask {
    /// Deliver a message to the worker's global scope
    DeliverMessage(WorkerMessage),
    /// Lift a paused start; no effect on a running unit
    Resume,
}

// ============================================================================
// Worker-originated reports
// ============================================================================

/// A script-level exception raised inside the worker. Surfaced to the
/// owner as an error event; never tears down the worker or the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    pub message: String,
    pub script_id: i32,
    pub source_url: String,
    pub line: u32,
    pub column: u32,
}

/// Where a console message was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    ConsoleApi,
    Script,
    Other,
}

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map to the host logger's level.
    pub fn as_log_level(self) -> log::Level {
        match self {
            ConsoleLevel::Debug => log::Level::Debug,
            ConsoleLevel::Log | ConsoleLevel::Info => log::Level::Info,
            ConsoleLevel::Warning => log::Level::Warn,
            ConsoleLevel::Error => log::Level::Error,
        }
    }
}

/// Console output captured on the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub source: MessageSource,
    pub level: ConsoleLevel,
    pub text: String,
    pub line: u32,
    pub source_url: String,
}

// ============================================================================
// Startup configuration
// ============================================================================

/// Whether the unit suspends before running its first task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    #[default]
    Running,
    Paused,
}

/// One Content-Security-Policy header inherited by the worker scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspHeader {
    pub value: String,
    pub report_only: bool,
}

/// Configuration handed to the worker execution unit at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupOptions {
    pub start_mode: StartMode,
    pub security_origin: Option<String>,
    pub csp_headers: Vec<CspHeader>,
    pub user_agent: Option<String>,
}

// ============================================================================
// Owner context
// ============================================================================

/// The execution context that owns a worker. Thread-confined: it carries
/// the identity of its thread, and everything bound to it checks that
/// identity at its entry points.
#[derive(Debug)]
pub struct OwnerContext {
    thread: ThreadAffinity,
    label: String,
}

impl OwnerContext {
    /// Bind an owner context to the calling thread.
    pub fn for_current_thread(label: impl Into<String>) -> OwnerContext {
        OwnerContext {
            thread: ThreadAffinity::current(),
            label: label.into(),
        }
    }

    pub fn thread(&self) -> ThreadAffinity {
        self.thread
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by worker startup and message construction.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("worker startup failed: {0}")]
    Startup(String),

    #[error("structured clone failed: {0}")]
    StructuredClone(#[from] serde_json::Error),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_display() {
        let a = WorkerId::next();
        let b = WorkerId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("worker-"));
    }

    #[test]
    fn test_json_payload_round_trip() {
        let message = WorkerMessage::json(&serde_json::json!({"op": "sum", "args": [1, 2]}))
            .expect("serializable value");
        match &message.payload {
            MessagePayload::Json(value) => assert_eq!(value["op"], "sum"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_console_level_mapping() {
        assert_eq!(ConsoleLevel::Error.as_log_level(), log::Level::Error);
        assert_eq!(ConsoleLevel::Log.as_log_level(), log::Level::Info);
    }

    #[test]
    fn test_startup_options_default() {
        let options = StartupOptions::default();
        assert_eq!(options.start_mode, StartMode::Running);
        assert!(options.csp_headers.is_empty());
    }
}
