//! MessageChannel / MessagePort
//!
//! Port pairs for direct messaging between execution contexts. A port can
//! be transferred with a worker message: transferring disentangles the
//! endpoint from the sending side (posts and reads become no-ops) until it
//! is re-entangled on the thread it arrives on, so the endpoint is never
//! live on two threads at once.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::worker::MessagePayload;

/// Global MessagePort counter for unique IDs
static PORT_COUNTER: AtomicU32 = AtomicU32::new(0);

lazy_static! {
    /// Global MessagePort storage
    static ref PORT_REGISTRY: Mutex<HashMap<u32, Arc<PortState>>> = Mutex::new(HashMap::new());
}

struct PortState {
    inbox: Mutex<Vec<MessagePayload>>,
    is_open: AtomicBool,
    is_transferred: AtomicBool,
}

impl PortState {
    fn new() -> Arc<PortState> {
        Arc::new(PortState {
            inbox: Mutex::new(Vec::with_capacity(16)),
            is_open: AtomicBool::new(true),
            is_transferred: AtomicBool::new(false),
        })
    }

    fn is_live(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.is_transferred.load(Ordering::SeqCst)
    }
}

fn get_port_state(id: u32) -> Option<Arc<PortState>> {
    PORT_REGISTRY.lock().get(&id).cloned()
}

/// One endpoint of a message channel. Owned by exactly one execution
/// context at a time.
#[derive(Debug)]
pub struct MessagePort {
    id: u32,
    paired_id: u32,
}

/// Create a new entangled port pair.
pub fn message_channel() -> (MessagePort, MessagePort) {
    let port1_id = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    let port2_id = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut registry = PORT_REGISTRY.lock();
    registry.insert(port1_id, PortState::new());
    registry.insert(port2_id, PortState::new());

    (
        MessagePort {
            id: port1_id,
            paired_id: port2_id,
        },
        MessagePort {
            id: port2_id,
            paired_id: port1_id,
        },
    )
}

impl MessagePort {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Send a payload to the paired endpoint. No-op while this endpoint
    /// is mid-transfer or either side is closed.
    pub fn post(&self, payload: MessagePayload) {
        let Some(state) = get_port_state(self.id) else {
            return;
        };
        if !state.is_live() {
            return;
        }
        if let Some(paired) = get_port_state(self.paired_id) {
            if paired.is_open.load(Ordering::SeqCst) {
                paired.inbox.lock().push(payload);
            }
        }
    }

    /// Take every payload queued on this endpoint, in arrival order.
    /// Empty while the endpoint is mid-transfer.
    pub fn take_messages(&self) -> Vec<MessagePayload> {
        let Some(state) = get_port_state(self.id) else {
            return Vec::new();
        };
        if !state.is_live() {
            return Vec::new();
        }
        std::mem::take(&mut *state.inbox.lock())
    }

    /// Whether the endpoint is usable (open and not mid-transfer).
    pub fn is_live(&self) -> bool {
        get_port_state(self.id).is_some_and(|state| state.is_live())
    }

    /// Detach the endpoint from the sending side. Queued payloads stay
    /// put and become readable again once the port is re-entangled.
    pub(crate) fn disentangle(&self) {
        if let Some(state) = get_port_state(self.id) {
            state.is_transferred.store(true, Ordering::SeqCst);
        }
    }

    /// Attach the endpoint on the thread it arrived on.
    pub(crate) fn re_entangle(&self) {
        if let Some(state) = get_port_state(self.id) {
            state.is_transferred.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for MessagePort {
    fn drop(&mut self) {
        if let Some(state) = PORT_REGISTRY.lock().remove(&self.id) {
            state.is_open.store(false, Ordering::SeqCst);
        }
    }
}
