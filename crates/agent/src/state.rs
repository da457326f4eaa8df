use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<AgentState>;

// ---------------------------------------------------------------------------
// Core type
// ---------------------------------------------------------------------------

/// In-memory state written by the command handler and read by the sample
/// composer.  Lives for the process; nothing is persisted.
#[derive(Debug)]
pub struct AgentState {
    irrigation: AtomicBool,
    target: AtomicI32,
}

impl AgentState {
    pub fn new(target: i32) -> Self {
        Self {
            irrigation: AtomicBool::new(false),
            target: AtomicI32::new(target),
        }
    }

    pub fn irrigation(&self) -> bool {
        self.irrigation.load(Ordering::Acquire)
    }

    pub fn target(&self) -> i32 {
        self.target.load(Ordering::Acquire)
    }

    /// Flip the irrigation flag and return the new value.
    pub fn toggle_irrigation(&self) -> bool {
        !self.irrigation.fetch_xor(true, Ordering::AcqRel)
    }
}
