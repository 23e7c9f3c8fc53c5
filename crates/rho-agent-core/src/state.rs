use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Process-wide runtime flags. Four independently atomic fields; there is no
/// invariant spanning them, so callers read each field once and use the
/// result rather than expecting a consistent snapshot.
#[derive(Debug)]
pub struct RuntimeState {
    current_model: ArcSwap<String>,
    tools_enabled: AtomicBool,
    tools_output_visible: AtomicBool,
    speech_enabled: AtomicBool,
}

impl RuntimeState {
    pub fn new(model: impl Into<String>, tools_enabled: bool, tools_output_visible: bool) -> Self {
        Self {
            current_model: ArcSwap::from_pointee(model.into()),
            tools_enabled: AtomicBool::new(tools_enabled),
            tools_output_visible: AtomicBool::new(tools_output_visible),
            speech_enabled: AtomicBool::new(false),
        }
    }

    pub fn current_model(&self) -> String {
        self.current_model.load().as_ref().clone()
    }

    pub fn set_current_model(&self, model: impl Into<String>) {
        self.current_model.store(Arc::new(model.into()));
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools_enabled.load(Ordering::SeqCst)
    }

    pub fn set_tools_enabled(&self, enabled: bool) {
        self.tools_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flips the flag and returns the new value.
    pub fn toggle_tools(&self) -> bool {
        !self.tools_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn tools_output_visible(&self) -> bool {
        self.tools_output_visible.load(Ordering::SeqCst)
    }

    pub fn set_tools_output_visible(&self, visible: bool) {
        self.tools_output_visible.store(visible, Ordering::SeqCst);
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_enabled.load(Ordering::SeqCst)
    }

    pub fn set_speech_enabled(&self, enabled: bool) {
        self.speech_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn toggle_speech(&self) -> bool {
        !self.speech_enabled.fetch_xor(true, Ordering::SeqCst)
    }
}
