//! Attach/detach of the host context. At most one context is attached; delivery to it
//! happens under the read lock, so detaching waits for in-flight deliveries.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::host::{DataLayer, EventSink, HostContext};
use crate::relay::MessageRelay;

/// Collaborators of the attached context, ready for use.
pub struct Attached {
    pub relay: MessageRelay,
    pub data_layer: Arc<dyn DataLayer>,
    pub sink: Arc<dyn EventSink>,
}

impl From<HostContext> for Attached {
    fn from(ctx: HostContext) -> Self {
        Self {
            relay: MessageRelay::new(ctx.discovery, ctx.transport),
            data_layer: ctx.data_layer,
            sink: ctx.sink,
        }
    }
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    attached: Option<Arc<Attached>>,
}

/// Holder for the current context.
#[derive(Clone, Default)]
pub struct ContextSlot {
    state: Arc<RwLock<SlotState>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `ctx`, replacing any current context. Dropping the returned guard detaches,
    /// unless another attach has happened since.
    pub fn attach(&self, ctx: HostContext) -> AttachGuard {
        let mut state = self.state.write();
        state.generation += 1;
        state.attached = Some(Arc::new(Attached::from(ctx)));
        debug!(generation = state.generation, "host context attached");
        AttachGuard {
            slot: self.clone(),
            generation: state.generation,
        }
    }

    /// Detach whatever is attached. Returns false if nothing was.
    pub fn detach(&self) -> bool {
        let mut state = self.state.write();
        let was = state.attached.take().is_some();
        if was {
            debug!(generation = state.generation, "host context detached");
        }
        was
    }

    pub fn is_attached(&self) -> bool {
        self.state.read().attached.is_some()
    }

    /// Snapshot of the attached context, for work that awaits (sends).
    pub fn current(&self) -> Option<Arc<Attached>> {
        self.state.read().attached.clone()
    }

    /// Run `f` against the attached context while holding the read lock. Used for
    /// delivering events so nothing reaches a context after it is detached.
    /// `f` must not attach or detach.
    pub fn with_attached<R>(&self, f: impl FnOnce(&Attached) -> R) -> Option<R> {
        let state = self.state.read();
        state.attached.as_deref().map(f)
    }

    fn detach_generation(&self, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.generation != generation || state.attached.is_none() {
            return false;
        }
        state.attached = None;
        debug!(generation, "host context released");
        true
    }
}

/// Lifetime handle for one attach. Detaches on drop if still current.
#[must_use = "dropping the guard detaches the context"]
pub struct AttachGuard {
    slot: ContextSlot,
    generation: u64,
}

impl AttachGuard {
    /// True while this attach has not been replaced or detached.
    pub fn is_current(&self) -> bool {
        let state = self.slot.state.read();
        state.generation == self.generation && state.attached.is_some()
    }

    /// Detach now. Same as dropping.
    pub fn release(self) {}
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.slot.detach_generation(self.generation);
    }
}
