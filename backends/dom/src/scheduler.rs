//! Batched re-render requests.
//!
//! Requests are queued per [`Tier`] and coalesced when the tier is flushed:
//! a request already covered by a pending ancestor is dropped, and a request
//! covering pending descendants supersedes them. What remains is a set of
//! disjoint subtrees rendered root first.

use std::{cell::RefCell, fmt, rc::Rc};

use arbor_core::{NodeId, Schedule, Tier};
use tracing::trace;

#[derive(Debug, Default)]
struct Queues {
    microtask: Vec<NodeId>,
    animation_frame: Vec<NodeId>,
    idle: Vec<NodeId>,
    effects: Vec<NodeId>,
}

impl Queues {
    fn tier(&mut self, tier: Tier) -> &mut Vec<NodeId> {
        match tier {
            Tier::Microtask => &mut self.microtask,
            Tier::AnimationFrame => &mut self.animation_frame,
            Tier::Idle => &mut self.idle,
        }
    }
}

/// Shared queue of pending re-renders and effect flushes.
#[derive(Clone, Default)]
pub struct Scheduler {
    queues: Rc<RefCell<Queues>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues effects of the instance hosted by `node`.
    pub fn schedule_effects(&self, node: NodeId) {
        let mut queues = self.queues.borrow_mut();
        if !queues.effects.contains(&node) {
            queues.effects.push(node);
        }
    }

    /// Drops every pending request for `node`.
    pub fn cancel(&self, node: NodeId) {
        let mut guard = self.queues.borrow_mut();
        let queues = &mut *guard;
        for queue in [
            &mut queues.microtask,
            &mut queues.animation_frame,
            &mut queues.idle,
            &mut queues.effects,
        ] {
            queue.retain(|&pending| pending != node);
        }
    }

    /// Number of pending requests on a tier.
    #[must_use]
    pub fn pending(&self, tier: Tier) -> usize {
        self.queues.borrow_mut().tier(tier).len()
    }

    /// Number of instances with pending effects.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.queues.borrow().effects.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let queues = self.queues.borrow();
        queues.microtask.is_empty()
            && queues.animation_frame.is_empty()
            && queues.idle.is_empty()
            && queues.effects.is_empty()
    }

    pub(crate) fn take(&self, tier: Tier) -> Vec<NodeId> {
        std::mem::take(self.queues.borrow_mut().tier(tier))
    }

    pub(crate) fn take_effects(&self) -> Vec<NodeId> {
        std::mem::take(&mut self.queues.borrow_mut().effects)
    }
}

impl Schedule for Scheduler {
    fn schedule(&self, node: NodeId, tier: Tier) {
        trace!(?node, ?tier, "re-render requested");
        self.queues.borrow_mut().tier(tier).push(node);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queues", &self.queues.borrow())
            .finish()
    }
}

/// Applies the coalescing rule to `requests` in arrival order.
///
/// `contains(a, b)` must return `true` when `b` is `a` or inside it.
pub fn coalesce<I, F>(requests: I, contains: F) -> Vec<NodeId>
where
    I: IntoIterator<Item = NodeId>,
    F: Fn(NodeId, NodeId) -> bool,
{
    let mut batch: Vec<NodeId> = Vec::new();
    for node in requests {
        if batch.iter().any(|&pending| contains(pending, node)) {
            continue;
        }
        batch.retain(|&pending| !contains(node, pending));
        batch.push(node);
    }
    batch
}
