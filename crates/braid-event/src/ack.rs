//! Acknowledgement state: exactly-once callbacks and the iteration join.

use parking_lot::Mutex;
use std::sync::Arc;

/// Callback fired when a message reaches a positive terminal disposition.
pub type AckCallback = Box<dyn FnOnce() + Send>;

/// Callback fired when a message reaches a negative terminal disposition.
pub type NackCallback = Box<dyn FnOnce(NackInfo) + Send>;

/// Structured error information passed to every nack callback.
#[derive(Debug, Clone)]
pub struct NackInfo {
    /// Machine-readable error kind (an [`ErrorCode`](braid_types::ErrorCode) code).
    pub kind: String,
    /// Human-readable failure description.
    pub reason: String,
}

impl NackInfo {
    /// Creates a new `NackInfo`.
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// The pending terminal disposition of a message, detached from it.
///
/// Components that buffer messages (aggregators) or fan them out
/// (iterators) move the disposition out of the consumed input with
/// [`Message::take_acknowledgements`](crate::Message::take_acknowledgements)
/// and attach it to whatever output eventually settles it.
///
/// Dropping a bundle without settling it drops the callbacks unfired;
/// the owner is responsible for reaching a terminal disposition.
#[derive(Default)]
pub struct AckBundle {
    pub(crate) on_ack: Vec<AckCallback>,
    pub(crate) on_nack: Vec<NackCallback>,
    pub(crate) iteration: Option<Arc<IterationState>>,
}

impl AckBundle {
    /// Returns true if the bundle carries no callbacks and no join state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_ack.is_empty() && self.on_nack.is_empty() && self.iteration.is_none()
    }

    /// Fires the positive disposition: ack callbacks in registration
    /// order, then the sibling-join notification if one is attached.
    pub fn acknowledge(self) {
        for callback in self.on_ack {
            callback();
        }
        if let Some(state) = self.iteration {
            state.child_done();
        }
    }

    /// Fires the negative disposition with `info`.
    pub fn negative(self, info: NackInfo) {
        for callback in self.on_nack {
            callback(info.clone());
        }
        if let Some(state) = self.iteration {
            state.child_failed(info);
        }
    }

    /// Merges another bundle's callbacks and join state into this one.
    pub fn merge(&mut self, other: AckBundle) {
        self.on_ack.extend(other.on_ack);
        self.on_nack.extend(other.on_nack);
        // Two joins can meet when aggregating iterated siblings; chain
        // the extra one through an ack/nack callback pair.
        if let Some(state) = other.iteration {
            if self.iteration.is_none() {
                self.iteration = Some(state);
            } else {
                let done = state.clone();
                self.on_ack.push(Box::new(move || done.child_done()));
                self.on_nack.push(Box::new(move |info| state.child_failed(info)));
            }
        }
    }
}

/// Join state coordinating the terminal disposition of K sibling
/// messages emitted from a single input.
///
/// The parent's callbacks move into the state when it is created. Each
/// sibling notifies completion through its own terminal disposition:
///
/// - the parent ack fires once, after all K siblings acked
/// - the parent nack fires once, on the first sibling that nacked;
///   later sibling outcomes are absorbed
pub struct IterationState {
    inner: Mutex<IterationInner>,
}

struct IterationInner {
    expected: usize,
    completed: usize,
    failed: bool,
    parent: Option<AckBundle>,
}

impl IterationState {
    /// Creates a join expecting `expected` sibling completions, taking
    /// ownership of the parent's pending disposition.
    #[must_use]
    pub fn new(expected: usize, parent: AckBundle) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(IterationInner {
                expected,
                completed: 0,
                failed: false,
                parent: Some(parent),
            }),
        })
    }

    /// Records one sibling's positive completion.
    pub fn child_done(&self) {
        let parent = {
            let mut inner = self.inner.lock();
            inner.completed += 1;
            if inner.completed >= inner.expected && !inner.failed {
                inner.parent.take()
            } else {
                None
            }
        };
        // Fired outside the lock: parent callbacks may be arbitrary code.
        if let Some(parent) = parent {
            parent.acknowledge();
        }
    }

    /// Records one sibling's failure. The first failure wins.
    pub fn child_failed(&self, info: NackInfo) {
        let parent = {
            let mut inner = self.inner.lock();
            inner.completed += 1;
            if inner.failed {
                None
            } else {
                inner.failed = true;
                inner.parent.take()
            }
        };
        if let Some(parent) = parent {
            parent.negative(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_bundle(acks: &Arc<AtomicUsize>, nacks: &Arc<AtomicUsize>) -> AckBundle {
        let mut bundle = AckBundle::default();
        let acks = acks.clone();
        bundle.on_ack.push(Box::new(move || {
            acks.fetch_add(1, Ordering::SeqCst);
        }));
        let nacks = nacks.clone();
        bundle.on_nack.push(Box::new(move |_| {
            nacks.fetch_add(1, Ordering::SeqCst);
        }));
        bundle
    }

    #[test]
    fn join_fires_after_all_children() {
        let acks = Arc::new(AtomicUsize::new(0));
        let nacks = Arc::new(AtomicUsize::new(0));
        let state = IterationState::new(3, counting_bundle(&acks, &nacks));

        state.child_done();
        state.child_done();
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        state.child_done();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(nacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn first_failed_child_wins() {
        let acks = Arc::new(AtomicUsize::new(0));
        let nacks = Arc::new(AtomicUsize::new(0));
        let state = IterationState::new(3, counting_bundle(&acks, &nacks));

        state.child_done();
        state.child_failed(NackInfo::new("COMPONENT_INVOKE", "boom"));
        state.child_done();

        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(nacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn merge_chains_second_join() {
        let acks_a = Arc::new(AtomicUsize::new(0));
        let nacks_a = Arc::new(AtomicUsize::new(0));
        let acks_b = Arc::new(AtomicUsize::new(0));
        let nacks_b = Arc::new(AtomicUsize::new(0));

        let state_a = IterationState::new(1, counting_bundle(&acks_a, &nacks_a));
        let state_b = IterationState::new(1, counting_bundle(&acks_b, &nacks_b));

        let mut combined = AckBundle::default();
        combined.merge(AckBundle {
            iteration: Some(state_a),
            ..Default::default()
        });
        combined.merge(AckBundle {
            iteration: Some(state_b),
            ..Default::default()
        });

        combined.acknowledge();
        assert_eq!(acks_a.load(Ordering::SeqCst), 1);
        assert_eq!(acks_b.load(Ordering::SeqCst), 1);
    }
}
