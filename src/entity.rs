//! Core types shared by every simulated entity: identifiers, the tick
//! capability trait, routed outputs, and the id allocator.

use std::any::Any;

/// One discrete simulation time step.
pub type Tick = u64;

/// Process-wide-unique identifier for any entity that can receive or emit
/// spikes. Monotonically assigned, never reused within a run.
pub type NodeId = u64;

/// A side effect produced by an entity's tick, routed to its target by the
/// scheduler (or forwarded over the wire when the target is remote).
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Raw current injected by a generator, applied at the given tick.
    Current { target: NodeId, at: Tick, value: f64 },
    /// A weighted spike emitted by a neuron, arriving at the given tick.
    Spike {
        target: NodeId,
        at: Tick,
        source: NodeId,
        weight: f64,
    },
}

impl Output {
    /// Returns the id of the entity this output is addressed to.
    pub fn target(&self) -> NodeId {
        match self {
            Output::Current { target, .. } => *target,
            Output::Spike { target, .. } => *target,
        }
    }

    /// Returns the tick at which this output takes effect at the target.
    pub fn at(&self) -> Tick {
        match self {
            Output::Current { at, .. } => *at,
            Output::Spike { at, .. } => *at,
        }
    }

    /// Returns the current value carried to the target: the injected current
    /// for a generator output, the edge weight for a spike.
    pub fn value(&self) -> f64 {
        match self {
            Output::Current { value, .. } => *value,
            Output::Spike { weight, .. } => *weight,
        }
    }
}

/// The capability contract of everything the scheduler advances.
///
/// `tick` is required and moves the entity forward by exactly one step,
/// returning the outputs to be routed. The receiving half is optional:
/// entities that cannot be spiked or injected into keep the default no-ops.
/// Entities are `Send` so a unit's scheduler can be driven from its network
/// threads.
pub trait Entity: Send {
    /// Returns the entity's id.
    fn id(&self) -> NodeId;

    /// Advance the entity by one discrete time step.
    fn tick(&mut self) -> Vec<Output>;

    /// Deliver a weighted spike from `source`, taking effect at `at`.
    fn spike(&mut self, _at: Tick, _source: NodeId, _weight: f64) {}

    /// Inject raw input current, taking effect at `at`.
    fn inject(&mut self, _at: Tick, _current: f64) {}

    /// Concrete-type access, so a host can read results (traces, recorded
    /// spikes) back out of a scheduler-owned entity after a run.
    fn as_any(&self) -> &dyn Any;
}

/// Hands out node ids, either one at a time or as contiguous blocks.
///
/// Passed into topology construction instead of hidden per-type counters, so
/// parallel runs and tests stay isolated. The coordinator uses the same type
/// as its global allocation counter; a unit derives a shard-local allocator
/// from its assigned base with [`IdAllocator::starting_at`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    next: NodeId,
}

impl IdAllocator {
    /// Create an allocator starting at id 0.
    pub fn new() -> Self {
        IdAllocator { next: 0 }
    }

    /// Create an allocator whose first id is `base`.
    pub fn starting_at(base: NodeId) -> Self {
        IdAllocator { next: base }
    }

    /// Returns the next id and advances the counter.
    pub fn next_id(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Reserve a contiguous block of `count` ids, returning its base.
    /// The block is `[base, base + count)`.
    pub fn reserve(&mut self, count: u64) -> NodeId {
        let base = self.next;
        self.next += count;
        base
    }

    /// Returns the first id not yet handed out.
    pub fn watermark(&self) -> NodeId {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_sequential_ids() {
        let mut allocator = IdAllocator::new();
        assert_eq!(allocator.next_id(), 0);
        assert_eq!(allocator.next_id(), 1);
        assert_eq!(allocator.next_id(), 2);
        assert_eq!(allocator.watermark(), 3);
    }

    #[test]
    fn test_allocator_reserve_blocks() {
        let mut allocator = IdAllocator::new();
        assert_eq!(allocator.reserve(5), 0);
        assert_eq!(allocator.reserve(3), 5);
        assert_eq!(allocator.reserve(1), 8);
        assert_eq!(allocator.watermark(), 9);
    }

    #[test]
    fn test_allocator_starting_at() {
        let mut allocator = IdAllocator::starting_at(100);
        assert_eq!(allocator.next_id(), 100);
        assert_eq!(allocator.reserve(10), 101);
        assert_eq!(allocator.watermark(), 111);
    }

    struct Clocked {
        id: NodeId,
        time: Tick,
    }

    impl Entity for Clocked {
        fn id(&self) -> NodeId {
            self.id
        }

        fn tick(&mut self) -> Vec<Output> {
            self.time += 1;
            vec![]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_default_receivers_ignore_deliveries() {
        let mut entity = Clocked { id: 7, time: 0 };
        entity.spike(3, 0, 1.0);
        entity.inject(3, 0.5);
        assert_eq!(entity.tick(), vec![]);
        assert_eq!(entity.time, 1);
    }

    #[test]
    fn test_output_accessors() {
        let current = Output::Current {
            target: 1,
            at: 5,
            value: 0.25,
        };
        assert_eq!(current.target(), 1);
        assert_eq!(current.at(), 5);
        assert_eq!(current.value(), 0.25);

        let spike = Output::Spike {
            target: 2,
            at: 6,
            source: 0,
            weight: -1.0,
        };
        assert_eq!(spike.target(), 2);
        assert_eq!(spike.at(), 6);
        assert_eq!(spike.value(), -1.0);
    }
}
