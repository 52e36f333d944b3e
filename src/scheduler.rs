//! The scheduler advancing a collection of entities in lock-step.

use std::collections::HashMap;

use crate::entity::{Entity, NodeId, Output};

/// An ordered collection of entities advanced one tick at a time.
///
/// Every registered entity receives exactly one `tick()` call per scheduling
/// step, in registration order, before the step is complete. Outputs are
/// routed to their local targets immediately after the emitting entity's
/// tick; outputs addressed to ids not in the list are handed back to the
/// caller (a distributed unit forwards them over the wire, a single-process
/// caller may drop them).
///
/// The list holds no state beyond the entity sequence itself. Adding the
/// same entity id twice is a caller error, not a detected fault: both copies
/// tick, and the routing index points at the last one added.
#[derive(Default)]
pub struct EntityList {
    entities: Vec<Box<dyn Entity>>,
    index: HashMap<NodeId, usize>,
}

impl EntityList {
    /// Create an empty list.
    pub fn new() -> Self {
        EntityList {
            entities: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns whether an entity with the given id is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Append one entity to the list.
    pub fn add(&mut self, entity: Box<dyn Entity>) {
        self.index.insert(entity.id(), self.entities.len());
        self.entities.push(entity);
    }

    /// Append a batch of entities, preserving their order.
    pub fn add_all(&mut self, entities: Vec<Box<dyn Entity>>) {
        for entity in entities {
            self.add(entity);
        }
    }

    /// Returns a reference to the entity with the given id, if registered.
    pub fn get(&self, id: NodeId) -> Option<&dyn Entity> {
        self.index.get(&id).map(|&i| self.entities[i].as_ref())
    }

    /// Returns a mutable reference to the entity with the given id.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut dyn Entity> {
        match self.index.get(&id) {
            Some(&i) => Some(self.entities[i].as_mut()),
            None => None,
        }
    }

    /// Returns the entity with the given id downcast to its concrete type,
    /// for reading results back out after a run.
    pub fn get_as<T: 'static>(&self, id: NodeId) -> Option<&T> {
        self.get(id).and_then(|e| e.as_any().downcast_ref::<T>())
    }

    /// Route one output to its local target. Returns false when the target
    /// is not registered here.
    pub fn deliver(&mut self, output: &Output) -> bool {
        let i = match self.index.get(&output.target()) {
            Some(&i) => i,
            None => return false,
        };
        match *output {
            Output::Current { at, value, .. } => self.entities[i].inject(at, value),
            Output::Spike {
                at, source, weight, ..
            } => self.entities[i].spike(at, source, weight),
        }
        true
    }

    /// Advance every registered entity by exactly one tick, in registration
    /// order, routing outputs as they are produced. Returns the outputs whose
    /// targets are not registered in this list.
    pub fn tick(&mut self) -> Vec<Output> {
        let mut unrouted = Vec::new();
        for i in 0..self.entities.len() {
            for output in self.entities[i].tick() {
                if !self.deliver(&output) {
                    unrouted.push(output);
                }
            }
        }
        unrouted
    }

    /// Run a simulation for the given duration by continually ticking every
    /// managed entity. The final state after the last injected input is also
    /// sampled, so this issues exactly `duration + 1` ticks.
    pub fn simulate(&mut self, duration: u64) -> Vec<Output> {
        let mut unrouted = Vec::new();
        for _ in 0..=duration {
            unrouted.extend(self.tick());
        }
        unrouted
    }
}

impl std::fmt::Debug for EntityList {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ids: Vec<NodeId> = self.entities.iter().map(|e| e.id()).collect();
        f.debug_struct("EntityList").field("ids", &ids).finish()
    }
}
