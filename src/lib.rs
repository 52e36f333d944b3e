//! This crate provides a discrete-time simulator for networks of simple
//! spiking-neuron models, with optional splitting of the population across
//! multiple cooperating processes coordinated by a single head process.
//!
//! # Building Networks
//!
//! ```rust
//! use spikenet::connection::{convergent_connect, Connectable};
//! # use spikenet::entity::Entity;
//! use spikenet::entity::IdAllocator;
//! use spikenet::generator::PoissonGenerator;
//! use spikenet::neuron::IafNeuron;
//! use spikenet::recorder::SpikeRecorder;
//! use spikenet::scheduler::EntityList;
//!
//! let mut ids = IdAllocator::new();
//!
//! let mut neuron = IafNeuron::new(ids.next_id(), -55.0);
//! let mut excite = PoissonGenerator::seeded(ids.next_id(), 70.0, 1).unwrap();
//! let mut inhibit = PoissonGenerator::seeded(ids.next_id(), 20.0, 2).unwrap();
//! let recorder = SpikeRecorder::new(ids.next_id());
//!
//! // Wire both generators into the neuron and the neuron into the recorder.
//! let mut sources: Vec<&mut dyn Connectable> = vec![&mut excite, &mut inhibit];
//! convergent_connect(&mut sources, neuron.id(), &[1.2, -1.0]).unwrap();
//! neuron.connect_default(recorder.id());
//!
//! let mut entities = EntityList::new();
//! entities.add_all(vec![
//!     Box::new(excite),
//!     Box::new(inhibit),
//!     Box::new(neuron),
//!     Box::new(recorder),
//! ]);
//!
//! // Run for 100 ticks (plus the final sampling tick).
//! entities.simulate(100);
//! ```
//!
//! # Distributing Networks
//!
//! A [`coordinator::Coordinator`] assigns each connecting [`unit::Unit`] a
//! disjoint range of the global id space and broadcasts the id-to-address
//! map once the expected number of units has registered; units then forward
//! spikes addressed outside their shard over the wire. See the module docs
//! of [`coordinator`] and [`unit`].

pub mod connection;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod generator;
pub mod neuron;
pub mod protocol;
pub mod recorder;
pub mod scheduler;
pub mod unit;

use crate::entity::Tick;

/// The default absolute resting membrane potential (mV).
pub const RESTING_POTENTIAL: f64 = -70.0;
/// The default number of ticks a neuron stays refractory after a spike.
pub const REFRACTORY_PERIOD: Tick = 2;
/// The default membrane time constant.
pub const MEMBRANE_TIME_CONSTANT: f64 = 20.0;
/// The default membrane capacitance (pF).
pub const MEMBRANE_CAPACITANCE: f64 = 250.0;
/// The default delay between spike emission and arrival (ticks).
pub const PROPAGATION_DELAY: Tick = 1;
/// The capacitance growth factor applied after each spike.
pub const ADAPTATION_FACTOR: f64 = 1.1;
/// The default connection weight.
pub const DEFAULT_WEIGHT: f64 = 1.0;
