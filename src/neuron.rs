//! This module provides the integrate-and-fire neuron model.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::connection::{Connectable, Connection};
use crate::entity::{Entity, NodeId, Output, Tick};
use crate::error::SNNError;
use crate::{
    ADAPTATION_FACTOR, MEMBRANE_CAPACITANCE, MEMBRANE_TIME_CONSTANT, PROPAGATION_DELAY,
    REFRACTORY_PERIOD, RESTING_POTENTIAL,
};

/// Model parameters of an integrate-and-fire neuron.
///
/// All voltages are absolute (mV); the neuron converts to resting-relative
/// values internally. Invalid numerics are rejected by [`NeuronConfig::validate`],
/// never clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronConfig {
    /// The absolute potential of the neuron with no inputs (mV).
    pub resting_potential: f64,
    /// The absolute voltage past which the neuron emits a spike (mV).
    pub threshold_voltage: f64,
    /// The number of ticks the neuron stays refractory after a spike.
    pub refractory_period: Tick,
    /// The ratio of the cell membrane's resistance to its capacitance.
    pub membrane_time_constant: f64,
    /// The capacitance of the cell membrane (pF).
    pub membrane_capacitance: f64,
    /// The delay between spike emission and arrival at the target (ticks).
    pub propagation_delay: Tick,
    /// Capacitance growth factor applied after each spike.
    pub adaptation_factor: f64,
}

impl Default for NeuronConfig {
    fn default() -> Self {
        NeuronConfig {
            resting_potential: RESTING_POTENTIAL,
            threshold_voltage: -55.0,
            refractory_period: REFRACTORY_PERIOD,
            membrane_time_constant: MEMBRANE_TIME_CONSTANT,
            membrane_capacitance: MEMBRANE_CAPACITANCE,
            propagation_delay: PROPAGATION_DELAY,
            adaptation_factor: ADAPTATION_FACTOR,
        }
    }
}

impl NeuronConfig {
    /// Check the parameters, returning an error for invalid ones.
    pub fn validate(&self) -> Result<(), SNNError> {
        if !self.resting_potential.is_finite() || !self.threshold_voltage.is_finite() {
            return Err(SNNError::InvalidParameter(
                "Potentials must be finite".to_string(),
            ));
        }
        if !(self.membrane_time_constant.is_finite() && self.membrane_time_constant > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Membrane time constant must be positive".to_string(),
            ));
        }
        if !(self.membrane_capacitance.is_finite() && self.membrane_capacitance > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Membrane capacitance must be positive".to_string(),
            ));
        }
        if self.propagation_delay == 0 {
            return Err(SNNError::InvalidParameter(
                "Propagation delay must be at least one tick".to_string(),
            ));
        }
        if !(self.adaptation_factor.is_finite() && self.adaptation_factor > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Adaptation factor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SNNError> {
        let file = File::create(path).map_err(|e| SNNError::IoError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SNNError::IoError(e.to_string()))?;
        writer.flush().map_err(|e| SNNError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<NeuronConfig, SNNError> {
        let file = File::open(path).map_err(|e| SNNError::IoError(e.to_string()))?;
        let reader = BufReader::new(file);
        let config: NeuronConfig =
            serde_json::from_reader(reader).map_err(|e| SNNError::IoError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Per-tick samples of the actual (absolute) membrane potential.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageTrace {
    times: Vec<Tick>,
    potentials: Vec<f64>,
}

impl VoltageTrace {
    fn record(&mut self, at: Tick, potential: f64) {
        self.times.push(at);
        self.potentials.push(potential);
    }

    /// Returns the sampled times.
    pub fn times(&self) -> &[Tick] {
        &self.times
    }

    /// Returns the sampled potentials, parallel to [`VoltageTrace::times`].
    pub fn potentials(&self) -> &[f64] {
        &self.potentials
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Represents an integrate-and-fire neuron.
///
/// The neuron accumulates input current into a membrane potential (stored
/// relative to the resting potential) with an exponential leaky-integrator
/// update, and emits a weighted spike along every outbound connection when
/// the potential crosses the threshold. After a spike it stays refractory
/// for a fixed number of ticks, holding the potential at the reset value,
/// and becomes permanently less excitable through capacitance growth
/// (spike-frequency adaptation).
#[derive(Debug, PartialEq, Clone)]
pub struct IafNeuron {
    id: NodeId,
    // The internal time of the neuron, in ticks.
    time: Tick,
    // Membrane potential relative to the resting potential.
    membrane_potential: f64,
    // Relative potential of a neuron with no inputs or which is refractory.
    reset_potential: f64,
    resting_potential: f64,
    // Firing threshold relative to the resting potential.
    threshold: f64,
    refractory_period: Tick,
    // The tick of the latest spike, if any.
    last_spike: Option<Tick>,
    membrane_time_constant: f64,
    membrane_capacitance: f64,
    membrane_resistance: f64,
    propagation_delay: Tick,
    adaptation_factor: f64,
    // Outbound edges, owned by this neuron.
    connections: Vec<Connection>,
    // Accumulated input current keyed by arrival tick; same-tick inputs sum.
    input_queue: HashMap<Tick, f64>,
    trace: VoltageTrace,
}

impl IafNeuron {
    /// Create a neuron with the default model parameters and the given
    /// absolute threshold voltage.
    pub fn new(id: NodeId, threshold_voltage: f64) -> Self {
        let config = NeuronConfig {
            threshold_voltage,
            ..NeuronConfig::default()
        };
        Self::from_config(id, &config)
    }

    /// Create a neuron from a full parameter set.
    /// The function returns an error for invalid parameters.
    pub fn with_config(id: NodeId, config: &NeuronConfig) -> Result<Self, SNNError> {
        config.validate()?;
        Ok(Self::from_config(id, config))
    }

    fn from_config(id: NodeId, config: &NeuronConfig) -> Self {
        IafNeuron {
            id,
            time: 0,
            membrane_potential: 0.0,
            reset_potential: 0.0,
            resting_potential: config.resting_potential,
            threshold: config.threshold_voltage - config.resting_potential,
            refractory_period: config.refractory_period,
            last_spike: None,
            membrane_time_constant: config.membrane_time_constant,
            membrane_capacitance: config.membrane_capacitance,
            membrane_resistance: config.membrane_time_constant / config.membrane_capacitance,
            propagation_delay: config.propagation_delay,
            adaptation_factor: config.adaptation_factor,
            connections: Vec::new(),
            input_queue: HashMap::new(),
            trace: VoltageTrace::default(),
        }
    }

    /// Returns the internal time of the neuron.
    pub fn time(&self) -> Tick {
        self.time
    }

    /// Returns the membrane potential adjusted to be not relative to the
    /// resting potential.
    pub fn actual_potential(&self) -> f64 {
        self.membrane_potential + self.resting_potential
    }

    /// Returns the tick of the latest spike, if any.
    pub fn last_spike(&self) -> Option<Tick> {
        self.last_spike
    }

    /// Returns whether the neuron is currently within the refractory period.
    pub fn is_refractory(&self) -> bool {
        match self.last_spike {
            Some(t) => self.time <= t + self.refractory_period,
            None => false,
        }
    }

    /// Returns the current membrane capacitance. Grows by the adaptation
    /// factor on every spike and never decreases.
    pub fn membrane_capacitance(&self) -> f64 {
        self.membrane_capacitance
    }

    /// Returns the membrane resistance, derived from the time constant and
    /// the capacitance.
    pub fn membrane_resistance(&self) -> f64 {
        self.membrane_resistance
    }

    /// Returns a slice of the neuron's outbound connections.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Returns the per-tick voltage samples collected so far.
    pub fn trace(&self) -> &VoltageTrace {
        &self.trace
    }

    /// Recalculates the membrane potential from the current accumulated
    /// input, following the standard integrate-and-fire dynamics equation.
    fn integrate(&mut self) {
        let current = self.input_queue.remove(&self.time).unwrap_or(0.0);
        let input = current * self.membrane_resistance;
        self.membrane_potential +=
            (input - self.membrane_potential) / self.membrane_time_constant;
    }

    /// Emit a spike along every outbound connection, scheduled one
    /// propagation delay ahead, and reset the membrane.
    fn emit_spike(&mut self, outputs: &mut Vec<Output>) {
        for connection in &self.connections {
            outputs.push(Output::Spike {
                target: connection.target_id(),
                at: self.time + self.propagation_delay,
                source: self.id,
                weight: connection.weight(),
            });
        }

        // Spike-rate adaptation: the capacitance grows permanently, making
        // the neuron less excitable after repeated firing.
        self.membrane_capacitance *= self.adaptation_factor;
        self.membrane_resistance = self.membrane_time_constant / self.membrane_capacitance;

        self.last_spike = Some(self.time);
        self.membrane_potential = self.reset_potential;
        debug!("neuron {} fired at tick {}", self.id, self.time);
    }
}

impl Connectable for IafNeuron {
    fn connect(&mut self, target: NodeId, weight: f64) {
        self.connections.push(Connection::new(self.id, target, weight));
    }
}

impl Entity for IafNeuron {
    fn id(&self) -> NodeId {
        self.id
    }

    fn tick(&mut self) -> Vec<Output> {
        if self.is_refractory() {
            self.membrane_potential = self.reset_potential;
        } else {
            self.integrate();
        }

        self.trace.record(self.time, self.actual_potential());

        let mut outputs = Vec::new();
        if self.membrane_potential > self.threshold {
            self.emit_spike(&mut outputs);
        }

        self.time += 1;
        outputs
    }

    fn spike(&mut self, at: Tick, _source: NodeId, weight: f64) {
        *self.input_queue.entry(at).or_insert(0.0) += weight;
    }

    fn inject(&mut self, at: Tick, current: f64) {
        *self.input_queue.entry(at).or_insert(0.0) += current;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neuron_constructor() {
        let neuron = IafNeuron::new(0, -55.0);
        assert_eq!(neuron.id(), 0);
        assert_eq!(neuron.time(), 0);
        assert_eq!(neuron.actual_potential(), RESTING_POTENTIAL);
        assert_eq!(neuron.threshold, 15.0);
        assert_eq!(neuron.last_spike(), None);
        assert!(!neuron.is_refractory());
        assert_eq!(
            neuron.membrane_resistance(),
            MEMBRANE_TIME_CONSTANT / MEMBRANE_CAPACITANCE
        );
    }

    #[test]
    fn test_invalid_config() {
        let config = NeuronConfig {
            membrane_time_constant: 0.0,
            ..NeuronConfig::default()
        };
        assert_eq!(
            IafNeuron::with_config(0, &config),
            Err(SNNError::InvalidParameter(
                "Membrane time constant must be positive".to_string()
            ))
        );

        let config = NeuronConfig {
            membrane_capacitance: -250.0,
            ..NeuronConfig::default()
        };
        assert!(IafNeuron::with_config(0, &config).is_err());

        let config = NeuronConfig {
            propagation_delay: 0,
            ..NeuronConfig::default()
        };
        assert!(IafNeuron::with_config(0, &config).is_err());
    }

    #[test]
    fn test_same_tick_inputs_sum() {
        let mut neuron = IafNeuron::new(0, -55.0);
        neuron.inject(0, 100.0);
        neuron.spike(0, 7, 50.0);
        neuron.tick();

        // One leaky-integrator step from rest: (I * R - 0) / tau.
        let expected = 150.0 * (MEMBRANE_TIME_CONSTANT / MEMBRANE_CAPACITANCE)
            / MEMBRANE_TIME_CONSTANT;
        assert!((neuron.actual_potential() - (RESTING_POTENTIAL + expected)).abs() < 1e-12);
    }

    #[test]
    fn test_input_consumed_once() {
        let mut neuron = IafNeuron::new(0, -55.0);
        neuron.inject(0, 1000.0);
        neuron.tick();
        let after_first = neuron.actual_potential();
        neuron.tick();
        // With the tick-0 input popped, the potential decays toward rest.
        assert!(neuron.actual_potential() < after_first);
    }

    #[test]
    fn test_spike_emission_and_reset() {
        let mut neuron = IafNeuron::new(0, -55.0);
        neuron.connect(1, 0.5);
        neuron.connect(2, -1.0);

        // A single huge current drives the potential over threshold at once.
        neuron.inject(0, 1e6);
        let outputs = neuron.tick();

        assert_eq!(
            outputs,
            vec![
                Output::Spike {
                    target: 1,
                    at: PROPAGATION_DELAY,
                    source: 0,
                    weight: 0.5
                },
                Output::Spike {
                    target: 2,
                    at: PROPAGATION_DELAY,
                    source: 0,
                    weight: -1.0
                },
            ]
        );
        assert_eq!(neuron.last_spike(), Some(0));
        assert_eq!(neuron.actual_potential(), RESTING_POTENTIAL);
        assert!(neuron.is_refractory());
    }

    #[test]
    fn test_no_spike_while_refractory() {
        let mut neuron = IafNeuron::new(0, -55.0);
        neuron.connect(1, 1.0);
        neuron.inject(0, 1e6);
        assert_eq!(neuron.tick().len(), 1);

        // Keep driving the neuron as hard as before: while refractory, the
        // potential is held at reset and nothing fires.
        for t in 1..=REFRACTORY_PERIOD {
            neuron.inject(t, 1e6);
            let outputs = neuron.tick();
            assert_eq!(outputs, vec![]);
            assert_eq!(neuron.actual_potential(), RESTING_POTENTIAL);
        }

        // The first integrating tick after the refractory period can fire
        // again.
        neuron.inject(REFRACTORY_PERIOD + 1, 1e6);
        assert_eq!(neuron.tick().len(), 1);
    }

    #[test]
    fn test_adaptation_grows_capacitance() {
        let mut neuron = IafNeuron::new(0, -55.0);
        let mut previous = neuron.membrane_capacitance();

        for round in 0..3 {
            let t = round * (REFRACTORY_PERIOD + 1);
            // Skip forward past any refractory window, then force a spike.
            while neuron.time() < t {
                neuron.tick();
            }
            neuron.inject(t, 1e7);
            assert_eq!(neuron.tick().len(), 0, "no outbound edges, still spikes");
            assert!((neuron.membrane_capacitance() - previous * ADAPTATION_FACTOR).abs() < 1e-9);
            assert!(neuron.membrane_capacitance() > previous);
            previous = neuron.membrane_capacitance();
        }
        assert!(
            (neuron.membrane_resistance()
                - MEMBRANE_TIME_CONSTANT / neuron.membrane_capacitance())
            .abs()
                < 1e-12
        );
    }

    #[test]
    fn test_trace_records_every_tick() {
        let mut neuron = IafNeuron::new(3, -55.0);
        for _ in 0..5 {
            neuron.tick();
        }
        assert_eq!(neuron.trace().times(), &[0, 1, 2, 3, 4]);
        assert_eq!(neuron.trace().len(), 5);
        assert!(neuron
            .trace()
            .potentials()
            .iter()
            .all(|&v| v == RESTING_POTENTIAL));
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neuron.json");
        let config = NeuronConfig {
            threshold_voltage: -60.0,
            ..NeuronConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(NeuronConfig::load_from(&path).unwrap(), config);
    }
}
