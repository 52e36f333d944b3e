//! Deterministic and stochastic input generators driving neuron inputs.

use std::f64::consts::PI;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

use crate::connection::Connectable;
use crate::entity::{Entity, NodeId, Output, Tick};
use crate::error::SNNError;
use crate::DEFAULT_WEIGHT;

/// Injects a sinusoidal current into its target with user-specified
/// frequency and amplitude.
///
/// Primarily used for probing neuron dynamics with a known, varying input.
#[derive(Debug, Clone, PartialEq)]
pub struct AcGenerator {
    id: NodeId,
    time: Tick,
    // Frequency of the current (Hz).
    frequency: f64,
    amplitude: f64,
    // Duration of a single cycle in ticks. Derived from the frequency and
    // never set independently.
    cycle_time: f64,
    voltage: f64,
    target: Option<NodeId>,
}

impl AcGenerator {
    /// Create a generator with the given frequency (Hz) and amplitude.
    /// The function returns an error for a non-positive frequency.
    pub fn new(id: NodeId, frequency: f64, amplitude: f64) -> Result<Self, SNNError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Generator frequency must be positive".to_string(),
            ));
        }
        if !amplitude.is_finite() {
            return Err(SNNError::InvalidParameter(
                "Generator amplitude must be finite".to_string(),
            ));
        }

        Ok(AcGenerator {
            id,
            time: 0,
            frequency,
            amplitude,
            cycle_time: 1000.0 / frequency,
            voltage: 0.0,
            target: None,
        })
    }

    /// Returns the frequency of the generated current (Hz).
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Returns the duration of a single cycle in ticks.
    pub fn cycle_time(&self) -> f64 {
        self.cycle_time
    }

    /// Returns the latest generated voltage.
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Change the frequency, recomputing the derived cycle time.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<(), SNNError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Generator frequency must be positive".to_string(),
            ));
        }
        self.frequency = frequency;
        self.cycle_time = 1000.0 / frequency;
        Ok(())
    }

    /// Returns the waveform value at an arbitrary tick.
    pub fn voltage_at(&self, t: Tick) -> f64 {
        self.amplitude * (2.0 * PI * t as f64 / self.cycle_time).sin()
    }

    /// Attach the generator's output to the specified target. The injected
    /// current carries no weight of its own.
    pub fn attach(&mut self, target: NodeId) {
        self.target = Some(target);
    }
}

impl Entity for AcGenerator {
    fn id(&self) -> NodeId {
        self.id
    }

    fn tick(&mut self) -> Vec<Output> {
        self.time += 1;
        self.voltage = self.voltage_at(self.time);
        match self.target {
            Some(target) => vec![Output::Current {
                target,
                at: self.time,
                value: self.voltage,
            }],
            None => vec![],
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Generator for a noisy current stream governed by a Poisson process.
///
/// The stored rate is the inverse of the rate provided at construction;
/// sampled values follow an exponential distribution whose mean equals the
/// stored rate, so the sample mean over many ticks converges to it.
#[derive(Debug, Clone)]
pub struct PoissonGenerator {
    id: NodeId,
    time: Tick,
    // Inverse of the user-provided rate.
    rate: f64,
    dist: Exp<f64>,
    rng: ChaCha8Rng,
    target: Option<NodeId>,
    weight: f64,
}

impl PoissonGenerator {
    /// Create a generator from a rate expressed as an inverse frequency.
    /// The function returns an error for a non-positive rate.
    pub fn new(id: NodeId, rate: f64) -> Result<Self, SNNError> {
        Self::build(id, rate, ChaCha8Rng::from_entropy())
    }

    /// Create a generator with a fixed seed, for reproducible runs.
    pub fn seeded(id: NodeId, rate: f64, seed: u64) -> Result<Self, SNNError> {
        Self::build(id, rate, ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(id: NodeId, rate: f64, rng: ChaCha8Rng) -> Result<Self, SNNError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SNNError::InvalidParameter(
                "Generator rate must be positive".to_string(),
            ));
        }
        let dist = Exp::new(rate)
            .map_err(|e| SNNError::InvalidParameter(format!("Invalid rate: {}", e)))?;

        Ok(PoissonGenerator {
            id,
            time: 0,
            rate: 1.0 / rate,
            dist,
            rng,
            target: None,
            weight: DEFAULT_WEIGHT,
        })
    }

    /// Returns the stored (inverse) rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Draw one value from the exponential distribution.
    pub fn sample(&mut self) -> f64 {
        self.dist.sample(&mut self.rng)
    }
}

impl Connectable for PoissonGenerator {
    fn connect(&mut self, target: NodeId, weight: f64) {
        self.target = Some(target);
        self.weight = weight;
    }
}

impl Entity for PoissonGenerator {
    fn id(&self) -> NodeId {
        self.id
    }

    fn tick(&mut self) -> Vec<Output> {
        self.time += 1;
        match self.target {
            Some(target) => {
                let value = self.sample() * self.weight;
                vec![Output::Current {
                    target,
                    at: self.time,
                    value,
                }]
            }
            None => vec![],
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ac_generator_invalid_frequency() {
        assert_eq!(
            AcGenerator::new(0, 0.0, 1.0),
            Err(SNNError::InvalidParameter(
                "Generator frequency must be positive".to_string()
            ))
        );
        assert!(AcGenerator::new(0, -60.0, 1.0).is_err());
        assert!(AcGenerator::new(0, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_ac_generator_waveform() {
        let generator = AcGenerator::new(0, 2.0, 500.0).unwrap();
        let cycle = generator.cycle_time();
        assert_eq!(cycle, 500.0);

        let tolerance = 0.01 * 500.0;
        assert!(generator.voltage_at(0).abs() < tolerance);
        assert!((generator.voltage_at((cycle / 4.0) as Tick) - 500.0).abs() < tolerance);
        assert!(generator.voltage_at((cycle / 2.0) as Tick).abs() < tolerance);
        assert!(generator.voltage_at(cycle as Tick).abs() < tolerance);
    }

    #[test]
    fn test_ac_generator_set_frequency_recomputes_cycle_time() {
        let mut generator = AcGenerator::new(0, 60.0, 1.0).unwrap();
        assert!((generator.cycle_time() - 1000.0 / 60.0).abs() < 1e-12);
        generator.set_frequency(4.0).unwrap();
        assert_eq!(generator.cycle_time(), 250.0);
        assert!(generator.set_frequency(0.0).is_err());
        assert_eq!(generator.cycle_time(), 250.0);
    }

    #[test]
    fn test_ac_generator_tick_targets_attachment() {
        let mut generator = AcGenerator::new(0, 2.0, 500.0).unwrap();
        assert_eq!(generator.tick(), vec![]);

        generator.attach(9);
        let outputs = generator.tick();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].target(), 9);
        assert_eq!(outputs[0].at(), 2);
        assert_eq!(outputs[0].value(), generator.voltage());
    }

    #[test]
    fn test_poisson_generator_invalid_rate() {
        assert!(PoissonGenerator::new(0, 0.0).is_err());
        assert!(PoissonGenerator::new(0, -1.0).is_err());
        assert!(PoissonGenerator::new(0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_poisson_generator_stored_rate_is_inverse() {
        let generator = PoissonGenerator::seeded(0, 50.0, 42).unwrap();
        assert!((generator.rate() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_poisson_generator_sample_mean() {
        let mut generator = PoissonGenerator::seeded(0, 50.0, 42).unwrap();
        let n = 1_000_000;
        let mean = (0..n).map(|_| generator.sample()).sum::<f64>() / n as f64;
        // The sample mean converges to the stored rate, 1/50.
        assert!((mean - 0.02).abs() < 0.05 * 0.02);
    }

    #[test]
    fn test_poisson_generator_weighted_output() {
        let mut generator = PoissonGenerator::seeded(0, 2.0, 7).unwrap();
        generator.connect(5, -1.0);
        let outputs = generator.tick();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].target(), 5);
        assert_eq!(outputs[0].at(), 1);
        // Exponential samples are positive, so a negative weight makes the
        // injected current inhibitory.
        assert!(outputs[0].value() < 0.0);
    }
}
