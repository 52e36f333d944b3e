//! End-to-end single-process simulation tests.

use spikenet::connection::{convergent_connect, Connectable};
use spikenet::entity::{Entity, IdAllocator};
use spikenet::generator::{AcGenerator, PoissonGenerator};
use spikenet::neuron::{IafNeuron, NeuronConfig};
use spikenet::recorder::SpikeRecorder;
use spikenet::scheduler::EntityList;
use spikenet::{ADAPTATION_FACTOR, MEMBRANE_CAPACITANCE};

#[test]
fn poisson_driven_neuron_spikes_into_recorder() {
    let mut ids = IdAllocator::new();

    // Threshold chosen so a 1.2-weighted Poisson input at rate 1/50 (sample
    // mean 50) reliably drives the neuron over threshold well within 500
    // ticks.
    let config = NeuronConfig {
        threshold_voltage: -67.0,
        ..NeuronConfig::default()
    };
    let mut neuron = IafNeuron::with_config(ids.next_id(), &config).unwrap();
    let mut poisson = PoissonGenerator::seeded(ids.next_id(), 1.0 / 50.0, 42).unwrap();
    let recorder = SpikeRecorder::new(ids.next_id());

    let neuron_id = neuron.id();
    let recorder_id = recorder.id();
    poisson.connect(neuron_id, 1.2);
    neuron.connect_default(recorder_id);

    let mut entities = EntityList::new();
    entities.add_all(vec![
        Box::new(poisson),
        Box::new(neuron),
        Box::new(recorder),
    ]);
    entities.simulate(500);

    let recorder = entities.get_as::<SpikeRecorder>(recorder_id).unwrap();
    assert!(recorder.num_spikes() >= 1);

    let (ids, times) = recorder.data();
    assert!(ids.iter().all(|&id| id == neuron_id));
    assert!(times.iter().any(|&t| t <= 500));

    // Every spike grew the capacitance by the adaptation factor.
    let neuron = entities.get_as::<IafNeuron>(neuron_id).unwrap();
    let expected =
        MEMBRANE_CAPACITANCE * ADAPTATION_FACTOR.powi(recorder.num_spikes() as i32);
    assert!(neuron.membrane_capacitance() > MEMBRANE_CAPACITANCE);
    assert!((neuron.membrane_capacitance() - expected).abs() < 1e-6);
}

#[test]
fn refractory_neuron_never_respikes_early() {
    let mut ids = IdAllocator::new();

    let mut neuron = IafNeuron::new(ids.next_id(), -55.0);
    let recorder = SpikeRecorder::new(ids.next_id());
    let neuron_id = neuron.id();
    let recorder_id = recorder.id();
    neuron.connect_default(recorder_id);

    let mut entities = EntityList::new();
    entities.add_all(vec![Box::new(neuron), Box::new(recorder)]);

    // Hammer the neuron with a huge current every tick.
    for t in 0..200u64 {
        let target = entities.get_mut(neuron_id).unwrap();
        target.inject(t, 1e6);
        entities.tick();
    }

    let recorder = entities.get_as::<SpikeRecorder>(recorder_id).unwrap();
    let (_, times) = recorder.data();

    // Consecutive spikes of the same neuron are separated by more than the
    // refractory period.
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] > spikenet::REFRACTORY_PERIOD);
    }
    assert!(recorder.num_spikes() > 1);
}

#[test]
fn layered_network_runs_to_completion() {
    let mut ids = IdAllocator::new();
    let size = 5;

    let recorder = SpikeRecorder::new(ids.next_id());
    let recorder_id = recorder.id();

    let mut neurons = Vec::new();
    let mut generators = Vec::new();
    let mut poissons = Vec::new();
    for i in 0..size {
        let mut neuron = IafNeuron::new(ids.next_id(), -55.0);
        let mut ac_gen = AcGenerator::new(ids.next_id(), 2.0, 500.0).unwrap();
        ac_gen.attach(neuron.id());
        let mut excite = PoissonGenerator::seeded(ids.next_id(), 50.0, 10 + i).unwrap();
        let mut inhibit = PoissonGenerator::seeded(ids.next_id(), 80.0, 20 + i).unwrap();
        let mut sources: Vec<&mut dyn Connectable> = vec![&mut excite, &mut inhibit];
        convergent_connect(&mut sources, neuron.id(), &[1.2, -1.0]).unwrap();
        neuron.connect_default(recorder_id);
        neurons.push(neuron);
        generators.push(ac_gen);
        poissons.push(excite);
        poissons.push(inhibit);
    }

    let mut output_neuron = IafNeuron::new(ids.next_id(), -55.0);
    let output_id = output_neuron.id();
    let weights: Vec<f64> = (0..size).map(|i| (i + 1) as f64 * 30.0).collect();
    let mut sources: Vec<&mut dyn Connectable> = neurons
        .iter_mut()
        .map(|n| n as &mut dyn Connectable)
        .collect();
    convergent_connect(&mut sources, output_id, &weights).unwrap();
    output_neuron.connect_default(recorder_id);

    let mut entities = EntityList::new();
    for generator in generators {
        entities.add(Box::new(generator));
    }
    for poisson in poissons {
        entities.add(Box::new(poisson));
    }
    for neuron in neurons {
        entities.add(Box::new(neuron));
    }
    entities.add(Box::new(output_neuron));
    entities.add(Box::new(recorder));

    let unrouted = entities.simulate(1000);
    assert!(unrouted.is_empty(), "every target is local to this list");

    // Each of the driven neurons sampled its potential on all 1001 ticks.
    for id in 0..ids.watermark() {
        if let Some(neuron) = entities.get_as::<IafNeuron>(id) {
            assert_eq!(neuron.trace().len(), 1001);
        }
    }

    // The sinusoid at amplitude 500 drives every input neuron over
    // threshold at least once per cycle.
    let recorder = entities.get_as::<SpikeRecorder>(recorder_id).unwrap();
    assert!(recorder.num_spikes() >= size as usize);
}
