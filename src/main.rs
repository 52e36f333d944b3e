//! Single-process demo run: one integrate-and-fire neuron driven by a
//! sinusoidal current and two Poisson noise sources, with its spikes
//! collected by a recorder. Prints the spike log and a trace summary.

use spikenet::connection::{convergent_connect, Connectable};
use spikenet::entity::{Entity, IdAllocator};
use spikenet::error::SNNError;
use spikenet::generator::{AcGenerator, PoissonGenerator};
use spikenet::neuron::IafNeuron;
use spikenet::recorder::SpikeRecorder;
use spikenet::scheduler::EntityList;

fn main() -> Result<(), SNNError> {
    env_logger::init();

    let mut ids = IdAllocator::new();

    let mut neuron = IafNeuron::new(ids.next_id(), -55.0);
    let mut ac_gen = AcGenerator::new(ids.next_id(), 2.0, 500.0)?;
    let mut poisson_1 = PoissonGenerator::new(ids.next_id(), 70.0)?;
    let mut poisson_2 = PoissonGenerator::new(ids.next_id(), 20.0)?;
    let recorder = SpikeRecorder::new(ids.next_id());
    let neuron_id = neuron.id();
    let recorder_id = recorder.id();

    ac_gen.attach(neuron_id);
    neuron.connect_default(recorder_id);
    let mut sources: Vec<&mut dyn Connectable> = vec![&mut poisson_1, &mut poisson_2];
    convergent_connect(&mut sources, neuron_id, &[1.2, -1.0])?;

    let mut entities = EntityList::new();
    entities.add_all(vec![
        Box::new(ac_gen),
        Box::new(poisson_1),
        Box::new(poisson_2),
        Box::new(neuron),
        Box::new(recorder),
    ]);
    log::info!("simulating {} entities for 1000 ticks", entities.len());

    entities.simulate(1000);

    let recorder = entities
        .get_as::<SpikeRecorder>(recorder_id)
        .expect("the recorder was registered above");
    print!("{}", recorder.log());

    let neuron = entities
        .get_as::<IafNeuron>(neuron_id)
        .expect("the neuron was registered above");
    let trace = neuron.trace();
    let peak = trace
        .potentials()
        .iter()
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    println!(
        "neuron {}: {} spikes over {} samples, peak potential {:.2} mV",
        neuron_id,
        recorder.num_spikes(),
        trace.len(),
        peak
    );

    Ok(())
}
