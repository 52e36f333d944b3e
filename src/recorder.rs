//! Spike event collection for later extraction and analysis.

use std::collections::BTreeMap;

use crate::entity::{Entity, NodeId, Output, Tick};

/// Collects spike events keyed by arrival tick.
///
/// Within one tick's bucket, events keep their arrival order; buckets are
/// iterated in ascending time order. Events are never deduplicated.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SpikeRecorder {
    id: NodeId,
    time: Tick,
    buckets: BTreeMap<Tick, Vec<NodeId>>,
}

impl SpikeRecorder {
    /// Create an empty recorder.
    pub fn new(id: NodeId) -> Self {
        SpikeRecorder {
            id,
            time: 0,
            buckets: BTreeMap::new(),
        }
    }

    /// Returns the total number of recorded spikes.
    pub fn num_spikes(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Returns the recorded source ids for one arrival tick, in arrival order.
    pub fn bucket(&self, at: Tick) -> &[NodeId] {
        self.buckets.get(&at).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns parallel (ids, times) sequences over all recorded spikes, in
    /// ascending arrival time with each bucket in arrival order. Used for
    /// raster-style extraction.
    pub fn data(&self) -> (Vec<NodeId>, Vec<Tick>) {
        let mut ids = Vec::new();
        let mut times = Vec::new();
        for (&at, sources) in &self.buckets {
            for &source in sources {
                ids.push(source);
                times.push(at);
            }
        }
        (ids, times)
    }

    /// Render the recorded spikes as `time,node_id` lines for file or screen
    /// output.
    pub fn log(&self) -> String {
        let mut out = String::new();
        for (&at, sources) in &self.buckets {
            for &source in sources {
                out.push_str(&format!("{},{}\n", at, source));
            }
        }
        out
    }
}

impl Entity for SpikeRecorder {
    fn id(&self) -> NodeId {
        self.id
    }

    fn tick(&mut self) -> Vec<Output> {
        self.time += 1;
        vec![]
    }

    fn spike(&mut self, at: Tick, source: NodeId, _weight: f64) {
        self.buckets.entry(at).or_default().push(source);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
