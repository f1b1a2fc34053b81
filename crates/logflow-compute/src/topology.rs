//! Topology
//!
//! Build-time description wiring computations to streams. Streams are edges,
//! computations are nodes; the combined bipartite graph must be acyclic.
//! Every validation failure is fatal at build time - an invalid topology is
//! never partially started.
//!
//! ## Example
//!
//! ```ignore
//! let topology = Topology::builder()
//!     .add_stream("ingest", 4)
//!     .add_stream("enriched", 4)
//!     .add_computation("enricher", factory(|| Box::new(Enricher::default())),
//!         ["ingest"], ["enriched"])
//!     .build()?;
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use logflow_log::Stream;

use crate::computation::ComputationFactory;
use crate::error::BuildError;

/// A computation's bindings within a topology.
#[derive(Clone)]
pub struct ComputationDef {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    factory: ComputationFactory,
}

impl ComputationDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound input streams, in declaration order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Bound output streams, in declaration order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Instantiate a fresh computation for one partition.
    pub fn instantiate(&self) -> Box<dyn crate::computation::Computation> {
        (self.factory)()
    }
}

impl std::fmt::Debug for ComputationDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationDef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// A validated DAG of computations and streams.
#[derive(Debug, Clone)]
pub struct Topology {
    streams: BTreeMap<String, Stream>,
    computations: Vec<ComputationDef>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Declared streams, sorted by name.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn stream(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub fn computations(&self) -> &[ComputationDef] {
        &self.computations
    }

    pub fn computation(&self, name: &str) -> Option<&ComputationDef> {
        self.computations.iter().find(|c| c.name == name)
    }

    /// Streams no computation produces to: the topology's external inputs.
    pub fn sources(&self) -> Vec<&str> {
        let produced: HashSet<&str> = self
            .computations
            .iter()
            .flat_map(|c| c.outputs.iter().map(String::as_str))
            .collect();
        self.streams
            .keys()
            .map(String::as_str)
            .filter(|s| !produced.contains(s))
            .collect()
    }

    /// Streams no computation consumes from: the topology's external outputs.
    pub fn sinks(&self) -> Vec<&str> {
        let consumed: HashSet<&str> = self
            .computations
            .iter()
            .flat_map(|c| c.inputs.iter().map(String::as_str))
            .collect();
        self.streams
            .keys()
            .map(String::as_str)
            .filter(|s| !consumed.contains(s))
            .collect()
    }
}

/// Builder accumulating streams and computations, validated by [`build`].
///
/// [`build`]: TopologyBuilder::build
#[derive(Default)]
pub struct TopologyBuilder {
    streams: Vec<Stream>,
    computations: Vec<ComputationDef>,
}

impl TopologyBuilder {
    /// Declare a stream with its partition count.
    pub fn add_stream(mut self, name: impl Into<String>, partitions: u32) -> Self {
        self.streams.push(Stream::new(name, partitions));
        self
    }

    /// Bind a computation to its input and output streams.
    pub fn add_computation<I, O>(
        mut self,
        name: impl Into<String>,
        factory: ComputationFactory,
        inputs: I,
        outputs: O,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.computations.push(ComputationDef {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            factory,
        });
        self
    }

    /// Validate and freeze the topology.
    ///
    /// # Errors
    ///
    /// `BuildError` on empty names, duplicate streams or computations,
    /// references to undeclared streams, or any cycle in the bipartite
    /// computation/stream graph.
    pub fn build(self) -> Result<Topology, BuildError> {
        let mut streams = BTreeMap::new();
        for stream in self.streams {
            if stream.name().is_empty() {
                return Err(BuildError::EmptyName("stream"));
            }
            if streams
                .insert(stream.name().to_string(), stream.clone())
                .is_some()
            {
                return Err(BuildError::DuplicateStream(stream.name().to_string()));
            }
        }

        let mut names = HashSet::new();
        for computation in &self.computations {
            if computation.name.is_empty() {
                return Err(BuildError::EmptyName("computation"));
            }
            if !names.insert(computation.name.clone()) {
                return Err(BuildError::DuplicateComputation(computation.name.clone()));
            }
            for stream in computation.inputs.iter().chain(&computation.outputs) {
                if !streams.contains_key(stream) {
                    return Err(BuildError::UnknownStream {
                        computation: computation.name.clone(),
                        stream: stream.clone(),
                    });
                }
            }
        }

        check_acyclic(&streams, &self.computations)?;

        Ok(Topology {
            streams,
            computations: self.computations,
        })
    }
}

/// Kahn's algorithm over the bipartite graph: computation -> output stream,
/// input stream -> computation. Whatever cannot be peeled off is on a cycle.
fn check_acyclic(
    streams: &BTreeMap<String, Stream>,
    computations: &[ComputationDef],
) -> Result<(), BuildError> {
    // Node ids: streams first, then computations.
    let stream_ids: HashMap<&str, usize> = streams
        .keys()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let offset = stream_ids.len();
    let total = offset + computations.len();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut in_degree = vec![0usize; total];
    for (ci, computation) in computations.iter().enumerate() {
        let cnode = offset + ci;
        for input in &computation.inputs {
            edges[stream_ids[input.as_str()]].push(cnode);
            in_degree[cnode] += 1;
        }
        for output in &computation.outputs {
            let snode = stream_ids[output.as_str()];
            edges[cnode].push(snode);
            in_degree[snode] += 1;
        }
    }

    let mut queue: Vec<usize> = (0..total).filter(|&n| in_degree[n] == 0).collect();
    let mut remaining = total;
    while let Some(node) = queue.pop() {
        remaining -= 1;
        for &next in &edges[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    if remaining > 0 {
        let stream_names: Vec<&String> = streams.keys().collect();
        let cyclic: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(n, _)| {
                if n < offset {
                    format!("stream '{}'", stream_names[n])
                } else {
                    format!("computation '{}'", computations[n - offset].name)
                }
            })
            .collect();
        return Err(BuildError::Cycle(cyclic.join(", ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{factory, Computation, ComputationContext};
    use async_trait::async_trait;
    use logflow_core::Record;

    struct Noop;

    #[async_trait]
    impl Computation for Noop {
        async fn process_record(
            &mut self,
            _ctx: &mut ComputationContext,
            _input: &str,
            _record: Record,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn noop() -> ComputationFactory {
        factory(|| Box::new(Noop))
    }

    #[test]
    fn test_linear_chain_builds() {
        let topology = Topology::builder()
            .add_stream("s1", 1)
            .add_stream("s2", 1)
            .add_stream("s3", 1)
            .add_computation("c1", noop(), ["s1"], ["s2"])
            .add_computation("c2", noop(), ["s2"], ["s3"])
            .build()
            .unwrap();
        assert_eq!(topology.sources(), vec!["s1"]);
        assert_eq!(topology.sinks(), vec!["s3"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = Topology::builder()
            .add_stream("s1", 1)
            .add_stream("s2", 1)
            .add_computation("c1", noop(), ["s1"], ["s2"])
            .add_computation("c2", noop(), ["s2"], ["s1"])
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let err = Topology::builder()
            .add_stream("s1", 1)
            .add_computation("c1", noop(), ["s1"], ["s1"])
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn test_unknown_stream_is_rejected() {
        let err = Topology::builder()
            .add_stream("s1", 1)
            .add_computation("c1", noop(), ["s1"], ["missing"])
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownStream { .. }));
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let err = Topology::builder()
            .add_stream("s1", 1)
            .add_stream("s1", 2)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateStream(_)));

        let err = Topology::builder()
            .add_stream("s1", 1)
            .add_computation("c1", noop(), ["s1"], Vec::<String>::new())
            .add_computation("c1", noop(), ["s1"], Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateComputation(_)));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        // s1 fans out to two computations that both feed s4.
        Topology::builder()
            .add_stream("s1", 1)
            .add_stream("s2", 1)
            .add_stream("s3", 1)
            .add_stream("s4", 1)
            .add_computation("left", noop(), ["s1"], ["s2"])
            .add_computation("right", noop(), ["s1"], ["s3"])
            .add_computation("join", noop(), ["s2", "s3"], ["s4"])
            .build()
            .unwrap();
    }
}
