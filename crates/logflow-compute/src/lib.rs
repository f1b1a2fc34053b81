pub mod computation;
pub mod error;
pub mod processor;
pub mod settings;
pub mod topology;

pub use computation::{factory, Computation, ComputationContext, ComputationFactory};
pub use error::{BuildError, PathFrame, ProcessorError, RecordPath};
pub use processor::{StreamProcessor, WorkerState};
pub use settings::ProcessorSettings;
pub use topology::{ComputationDef, Topology, TopologyBuilder};
