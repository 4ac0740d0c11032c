//! Session execution engine: protocol stream parsing, event
//! accumulation, tool dispatch, and the orchestrator that drives one
//! agent session from query to terminal event.

pub mod accumulator;
pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod transport;

pub use accumulator::EventAccumulator;
pub use checkpoint::CheckpointManager;
pub use error::EngineError;
pub use executor::ToolExecutor;
pub use orchestrator::{LoopDetector, Orchestrator};
pub use parser::{Segment, SegmentKind, StreamParser};
pub use registry::ToolRegistry;
pub use transport::TransportDriver;
