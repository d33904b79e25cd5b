//! A batch dataflow engine that runs every node of a graph on its own thread.
//!
//! Nodes are wired by explicit attachment: each producer gets one adapter,
//! and the adapter owns one queue per consumer. Items are frozen when emitted;
//! when a producer has several consumers the first one receives the original
//! and the others receive copies borrowed from a type-keyed object pool.
//!
//! # Features
//!
//! - One OS thread per node, joined at the end of the run
//! - Per-consumer crossbeam channels, unbounded by default, optionally bounded
//! - Fan-out copies served from a lock-free object pool
//! - One-shot gates that hold consumers until a gated producer releases them
//! - Per-node read/write/error counters and elapsed-time report
//! - Builder pattern for process settings
//!
//! # Example
//!
//! ```ignore
//! use etl_pipeline::{CollectNode, NodeRef, Process, ProcessSettings, Row, SourceNode};
//!
//! let settings = ProcessSettings::builder().name("rows").pool::<Row>(64, true).build()?;
//! let mut process = Process::new(settings);
//!
//! let source = NodeRef::new(SourceNode::new("source", |emitter, _ctx| {
//!     emitter.emit(Row::new().with("id", "1"))
//! }));
//! let sink = NodeRef::new(CollectNode::<Row>::new());
//!
//! process.attach_input_to_output(&source, &sink)?;
//! let report = process.execute()?;
//! println!("{}", report.format());
//! ```

pub mod adapter;
pub mod context;
pub mod error;
pub mod gate;
pub mod item;
pub mod node;
pub mod nodes;
pub mod pool;
pub mod process;
pub mod queue;
pub mod settings;
pub mod statistics;

// Re-exports for convenience
pub use adapter::{Emitter, IoAdapter};
pub use context::ProcessContext;
pub use error::{PipelineError, Result};
pub use gate::{NodeWaiter, WaitSignaller};
pub use item::{Item, Row};
pub use node::{InputNode, InputPort, Node, NodeContext, NodeId, NodeRef, OutputNode, OutputPort};
pub use nodes::{CollectNode, ConcatNode, FilterNode, FoldNode, SourceNode, TransformNode};
pub use pool::{ObjectPool, PoolStats};
pub use process::{NodeOutcome, NodeReport, Process, ProcessReport, ProcessState};
pub use queue::{Input, QueueBound};
pub use settings::{PoolRegistration, ProcessSettings, ProcessSettingsBuilder};
pub use statistics::{NodeStatistics, StatisticsSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
