use thiserror::Error;

/// Result type for dataflow process operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while wiring or executing a process
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Process has already been executed
    #[error("Process has already been executed")]
    AlreadyExecuted,

    /// No nodes registered in the process
    #[error("Cannot execute process with no registered nodes")]
    NoNodes,

    /// Every input port of the consumer already holds a binding
    #[error("Node {node} already has all of its input ports attached")]
    AlreadyAttached { node: String },

    /// An adapter exists for the producer but carries a different item type
    #[error("Adapter for node {node} carries a different item type")]
    TypeMismatch { node: String },

    /// The producer already signalled the end of its stream
    #[error("Node {node} has already ended its output stream")]
    StreamEnded { node: String },

    /// A node read from an input port that was never attached
    #[error("Node {node} has no input attached")]
    InputNotAttached { node: String },

    /// A node emitted without an output adapter
    #[error("Node {node} has no output attached")]
    OutputNotAttached { node: String },

    /// A pool without auto-grow ran out of instances
    #[error("Object pool for {type_name} is exhausted")]
    PoolExhausted { type_name: &'static str },

    /// Failure raised by a node implementation
    #[error("Node execution failed: {0}")]
    NodeError(String),

    /// First node failure of a process run
    #[error("Node {node} failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// Worker thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PipelineError {
    /// Shorthand for node implementations reporting a failure
    pub fn node(message: impl Into<String>) -> Self {
        Self::NodeError(message.into())
    }
}
