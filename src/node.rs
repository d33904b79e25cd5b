use crate::adapter::Emitter;
use crate::context::ProcessContext;
use crate::error::{PipelineError, Result};
use crate::gate::NodeWaiter;
use crate::item::Item;
use crate::pool::ObjectPool;
use crate::queue::Input;
use crate::statistics::{NodeCounters, StatisticsSnapshot};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Process-unique node identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A unit of computation in a process
pub trait Node: Send + 'static {
    /// Perform the node's work. Called exactly once per process run, on the
    /// node's own thread, after every wait gate assigned to it has opened.
    ///
    /// A node with an output must end its stream before returning, even when
    /// it emitted nothing.
    fn execute(&mut self, ctx: &NodeContext) -> Result<()>;

    /// Get a human-readable name for this node
    fn name(&self) -> &str {
        "node"
    }

    /// Gated producers hold their consumers back until they release them
    /// through [`Emitter::release_consumers`] or end their stream.
    fn is_gated(&self) -> bool {
        false
    }
}

/// A node that produces items
pub trait OutputNode: Node {
    type Output: Item;

    /// Install the emitter. Called once, when the first consumer is attached.
    fn set_emitter(&mut self, emitter: Emitter<Self::Output>);
}

/// A node that consumes items through one or two input ports
pub trait InputNode: Node {
    type Input: Item;

    /// The primary input port
    fn input_port(&mut self) -> &mut InputPort<Self::Input>;

    /// Nodes reading from two producers expose a second port
    fn second_input_port(&mut self) -> Option<&mut InputPort<Self::Input>> {
        None
    }
}

/// Holds the input sequence bound to one port
#[derive(Debug)]
pub struct InputPort<T> {
    input: Option<Input<T>>,
    attached: bool,
}

impl<T> InputPort<T> {
    /// Create an unattached port
    pub fn new() -> Self {
        Self {
            input: None,
            attached: false,
        }
    }

    /// Whether a producer has been bound to this port
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub(crate) fn attach(&mut self, input: Input<T>) {
        self.input = Some(input);
        self.attached = true;
    }

    /// Take the bound input sequence out of the port
    pub fn take(&mut self, ctx: &NodeContext) -> Result<Input<T>> {
        self.input
            .take()
            .ok_or_else(|| PipelineError::InputNotAttached {
                node: ctx.to_string(),
            })
    }
}

impl<T> Default for InputPort<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the emitter of a producing node
#[derive(Debug)]
pub struct OutputPort<T> {
    emitter: Option<Emitter<T>>,
}

impl<T: Item> OutputPort<T> {
    /// Create a port with no emitter yet
    pub fn new() -> Self {
        Self { emitter: None }
    }

    /// Install the emitter
    pub fn set(&mut self, emitter: Emitter<T>) {
        self.emitter = Some(emitter);
    }

    /// Whether an emitter has been installed
    pub fn is_attached(&self) -> bool {
        self.emitter.is_some()
    }

    /// Borrow the installed emitter
    pub fn get(&self, ctx: &NodeContext) -> Result<&Emitter<T>> {
        self.emitter
            .as_ref()
            .ok_or_else(|| PipelineError::OutputNotAttached {
                node: ctx.to_string(),
            })
    }
}

impl<T: Item> Default for OutputPort<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-node view of the process context handed to [`Node::execute`]
pub struct NodeContext {
    id: NodeId,
    name: String,
    process: Arc<ProcessContext>,
    counters: Arc<NodeCounters>,
}

impl NodeContext {
    pub(crate) fn new(id: NodeId, name: String, process: Arc<ProcessContext>) -> Self {
        let counters = process.statistics().counters(id);
        Self {
            id,
            name,
            process,
            counters,
        }
    }

    /// Identity of the executing node
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name of the executing node
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process-wide context
    pub fn process(&self) -> &ProcessContext {
        &self.process
    }

    /// Object pool shared by the whole process
    pub fn pool(&self) -> &ObjectPool {
        self.process.pool()
    }

    /// Look up a value set by the context initializer
    pub fn config(&self, key: &str) -> Option<String> {
        self.process.config(key)
    }

    /// Count one item read by this node
    pub fn increment_reads(&self) {
        self.counters.record_read();
    }

    /// Count one item written by this node
    pub fn increment_writes(&self) {
        self.counters.record_write();
    }

    /// Count one error raised by this node
    pub fn increment_errors(&self) {
        self.counters.record_error();
    }

    /// Current counters of this node
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.counters.snapshot()
    }
}

impl fmt::Display for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=({})", self.name, self.id)
    }
}

pub(crate) struct NodeCell<N: ?Sized> {
    id: NodeId,
    name: String,
    gated: bool,
    waiters: Mutex<Vec<NodeWaiter>>,
    node: Mutex<N>,
}

/// Shared handle to a node.
///
/// Handles compare and hash by the node's identity, never by its state. The
/// process keeps one clone for execution; the caller keeps another to attach
/// the node and to inspect it once the run is over.
pub struct NodeRef<N: ?Sized> {
    inner: Arc<NodeCell<N>>,
}

impl<N: Node> NodeRef<N> {
    /// Wrap a node under a fresh identity
    pub fn new(node: N) -> Self {
        let name = node.name().to_owned();
        let gated = node.is_gated();
        Self {
            inner: Arc::new(NodeCell {
                id: NodeId::new(),
                name,
                gated,
                waiters: Mutex::new(Vec::new()),
                node: Mutex::new(node),
            }),
        }
    }

    /// Type-erased handle sharing the same node
    pub fn erased(&self) -> NodeRef<dyn Node> {
        let inner: Arc<NodeCell<dyn Node>> = self.inner.clone();
        NodeRef { inner }
    }
}

impl<N: ?Sized> NodeRef<N> {
    /// Identity assigned when the handle was created
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Name the node reported when it was wrapped
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the node holds its consumers behind a gate
    pub fn is_gated(&self) -> bool {
        self.inner.gated
    }

    /// Lock the node for inspection or setup. Do not hold the guard while the
    /// process is executing: the node's worker locks it for the whole run.
    pub fn lock(&self) -> MutexGuard<'_, N> {
        self.inner.node.lock()
    }

    pub(crate) fn add_waiter(&self, waiter: NodeWaiter) {
        if waiter.is_blocking() {
            self.inner.waiters.lock().push(waiter);
        }
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.inner.waiters.lock().len()
    }
}

impl NodeRef<dyn Node> {
    /// Wait on every assigned gate, then run the node
    pub(crate) fn execute(&self, ctx: &NodeContext) -> Result<()> {
        let waiters = self.inner.waiters.lock().clone();
        for waiter in &waiters {
            waiter.wait();
        }
        self.inner.node.lock().execute(ctx)
    }
}

impl<N: ?Sized> Clone for NodeRef<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: ?Sized> PartialEq for NodeRef<N> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<N: ?Sized> Eq for NodeRef<N> {}

impl<N: ?Sized> Hash for NodeRef<N> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<N: ?Sized> fmt::Display for NodeRef<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=({})", self.inner.name, self.inner.id)
    }
}

impl<N: ?Sized> fmt::Debug for NodeRef<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("gated", &self.inner.gated)
            .finish()
    }
}
