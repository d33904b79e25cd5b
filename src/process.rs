use crate::adapter::{AnyAdapter, Emitter, IoAdapter};
use crate::context::ProcessContext;
use crate::error::{PipelineError, Result};
use crate::node::{InputNode, InputPort, Node, NodeContext, NodeId, NodeRef, OutputNode};
use crate::settings::ProcessSettings;
use crate::statistics::StatisticsSnapshot;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a process run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Nodes are being registered and attached
    Initializing,
    /// Every node worker has been launched
    Running,
    /// Workers have joined; adapters and pools are being released
    Draining,
    Finished,
}

/// How a node's execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed,
    Failed(String),
}

/// Timing and counters of one node after a run
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub elapsed: Duration,
    pub statistics: StatisticsSnapshot,
    pub outcome: NodeOutcome,
}

impl NodeReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, NodeOutcome::Failed(_))
    }
}

/// Summary of a process run. Nodes are ordered by ascending elapsed time.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub name: String,
    pub elapsed: Duration,
    pub nodes: Vec<NodeReport>,
}

impl ProcessReport {
    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn fastest(&self) -> Option<&NodeReport> {
        self.nodes.first()
    }

    pub fn slowest(&self) -> Option<&NodeReport> {
        self.nodes.last()
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.is_failed())
    }

    /// Format the per-node lines as a human-readable string
    pub fn format(&self) -> String {
        let mut summary = format!(
            "Process '{}' (Runtime {:?}) execution statistics:\n",
            self.name, self.elapsed
        );
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = write!(
                summary,
                " * {}=({}) => Elapsed: {:?} {}",
                node.name, node.id, node.elapsed, node.statistics
            );
            if i == 0 {
                summary.push_str(" (fastest)");
            } else if i == self.nodes.len() - 1 {
                summary.push_str(" (slowest)");
            }
            if let NodeOutcome::Failed(message) = &node.outcome {
                let _ = write!(summary, " FAILED: {message}");
            }
            summary.push('\n');
        }
        summary
    }
}

struct NodeRun {
    elapsed: Duration,
    result: Result<()>,
}

/// Ends a producer's stream when its worker finishes, however it finishes
struct EndOfStream {
    node: String,
    adapter: Option<Arc<dyn AnyAdapter>>,
}

impl Drop for EndOfStream {
    fn drop(&mut self) {
        if let Some(adapter) = &self.adapter {
            if adapter.signal_end() {
                tracing::warn!(
                    "Node {} finished without ending its output stream; ended it on its behalf.",
                    self.node
                );
            }
        }
    }
}

/// A graph of nodes wired by explicit attachment and executed with one
/// thread per node.
pub struct Process {
    settings: ProcessSettings,
    context: Arc<ProcessContext>,
    nodes: Vec<NodeRef<dyn Node>>,
    registered: HashSet<NodeId>,
    edges: HashSet<(NodeId, NodeId)>,
    adapters: HashMap<NodeId, Arc<dyn AnyAdapter>>,
    state: ProcessState,
    report: Option<ProcessReport>,
}

impl Process {
    pub fn new(settings: ProcessSettings) -> Self {
        let context = Arc::new(ProcessContext::new(settings.name()));
        Self {
            settings,
            context,
            nodes: Vec::new(),
            registered: HashSet::new(),
            edges: HashSet::new(),
            adapters: HashMap::new(),
            state: ProcessState::Initializing,
            report: None,
        }
    }

    pub fn name(&self) -> &str {
        self.settings.name()
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Report of the last run, successful or not
    pub fn report(&self) -> Option<&ProcessReport> {
        self.report.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_registered(&self, id: NodeId) -> bool {
        self.registered.contains(&id)
    }

    /// Add a node to the process. Registering a node twice is a no-op.
    pub fn register_node<N: Node>(&mut self, node: &NodeRef<N>) -> Result<()> {
        self.register_erased(node.erased())
    }

    pub fn register_nodes<I>(&mut self, nodes: I) -> Result<()>
    where
        I: IntoIterator<Item = NodeRef<dyn Node>>,
    {
        for node in nodes {
            self.register_erased(node)?;
        }
        Ok(())
    }

    fn register_erased(&mut self, node: NodeRef<dyn Node>) -> Result<()> {
        self.ensure_initializing()?;
        if !self.registered.insert(node.id()) {
            return Ok(());
        }
        self.context.statistics().register_node(node.id());
        tracing::debug!("Registered node {}.", node);
        self.nodes.push(node);
        Ok(())
    }

    /// Bind the output of `producer` to the first free input port of
    /// `consumer`. Attaching the same pair twice is a no-op.
    pub fn attach_input_to_output<P, C>(
        &mut self,
        producer: &NodeRef<P>,
        consumer: &NodeRef<C>,
    ) -> Result<()>
    where
        P: OutputNode,
        C: InputNode<Input = P::Output>,
    {
        self.ensure_initializing()?;

        let edge = (producer.id(), consumer.id());
        if self.edges.contains(&edge) {
            tracing::debug!("Node {} is already attached to output {}.", consumer, producer);
            return Ok(());
        }
        if producer.id() == consumer.id() {
            return Err(PipelineError::ConfigError(format!(
                "node {producer} cannot consume its own output"
            )));
        }

        let port = free_port(&mut *consumer.lock()).ok_or_else(|| PipelineError::AlreadyAttached {
            node: consumer.to_string(),
        })?;

        self.register_node(producer)?;
        self.register_node(consumer)?;

        let adapter = self.adapter_for(producer)?;
        let input = adapter.attach_consumer(consumer.id())?;

        tracing::info!(
            "Attaching {} input port #{} to output port of {}.",
            consumer,
            port,
            producer
        );
        {
            let mut node = consumer.lock();
            let slot = port_mut(&mut *node, port).ok_or_else(|| PipelineError::AlreadyAttached {
                node: consumer.to_string(),
            })?;
            slot.attach(input);
        }

        consumer.add_waiter(adapter.waiter());
        self.edges.insert(edge);
        Ok(())
    }

    fn adapter_for<P: OutputNode>(&mut self, producer: &NodeRef<P>) -> Result<Arc<IoAdapter<P::Output>>> {
        if let Some(existing) = self.adapters.get(&producer.id()) {
            let any: Arc<dyn Any + Send + Sync> = Arc::clone(existing).into_any();
            return any
                .downcast::<IoAdapter<P::Output>>()
                .map_err(|_| PipelineError::TypeMismatch {
                    node: producer.to_string(),
                });
        }

        let adapter = Arc::new(IoAdapter::<P::Output>::new(
            Arc::clone(&self.context),
            producer.id(),
            producer.to_string(),
            producer.is_gated(),
            self.settings.queue_bound(),
        ));
        producer.lock().set_emitter(Emitter::new(Arc::clone(&adapter)));
        self.adapters
            .insert(producer.id(), Arc::clone(&adapter) as Arc<dyn AnyAdapter>);
        Ok(adapter)
    }

    /// Run every registered node on its own thread and wait for all of them.
    ///
    /// The report is produced (and kept, see [`Process::report`]) even when
    /// a node fails; the first failure is returned after it.
    pub fn execute(&mut self) -> Result<ProcessReport> {
        if self.state != ProcessState::Initializing {
            return Err(PipelineError::AlreadyExecuted);
        }
        if self.nodes.is_empty() {
            return Err(PipelineError::NoNodes);
        }

        tracing::info!("=== Executing process '{}' ===", self.name());

        if let Some(initializer) = self.settings.context_initializer() {
            tracing::info!("Running context initializer.");
            initializer(&self.context);
        }

        if !self.settings.pools().is_empty() {
            tracing::info!("Initializing object pools...");
            for registration in self.settings.pools() {
                tracing::info!(" - {:?}", registration);
                registration.initialize(&self.context);
            }
        }

        self.state = ProcessState::Running;
        let process_start = Instant::now();

        let mut handles: Vec<(NodeRef<dyn Node>, JoinHandle<NodeRun>)> = Vec::new();
        let mut spawn_error = None;
        for node in &self.nodes {
            if spawn_error.is_some() {
                // Unblock consumers of nodes that will never run.
                if let Some(adapter) = self.adapters.get(&node.id()) {
                    adapter.signal_end();
                }
                continue;
            }
            match self.spawn_worker(node) {
                Ok(handle) => handles.push((node.clone(), handle)),
                Err(e) => {
                    tracing::error!("Failed to launch node {}: {}", node, e);
                    if let Some(adapter) = self.adapters.get(&node.id()) {
                        adapter.signal_end();
                    }
                    spawn_error = Some(e);
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut failures: Vec<(Duration, String, PipelineError)> = Vec::new();
        for (node, handle) in handles {
            let run = handle.join().unwrap_or_else(|_| NodeRun {
                elapsed: process_start.elapsed(),
                result: Err(PipelineError::ThreadError(format!("worker for node {node} panicked"))),
            });
            let outcome = match run.result {
                Ok(()) => NodeOutcome::Completed,
                Err(e) => {
                    let outcome = NodeOutcome::Failed(e.to_string());
                    failures.push((run.elapsed, node.to_string(), e));
                    outcome
                }
            };
            reports.push(NodeReport {
                id: node.id(),
                name: node.name().to_owned(),
                elapsed: run.elapsed,
                statistics: self.context.statistics().snapshot(node.id()),
                outcome,
            });
        }
        reports.sort_by_key(|r| r.elapsed);

        let report = ProcessReport {
            name: self.name().to_owned(),
            elapsed: process_start.elapsed(),
            nodes: reports,
        };
        log_report(&report);
        self.report = Some(report.clone());

        self.state = ProcessState::Draining;
        tracing::debug!("Disposing of all input/output adapters.");
        for adapter in self.adapters.values() {
            adapter.dispose();
        }
        tracing::debug!("Deallocating all object pools.");
        self.context.pool().deallocate();
        self.adapters.clear();
        self.state = ProcessState::Finished;

        if let Some(e) = spawn_error {
            return Err(e);
        }
        failures.sort_by_key(|(elapsed, _, _)| *elapsed);
        if let Some((_, node, source)) = failures.into_iter().next() {
            return Err(PipelineError::NodeFailed {
                node,
                source: Box::new(source),
            });
        }
        Ok(report)
    }

    fn spawn_worker(&self, node: &NodeRef<dyn Node>) -> Result<JoinHandle<NodeRun>> {
        let node = node.clone();
        let ctx = NodeContext::new(node.id(), node.name().to_owned(), Arc::clone(&self.context));
        let end_of_stream = EndOfStream {
            node: node.to_string(),
            adapter: self.adapters.get(&node.id()).cloned(),
        };

        thread::Builder::new()
            .name(node.name().to_owned())
            .spawn(move || {
                let _end_of_stream = end_of_stream;
                tracing::info!("Beginning execute task for node {}.", node);
                if node.waiter_count() > 0 {
                    tracing::debug!(
                        "Node {} waits on {} gate(s) before starting.",
                        node,
                        node.waiter_count()
                    );
                }

                let start = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| node.execute(&ctx)))
                    .unwrap_or_else(|payload| {
                        Err(PipelineError::ThreadError(format!(
                            "node {node} panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                let elapsed = start.elapsed();

                match &result {
                    Ok(()) => tracing::info!(
                        "Execute task for node {} has completed in {:?}.",
                        node,
                        elapsed
                    ),
                    Err(e) => {
                        ctx.increment_errors();
                        tracing::error!("Node {} failed after {:?}: {}", node, elapsed, e);
                    }
                }
                NodeRun { elapsed, result }
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))
    }

    fn ensure_initializing(&self) -> Result<()> {
        if self.state == ProcessState::Initializing {
            Ok(())
        } else {
            Err(PipelineError::AlreadyExecuted)
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

/// Port 1 if free, otherwise port 2 if the node has one and it is free
fn free_port<C: InputNode>(node: &mut C) -> Option<u8> {
    if !node.input_port().is_attached() {
        return Some(1);
    }
    match node.second_input_port() {
        Some(port) if !port.is_attached() => Some(2),
        _ => None,
    }
}

fn port_mut<C: InputNode>(node: &mut C, port: u8) -> Option<&mut InputPort<C::Input>> {
    match port {
        1 => Some(node.input_port()),
        _ => node.second_input_port(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn log_report(report: &ProcessReport) {
    tracing::info!(
        "=== Process '{}' has completed (Runtime {:?}) ===",
        report.name,
        report.elapsed
    );
    tracing::info!("Execution statistics:");
    for line in report.format().lines().skip(1) {
        tracing::info!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Row;
    use crate::nodes::{CollectNode, SourceNode};

    fn settings() -> ProcessSettings {
        ProcessSettings::builder().name("unit").build().unwrap()
    }

    #[test]
    fn test_register_twice_is_noop() {
        let mut process = Process::new(settings());
        let sink = NodeRef::new(CollectNode::<Row>::new());
        process.register_node(&sink).unwrap();
        process.register_node(&sink).unwrap();
        process.register_nodes([sink.erased()]).unwrap();
        assert_eq!(process.node_count(), 1);
    }

    #[test]
    fn test_execute_without_nodes() {
        let mut process = Process::new(settings());
        assert!(matches!(process.execute(), Err(PipelineError::NoNodes)));
    }

    #[test]
    fn test_self_attachment_rejected() {
        struct Echo {
            input: InputPort<Row>,
        }
        impl Node for Echo {
            fn execute(&mut self, _ctx: &NodeContext) -> Result<()> {
                Ok(())
            }
        }
        impl InputNode for Echo {
            type Input = Row;
            fn input_port(&mut self) -> &mut InputPort<Row> {
                &mut self.input
            }
        }
        impl OutputNode for Echo {
            type Output = Row;
            fn set_emitter(&mut self, _emitter: Emitter<Row>) {}
        }

        let mut process = Process::new(settings());
        let echo = NodeRef::new(Echo {
            input: InputPort::new(),
        });
        assert!(matches!(
            process.attach_input_to_output(&echo, &echo),
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_state_transitions_and_second_execute() {
        let mut process = Process::new(settings());
        let source = NodeRef::new(SourceNode::new("rows", |emitter: &Emitter<Row>, _ctx: &NodeContext| {
            emitter.emit(Row::new().with("k", "v"))
        }));
        let sink = NodeRef::new(CollectNode::<Row>::new());
        process.attach_input_to_output(&source, &sink).unwrap();
        assert_eq!(process.state(), ProcessState::Initializing);

        process.execute().unwrap();
        assert_eq!(process.state(), ProcessState::Finished);
        assert!(matches!(process.execute(), Err(PipelineError::AlreadyExecuted)));
        assert!(matches!(
            process.register_node(&sink),
            Err(PipelineError::AlreadyExecuted)
        ));
    }

    #[test]
    fn test_report_format_flags_fastest_and_slowest() {
        let report = ProcessReport {
            name: "r".into(),
            elapsed: Duration::from_millis(3),
            nodes: vec![
                NodeReport {
                    id: NodeId::new(),
                    name: "a".into(),
                    elapsed: Duration::from_millis(1),
                    statistics: StatisticsSnapshot::default(),
                    outcome: NodeOutcome::Completed,
                },
                NodeReport {
                    id: NodeId::new(),
                    name: "b".into(),
                    elapsed: Duration::from_millis(2),
                    statistics: StatisticsSnapshot::default(),
                    outcome: NodeOutcome::Failed("boom".into()),
                },
            ],
        };
        let text = report.format();
        assert!(text.contains("(fastest)"));
        assert!(text.contains("(slowest) FAILED: boom"));
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.slowest().unwrap().name, "b");
    }
}
