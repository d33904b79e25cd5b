//! Generic nodes for assembling pipelines out of closures.

use crate::adapter::Emitter;
use crate::error::Result;
use crate::item::Item;
use crate::node::{InputNode, InputPort, Node, NodeContext, OutputNode, OutputPort};
use crate::queue::Input;
use std::collections::VecDeque;

/// A node that produces items by calling a closure once, then ends its stream
pub struct SourceNode<T: Item, F> {
    name: String,
    produce: F,
    gated: bool,
    output: OutputPort<T>,
}

impl<T, F> SourceNode<T, F>
where
    T: Item,
    F: FnMut(&Emitter<T>, &NodeContext) -> Result<()> + Send + 'static,
{
    /// Create a new source node
    pub fn new(name: impl Into<String>, produce: F) -> Self {
        Self {
            name: name.into(),
            produce,
            gated: false,
            output: OutputPort::new(),
        }
    }

    /// Hold consumers back until the closure calls
    /// [`Emitter::release_consumers`] or the stream ends
    pub fn gated(mut self, gated: bool) -> Self {
        self.gated = gated;
        self
    }
}

impl<T, F> Node for SourceNode<T, F>
where
    T: Item,
    F: FnMut(&Emitter<T>, &NodeContext) -> Result<()> + Send + 'static,
{
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let emitter = self.output.get(ctx)?;
        let result = (self.produce)(emitter, ctx);
        emitter.signal_end();
        result
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_gated(&self) -> bool {
        self.gated
    }
}

impl<T, F> OutputNode for SourceNode<T, F>
where
    T: Item,
    F: FnMut(&Emitter<T>, &NodeContext) -> Result<()> + Send + 'static,
{
    type Output = T;

    fn set_emitter(&mut self, emitter: Emitter<T>) {
        self.output.set(emitter);
    }
}

/// A node that maps every input item to one output item
pub struct TransformNode<I: Item, O: Item, F> {
    name: String,
    transform: F,
    input: InputPort<I>,
    output: OutputPort<O>,
}

impl<I, O, F> TransformNode<I, O, F>
where
    I: Item,
    O: Item,
    F: FnMut(I, &NodeContext) -> Result<O> + Send + 'static,
{
    /// Create a new transform node. State the transform needs across items
    /// lives in the closure.
    pub fn new(name: impl Into<String>, transform: F) -> Self {
        Self {
            name: name.into(),
            transform,
            input: InputPort::new(),
            output: OutputPort::new(),
        }
    }
}

impl<I, O, F> Node for TransformNode<I, O, F>
where
    I: Item,
    O: Item,
    F: FnMut(I, &NodeContext) -> Result<O> + Send + 'static,
{
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let input = self.input.take(ctx)?;
        let emitter = self.output.get(ctx)?;
        let result = input
            .map(|item| (self.transform)(item, ctx).and_then(|out| emitter.emit(out)))
            .collect::<Result<()>>();
        emitter.signal_end();
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<I, O, F> InputNode for TransformNode<I, O, F>
where
    I: Item,
    O: Item,
    F: FnMut(I, &NodeContext) -> Result<O> + Send + 'static,
{
    type Input = I;

    fn input_port(&mut self) -> &mut InputPort<I> {
        &mut self.input
    }
}

impl<I, O, F> OutputNode for TransformNode<I, O, F>
where
    I: Item,
    O: Item,
    F: FnMut(I, &NodeContext) -> Result<O> + Send + 'static,
{
    type Output = O;

    fn set_emitter(&mut self, emitter: Emitter<O>) {
        self.output.set(emitter);
    }
}

/// A filtering node that passes through items matching a predicate
pub struct FilterNode<T: Item, F> {
    name: String,
    predicate: F,
    input: InputPort<T>,
    output: OutputPort<T>,
}

impl<T, F> FilterNode<T, F>
where
    T: Item,
    F: FnMut(&T) -> bool + Send + 'static,
{
    /// Create a new filter node
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            input: InputPort::new(),
            output: OutputPort::new(),
        }
    }
}

impl<T, F> Node for FilterNode<T, F>
where
    T: Item,
    F: FnMut(&T) -> bool + Send + 'static,
{
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let input = self.input.take(ctx)?;
        let emitter = self.output.get(ctx)?;
        let result = input
            .filter(|item| (self.predicate)(item))
            .map(|item| emitter.emit(item))
            .collect::<Result<()>>();
        emitter.signal_end();
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, F> InputNode for FilterNode<T, F>
where
    T: Item,
    F: FnMut(&T) -> bool + Send + 'static,
{
    type Input = T;

    fn input_port(&mut self) -> &mut InputPort<T> {
        &mut self.input
    }
}

impl<T, F> OutputNode for FilterNode<T, F>
where
    T: Item,
    F: FnMut(&T) -> bool + Send + 'static,
{
    type Output = T;

    fn set_emitter(&mut self, emitter: Emitter<T>) {
        self.output.set(emitter);
    }
}

/// A sink that folds every received item into an accumulator
pub struct FoldNode<T: Item, A, F> {
    name: String,
    state: A,
    fold: F,
    input: InputPort<T>,
}

impl<T, A, F> FoldNode<T, A, F>
where
    T: Item,
    A: Send + 'static,
    F: FnMut(&mut A, T) -> Result<()> + Send + 'static,
{
    pub fn new(name: impl Into<String>, initial: A, fold: F) -> Self {
        Self {
            name: name.into(),
            state: initial,
            fold,
            input: InputPort::new(),
        }
    }

    /// The accumulator after the items read so far
    pub fn state(&self) -> &A {
        &self.state
    }
}

impl<T, A, F> Node for FoldNode<T, A, F>
where
    T: Item,
    A: Send + 'static,
    F: FnMut(&mut A, T) -> Result<()> + Send + 'static,
{
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        for item in self.input.take(ctx)? {
            (self.fold)(&mut self.state, item)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, A, F> InputNode for FoldNode<T, A, F>
where
    T: Item,
    A: Send + 'static,
    F: FnMut(&mut A, T) -> Result<()> + Send + 'static,
{
    type Input = T;

    fn input_port(&mut self) -> &mut InputPort<T> {
        &mut self.input
    }
}

/// A sink that keeps every item it receives
pub struct CollectNode<T: Item> {
    name: String,
    items: Vec<T>,
    input: InputPort<T>,
}

impl<T: Item> CollectNode<T> {
    pub fn new() -> Self {
        Self::named("collect")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            input: InputPort::new(),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }
}

impl<T: Item> Default for CollectNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Node for CollectNode<T> {
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        self.items.extend(self.input.take(ctx)?);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Item> InputNode for CollectNode<T> {
    type Input = T;

    fn input_port(&mut self) -> &mut InputPort<T> {
        &mut self.input
    }
}

/// Forwards everything from its first input, then everything from its second
pub struct ConcatNode<T: Item> {
    name: String,
    first: InputPort<T>,
    second: InputPort<T>,
    output: OutputPort<T>,
}

impl<T: Item> ConcatNode<T> {
    pub fn new() -> Self {
        Self {
            name: "concat".to_owned(),
            first: InputPort::new(),
            second: InputPort::new(),
            output: OutputPort::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Default for ConcatNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Node for ConcatNode<T> {
    fn execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let emitter = self.output.get(ctx)?;
        let result = take_attached(&mut self.first, ctx).and_then(|first| {
            let second = take_attached(&mut self.second, ctx)?;
            concat(first, second, emitter)
        });
        emitter.signal_end();
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An unattached port simply contributes nothing
fn take_attached<T: Item>(port: &mut InputPort<T>, ctx: &NodeContext) -> Result<Option<Input<T>>> {
    if port.is_attached() {
        port.take(ctx).map(Some)
    } else {
        Ok(None)
    }
}

fn concat<T: Item>(first: Option<Input<T>>, second: Option<Input<T>>, emitter: &Emitter<T>) -> Result<()> {
    match (first, second) {
        (Some(mut first), Some(mut second)) => {
            // Port 2 keeps draining into `held` so its producer never stalls on
            // a bounded queue while port 1 is read.
            let mut held = VecDeque::new();
            while let Some(item) = first.next_or_hold(&mut second, &mut held) {
                emitter.emit(item)?;
            }
            held.into_iter().chain(second).try_for_each(|item| emitter.emit(item))
        }
        (Some(mut input), None) | (None, Some(mut input)) => {
            input.try_for_each(|item| emitter.emit(item))
        }
        (None, None) => Ok(()),
    }
}

impl<T: Item> InputNode for ConcatNode<T> {
    type Input = T;

    fn input_port(&mut self) -> &mut InputPort<T> {
        &mut self.first
    }

    fn second_input_port(&mut self) -> Option<&mut InputPort<T>> {
        Some(&mut self.second)
    }
}

impl<T: Item> OutputNode for ConcatNode<T> {
    type Output = T;

    fn set_emitter(&mut self, emitter: Emitter<T>) {
        self.output.set(emitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Row;
    use crate::process::Process;
    use crate::settings::ProcessSettings;
    use crate::NodeRef;

    fn rows(n: usize) -> impl FnMut(&Emitter<Row>, &NodeContext) -> Result<()> + Send + 'static {
        move |emitter: &Emitter<Row>, _ctx: &NodeContext| {
            for i in 0..n {
                emitter.emit(Row::new().with("n", i.to_string()))?;
            }
            Ok(())
        }
    }

    fn number(row: &Row) -> usize {
        row.get("n").and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    #[test]
    fn test_filter_node() {
        let mut process = Process::new(ProcessSettings::default());
        let source = NodeRef::new(SourceNode::new("source", rows(10)));
        let evens = NodeRef::new(FilterNode::new("evens", |row: &Row| number(row) % 2 == 0));
        let sink = NodeRef::new(CollectNode::<Row>::new());

        process.attach_input_to_output(&source, &evens).unwrap();
        process.attach_input_to_output(&evens, &sink).unwrap();
        process.execute().unwrap();

        let values: Vec<_> = sink.lock().items().iter().map(number).collect();
        assert_eq!(values, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_transform_node() {
        let mut process = Process::new(ProcessSettings::default());
        let source = NodeRef::new(SourceNode::new("source", rows(3)));
        let mut seen = 0;
        let tag = NodeRef::new(TransformNode::new("tag", move |row: Row, _ctx: &NodeContext| {
            seen += 1;
            Ok(Row::new()
                .with("n", row.get("n").unwrap_or_default())
                .with("seen", seen.to_string()))
        }));
        let sink = NodeRef::new(CollectNode::<Row>::new());

        process.attach_input_to_output(&source, &tag).unwrap();
        process.attach_input_to_output(&tag, &sink).unwrap();
        process.execute().unwrap();

        let sink = sink.lock();
        assert_eq!(sink.items().len(), 3);
        assert_eq!(sink.items()[2].get("seen"), Some("3"));
        assert!(sink.items().iter().all(|row| row.is_frozen()));
    }

    #[test]
    fn test_concat_node_reads_both_ports() {
        let mut process = Process::new(ProcessSettings::default());
        let left = NodeRef::new(SourceNode::new("left", rows(2)));
        let right = NodeRef::new(SourceNode::new("right", rows(3)));
        let concat = NodeRef::new(ConcatNode::<Row>::new());
        let sink = NodeRef::new(CollectNode::<Row>::new());

        process.attach_input_to_output(&left, &concat).unwrap();
        process.attach_input_to_output(&right, &concat).unwrap();
        process.attach_input_to_output(&concat, &sink).unwrap();
        process.execute().unwrap();

        let values: Vec<_> = sink.lock().items().iter().map(number).collect();
        assert_eq!(values, vec![0, 1, 0, 1, 2]);
    }

    #[test]
    fn test_fold_node_state() {
        let mut process = Process::new(ProcessSettings::default());
        let source = NodeRef::new(SourceNode::new("source", rows(5)));
        let count = NodeRef::new(FoldNode::new("count", 0usize, |count: &mut usize, _row: Row| {
            *count += 1;
            Ok(())
        }));

        process.attach_input_to_output(&source, &count).unwrap();
        process.execute().unwrap();
        assert_eq!(*count.lock().state(), 5);
    }
}
