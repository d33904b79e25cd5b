//! The channel between one producing node and every node consuming its output.

use crate::context::ProcessContext;
use crate::error::{PipelineError, Result};
use crate::gate::{self, NodeWaiter, WaitSignaller};
use crate::item::Item;
use crate::node::NodeId;
use crate::queue::{self, Input, QueueBound, QueueSender};
use crate::statistics::NodeCounters;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Emission count between progress log lines
const PROGRESS_INTERVAL: u64 = 5000;

/// Fan-out channel from one producer to its consumers.
///
/// Each consumer gets its own queue. On [`IoAdapter::emit`] the first
/// consumer in attach order receives the original item and every later
/// consumer receives a copy borrowed from the object pool, so no consumer can
/// observe state owned by another.
pub struct IoAdapter<T> {
    producer: NodeId,
    producer_label: String,
    context: Arc<ProcessContext>,
    producer_counters: Arc<NodeCounters>,
    bound: QueueBound,
    queues: RwLock<Vec<(NodeId, QueueSender<T>)>>,
    ended: AtomicBool,
    emitted: AtomicU64,
    signaller: Option<WaitSignaller>,
    waiter: NodeWaiter,
}

impl<T: Item> IoAdapter<T> {
    /// Bind a new adapter to `producer`. A gated producer gets a fresh gate
    /// whose waiter is handed to every consumer.
    pub fn new(
        context: Arc<ProcessContext>,
        producer: NodeId,
        producer_label: impl Into<String>,
        gated: bool,
        bound: QueueBound,
    ) -> Self {
        let (signaller, waiter) = if gated {
            let (signaller, waiter) = gate::pair();
            (Some(signaller), waiter)
        } else {
            (None, NodeWaiter::NoWait)
        };
        let producer_counters = context.statistics().counters(producer);

        Self {
            producer,
            producer_label: producer_label.into(),
            context,
            producer_counters,
            bound,
            queues: RwLock::new(Vec::new()),
            ended: AtomicBool::new(false),
            emitted: AtomicU64::new(0),
            signaller,
            waiter,
        }
    }

    /// Allocate a queue for `consumer` and return its input sequence
    pub fn attach_consumer(&self, consumer: NodeId) -> Result<Input<T>> {
        if self.is_ended() {
            return Err(PipelineError::StreamEnded {
                node: self.producer_label.clone(),
            });
        }

        let mut queues = self.queues.write();
        if queues.iter().any(|(id, _)| *id == consumer) {
            return Err(PipelineError::AlreadyAttached {
                node: consumer.to_string(),
            });
        }

        let counters = self.context.statistics().counters(consumer);
        let (sender, input) = queue::queue(self.bound, counters);
        queues.push((consumer, sender));
        Ok(input)
    }

    /// Freeze `item` and deliver it to every consumer
    pub fn emit(&self, mut item: T) -> Result<()> {
        item.freeze();

        let queues = self.queues.read();
        if self.is_ended() {
            return Err(PipelineError::StreamEnded {
                node: self.producer_label.clone(),
            });
        }

        let Some(((first, first_queue), rest)) = queues.split_first() else {
            self.count_emission();
            return Ok(());
        };

        // Copies are taken before the original moves into the first queue.
        let mut copies = Vec::with_capacity(rest.len());
        for _ in rest {
            let mut duplicate = match self.context.pool().borrow::<T>() {
                Ok(duplicate) => duplicate,
                Err(e) => {
                    for copy in copies {
                        self.context.pool().release(copy);
                    }
                    return Err(e);
                }
            };
            item.copy_to(&mut duplicate);
            copies.push(duplicate);
        }

        self.count_emission();
        self.deliver(*first, first_queue, item);
        for ((consumer, queue), duplicate) in rest.iter().zip(copies) {
            self.deliver(*consumer, queue, duplicate);
        }
        Ok(())
    }

    fn count_emission(&self) {
        let count = self.emitted.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 {
            tracing::debug!("Node {} emitting its first item.", self.producer_label);
        }
        self.producer_counters.record_write();

        if count % PROGRESS_INTERVAL == 0 {
            tracing::debug!("Node {} has emitted {} items.", self.producer_label, count);
        }
    }

    /// Mark every consumer queue complete and open the gate. Returns `false`
    /// if the stream had already ended.
    pub fn signal_end(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }

        let senders: Vec<_> = self.queues.write().drain(..).collect();
        let blocked: u64 = senders.iter().map(|(_, queue)| queue.block_count()).sum();
        let pending: usize = senders.iter().map(|(_, queue)| queue.len()).sum();
        tracing::debug!(
            "Node {} has signalled the end of its data stream (emitted {} total items, blocked {} times, {} still queued).",
            self.producer_label,
            self.emitted(),
            blocked,
            pending
        );
        drop(senders);

        self.release_consumers();
        true
    }

    /// Let consumers of a gated producer start
    pub fn release_consumers(&self) {
        if let Some(signaller) = &self.signaller {
            signaller.signal_wait_end();
        }
    }

    /// The gate consumers of this producer wait on
    pub fn waiter(&self) -> NodeWaiter {
        self.waiter.clone()
    }

    /// Identity of the producing node
    pub fn producer(&self) -> NodeId {
        self.producer
    }

    /// Items accepted for delivery so far
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Whether the stream has ended
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Number of consumers with an open queue
    pub fn consumer_count(&self) -> usize {
        self.queues.read().len()
    }

    /// Release all queue resources. Only valid once every consumer has
    /// finished reading.
    pub fn dispose(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.queues.write().clear();
        self.release_consumers();
    }

    /// A gated producer opens its gate before blocking on a full queue.
    fn deliver(&self, consumer: NodeId, queue: &QueueSender<T>, item: T) {
        let on_full = || {
            if self.signaller.as_ref().is_some_and(|s| !s.is_released()) {
                tracing::debug!(
                    "Queue from node {} to {} is full; releasing held consumers.",
                    self.producer_label,
                    consumer
                );
                self.release_consumers();
            }
        };
        if queue.push(item, on_full).is_err() {
            tracing::trace!(
                "Consumer {} of node {} is gone, dropping item.",
                consumer,
                self.producer_label
            );
        }
    }
}

impl<T> fmt::Debug for IoAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoAdapter")
            .field("producer", &self.producer_label)
            .field("bound", &self.bound)
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .field("emitted", &self.emitted.load(Ordering::Relaxed))
            .finish()
    }
}

/// Type-erased adapter operations used by the process
pub(crate) trait AnyAdapter: Send + Sync {
    fn signal_end(&self) -> bool;
    fn dispose(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Item> AnyAdapter for IoAdapter<T> {
    fn signal_end(&self) -> bool {
        IoAdapter::signal_end(self)
    }

    fn dispose(&self) {
        IoAdapter::dispose(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Producer-side handle to an adapter
pub struct Emitter<T> {
    adapter: Arc<IoAdapter<T>>,
}

impl<T: Item> Emitter<T> {
    pub(crate) fn new(adapter: Arc<IoAdapter<T>>) -> Self {
        Self { adapter }
    }

    /// Send an item to every consumer
    pub fn emit(&self, item: T) -> Result<()> {
        self.adapter.emit(item)
    }

    /// End the output stream. Must be called once the producer is done, even
    /// if it emitted nothing.
    pub fn signal_end(&self) {
        self.adapter.signal_end();
    }

    /// Open the gate of a gated producer before its stream ends
    pub fn release_consumers(&self) {
        self.adapter.release_consumers();
    }

    /// Items emitted so far
    pub fn emitted(&self) -> u64 {
        self.adapter.emitted()
    }

    /// Number of consumers still receiving items
    pub fn consumer_count(&self) -> usize {
        self.adapter.consumer_count()
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Emitter").field(&self.adapter).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Default, Clone)]
    struct Tagged {
        value: u32,
        frozen: bool,
        copy: bool,
    }

    impl Item for Tagged {
        fn freeze(&mut self) {
            self.frozen = true;
        }

        fn is_frozen(&self) -> bool {
            self.frozen
        }

        fn copy_to(&self, target: &mut Self) {
            target.value = self.value;
            target.frozen = self.frozen;
            target.copy = true;
        }
    }

    fn tagged(value: u32) -> Tagged {
        Tagged {
            value,
            ..Tagged::default()
        }
    }

    fn setup(consumers: usize, gated: bool) -> (Arc<ProcessContext>, IoAdapter<Tagged>, Vec<Input<Tagged>>) {
        let context = Arc::new(ProcessContext::new("adapter-test"));
        let producer = NodeId::new();
        context.statistics().register_node(producer);
        let adapter = IoAdapter::new(
            Arc::clone(&context),
            producer,
            "producer",
            gated,
            QueueBound::Unbounded,
        );
        let inputs = (0..consumers)
            .map(|_| {
                let consumer = NodeId::new();
                context.statistics().register_node(consumer);
                adapter.attach_consumer(consumer).unwrap()
            })
            .collect();
        (context, adapter, inputs)
    }

    #[test]
    fn test_single_consumer_gets_originals_in_order() {
        let (context, adapter, mut inputs) = setup(1, false);
        for i in 0..3 {
            adapter.emit(tagged(i)).unwrap();
        }
        adapter.signal_end();

        let items: Vec<_> = inputs.remove(0).collect();
        assert_eq!(items.iter().map(|t| t.value).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(items.iter().all(|t| t.frozen && !t.copy));
        assert!(!context.pool().is_registered::<Tagged>());
    }

    #[test]
    fn test_fan_out_original_then_copies() {
        let (context, adapter, inputs) = setup(3, false);
        for i in 0..4 {
            adapter.emit(tagged(i)).unwrap();
        }
        adapter.signal_end();

        let received: Vec<Vec<Tagged>> = inputs.into_iter().map(|i| i.collect()).collect();
        for items in &received {
            assert_eq!(items.iter().map(|t| t.value).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        }
        assert!(received[0].iter().all(|t| !t.copy));
        assert!(received[1].iter().all(|t| t.copy && t.frozen));
        assert!(received[2].iter().all(|t| t.copy));

        let stats = context.pool().stats::<Tagged>().unwrap();
        assert_eq!(stats.borrowed, 8);
    }

    #[test]
    fn test_emit_counts_writes() {
        let (context, adapter, _inputs) = setup(2, false);
        adapter.emit(tagged(1)).unwrap();
        adapter.emit(tagged(2)).unwrap();
        assert_eq!(adapter.emitted(), 2);
        assert_eq!(context.statistics().snapshot(adapter.producer()).writes, 2);
    }

    #[test]
    fn test_emit_after_end_fails() {
        let (_context, adapter, _inputs) = setup(1, false);
        assert!(adapter.signal_end());
        assert!(!adapter.signal_end());
        assert!(matches!(
            adapter.emit(tagged(1)),
            Err(PipelineError::StreamEnded { .. })
        ));
        assert!(matches!(
            adapter.attach_consumer(NodeId::new()),
            Err(PipelineError::StreamEnded { .. })
        ));
    }

    #[test]
    fn test_duplicate_consumer_rejected() {
        let context = Arc::new(ProcessContext::new("adapter-test"));
        let producer = NodeId::new();
        let consumer = NodeId::new();
        context.statistics().register_node(producer);
        context.statistics().register_node(consumer);
        let adapter: IoAdapter<Tagged> =
            IoAdapter::new(context, producer, "producer", false, QueueBound::Unbounded);

        adapter.attach_consumer(consumer).unwrap();
        assert!(matches!(
            adapter.attach_consumer(consumer),
            Err(PipelineError::AlreadyAttached { .. })
        ));
        assert_eq!(adapter.consumer_count(), 1);
    }

    #[test]
    fn test_consumer_sees_all_items_before_end() {
        let (_context, adapter, mut inputs) = setup(1, false);
        let adapter = Arc::new(adapter);
        let input = inputs.remove(0);

        let producer = {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || {
                for i in 0..100 {
                    adapter.emit(tagged(i)).unwrap();
                }
                adapter.signal_end();
            })
        };

        let values: Vec<u32> = input.map(|t| t.value).collect();
        producer.join().unwrap();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_gated_adapter_releases_on_end() {
        let (_context, adapter, _inputs) = setup(1, true);
        let waiter = adapter.waiter();
        assert!(waiter.is_blocking());
        assert!(!waiter.wait_timeout(Duration::from_millis(10)));

        adapter.signal_end();
        assert!(waiter.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_ungated_adapter_never_blocks() {
        let (_context, adapter, _inputs) = setup(1, false);
        assert!(!adapter.waiter().is_blocking());
    }

    #[test]
    fn test_pool_exhaustion_fails_emit() {
        let (context, adapter, _inputs) = setup(2, false);
        context.pool().register_and_initialize::<Tagged>(1, false);

        adapter.emit(tagged(1)).unwrap();
        assert!(matches!(
            adapter.emit(tagged(2)),
            Err(PipelineError::PoolExhausted { .. })
        ));

        // The rejected emission is not counted.
        assert_eq!(adapter.emitted(), 1);
        assert_eq!(context.statistics().snapshot(adapter.producer()).writes, 1);
        let stats = context.pool().stats::<Tagged>().unwrap();
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_rejected_copy_goes_back_to_pool() {
        let (context, adapter, _inputs) = setup(3, false);
        context.pool().register_and_initialize::<Tagged>(1, false);

        assert!(adapter.emit(tagged(1)).is_err());
        assert_eq!(adapter.emitted(), 0);
        assert_eq!(context.pool().stats::<Tagged>().unwrap().available, 1);
    }

    #[test]
    fn test_gated_adapter_opens_before_blocking_on_full_queue() {
        let context = Arc::new(ProcessContext::new("adapter-test"));
        let producer = NodeId::new();
        let consumer = NodeId::new();
        context.statistics().register_node(producer);
        context.statistics().register_node(consumer);
        let adapter = Arc::new(IoAdapter::<Tagged>::new(
            context,
            producer,
            "producer",
            true,
            QueueBound::Bounded(2),
        ));
        let input = adapter.attach_consumer(consumer).unwrap();
        let waiter = adapter.waiter();

        let emitting = {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || {
                for i in 0..5 {
                    adapter.emit(tagged(i)).unwrap();
                }
                adapter.release_consumers();
                adapter.signal_end();
            })
        };

        // The consumer only starts reading once the gate is open.
        assert!(waiter.wait_timeout(Duration::from_secs(5)));
        let values: Vec<u32> = input.map(|t| t.value).collect();
        emitting.join().unwrap();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
}
