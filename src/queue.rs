use crate::statistics::NodeCounters;
use crossbeam::channel::{self, Receiver, Select, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Determines how much a consumer queue may hold before the producer blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBound {
    /// Never block the producer
    #[default]
    Unbounded,
    /// Block the producer while the queue holds this many items
    Bounded(usize),
}

/// Create one consumer queue. Items pulled through the returned [`Input`] are
/// counted as reads on `consumer`.
pub(crate) fn queue<T: Send>(
    bound: QueueBound,
    consumer: Arc<NodeCounters>,
) -> (QueueSender<T>, Input<T>) {
    let (sender, receiver) = match bound {
        QueueBound::Unbounded => channel::unbounded(),
        QueueBound::Bounded(capacity) => channel::bounded(capacity),
    };
    (
        QueueSender {
            sender,
            block_count: Arc::new(AtomicU64::new(0)),
        },
        Input {
            receiver,
            counters: consumer,
        },
    )
}

/// Producer side of a consumer queue
#[derive(Debug)]
pub(crate) struct QueueSender<T> {
    sender: Sender<T>,
    block_count: Arc<AtomicU64>,
}

impl<T> QueueSender<T> {
    /// Append an item, blocking while a bounded queue is full. `on_full` runs
    /// before the producer blocks. Hands the item back if the consumer has
    /// dropped its input.
    pub(crate) fn push(&self, item: T, on_full: impl FnOnce()) -> Result<(), T> {
        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.block_count.fetch_add(1, Ordering::Relaxed);
                on_full();
                self.sender.send(item).map_err(|e| e.into_inner())
            }
            Err(TrySendError::Disconnected(item)) => Err(item),
        }
    }

    /// Number of items waiting to be consumed
    pub(crate) fn len(&self) -> usize {
        self.sender.len()
    }

    /// Number of times a push found the queue full
    pub(crate) fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }
}

/// The sequence of items a consumer reads from one input port.
///
/// Iteration blocks while the queue is empty and the producer is still
/// running, and ends once the producer has signalled the end of its stream and
/// every queued item has been read.
#[derive(Debug)]
pub struct Input<T> {
    receiver: Receiver<T>,
    counters: Arc<NodeCounters>,
}

impl<T> Input<T> {
    /// Take the next item without blocking
    pub fn try_next(&mut self) -> Option<T> {
        let item = self.receiver.try_recv().ok()?;
        self.counters.record_read();
        Some(item)
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no item is currently queued
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Block until this input yields an item or ends, moving whatever arrives
    /// on `other` in the meantime into `held`.
    ///
    /// Keeps `other`'s producer from stalling on a bounded queue while this
    /// input is read to the end.
    pub fn next_or_hold(&mut self, other: &mut Input<T>, held: &mut VecDeque<T>) -> Option<T> {
        loop {
            let ready = {
                let mut select = Select::new();
                let own = select.recv(&self.receiver);
                select.recv(&other.receiver);
                let op = select.select();
                if op.index() == own {
                    Ready::Own(op.recv(&self.receiver).ok())
                } else {
                    Ready::Other(op.recv(&other.receiver).ok())
                }
            };

            match ready {
                Ready::Own(item) => {
                    let item = item?;
                    self.counters.record_read();
                    return Some(item);
                }
                Ready::Other(Some(item)) => {
                    other.counters.record_read();
                    held.push_back(item);
                }
                // Other side has ended; only this input is left to wait on.
                Ready::Other(None) => return self.next(),
            }
        }
    }
}

enum Ready<T> {
    Own(Option<T>),
    Other(Option<T>),
}

impl<T> Iterator for Input<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.receiver.recv().ok()?;
        self.counters.record_read();
        Some(item)
    }
}
