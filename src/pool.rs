//! Type-keyed pools of reusable items.

use crate::error::{PipelineError, Result};
use crate::item::Item;
use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for a single typed pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances created over the pool's lifetime
    pub allocated: u64,
    /// Instances currently waiting in the pool
    pub available: usize,
    /// Successful borrows
    pub borrowed: u64,
    /// Whether an empty pool creates new instances on borrow
    pub auto_grow: bool,
}

struct TypedPool<T> {
    items: SegQueue<T>,
    auto_grow: bool,
    allocated: AtomicU64,
    borrowed: AtomicU64,
}

impl<T: Item> TypedPool<T> {
    fn new(initial_size: usize, auto_grow: bool) -> Self {
        let items = SegQueue::new();
        for _ in 0..initial_size {
            items.push(T::default());
        }
        Self {
            items,
            auto_grow,
            allocated: AtomicU64::new(initial_size as u64),
            borrowed: AtomicU64::new(0),
        }
    }

    fn borrow(&self) -> Result<T> {
        let item = match self.items.pop() {
            Some(item) => item,
            None if self.auto_grow => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
            None => {
                return Err(PipelineError::PoolExhausted {
                    type_name: type_name::<T>(),
                })
            }
        };
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            available: self.items.len(),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            auto_grow: self.auto_grow,
        }
    }
}

/// A process-wide reservoir of item instances, one pool per item type.
///
/// Used by the adapters to produce fan-out copies without allocating on every
/// emission. Borrowing from several worker threads at once is lock-free; the
/// registry lock is only taken for writing when a pool is created.
#[derive(Default)]
pub struct ObjectPool {
    pools: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ObjectPool {
    /// Create a pool registry with no pools
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pool for `T` holding `initial_size` pre-allocated instances.
    /// Replaces any existing pool for `T`.
    pub fn register_and_initialize<T: Item>(&self, initial_size: usize, auto_grow: bool) {
        let pool: Arc<dyn Any + Send + Sync> = Arc::new(TypedPool::<T>::new(initial_size, auto_grow));
        self.pools.write().insert(TypeId::of::<T>(), pool);
    }

    /// Take an instance of `T` out of the pool.
    ///
    /// An unregistered type gets an empty auto-growing pool on first use.
    pub fn borrow<T: Item>(&self) -> Result<T> {
        self.typed::<T>().borrow()
    }

    /// Hand an instance back so a later borrow can reuse it. The instance is
    /// reset with [`Item::reset`] first.
    pub fn release<T: Item>(&self, mut item: T) {
        item.reset();
        self.typed::<T>().items.push(item);
    }

    /// Whether a pool exists for `T`
    pub fn is_registered<T: Item>(&self) -> bool {
        self.pools.read().contains_key(&TypeId::of::<T>())
    }

    /// Counters of the pool for `T`, if one exists
    pub fn stats<T: Item>(&self) -> Option<PoolStats> {
        self.lookup::<T>().map(|pool| pool.stats())
    }

    /// Drop every pooled instance and every pool
    pub fn deallocate(&self) {
        self.pools.write().clear();
    }

    fn typed<T: Item>(&self) -> Arc<TypedPool<T>> {
        if let Some(pool) = self.lookup::<T>() {
            return pool;
        }
        let mut pools = self.pools.write();
        let entry = pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(TypedPool::<T>::new(0, true)) as Arc<dyn Any + Send + Sync>)
            .clone();
        drop(pools);
        match entry.downcast::<TypedPool<T>>() {
            Ok(pool) => pool,
            // Entries are keyed by TypeId so the downcast cannot miss.
            Err(_) => unreachable!("object pool entry stored under the wrong TypeId"),
        }
    }

    fn lookup<T: Item>(&self) -> Option<Arc<TypedPool<T>>> {
        let pool = self.pools.read().get(&TypeId::of::<T>())?.clone();
        pool.downcast::<TypedPool<T>>().ok()
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("types", &self.pools.read().len())
            .finish()
    }
}
