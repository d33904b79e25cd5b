use crate::context::ProcessContext;
use crate::error::{PipelineError, Result};
use crate::item::Item;
use crate::queue::QueueBound;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;

type ContextInitializer = Arc<dyn Fn(&ProcessContext) + Send + Sync>;

/// An object pool to create when the process starts
#[derive(Clone)]
pub struct PoolRegistration {
    type_name: &'static str,
    initial_size: usize,
    auto_grow: bool,
    initialize: fn(&ProcessContext, usize, bool),
}

impl PoolRegistration {
    pub fn of<T: Item>(initial_size: usize, auto_grow: bool) -> Self {
        Self {
            type_name: type_name::<T>(),
            initial_size,
            auto_grow,
            initialize: |context, initial_size, auto_grow| {
                context
                    .pool()
                    .register_and_initialize::<T>(initial_size, auto_grow)
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn auto_grow(&self) -> bool {
        self.auto_grow
    }

    pub(crate) fn initialize(&self, context: &ProcessContext) {
        (self.initialize)(context, self.initial_size, self.auto_grow);
    }
}

impl fmt::Debug for PoolRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectPool<{}> (InitialSize={}, AutoGrow={})",
            self.type_name, self.initial_size, self.auto_grow
        )
    }
}

/// Immutable configuration of a process
#[derive(Clone)]
pub struct ProcessSettings {
    name: String,
    pools: Vec<PoolRegistration>,
    context_initializer: Option<ContextInitializer>,
    queue_bound: QueueBound,
}

impl ProcessSettings {
    pub fn builder() -> ProcessSettingsBuilder {
        ProcessSettingsBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pools(&self) -> &[PoolRegistration] {
        &self.pools
    }

    pub fn queue_bound(&self) -> QueueBound {
        self.queue_bound
    }

    pub(crate) fn context_initializer(&self) -> Option<&ContextInitializer> {
        self.context_initializer.as_ref()
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            name: "process".to_owned(),
            pools: Vec::new(),
            context_initializer: None,
            queue_bound: QueueBound::Unbounded,
        }
    }
}

impl fmt::Debug for ProcessSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSettings")
            .field("name", &self.name)
            .field("pools", &self.pools)
            .field("context_initializer", &self.context_initializer.is_some())
            .field("queue_bound", &self.queue_bound)
            .finish()
    }
}

/// Builder for constructing process settings
pub struct ProcessSettingsBuilder {
    settings: ProcessSettings,
}

impl ProcessSettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        Self {
            settings: ProcessSettings::default(),
        }
    }

    /// Name used when reporting on the process
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    /// Pre-allocate a pool of `T` when the process starts
    pub fn pool<T: Item>(mut self, initial_size: usize, auto_grow: bool) -> Self {
        self.settings
            .pools
            .push(PoolRegistration::of::<T>(initial_size, auto_grow));
        self
    }

    /// Run `initializer` once before any node executes
    pub fn context_initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&ProcessContext) + Send + Sync + 'static,
    {
        self.settings.context_initializer = Some(Arc::new(initializer));
        self
    }

    /// Bound every consumer queue. Producers block while a queue is full.
    pub fn queue_bound(mut self, bound: QueueBound) -> Self {
        self.settings.queue_bound = bound;
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<ProcessSettings> {
        if self.settings.name.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "process name must not be empty".into(),
            ));
        }
        if self.settings.queue_bound == QueueBound::Bounded(0) {
            return Err(PipelineError::ConfigError(
                "queue bound must be at least 1".into(),
            ));
        }
        Ok(self.settings)
    }
}

impl Default for ProcessSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
