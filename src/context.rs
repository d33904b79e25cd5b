use crate::pool::ObjectPool;
use crate::statistics::NodeStatistics;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Services shared by every node of a process.
///
/// Mostly read during a run. Named configuration values are meant to be
/// written by the context initializer before any node starts.
#[derive(Debug)]
pub struct ProcessContext {
    name: String,
    pool: ObjectPool,
    statistics: NodeStatistics,
    config: RwLock<HashMap<String, String>>,
}

impl ProcessContext {
    /// Create an empty context for the process called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: ObjectPool::new(),
            statistics: NodeStatistics::new(),
            config: RwLock::new(HashMap::new()),
        }
    }

    /// Name of the owning process
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object pool used for fan-out copies
    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    /// Per-node counters of the run
    pub fn statistics(&self) -> &NodeStatistics {
        &self.statistics
    }

    /// Store a named configuration value
    pub fn set_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.config.write().insert(key.into(), value.into());
    }

    /// Look up a named configuration value
    pub fn config(&self, key: &str) -> Option<String> {
        self.config.read().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_values() {
        let ctx = ProcessContext::new("orders");
        assert_eq!(ctx.name(), "orders");
        assert_eq!(ctx.config("batch"), None);
        ctx.set_config("batch", "42");
        assert_eq!(ctx.config("batch").as_deref(), Some("42"));
    }
}
