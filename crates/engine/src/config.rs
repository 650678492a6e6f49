//! Static queue configuration, evaluated once at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::ProcessingOrder;

/// Selection order defaults, overridable per queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderConfig {
    pub default: ProcessingOrder,
    pub queues: HashMap<String, ProcessingOrder>,
}

impl OrderConfig {
    pub fn resolve(&self, queue: Option<&str>) -> ProcessingOrder {
        queue
            .and_then(|name| self.queues.get(name).copied())
            .unwrap_or(self.default)
    }
}

/// Configuration the engine reads once when it is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Relation-hydration depth requested from the storage layer. Zero keeps
    /// submissions on the direct write path.
    pub depth: u32,
    /// Whether submissions must run document hooks. Forces the pipeline
    /// write path.
    pub run_hooks: bool,
    /// Batch size when a run names no explicit limit.
    pub default_limit: usize,
    /// Selection order when a run names no explicit order.
    pub processing_order: OrderConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: 0,
            run_hooks: false,
            default_limit: 10,
            processing_order: OrderConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Whether submissions may bypass the document pipeline.
    pub fn direct_writes(&self) -> bool {
        self.depth == 0 && !self.run_hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{OrderDirection, OrderField};

    #[test]
    fn default_config_selects_the_direct_path() {
        let config = QueueConfig::default();
        assert!(config.direct_writes());
        assert_eq!(config.default_limit, 10);
    }

    #[test]
    fn hooks_or_depth_force_the_pipeline_path() {
        let hooked = QueueConfig {
            run_hooks: true,
            ..Default::default()
        };
        assert!(!hooked.direct_writes());

        let deep = QueueConfig {
            depth: 2,
            ..Default::default()
        };
        assert!(!deep.direct_writes());
    }

    #[test]
    fn per_queue_order_overrides_the_default() {
        let mut order = OrderConfig::default();
        order
            .queues
            .insert("lifo-queue".into(), ProcessingOrder::LIFO);

        assert_eq!(order.resolve(Some("lifo-queue")), ProcessingOrder::LIFO);
        assert_eq!(
            order.resolve(Some("other")),
            ProcessingOrder {
                field: OrderField::CreatedAt,
                direction: OrderDirection::Ascending,
            }
        );
        assert_eq!(order.resolve(None), ProcessingOrder::FIFO);
    }
}
