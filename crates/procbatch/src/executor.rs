//! The physical execution seam

use async_trait::async_trait;
use procbatch_core::{Result, ResultCursor};

use crate::behavior::CommandBehavior;
use crate::parameters::BoundParameter;
use crate::program::BatchTarget;
use crate::version::ServerVersion;

/// Everything needed to send one target's batch
#[derive(Debug, Clone, Copy)]
pub struct ExecuteRequest<'a> {
    pub target: &'a BatchTarget,
    pub sql: &'a str,
    pub parameters: &'a [BoundParameter],
    /// Intersection of the behaviors of every command in the batch
    pub behavior: CommandBehavior,
}

/// Sends a batch to a target and returns the multi-result-set cursor
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Server version of `target`, if known
    fn server_version(&self, _target: &BatchTarget) -> Option<ServerVersion> {
        None
    }

    /// Execute the batch; the cursor is positioned on the first result set
    async fn execute(&self, request: ExecuteRequest<'_>) -> Result<Box<dyn ResultCursor>>;
}
