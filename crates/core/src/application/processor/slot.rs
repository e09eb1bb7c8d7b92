// One processor per context

use super::{Processor, ShutdownToken};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

/// Holds the context's processor. The first `start` builds and starts it; any
/// later call logs and hands back the same instance, even a failed one.
#[derive(Default)]
pub struct ProcessorSlot {
    cell: OnceCell<Arc<Processor>>,
}

impl ProcessorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start<F>(&self, build: F, shutdown: ShutdownToken) -> Result<Arc<Processor>>
    where
        F: FnOnce() -> Processor,
    {
        if let Some(existing) = self.cell.get() {
            warn!(state = existing.state().as_str(), "Processor already exists in this context, reusing it");
            return Ok(Arc::clone(existing));
        }

        let candidate = Arc::new(build());
        if self.cell.set(Arc::clone(&candidate)).is_err() {
            // Lost a race with a concurrent start
            warn!("Processor already exists in this context, reusing it");
            return self
                .cell
                .get()
                .cloned()
                .ok_or_else(|| crate::error::AppError::Internal("processor slot empty after set".to_string()));
        }

        candidate.start(shutdown).await?;
        Ok(candidate)
    }

    pub fn get(&self) -> Option<Arc<Processor>> {
        self.cell.get().cloned()
    }
}
