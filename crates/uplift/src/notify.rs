//! Best-effort notification sink for progress and rationale strings.
//!
//! Delivery failures are swallowed with a warning; the sink must never
//! block or fail core logic.

use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, topic: &str, message: &str) -> anyhow::Result<()>;
}

/// Default sink that writes notifications to the tracing log.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, topic: &str, message: &str) -> anyhow::Result<()> {
        info!(topic, "{message}");
        Ok(())
    }
}

/// Send without letting a sink failure reach the caller.
pub async fn notify_best_effort(sink: &dyn NotificationSink, topic: &str, message: &str) {
    if let Err(e) = sink.notify(topic, message).await {
        warn!(topic, "notification sink failed: {e}");
    }
}
