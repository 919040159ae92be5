//! Routes Ctrl+C (SIGINT) to the foreground Context.
//!
//! The Context is passed in explicitly; there is no process-global
//! "current context".  On interrupt every session of that Context is
//! discontinued (waking any blocked worker) and the Context is stopped.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::Context;

/// Spawns a task on `ctx`'s runtime that waits for Ctrl+C and then calls
/// [`Context::interrupt`].  The task also ends quietly when the Context
/// stops for another reason.
///
/// Returns `None` if the Context has no runtime attached.
pub fn service_interrupts(ctx: &Context) -> Option<JoinHandle<()>> {
    let handle = ctx.runtime()?;
    let ctx = ctx.clone();
    Some(handle.spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("received Ctrl+C; initiating shutdown");
                    ctx.interrupt();
                }
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            },
            _ = ctx.stopped() => {}
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::NoHooks;
    use std::sync::Arc;
    use std::time::Duration;
    use usbws_core::HealthMonitor;

    #[test]
    fn test_without_runtime_nothing_is_spawned() {
        let ctx = Context::new(HealthMonitor::disabled(), Arc::new(NoHooks));
        assert!(service_interrupts(&ctx).is_none());
    }

    #[tokio::test]
    async fn test_interrupt_task_ends_when_context_stops() {
        // Arrange
        let ctx = Context::new(HealthMonitor::disabled(), Arc::new(NoHooks));
        ctx.attach_runtime(tokio::runtime::Handle::current());
        let task = service_interrupts(&ctx).unwrap();

        // Act
        ctx.stop();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("interrupt task kept running")
            .unwrap();
    }
}
