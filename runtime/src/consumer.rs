//! Queue consumer with automatic reconnection.
//!
//! `MessageConsumer` runs a consume-reconnect loop for one queue:
//!
//! ```text
//! loop {
//!     consume(queue, handler)      // runs until the stream ends or fails
//!     wait retry_delay             // unless shutdown fires first
//! }
//! ```
//!
//! Ack and nack decisions belong to the bus and the handler; this loop only
//! keeps a consumer attached and stops cleanly on shutdown.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = MessageConsumer::new(
//!     "expiration",
//!     "reservation.expiration.process",
//!     bus,
//!     Arc::new(ExpirationHandler::new(engine)),
//!     shutdown_tx.subscribe(),
//! );
//! let handle = consumer.spawn();
//! ```

use boxoffice_core::bus::{MessageBus, MessageHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Keeps a handler attached to a queue.
pub struct MessageConsumer {
    /// Consumer name (for logging)
    name: String,

    /// Queue to consume
    queue: String,

    /// Bus to consume from
    bus: Arc<dyn MessageBus>,

    /// Handler for each delivery
    handler: Arc<dyn MessageHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Delay before re-attaching after the stream ends or fails (default: 5 seconds)
    retry_delay: Duration,
}

impl MessageConsumer {
    /// Create a consumer with the default retry delay of 5 seconds.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task that runs until shutdown.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, queue = %self.queue, "Message consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Message consumer received shutdown signal");
                    break;
                }
                result = self.bus.consume(&self.queue, Arc::clone(&self.handler)) => {
                    match result {
                        Ok(()) => warn!(
                            consumer = %self.name,
                            "Consumer stream ended, reconnecting in {:?}",
                            self.retry_delay
                        ),
                        Err(e) => error!(
                            consumer = %self.name,
                            error = %e,
                            "Failed to consume queue, retrying in {:?}",
                            self.retry_delay
                        ),
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Message consumer received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Message consumer stopped");
    }
}
