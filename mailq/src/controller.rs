use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use mailq_common::{Message, Priority, Signal, internal};
use mailq_delivery::{
    DeliveryConfig, DirectoryTransport, DrainOutcome, QueueEngine, SmtpTransport,
};
use mailq_spool::{FailedMessage, FileQueueStore, QueueStore, QueuedMessage, QueuedMessageId};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::TransportConfig;

fn default_spool() -> PathBuf {
    PathBuf::from("/var/spool/mailq")
}

/// Everything one `mailq` invocation needs, as read from the config file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mailq {
    /// Spool directory shared by every invocation
    #[serde(default = "default_spool")]
    pub spool: PathBuf,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for Mailq {
    fn default() -> Self {
        Self {
            spool: default_spool(),
            delivery: DeliveryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, finishing the current pass");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, finishing the current pass");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Mailq {
    /// Open the spool, creating it if needed
    pub async fn store(&self) -> anyhow::Result<FileQueueStore> {
        let store = FileQueueStore::builder().path(&self.spool).build()?;
        store.init().await?;
        Ok(store)
    }

    /// Build a drain engine over the spool and the configured transport
    pub async fn engine(&self) -> anyhow::Result<QueueEngine> {
        let store: Arc<dyn QueueStore> = Arc::new(self.store().await?);
        let builder = QueueEngine::builder()
            .store(store)
            .config(self.delivery.clone());

        let builder = match &self.transport {
            TransportConfig::Smtp {
                host,
                port,
                helo,
                timeout_secs,
            } => builder.transport(
                SmtpTransport::new(host, *port)
                    .with_helo(helo)
                    .with_timeout(std::time::Duration::from_secs(*timeout_secs)),
            ),
            TransportConfig::Directory { path } => builder.transport(DirectoryTransport::new(path)),
        };

        Ok(builder.build()?)
    }

    /// Run a single drain pass
    pub async fn send(&self) -> anyhow::Result<DrainOutcome> {
        Ok(self.engine().await?.drain_all().await?)
    }

    /// Drain on an interval until SIGINT or SIGTERM
    ///
    /// A pass that is running when the signal arrives is allowed to finish.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let engine = self.engine().await?;
        let serve = engine.serve(
            self.delivery.serve_interval(),
            SHUTDOWN_BROADCAST.subscribe(),
        );
        tokio::pin!(serve);

        tokio::select! {
            r = &mut serve => r?,
            r = shutdown() => {
                r?;
                serve.await?;
            }
        }

        internal!(level = INFO, "Shutting down...");
        Ok(())
    }

    pub async fn enqueue(
        &self,
        message: Message,
        priority: Priority,
    ) -> anyhow::Result<QueuedMessageId> {
        let id = self.store().await?.enqueue(message, priority).await?;
        internal!(level = INFO, "Queued message {id}");
        Ok(id)
    }

    /// Make deferred messages eligible straight away
    pub async fn retry_deferred(&self, max_retries: Option<u32>) -> anyhow::Result<usize> {
        Ok(self.engine().await?.retry_deferred(max_retries).await?)
    }

    pub async fn list_queue(&self) -> anyhow::Result<Vec<QueuedMessage>> {
        Ok(self.store().await?.list_all().await?)
    }

    pub async fn list_failed(&self) -> anyhow::Result<Vec<FailedMessage>> {
        Ok(self.store().await?.list_failed().await?)
    }

    /// Move a failed message back onto the queue
    pub async fn requeue(&self, id: &QueuedMessageId) -> anyhow::Result<()> {
        self.store().await?.requeue_failed(id).await?;
        internal!(level = INFO, "Requeued message {id}");
        Ok(())
    }
}
