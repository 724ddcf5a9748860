use anyhow::{anyhow, Result};
use backend::PendingPurchase;
use tokio::sync::mpsc;

/// Hands a pending purchase to whatever shows the payment UI.
///
/// The UI reports back through `BillingHelper::on_purchase_result`.
pub trait PurchaseLauncher: Send + Sync {
    fn launch(&self, pending: &PendingPurchase) -> Result<()>;
}

/// Launcher for setups without a payment UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLauncher;

impl PurchaseLauncher for LoggingLauncher {
    fn launch(&self, pending: &PendingPurchase) -> Result<()> {
        tracing::info!(provider = %pending.provider, sku = %pending.sku, "purchase awaiting user interaction");
        Ok(())
    }
}

/// Forwards pending purchases to a receiver, typically a UI task.
#[derive(Debug, Clone)]
pub struct ChannelLauncher {
    tx: mpsc::UnboundedSender<PendingPurchase>,
}

impl ChannelLauncher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PendingPurchase>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PurchaseLauncher for ChannelLauncher {
    fn launch(&self, pending: &PendingPurchase) -> Result<()> {
        self.tx
            .send(pending.clone())
            .map_err(|_| anyhow!("payment UI receiver is gone"))
    }
}
