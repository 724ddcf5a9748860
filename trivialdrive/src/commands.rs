use anyhow::{anyhow, Context, Result};
use backend::{mock::MockBackend, PendingPurchase};
use iab_core::{
    BillingEvent, ConsumeResponse, InventoryResponse, PurchaseResponse, SetupResponse,
    SkuDetailsResponse, SkuType,
};
use orchestrator::{BillingHelper, BillingListener};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const TANK_SIZE: u32 = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub provider: Option<String>,
    pub tank: u32,
    pub premium: bool,
    pub infinite_gas: bool,
    pub prices: HashMap<String, String>,
}

/// Game state driven by billing events.
///
/// `sku_types` maps store SKUs back to what they unlock.
pub struct GameState {
    sku_types: HashMap<String, (String, SkuType)>,
    snapshot: Mutex<GameSnapshot>,
}

impl GameState {
    pub fn new(sku_types: HashMap<String, (String, SkuType)>) -> Self {
        Self {
            sku_types,
            snapshot: Mutex::new(GameSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn abstract_sku(&self, store_sku: &str) -> Option<&str> {
        self.sku_types.get(store_sku).map(|(sku, _)| sku.as_str())
    }

    fn update(&self, f: impl FnOnce(&mut GameSnapshot)) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            f(&mut snapshot);
        }
    }
}

impl BillingListener for GameState {
    fn on_setup(&self, _helper: &BillingHelper, response: &SetupResponse) {
        tracing::info!(status = ?response.status(), provider = ?response.provider(), "store selected");
        let provider = response.provider().map(str::to_string);
        self.update(|s| s.provider = provider);
    }

    fn on_sku_details(&self, _helper: &BillingHelper, response: &SkuDetailsResponse) {
        self.update(|s| {
            for details in &response.sku_details {
                if let Some(price) = details.price() {
                    s.prices.insert(details.sku().to_string(), price.to_string());
                }
            }
        });
    }

    fn on_purchase(&self, _helper: &BillingHelper, response: &PurchaseResponse) {
        match &response.purchase {
            Some(purchase) => tracing::info!(sku = %purchase.sku(), "thank you for your purchase"),
            None => tracing::warn!(status = ?response.status, "purchase did not complete"),
        }
    }

    fn on_inventory(&self, _helper: &BillingHelper, response: &InventoryResponse) {
        let owned: Vec<&str> = response
            .inventory
            .iter()
            .filter(|entry| !entry.purchase.is_canceled())
            .filter_map(|entry| self.abstract_sku(entry.purchase.sku()))
            .collect();
        self.update(|s| {
            s.premium |= owned.contains(&"premium");
            s.infinite_gas |= owned.contains(&"infinite_gas");
        });
    }

    fn on_consume(&self, _helper: &BillingHelper, response: &ConsumeResponse) {
        if !response.status.is_successful() {
            tracing::warn!(status = ?response.status, "failed to fill the tank");
            return;
        }
        if self.abstract_sku(response.purchase.sku()) == Some("gas") {
            self.update(|s| s.tank = (s.tank + 1).min(TANK_SIZE));
        }
    }
}

/// Forwards every event to the demo driver.
pub struct EventFeed {
    tx: mpsc::UnboundedSender<BillingEvent>,
}

impl EventFeed {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<BillingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl BillingListener for EventFeed {
    fn on_event(&self, _helper: &BillingHelper, event: &BillingEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Waits for the first event `matches` accepts.
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<BillingEvent>,
    what: &str,
    matches: impl Fn(&BillingEvent) -> bool,
) -> Result<BillingEvent> {
    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .with_context(|| format!("timed out waiting for {what}"))?
            .ok_or_else(|| anyhow!("billing engine stopped while waiting for {what}"))?;
        if matches(&event) {
            return Ok(event);
        }
    }
}

/// Stands in for the store's payment screen: every purchase is approved.
pub async fn run_payment_ui(
    mut pending: mpsc::UnboundedReceiver<PendingPurchase>,
    stores: HashMap<String, Arc<MockBackend>>,
    helper: BillingHelper,
) {
    while let Some(request) = pending.recv().await {
        let Some(store) = stores.get(&request.provider) else {
            tracing::error!(provider = %request.provider, "no payment screen for store");
            continue;
        };
        tracing::info!(sku = %request.sku, provider = %request.provider, "user approves purchase");
        helper.on_purchase_result(store.approve(&request));
    }
}
