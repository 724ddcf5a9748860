use crate::engine::BillingHelper;
use crate::ledger::{ConsumeLedger, InMemoryLedger};
use iab_core::{
    BillingEvent, ConsumeResponse, InventoryResponse, PurchaseResponse, SetupResponse,
    SkuDetailsResponse, VerificationResult,
};
use std::sync::Arc;

/// Observer of every event the engine publishes.
///
/// Callbacks run on the engine task; requests made through `helper` are queued
/// behind the event being delivered.
#[allow(unused_variables)]
pub trait BillingListener: Send + Sync {
    fn on_setup(&self, helper: &BillingHelper, response: &SetupResponse) {}

    fn on_sku_details(&self, helper: &BillingHelper, response: &SkuDetailsResponse) {}

    fn on_purchase(&self, helper: &BillingHelper, response: &PurchaseResponse) {}

    fn on_inventory(&self, helper: &BillingHelper, response: &InventoryResponse) {}

    fn on_consume(&self, helper: &BillingHelper, response: &ConsumeResponse) {}

    fn on_event(&self, helper: &BillingHelper, event: &BillingEvent) {
        match event {
            BillingEvent::Setup(r) => self.on_setup(helper, r),
            BillingEvent::SkuDetails(r) => self.on_sku_details(helper, r),
            BillingEvent::Purchase(r) => self.on_purchase(helper, r),
            BillingEvent::Inventory(r) => self.on_inventory(helper, r),
            BillingEvent::Consume(r) => self.on_consume(helper, r),
        }
    }
}

/// Listener carrying the stock automation:
///
/// * consumables verified as genuine are consumed, once per token;
/// * inventory pages flagged `has_more` are followed up with the next page;
/// * a successful purchase triggers a fresh inventory from page one.
///
/// Each policy can be switched off. A delegate, if any, sees every event first.
pub struct DefaultBillingListener {
    delegate: Option<Arc<dyn BillingListener>>,
    ledger: Arc<dyn ConsumeLedger>,
    consume_verified: bool,
    continue_pagination: bool,
    refresh_after_purchase: bool,
}

impl Default for DefaultBillingListener {
    fn default() -> Self {
        Self {
            delegate: None,
            ledger: Arc::new(InMemoryLedger::new()),
            consume_verified: true,
            continue_pagination: true,
            refresh_after_purchase: true,
        }
    }
}

impl DefaultBillingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn BillingListener>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn ConsumeLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn consume_verified(mut self, enabled: bool) -> Self {
        self.consume_verified = enabled;
        self
    }

    pub fn continue_pagination(mut self, enabled: bool) -> Self {
        self.continue_pagination = enabled;
        self
    }

    pub fn refresh_after_purchase(mut self, enabled: bool) -> Self {
        self.refresh_after_purchase = enabled;
        self
    }

    fn consume_inventory(&self, helper: &BillingHelper, response: &InventoryResponse) {
        for entry in &response.inventory {
            let purchase = &entry.purchase;
            if !purchase.is_consumable() || entry.verification != VerificationResult::Success {
                continue;
            }
            let Some(token) = purchase.token() else {
                continue;
            };
            if self.ledger.try_claim(token) {
                tracing::info!(sku = %purchase.sku(), "consuming verified purchase");
                helper.consume(purchase.clone());
            } else {
                tracing::debug!(sku = %purchase.sku(), "purchase already claimed for consumption");
            }
        }
    }
}

impl BillingListener for DefaultBillingListener {
    fn on_purchase(&self, helper: &BillingHelper, response: &PurchaseResponse) {
        if self.refresh_after_purchase && response.is_successful() {
            helper.inventory(true);
        }
    }

    fn on_inventory(&self, helper: &BillingHelper, response: &InventoryResponse) {
        if !response.is_successful() {
            return;
        }
        if self.consume_verified {
            self.consume_inventory(helper, response);
        }
        if self.continue_pagination && response.has_more {
            helper.inventory(false);
        }
    }

    fn on_consume(&self, _helper: &BillingHelper, response: &ConsumeResponse) {
        if response.status.is_successful() {
            return;
        }
        if let Some(token) = response.purchase.token() {
            if self.ledger.contains(token) {
                tracing::warn!(status = ?response.status, "consume failed, releasing claim");
                self.ledger.release(token);
            }
        }
    }

    fn on_event(&self, helper: &BillingHelper, event: &BillingEvent) {
        if let Some(delegate) = &self.delegate {
            delegate.on_event(helper, event);
        }
        match event {
            BillingEvent::Purchase(r) => self.on_purchase(helper, r),
            BillingEvent::Inventory(r) => self.on_inventory(helper, r),
            BillingEvent::Consume(r) => self.on_consume(helper, r),
            BillingEvent::Setup(_) | BillingEvent::SkuDetails(_) => {}
        }
    }
}
