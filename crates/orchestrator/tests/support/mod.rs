#![allow(dead_code)]

use async_trait::async_trait;
use backend::{
    fill_placeholders, BillingBackend, InventoryPage, PendingPurchase, PurchaseCompletion,
    PurchaseRequest, SkuDetailsPage,
};
use iab_core::{
    AlwaysSuccessVerifier, BillingEvent, Compatibility, MapSkuResolver, Purchase,
    PurchaseVerifier, SkuResolver, SkuType, Status,
};
use orchestrator::{BillingHelper, BillingListener, PurchaseLauncher};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Backend whose answers are set up by the test.
pub struct ScriptedBackend {
    name: String,
    resolver: MapSkuResolver,
    verifier: Box<dyn PurchaseVerifier>,
    compatibility: Compatibility,
    pub available: AtomicBool,
    pub authorised: AtomicBool,
    pub sku_status: Mutex<Status>,
    pages: Mutex<Vec<Vec<Purchase>>>,
    cursor: AtomicUsize,
    pub purchase_calls: AtomicUsize,
    pub consume_status: Mutex<Status>,
    pub consumed: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, compatibility: Compatibility) -> Self {
        Self {
            name: name.to_string(),
            resolver: MapSkuResolver::new(),
            verifier: Box::new(AlwaysSuccessVerifier),
            compatibility,
            available: AtomicBool::new(true),
            authorised: AtomicBool::new(true),
            sku_status: Mutex::new(Status::Success),
            pages: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            purchase_calls: AtomicUsize::new(0),
            consume_status: Mutex::new(Status::Success),
            consumed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sku(mut self, sku: &str, resolved: &str, sku_type: SkuType) -> Self {
        self.resolver.add(sku, resolved, sku_type);
        self
    }

    pub fn with_verifier(mut self, verifier: impl PurchaseVerifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn with_pages(self, pages: Vec<Vec<Purchase>>) -> Self {
        *self.pages.lock().unwrap() = pages;
        self
    }

    pub fn with_authorised(self, authorised: bool) -> Self {
        self.authorised.store(authorised, Ordering::SeqCst);
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    pub fn owned_purchase(&self, sku: &str, sku_type: SkuType, token: &str) -> Purchase {
        Purchase::builder(sku)
            .sku_type(sku_type)
            .provider_name(self.name.clone())
            .original_json(format!(r#"{{"sku":"{sku}","token":"{token}"}}"#))
            .token(Some(token.to_string()))
            .build()
    }

    pub fn consumed(&self) -> Vec<String> {
        self.consumed.lock().unwrap().clone()
    }

    pub fn approve(pending: &PendingPurchase) -> PurchaseCompletion {
        PurchaseCompletion {
            accepted: true,
            response_code: Some(0),
            purchase_data: Some(format!(r#"{{"sku":"{}"}}"#, pending.sku)),
            signature: Some("signature".into()),
        }
    }
}

#[async_trait]
impl BillingBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn sku_resolver(&self) -> &dyn SkuResolver {
        &self.resolver
    }

    fn purchase_verifier(&self) -> &dyn PurchaseVerifier {
        self.verifier.as_ref()
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn is_authorised(&self) -> bool {
        self.authorised.load(Ordering::SeqCst)
    }

    async fn check_compatibility(&self) -> Compatibility {
        self.compatibility
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        let status = *self.sku_status.lock().unwrap();
        if status != Status::Success {
            return SkuDetailsPage::failed(status);
        }
        SkuDetailsPage::success(fill_placeholders(skus, Vec::new()))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        if start_over {
            self.cursor.store(0, Ordering::SeqCst);
        }
        let pages = self.pages.lock().unwrap();
        let index = self.cursor.load(Ordering::SeqCst);
        let page = pages.get(index).cloned().unwrap_or_default();
        let has_more = index + 1 < pages.len();
        self.cursor
            .store(if has_more { index + 1 } else { 0 }, Ordering::SeqCst);
        InventoryPage::success(page, has_more)
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        PurchaseRequest::Pending(PendingPurchase {
            provider: self.name.clone(),
            sku: sku.to_string(),
            sku_type,
            handle: format!("handle-{sku}"),
        })
    }

    async fn purchase_result(
        &self,
        pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        if !completion.accepted {
            return (Status::UserCanceled, None);
        }
        if completion.response_code != Some(0) {
            return (Status::UnknownError, None);
        }
        let purchase = self.owned_purchase(&pending.sku, pending.sku_type, &format!("token-{}", pending.sku));
        let mut pages = self.pages.lock().unwrap();
        match pages.last_mut() {
            Some(page) => page.push(purchase.clone()),
            None => pages.push(vec![purchase.clone()]),
        }
        (Status::Success, Some(purchase))
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        let Some(token) = purchase.token() else {
            return Status::ItemUnavailable;
        };
        self.consumed.lock().unwrap().push(token.to_string());
        *self.consume_status.lock().unwrap()
    }
}

/// Forwards every event to a channel the test reads from.
pub struct RecordingListener {
    tx: mpsc::UnboundedSender<BillingEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BillingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl BillingListener for RecordingListener {
    fn on_event(&self, _helper: &BillingHelper, event: &BillingEvent) {
        let _ = self.tx.send(event.clone());
    }
}

pub struct FailingLauncher;

impl PurchaseLauncher for FailingLauncher {
    fn launch(&self, _pending: &PendingPurchase) -> anyhow::Result<()> {
        anyhow::bail!("no activity to launch from")
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<BillingEvent>) -> BillingEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for billing event")
        .expect("event channel closed")
}

/// Skips events until one matches.
pub async fn next_matching<T>(
    rx: &mut mpsc::UnboundedReceiver<BillingEvent>,
    select: impl Fn(BillingEvent) -> Option<T>,
) -> T {
    loop {
        if let Some(found) = select(next_event(rx).await) {
            return found;
        }
    }
}

/// Events still queued once the engine has stopped.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<BillingEvent>) -> Vec<BillingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
