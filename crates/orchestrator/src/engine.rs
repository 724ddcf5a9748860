//! The orchestration engine.
//!
//! All requests funnel through one command channel into a single task, which
//! awaits backend calls one at a time. Backend completions and published
//! events are therefore strictly serialized and delivered in request order.

use crate::audit::AuditEvent;
use crate::configuration::Configuration;
use crate::error::BillingError;
use crate::listener::BillingListener;
use backend::{fill_placeholders, BillingBackend, PendingPurchase, PurchaseCompletion, PurchaseRequest};
use iab_core::{
    BillingEvent, Compatibility, ConsumeResponse, InventoryResponse, Purchase, PurchaseResponse,
    SetupResponse, SetupStatus, SkuDetailsResponse, Status, VerifiedPurchase,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type SubscriptionId = u64;

enum Command {
    Setup,
    SkuDetails(BTreeSet<String>),
    Purchase(String),
    PurchaseResult(PurchaseCompletion),
    Inventory { start_over: bool },
    Consume(Purchase),
    Subscribe(SubscriptionId, Arc<dyn BillingListener>),
    Unsubscribe(SubscriptionId),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running engine. Cheap to clone; every method only enqueues.
///
/// The engine keeps running until [`BillingHelper::shutdown`].
#[derive(Clone)]
pub struct BillingHelper {
    commands: mpsc::UnboundedSender<Command>,
    next_subscription: Arc<AtomicU64>,
}

impl BillingHelper {
    /// Spawns the engine on the current tokio runtime.
    pub fn start(configuration: Configuration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let helper = Self {
            commands: tx,
            next_subscription: Arc::new(AtomicU64::new(1)),
        };
        let engine = Engine::new(configuration, helper.clone());
        tokio::spawn(engine.run(rx));
        helper
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("billing engine has stopped, request dropped");
        }
    }

    /// Picks the active backend. Other operations do this lazily when needed.
    pub fn setup(&self) {
        self.send(Command::Setup);
    }

    pub fn sku_details<I, S>(&self, skus: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(Command::SkuDetails(skus.into_iter().map(Into::into).collect()));
    }

    /// Starts buying an abstract SKU.
    pub fn purchase(&self, sku: impl Into<String>) {
        self.send(Command::Purchase(sku.into()));
    }

    /// Delivers what the payment UI reported for the purchase in flight.
    pub fn on_purchase_result(&self, completion: PurchaseCompletion) {
        self.send(Command::PurchaseResult(completion));
    }

    pub fn inventory(&self, start_over: bool) {
        self.send(Command::Inventory { start_over });
    }

    pub fn consume(&self, purchase: Purchase) {
        self.send(Command::Consume(purchase));
    }

    /// Registers a listener for events published after this request is processed.
    pub fn subscribe(&self, listener: Arc<dyn BillingListener>) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Subscribe(id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.send(Command::Unsubscribe(id));
    }

    /// Stops the engine once every request queued before this one is handled.
    pub async fn shutdown(&self) -> Result<(), BillingError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .map_err(|_| BillingError::EngineStopped)?;
        rx.await.map_err(|_| BillingError::EngineStopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PurchaseFlow {
    Idle,
    AwaitingBackend,
    AwaitingUserInteraction(PendingPurchase),
}

/// Index of the best candidate: highest compatibility, earliest on ties.
/// Incompatible candidates are never chosen.
pub fn select_backend(ranking: &[Compatibility]) -> Option<usize> {
    let mut best: Option<(usize, Compatibility)> = None;
    for (index, &compatibility) in ranking.iter().enumerate() {
        if compatibility == Compatibility::Incompatible {
            continue;
        }
        if best.map_or(true, |(_, current)| compatibility > current) {
            best = Some((index, compatibility));
        }
    }
    best.map(|(index, _)| index)
}

struct Candidate {
    backend: Arc<dyn BillingBackend>,
    compatibility: Compatibility,
    authorised: bool,
}

struct Engine {
    configuration: Configuration,
    helper: BillingHelper,
    active: Option<Arc<dyn BillingBackend>>,
    last_provider: Option<String>,
    flow: PurchaseFlow,
    subscribers: BTreeMap<SubscriptionId, Arc<dyn BillingListener>>,
}

impl Engine {
    fn new(configuration: Configuration, helper: BillingHelper) -> Self {
        Self {
            configuration,
            helper,
            active: None,
            last_provider: None,
            flow: PurchaseFlow::Idle,
            subscribers: BTreeMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(backends = self.configuration.backends().len(), "billing engine started");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Setup => {
                    self.setup().await;
                }
                Command::SkuDetails(skus) => self.sku_details(skus).await,
                Command::Purchase(sku) => self.purchase(sku).await,
                Command::PurchaseResult(completion) => self.purchase_result(completion).await,
                Command::Inventory { start_over } => self.inventory(start_over).await,
                Command::Consume(purchase) => self.consume(purchase).await,
                Command::Subscribe(id, listener) => {
                    self.subscribers.insert(id, listener);
                }
                Command::Unsubscribe(id) => {
                    self.subscribers.remove(&id);
                }
                Command::Shutdown(done) => {
                    let _ = done.send(());
                    break;
                }
            }
        }
        tracing::info!("billing engine stopped");
    }

    fn provider(&self) -> Option<String> {
        self.active.as_ref().map(|b| b.name().to_string())
    }

    async fn setup(&mut self) -> Option<Arc<dyn BillingBackend>> {
        let mut candidates = Vec::new();
        for backend in self.configuration.backends() {
            if !backend.is_available().await {
                tracing::debug!(provider = %backend.name(), "billing backend unavailable");
                continue;
            }
            let compatibility = backend.check_compatibility().await;
            if compatibility == Compatibility::Incompatible {
                tracing::debug!(provider = %backend.name(), "billing backend incompatible");
                continue;
            }
            let authorised = backend.is_authorised().await;
            if !authorised && self.configuration.skip_unauthorised() {
                tracing::debug!(provider = %backend.name(), "skipping unauthorised backend");
                continue;
            }
            candidates.push(Candidate {
                backend: Arc::clone(backend),
                compatibility,
                authorised,
            });
        }

        let ranking: Vec<Compatibility> = candidates.iter().map(|c| c.compatibility).collect();
        let selected = select_backend(&ranking).map(|index| candidates.swap_remove(index));

        let response = match selected {
            Some(candidate) => {
                let name = candidate.backend.name().to_string();
                let status = if !candidate.authorised {
                    SetupStatus::Unauthorised
                } else if self.last_provider.as_deref().is_some_and(|last| last != name) {
                    SetupStatus::ProviderChanged
                } else {
                    SetupStatus::Success
                };
                tracing::info!(provider = %name, status = ?status, "billing backend selected");
                self.last_provider = Some(name.clone());
                self.active = Some(candidate.backend);
                match SetupResponse::new(status, Some(name)) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(error = %e, "inconsistent setup response");
                        self.active = None;
                        SetupResponse::failed()
                    }
                }
            }
            None => {
                tracing::warn!("no billing backend could be selected");
                self.active = None;
                SetupResponse::failed()
            }
        };
        self.publish(BillingEvent::Setup(response));
        self.active.clone()
    }

    async fn active_backend(&mut self) -> Option<Arc<dyn BillingBackend>> {
        match &self.active {
            Some(backend) => Some(Arc::clone(backend)),
            None => self.setup().await,
        }
    }

    /// Re-runs setup after an outcome that another backend might not share.
    async fn recover(&mut self, status: Status) {
        if self.configuration.auto_recover() && status.is_recoverable() {
            tracing::info!(status = ?status, "recovering billing backend");
            self.active = None;
            self.setup().await;
        }
    }

    async fn sku_details(&mut self, skus: BTreeSet<String>) {
        let Some(backend) = self.active_backend().await else {
            self.publish(BillingEvent::SkuDetails(SkuDetailsResponse {
                status: Status::NoBillingProvider,
                provider: None,
                sku_details: fill_placeholders(&skus, Vec::new()),
            }));
            return;
        };
        let page = backend.sku_details(&skus).await;
        let sku_details = if page.status.is_successful() {
            fill_placeholders(&skus, page.sku_details)
        } else {
            page.sku_details
        };
        self.publish(BillingEvent::SkuDetails(SkuDetailsResponse {
            status: page.status,
            provider: Some(backend.name().to_string()),
            sku_details,
        }));
        self.recover(page.status).await;
    }

    async fn purchase(&mut self, sku: String) {
        if self.flow != PurchaseFlow::Idle {
            tracing::warn!(sku = %sku, "purchase already in flight, rejecting");
            self.publish(BillingEvent::Purchase(PurchaseResponse {
                status: Status::Pending,
                provider: self.provider(),
                purchase: None,
            }));
            return;
        }
        let Some(backend) = self.active_backend().await else {
            self.publish(BillingEvent::Purchase(PurchaseResponse {
                status: Status::NoBillingProvider,
                provider: None,
                purchase: None,
            }));
            return;
        };

        let resolver = backend.sku_resolver();
        let Some(concrete) = resolver.resolve(&sku) else {
            tracing::warn!(sku = %sku, provider = %backend.name(), "sku has no mapping");
            self.complete_purchase(&backend, Status::ItemUnavailable, None).await;
            return;
        };
        let sku_type = resolver.resolve_type(&sku);

        self.flow = PurchaseFlow::AwaitingBackend;
        match backend.purchase(&concrete, sku_type).await {
            PurchaseRequest::Pending(pending) => {
                let launched = self.configuration.launcher().launch(&pending);
                match launched {
                    Ok(()) => {
                        tracing::debug!(sku = %concrete, "awaiting user interaction");
                        self.flow = PurchaseFlow::AwaitingUserInteraction(pending);
                    }
                    Err(e) => {
                        tracing::error!(sku = %concrete, error = %e, "failed to launch purchase");
                        self.complete_purchase(&backend, Status::UnknownError, None).await;
                    }
                }
            }
            PurchaseRequest::Failed(status) => {
                // A failed request that claims success has nothing to act on.
                let status = if status.is_successful() {
                    Status::UnknownError
                } else {
                    status
                };
                self.complete_purchase(&backend, status, None).await;
            }
        }
    }

    async fn purchase_result(&mut self, completion: PurchaseCompletion) {
        let PurchaseFlow::AwaitingUserInteraction(pending) = &self.flow else {
            tracing::warn!("purchase result with no purchase in flight, dropped");
            return;
        };
        let pending = pending.clone();
        let Some(backend) = self.configuration.backend(&pending.provider).cloned() else {
            tracing::error!(provider = %pending.provider, "purchase result for unknown backend");
            self.flow = PurchaseFlow::Idle;
            self.publish(BillingEvent::Purchase(PurchaseResponse {
                status: Status::UnknownError,
                provider: Some(pending.provider),
                purchase: None,
            }));
            return;
        };

        let (status, purchase) = backend.purchase_result(&pending, &completion).await;
        let status = match (&purchase, status) {
            (None, Status::Success) => Status::UnknownError,
            (_, status) => status,
        };
        let purchase = purchase.filter(|_| status.is_successful());
        self.complete_purchase(&backend, status, purchase).await;
    }

    async fn complete_purchase(
        &mut self,
        backend: &Arc<dyn BillingBackend>,
        status: Status,
        purchase: Option<Purchase>,
    ) {
        self.flow = PurchaseFlow::Idle;
        self.publish(BillingEvent::Purchase(PurchaseResponse {
            status,
            provider: Some(backend.name().to_string()),
            purchase,
        }));
        self.recover(status).await;
    }

    async fn inventory(&mut self, start_over: bool) {
        let Some(backend) = self.active_backend().await else {
            self.publish(BillingEvent::Inventory(InventoryResponse {
                status: Status::NoBillingProvider,
                provider: None,
                inventory: Vec::new(),
                has_more: false,
            }));
            return;
        };

        let page = backend.inventory(start_over).await;
        let mut inventory = Vec::with_capacity(page.purchases.len());
        if page.status.is_successful() {
            let mut tokens = HashSet::new();
            for purchase in page.purchases {
                if let Some(token) = purchase.token() {
                    if !tokens.insert(token.to_string()) {
                        tracing::debug!(sku = %purchase.sku(), "duplicate purchase token skipped");
                        continue;
                    }
                }
                let verification = backend.purchase_verifier().verify(&purchase).await;
                inventory.push(VerifiedPurchase {
                    purchase,
                    verification,
                });
            }
        }
        self.publish(BillingEvent::Inventory(InventoryResponse {
            status: page.status,
            provider: Some(backend.name().to_string()),
            inventory,
            has_more: page.status.is_successful() && page.has_more,
        }));
        self.recover(page.status).await;
    }

    async fn consume(&mut self, purchase: Purchase) {
        let Some(backend) = self.active_backend().await else {
            self.publish(BillingEvent::Consume(ConsumeResponse {
                status: Status::NoBillingProvider,
                provider: None,
                purchase,
            }));
            return;
        };

        let status = if !purchase.is_consumable() {
            tracing::warn!(sku = %purchase.sku(), "only consumables can be consumed");
            Status::ItemUnavailable
        } else if purchase.provider_name() != Some(backend.name()) {
            tracing::warn!(sku = %purchase.sku(), provider = ?purchase.provider_name(), "purchase belongs to another backend");
            Status::ItemUnavailable
        } else {
            backend.consume(&purchase).await
        };
        self.publish(BillingEvent::Consume(ConsumeResponse {
            status,
            provider: Some(backend.name().to_string()),
            purchase,
        }));
        self.recover(status).await;
    }

    fn publish(&self, event: BillingEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            provider = ?event.provider(),
            status = %event.status_label(),
            "publishing billing event"
        );
        if let Some(audit) = self.configuration.audit_log() {
            if let Err(e) = audit.append(&AuditEvent::from_event(&event)) {
                tracing::warn!(error = %e, "failed to write audit event");
            }
        }
        if let Some(listener) = self.configuration.listener() {
            listener.on_event(&self.helper, &event);
        }
        for listener in self.subscribers.values() {
            listener.on_event(&self.helper, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Compatibility::*;

    #[test]
    fn preferred_beats_compatible() {
        assert_eq!(select_backend(&[Compatible, Preferred, Compatible]), Some(1));
    }

    #[test]
    fn ties_go_to_registration_order() {
        assert_eq!(select_backend(&[Compatible, Compatible]), Some(0));
        assert_eq!(select_backend(&[Incompatible, Preferred, Preferred]), Some(1));
    }

    #[test]
    fn nothing_selectable() {
        assert_eq!(select_backend(&[]), None);
        assert_eq!(select_backend(&[Incompatible, Incompatible]), None);
    }
}
