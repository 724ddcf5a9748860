mod support;

use async_trait::async_trait;
use iab_core::{
    BillingEvent, Compatibility, InventoryResponse, Purchase, PurchaseVerifier, SkuType, Status,
    VerificationResult,
};
use orchestrator::{
    BillingHelper, Configuration, ConsumeLedger, DefaultBillingListener, SledLedger,
};
use std::sync::Arc;
use support::{drain, next_matching, RecordingListener, ScriptedBackend};

fn inventory_event(event: BillingEvent) -> Option<InventoryResponse> {
    match event {
        BillingEvent::Inventory(response) => Some(response),
        _ => None,
    }
}

fn start(
    backend: Arc<ScriptedBackend>,
    listener: DefaultBillingListener,
) -> (BillingHelper, tokio::sync::mpsc::UnboundedReceiver<BillingEvent>) {
    let (recorder, events) = RecordingListener::new();
    let configuration = Configuration::builder()
        .add_shared_backend(backend)
        .listener(Arc::new(listener.with_delegate(recorder)))
        .build()
        .unwrap();
    (BillingHelper::start(configuration), events)
}

/// Rejects tokens starting with "forged" and cannot check ones starting with
/// "unverifiable".
struct TokenVerifier;

#[async_trait]
impl PurchaseVerifier for TokenVerifier {
    async fn verify(&self, purchase: &Purchase) -> VerificationResult {
        match purchase.token() {
            Some(token) if token.starts_with("forged") => VerificationResult::Failed,
            Some(token) if token.starts_with("unverifiable") => VerificationResult::Error,
            Some(_) => VerificationResult::Success,
            None => VerificationResult::Error,
        }
    }
}

#[tokio::test]
async fn pagination_yields_one_event_per_page_then_stops() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let pages = (0..4)
        .map(|n| vec![scripted.owned_purchase("premium", SkuType::Entitlement, &format!("t{n}"))])
        .collect();
    let backend = Arc::new(scripted.with_pages(pages));
    let (helper, mut events) = start(backend, DefaultBillingListener::new());

    helper.inventory(true);
    let mut pages_seen = Vec::new();
    loop {
        let page = next_matching(&mut events, inventory_event).await;
        assert_eq!(page.status, Status::Success);
        let has_more = page.has_more;
        pages_seen.push(page);
        if !has_more {
            break;
        }
    }
    helper.shutdown().await.unwrap();

    assert_eq!(pages_seen.len(), 4);
    assert_eq!(
        pages_seen[3].inventory[0].purchase.token(),
        Some("t3"),
        "continuations follow the page that triggered them"
    );
    assert!(drain(&mut events)
        .into_iter()
        .all(|event| !matches!(event, BillingEvent::Inventory(_))));
}

#[tokio::test]
async fn redelivered_consumable_is_consumed_once() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let gas = scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-1");
    let backend = Arc::new(scripted.with_pages(vec![vec![gas]]));
    let (helper, mut events) = start(backend.clone(), DefaultBillingListener::new());

    helper.inventory(true);
    helper.inventory(true);
    for _ in 0..2 {
        next_matching(&mut events, inventory_event).await;
    }
    helper.shutdown().await.unwrap();

    assert_eq!(backend.consumed(), vec!["gas-1".to_string()]);
}

#[tokio::test]
async fn only_verified_consumables_are_consumed() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred).with_verifier(TokenVerifier);
    let page = vec![
        scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-1"),
        scripted.owned_purchase("sku_gas", SkuType::Consumable, "forged-1"),
        scripted.owned_purchase("sku_premium", SkuType::Entitlement, "premium-1"),
        scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-1"),
    ];
    let backend = Arc::new(scripted.with_pages(vec![page]));
    let (helper, mut events) = start(backend.clone(), DefaultBillingListener::new());

    helper.inventory(true);
    let response = next_matching(&mut events, inventory_event).await;
    assert_eq!(response.inventory.len(), 3, "duplicate tokens are collapsed");
    assert_eq!(response.verification_for("forged-1"), Some(VerificationResult::Failed));
    assert_eq!(response.verification_for("gas-1"), Some(VerificationResult::Success));
    helper.shutdown().await.unwrap();

    assert_eq!(backend.consumed(), vec!["gas-1".to_string()]);
}

#[tokio::test]
async fn verification_error_is_reported_per_purchase() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred).with_verifier(TokenVerifier);
    let page = vec![
        scripted.owned_purchase("sku_gas", SkuType::Consumable, "unverifiable-1"),
        scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-2"),
    ];
    let backend = Arc::new(scripted.with_pages(vec![page]));
    let (helper, mut events) = start(backend.clone(), DefaultBillingListener::new());

    helper.inventory(true);
    let response = next_matching(&mut events, inventory_event).await;
    assert_eq!(response.status, Status::Success);
    assert_eq!(response.inventory.len(), 2);
    assert_eq!(
        response.verification_for("unverifiable-1"),
        Some(VerificationResult::Error)
    );
    helper.shutdown().await.unwrap();

    assert_eq!(backend.consumed(), vec!["gas-2".to_string()]);
}

#[tokio::test]
async fn canceled_consumable_is_still_consumed_once() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let canceled = Purchase::builder("sku_gas")
        .sku_type(SkuType::Consumable)
        .provider_name("Store")
        .token(Some("gas-c".into()))
        .canceled(true)
        .build();
    let backend = Arc::new(scripted.with_pages(vec![vec![canceled]]));
    let (helper, mut events) = start(backend.clone(), DefaultBillingListener::new());

    helper.inventory(true);
    helper.inventory(true);
    for _ in 0..2 {
        let response = next_matching(&mut events, inventory_event).await;
        assert!(response.inventory[0].purchase.is_canceled());
    }
    helper.shutdown().await.unwrap();

    assert_eq!(backend.consumed(), vec!["gas-c".to_string()]);
}

#[tokio::test]
async fn failed_consume_releases_claim_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path().join("ledger")).unwrap();
    let ledger = Arc::new(SledLedger::from_db(&db).unwrap());
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let gas = scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-1");
    *scripted.consume_status.lock().unwrap() = Status::ServiceUnavailable;
    let backend = Arc::new(scripted.with_pages(vec![vec![gas]]));
    let (helper, mut events) = start(
        backend.clone(),
        DefaultBillingListener::new().with_ledger(ledger.clone()),
    );

    helper.inventory(true);
    let failed = next_matching(&mut events, |event| match event {
        BillingEvent::Consume(response) => Some(response),
        _ => None,
    })
    .await;
    assert_eq!(failed.status, Status::ServiceUnavailable);
    assert!(!ledger.contains("gas-1"));

    *backend.consume_status.lock().unwrap() = Status::Success;
    helper.inventory(true);
    let consumed = next_matching(&mut events, |event| match event {
        BillingEvent::Consume(response) => Some(response),
        _ => None,
    })
    .await;
    assert_eq!(consumed.status, Status::Success);
    assert!(ledger.contains("gas-1"));
    helper.shutdown().await.unwrap();

    assert_eq!(backend.consumed().len(), 2);
}

#[tokio::test]
async fn ledger_prevents_double_consume_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path().join("ledger")).unwrap();
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let gas = scripted.owned_purchase("sku_gas", SkuType::Consumable, "gas-1");
    let backend = Arc::new(scripted.with_pages(vec![vec![gas]]));

    for _ in 0..2 {
        let ledger = Arc::new(SledLedger::from_db(&db).unwrap());
        let (helper, mut events) = start(
            backend.clone(),
            DefaultBillingListener::new().with_ledger(ledger),
        );
        helper.inventory(true);
        next_matching(&mut events, inventory_event).await;
        helper.shutdown().await.unwrap();
    }

    assert_eq!(backend.consumed(), vec!["gas-1".to_string()]);
}

#[tokio::test]
async fn non_consumable_consume_is_rejected_locally() {
    let scripted = ScriptedBackend::new("Store", Compatibility::Preferred);
    let premium = scripted.owned_purchase("sku_premium", SkuType::Entitlement, "premium-1");
    let foreign = Purchase::builder("sku_gas")
        .sku_type(SkuType::Consumable)
        .provider_name("Elsewhere")
        .token(Some("gas-9".into()))
        .build();
    let backend = Arc::new(scripted);
    let (helper, mut events) = start(backend.clone(), DefaultBillingListener::new());

    helper.consume(premium);
    helper.consume(foreign);
    for _ in 0..2 {
        let response = next_matching(&mut events, |event| match event {
            BillingEvent::Consume(response) => Some(response),
            _ => None,
        })
        .await;
        assert_eq!(response.status, Status::ItemUnavailable);
    }
    helper.shutdown().await.unwrap();

    assert!(backend.consumed().is_empty());
}
