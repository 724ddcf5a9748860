mod support;

use backend::PurchaseCompletion;
use iab_core::{BillingEvent, Compatibility, PurchaseResponse, SkuType, Status};
use orchestrator::{BillingHelper, ChannelLauncher, Configuration, DefaultBillingListener};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{drain, next_matching, FailingLauncher, RecordingListener, ScriptedBackend};

fn purchase_event(event: BillingEvent) -> Option<PurchaseResponse> {
    match event {
        BillingEvent::Purchase(response) => Some(response),
        _ => None,
    }
}

fn store() -> ScriptedBackend {
    ScriptedBackend::new("Store", Compatibility::Preferred)
        .with_sku("gas", "sku_gas_concrete", SkuType::Consumable)
        .with_sku("premium", "sku_premium_concrete", SkuType::Entitlement)
}

#[tokio::test]
async fn gas_purchase_is_consumed_exactly_once() {
    let (recorder, mut events) = RecordingListener::new();
    let (launcher, mut pending) = ChannelLauncher::channel();
    let backend = Arc::new(store());
    let configuration = Configuration::builder()
        .add_shared_backend(backend.clone())
        .launcher(Arc::new(launcher))
        .listener(Arc::new(DefaultBillingListener::new().with_delegate(recorder)))
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.purchase("gas");
    let request = pending.recv().await.unwrap();
    assert_eq!(request.sku, "sku_gas_concrete");
    assert_eq!(request.sku_type, SkuType::Consumable);
    helper.on_purchase_result(ScriptedBackend::approve(&request));

    let response = next_matching(&mut events, purchase_event).await;
    assert_eq!(response.status, Status::Success);
    let purchase = response.purchase.unwrap();
    assert_eq!(purchase.sku(), "sku_gas_concrete");
    assert_eq!(purchase.sku_type(), SkuType::Consumable);
    assert!(!purchase.is_canceled());

    let consumed = next_matching(&mut events, |event| match event {
        BillingEvent::Consume(response) => Some(response),
        _ => None,
    })
    .await;
    assert_eq!(consumed.status, Status::Success);
    assert_eq!(consumed.purchase.token(), Some("token-sku_gas_concrete"));

    helper.shutdown().await.unwrap();
    assert_eq!(backend.consumed(), vec!["token-sku_gas_concrete".to_string()]);
}

#[tokio::test]
async fn second_purchase_is_rejected_while_first_awaits_user() {
    let (recorder, mut events) = RecordingListener::new();
    let (launcher, mut pending) = ChannelLauncher::channel();
    let backend = Arc::new(store());
    let configuration = Configuration::builder()
        .add_shared_backend(backend.clone())
        .launcher(Arc::new(launcher))
        .listener(recorder)
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.purchase("gas");
    helper.purchase("premium");
    let rejected = next_matching(&mut events, purchase_event).await;
    assert_eq!(rejected.status, Status::Pending);
    assert!(rejected.purchase.is_none());
    assert_eq!(backend.purchase_calls.load(Ordering::SeqCst), 1);

    // The first flow is untouched and still completes.
    let request = pending.recv().await.unwrap();
    assert_eq!(request.sku, "sku_gas_concrete");
    helper.on_purchase_result(ScriptedBackend::approve(&request));
    let completed = next_matching(&mut events, purchase_event).await;
    assert_eq!(completed.status, Status::Success);
    assert_eq!(completed.purchase.unwrap().sku(), "sku_gas_concrete");

    helper.shutdown().await.unwrap();
}

#[tokio::test]
async fn dismissed_payment_ui_is_user_canceled() {
    let (recorder, mut events) = RecordingListener::new();
    let (launcher, mut pending) = ChannelLauncher::channel();
    let configuration = Configuration::builder()
        .add_backend(store())
        .launcher(Arc::new(launcher))
        .listener(recorder)
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.purchase("premium");
    pending.recv().await.unwrap();
    helper.on_purchase_result(PurchaseCompletion::default());
    let response = next_matching(&mut events, purchase_event).await;
    assert_eq!(response.status, Status::UserCanceled);
    assert!(response.purchase.is_none());

    // Flow is idle again, so a new purchase is launched rather than rejected.
    helper.purchase("premium");
    assert_eq!(pending.recv().await.unwrap().sku, "sku_premium_concrete");
    helper.shutdown().await.unwrap();
}

#[tokio::test]
async fn launch_failure_is_unknown_error_and_resets_flow() {
    let (recorder, mut events) = RecordingListener::new();
    let backend = Arc::new(store());
    let configuration = Configuration::builder()
        .add_shared_backend(backend.clone())
        .launcher(Arc::new(FailingLauncher))
        .listener(recorder)
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.purchase("gas");
    helper.purchase("gas");
    for _ in 0..2 {
        let response = next_matching(&mut events, purchase_event).await;
        assert_eq!(response.status, Status::UnknownError);
    }
    assert_eq!(backend.purchase_calls.load(Ordering::SeqCst), 2);
    helper.shutdown().await.unwrap();
}

#[tokio::test]
async fn unmapped_sku_is_unavailable_without_backend_call() {
    let (recorder, mut events) = RecordingListener::new();
    let backend = Arc::new(store());
    let configuration = Configuration::builder()
        .add_shared_backend(backend.clone())
        .listener(recorder)
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.purchase("coins");
    let response = next_matching(&mut events, purchase_event).await;
    assert_eq!(response.status, Status::ItemUnavailable);
    assert_eq!(backend.purchase_calls.load(Ordering::SeqCst), 0);
    helper.shutdown().await.unwrap();
}

#[tokio::test]
async fn stray_completion_publishes_nothing() {
    let (recorder, mut events) = RecordingListener::new();
    let configuration = Configuration::builder()
        .add_backend(store())
        .listener(recorder)
        .build()
        .unwrap();
    let helper = BillingHelper::start(configuration);

    helper.setup();
    helper.on_purchase_result(PurchaseCompletion::default());
    helper.shutdown().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], BillingEvent::Setup(_)));
}
