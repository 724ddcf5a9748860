mod commands;

use anyhow::{Context, Result};
use backend::{mock::MockBackend, BackendOptions, BillingBackend};
use commands::{run_payment_ui, wait_for, EventFeed, GameState};
use config::{AppConfig, StoreConfig};
use iab_core::{BillingEvent, Ed25519PurchaseVerifier, MapSkuResolver, SkuType};
use orchestrator::{
    AuditLog, BillingHelper, ChannelLauncher, Configuration, ConsumeLedger,
    DefaultBillingListener, InMemoryLedger, SledLedger,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn sku_resolver(cfg: &AppConfig) -> MapSkuResolver {
    let mut resolver = MapSkuResolver::new();
    for product in &cfg.products {
        resolver.add(product.sku.as_str(), product.store_sku.as_str(), product.sku_type);
    }
    resolver
}

fn create_store(cfg: &AppConfig, store: &StoreConfig) -> Result<Arc<MockBackend>> {
    let mut options = BackendOptions::builder().sku_resolver(sku_resolver(cfg));
    let key = config::verification_key(&store.name).unwrap_or_else(|e| {
        tracing::warn!(store = %store.name, error = %e, "keychain unavailable, purchases are not verified");
        None
    });
    if let Some(key) = key {
        tracing::info!(store = %store.name, "verifying purchases with stored key");
        options = options.purchase_verifier(Ed25519PurchaseVerifier::from_base64(&key)?);
    }
    let options = options.build("Mock")?;

    let mut backend = MockBackend::new(store.name.clone(), options)
        .with_compatibility(store.compatibility)
        .with_available(store.available)
        .with_authorised(store.authorised)
        .with_page_size(store.page_size)
        .with_latency(Duration::from_millis(store.latency_ms));
    for product in &cfg.products {
        backend = backend.with_product(&product.store_sku, product.sku_type, &product.price);
    }
    Ok(Arc::new(backend))
}

fn create_ledger(cfg: &AppConfig) -> Result<Arc<dyn ConsumeLedger>> {
    match &cfg.ledger_path {
        Some(path) => {
            let db = sled::open(path)
                .with_context(|| format!("Failed to open consume ledger at {}", path.display()))?;
            Ok(Arc::new(SledLedger::from_db(&db)?))
        }
        None => Ok(Arc::new(InMemoryLedger::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["set-key", store, key] => {
            Ed25519PurchaseVerifier::from_base64(key)?;
            config::store_verification_key(store, key)?;
            tracing::info!(store = %store, "verification key saved");
            return Ok(());
        }
        ["clear-key", store] => {
            config::delete_verification_key(store)?;
            tracing::info!(store = %store, "verification key removed");
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load().unwrap_or_default();
    let to_buy = if args.is_empty() {
        vec!["gas".to_string(), "premium".to_string()]
    } else {
        args
    };

    let mut stores = HashMap::new();
    let mut builder = Configuration::builder()
        .auto_recover(cfg.auto_recover)
        .skip_unauthorised(cfg.skip_unauthorised);
    for store in &cfg.stores {
        let backend = create_store(&cfg, store)?;
        stores.insert(backend.name().to_string(), backend.clone());
        builder = builder.add_shared_backend(backend);
    }
    if let Some(path) = &cfg.audit_log {
        builder = builder.audit_log(AuditLog::new(path.clone()));
    }

    let sku_types: HashMap<String, (String, SkuType)> = cfg
        .products
        .iter()
        .map(|p| (p.store_sku.clone(), (p.sku.clone(), p.sku_type)))
        .collect();
    let game = Arc::new(GameState::new(sku_types));
    let listener = DefaultBillingListener::new()
        .with_ledger(create_ledger(&cfg)?)
        .with_delegate(game.clone());
    let (launcher, pending) = ChannelLauncher::channel();
    let configuration = builder
        .listener(Arc::new(listener))
        .launcher(Arc::new(launcher))
        .build()?;

    let helper = BillingHelper::start(configuration);
    let (feed, mut events) = EventFeed::channel();
    helper.subscribe(feed);
    tokio::spawn(run_payment_ui(pending, stores, helper.clone()));

    helper.setup();
    helper.sku_details(cfg.products.iter().map(|p| p.sku.clone()));
    helper.inventory(true);
    wait_for(&mut events, "inventory", |e| {
        matches!(e, BillingEvent::Inventory(r) if !r.has_more)
    })
    .await?;

    for sku in &to_buy {
        helper.purchase(sku.as_str());
        wait_for(&mut events, "purchase", |e| matches!(e, BillingEvent::Purchase(_))).await?;
    }
    helper.inventory(true);
    wait_for(&mut events, "inventory", |e| {
        matches!(e, BillingEvent::Inventory(r) if !r.has_more)
    })
    .await?;

    helper.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&game.snapshot())?);
    Ok(())
}
