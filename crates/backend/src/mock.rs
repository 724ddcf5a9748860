use super::{
    finish_sku_details, BackendOptions, BillingBackend, InventoryPage, PendingPurchase,
    PurchaseCompletion, PurchaseRequest, SkuDetailsPage,
};
use async_trait::async_trait;
use chrono::Utc;
use iab_core::{
    time_from_millis, Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver, SkuType,
    Status,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockReceipt {
    sku: String,
    sku_type: SkuType,
    token: String,
    purchase_time: i64,
}

#[derive(Debug, Clone)]
struct Product {
    sku_type: SkuType,
    price: String,
}

#[derive(Default)]
struct MockState {
    catalog: BTreeMap<String, Product>,
    owned: Vec<Purchase>,
    cursor: usize,
    /// Open payment handles and the SKU each one is buying.
    pending: HashMap<String, String>,
}

/// In-memory store with simulated latency, for demos and tests.
///
/// Catalog SKUs are concrete ids; map abstract ids onto them with the resolver.
pub struct MockBackend {
    name: String,
    options: BackendOptions,
    available: bool,
    authorised: bool,
    compatibility: Compatibility,
    page_size: usize,
    latency: Duration,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(name: impl Into<String>, options: BackendOptions) -> Self {
        Self {
            name: name.into(),
            options,
            available: true,
            authorised: true,
            compatibility: Compatibility::Compatible,
            page_size: 20,
            latency: Duration::from_millis(50),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_product(self, sku: &str, sku_type: SkuType, price: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.catalog.insert(
                sku.to_string(),
                Product {
                    sku_type,
                    price: price.to_string(),
                },
            );
        }
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_compatibility(mut self, compatibility: Compatibility) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_authorised(mut self, authorised: bool) -> Self {
        self.authorised = authorised;
        self
    }

    /// Seeds an already owned purchase and returns its token.
    pub fn grant(&self, sku: &str) -> Option<String> {
        let mut state = self.state.lock().ok()?;
        let sku_type = state.catalog.get(sku)?.sku_type;
        let purchase = self.new_purchase(&MockReceipt {
            sku: sku.to_string(),
            sku_type,
            token: random_token(),
            purchase_time: Utc::now().timestamp_millis(),
        });
        let token = purchase.token().map(str::to_string);
        state.owned.push(purchase);
        token
    }

    /// What the payment UI hands back when the user confirms `pending`.
    pub fn approve(&self, pending: &PendingPurchase) -> PurchaseCompletion {
        let receipt = MockReceipt {
            sku: pending.sku.clone(),
            sku_type: pending.sku_type,
            token: random_token(),
            purchase_time: Utc::now().timestamp_millis(),
        };
        PurchaseCompletion {
            accepted: true,
            response_code: Some(0),
            purchase_data: serde_json::to_string(&receipt).ok(),
            signature: None,
        }
    }

    /// What the payment UI hands back when the user backs out.
    pub fn decline(&self, _pending: &PendingPurchase) -> PurchaseCompletion {
        PurchaseCompletion::default()
    }

    fn new_purchase(&self, receipt: &MockReceipt) -> Purchase {
        let original_json = serde_json::to_string(receipt).unwrap_or_default();
        Purchase::builder(receipt.sku.clone())
            .sku_type(receipt.sku_type)
            .provider_name(self.name.clone())
            .original_json(original_json)
            .token(Some(receipt.token.clone()))
            .purchase_time(time_from_millis(receipt.purchase_time))
            .build()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[async_trait]
impl BillingBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn sku_resolver(&self) -> &dyn SkuResolver {
        self.options.sku_resolver.as_ref()
    }

    fn purchase_verifier(&self) -> &dyn PurchaseVerifier {
        self.options.purchase_verifier.as_ref()
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn is_authorised(&self) -> bool {
        self.authorised
    }

    async fn check_compatibility(&self) -> Compatibility {
        self.compatibility
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        self.simulate_latency().await;
        let resolver = self.options.sku_resolver.as_ref();
        let Ok(state) = self.state.lock() else {
            return SkuDetailsPage::failed(Status::UnknownError);
        };
        let found = skus
            .iter()
            .map(|sku| resolver.resolve_or_same(sku))
            .filter_map(|sku| {
                let product = state.catalog.get(&sku)?;
                let json = serde_json::json!({ "sku": sku, "price": product.price }).to_string();
                Some(
                    SkuDetails::builder(sku.clone())
                        .sku_type(product.sku_type)
                        .provider_name(self.name.clone())
                        .original_json(json)
                        .price(Some(product.price.clone()))
                        .title(Some(sku))
                        .build(),
                )
            })
            .collect();
        SkuDetailsPage::success(finish_sku_details(resolver, skus, found))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        self.simulate_latency().await;
        let Ok(mut state) = self.state.lock() else {
            return InventoryPage::failed(Status::UnknownError);
        };
        if start_over {
            state.cursor = 0;
        }
        let start = state.cursor.min(state.owned.len());
        let end = (start + self.page_size).min(state.owned.len());
        let page = state.owned[start..end].to_vec();
        let has_more = end < state.owned.len();
        state.cursor = if has_more { end } else { 0 };
        InventoryPage::success(page, has_more)
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        self.simulate_latency().await;
        if !self.authorised {
            return PurchaseRequest::Failed(Status::Unauthorised);
        }
        let Ok(mut state) = self.state.lock() else {
            return PurchaseRequest::Failed(Status::UnknownError);
        };
        let Some(product) = state.catalog.get(sku) else {
            return PurchaseRequest::Failed(Status::ItemUnavailable);
        };
        let sku_type = if sku_type == SkuType::Unknown {
            product.sku_type
        } else {
            sku_type
        };
        if sku_type != SkuType::Consumable && state.owned.iter().any(|p| p.sku() == sku) {
            return PurchaseRequest::Failed(Status::ItemAlreadyOwned);
        }
        let handle = uuid::Uuid::new_v4().to_string();
        state.pending.insert(handle.clone(), sku.to_string());
        PurchaseRequest::Pending(PendingPurchase {
            provider: self.name.clone(),
            sku: sku.to_string(),
            sku_type,
            handle,
        })
    }

    async fn purchase_result(
        &self,
        pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        self.simulate_latency().await;
        let Ok(mut state) = self.state.lock() else {
            return (Status::UnknownError, None);
        };
        if state.pending.remove(&pending.handle).is_none() {
            tracing::warn!(handle = %pending.handle, "completion for unknown payment");
            return (Status::UnknownError, None);
        }
        if !completion.accepted {
            return (Status::UserCanceled, None);
        }
        let receipt = completion
            .purchase_data
            .as_deref()
            .and_then(|json| serde_json::from_str::<MockReceipt>(json).ok());
        match receipt {
            Some(receipt) if completion.response_code == Some(0) => {
                let purchase = self.new_purchase(&receipt);
                state.owned.push(purchase.clone());
                (Status::Success, Some(purchase))
            }
            _ => (Status::UnknownError, None),
        }
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        self.simulate_latency().await;
        let Some(token) = purchase.token() else {
            return Status::ItemUnavailable;
        };
        let Ok(mut state) = self.state.lock() else {
            return Status::UnknownError;
        };
        let before = state.owned.len();
        state.owned.retain(|p| p.token() != Some(token));
        if state.owned.len() == before {
            Status::ItemUnavailable
        } else {
            Status::Success
        }
    }
}
