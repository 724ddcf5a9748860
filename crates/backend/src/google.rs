use super::{
    finish_sku_details,
    google_types::{
        continuation, unpack_purchases, BuyIntentBundle, ItemType, ProductDetails, PurchaseData,
        PurchaseState, PurchasesBundle, ResponseCode, SkuDetailsBundle,
    },
    BackendOptions, BillingBackend, InventoryPage, PendingPurchase, PurchaseCompletion,
    PurchaseRequest, SkuDetailsPage,
};
use async_trait::async_trait;
use iab_core::{
    Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver, SkuType, Status,
};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

pub const NAME: &str = "Google";
pub const PACKAGE: &str = "com.android.vending";

/// Transport into the Play Store billing service.
#[async_trait]
pub trait GoogleBillingService: Send + Sync {
    async fn is_installed(&self) -> bool;
    /// Package that installed the running app, if known.
    async fn installer_package(&self) -> Option<String>;
    /// Whether a Google account is configured on the device.
    async fn has_account(&self) -> bool;
    async fn is_billing_supported(&self) -> Option<i64>;
    async fn sku_details(&self, item_type: ItemType, skus: &[String]) -> SkuDetailsBundle;
    async fn purchases(&self, item_type: ItemType, continuation_token: Option<String>) -> PurchasesBundle;
    async fn buy_intent(&self, sku: &str, item_type: ItemType) -> BuyIntentBundle;
    async fn consume_purchase(&self, token: &str) -> Option<i64>;
}

/// Play Store response code to status.
///
/// `has_account` only matters for `BillingUnavailable`, which Google also
/// reports when no account is signed in.
pub fn translate(response: Option<ResponseCode>, has_account: bool) -> Status {
    match response {
        Some(ResponseCode::Ok) => Status::Success,
        Some(ResponseCode::UserCanceled) => Status::UserCanceled,
        Some(ResponseCode::ServiceUnavailable) => Status::ServiceUnavailable,
        Some(ResponseCode::BillingUnavailable) if has_account => Status::BillingUnavailable,
        Some(ResponseCode::BillingUnavailable) => Status::Unauthorised,
        Some(ResponseCode::ItemUnavailable) | Some(ResponseCode::ItemNotOwned) => {
            Status::ItemUnavailable
        }
        Some(ResponseCode::ItemAlreadyOwned) => Status::ItemAlreadyOwned,
        Some(ResponseCode::DeveloperError) | Some(ResponseCode::Error) | None => {
            Status::UnknownError
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    item_type: ItemType,
    token: Option<String>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            item_type: ItemType::InApp,
            token: None,
        }
    }
}

/// Google Play adapter.
///
/// Inventory walks the in-app catalog first, then subscriptions, following
/// continuation tokens within each.
pub struct GoogleBackend<S> {
    service: S,
    options: BackendOptions,
    cursor: Mutex<Option<Cursor>>,
}

impl<S: GoogleBillingService> GoogleBackend<S> {
    pub fn new(service: S, options: BackendOptions) -> Self {
        Self {
            service,
            options,
            cursor: Mutex::new(None),
        }
    }

    async fn status(&self, response: Option<ResponseCode>) -> Status {
        let has_account = match response {
            Some(ResponseCode::BillingUnavailable) => self.service.has_account().await,
            _ => true,
        };
        translate(response, has_account)
    }

    fn sku_type(&self, sku: &str, item_type: Option<ItemType>) -> SkuType {
        match item_type {
            Some(ItemType::InApp) => self.options.sku_resolver.resolved_type(sku),
            Some(ItemType::Subscription) => SkuType::Subscription,
            None => SkuType::Unknown,
        }
    }

    fn new_sku_details(&self, details: ProductDetails, original_json: &str) -> SkuDetails {
        let item_type = ItemType::from_wire(&details.item_type);
        SkuDetails::builder(details.product_id.clone())
            .sku_type(self.sku_type(&details.product_id, item_type))
            .provider_name(NAME)
            .original_json(original_json)
            .price(details.price)
            .title(details.title)
            .description(details.description)
            .build()
    }

    fn new_purchase(&self, data: PurchaseData, original_json: &str, signature: Option<String>) -> Purchase {
        let sku_type = self.options.sku_resolver.resolved_type(&data.product_id);
        Purchase::builder(data.product_id.clone())
            .sku_type(sku_type)
            .provider_name(NAME)
            .original_json(original_json)
            .token(data.purchase_token.clone())
            .purchase_time(data.purchased_at())
            .canceled(data.state() == Some(PurchaseState::Canceled))
            .signature(signature)
            .build()
    }
}

#[async_trait]
impl<S: GoogleBillingService> BillingBackend for GoogleBackend<S> {
    fn name(&self) -> &str {
        NAME
    }

    fn sku_resolver(&self) -> &dyn SkuResolver {
        self.options.sku_resolver.as_ref()
    }

    fn purchase_verifier(&self) -> &dyn PurchaseVerifier {
        self.options.purchase_verifier.as_ref()
    }

    async fn is_available(&self) -> bool {
        let installed = self.service.is_installed().await;
        tracing::debug!(installed, "Google package installed");
        installed
    }

    async fn is_authorised(&self) -> bool {
        self.service.has_account().await
    }

    async fn check_compatibility(&self) -> Compatibility {
        let response = ResponseCode::parse(self.service.is_billing_supported().await);
        let status = self.status(response).await;
        tracing::debug!(?status, "Google billing supported check");
        if !matches!(status, Status::Success | Status::Unauthorised) {
            return Compatibility::Incompatible;
        }
        match self.service.installer_package().await.as_deref() {
            Some(PACKAGE) => Compatibility::Preferred,
            _ => Compatibility::Compatible,
        }
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        let resolver = self.options.sku_resolver.as_ref();
        let mut in_app = Vec::new();
        let mut subscriptions = Vec::new();
        for sku in skus {
            let resolved = resolver.resolve_or_same(sku);
            match resolver.resolve_type(sku) {
                SkuType::Subscription => subscriptions.push(resolved),
                _ => in_app.push(resolved),
            }
        }

        let mut found = Vec::new();
        for (item_type, batch) in [(ItemType::InApp, in_app), (ItemType::Subscription, subscriptions)] {
            if batch.is_empty() {
                continue;
            }
            let bundle = self.service.sku_details(item_type, &batch).await;
            let response = ResponseCode::parse(bundle.response_code);
            if response != Some(ResponseCode::Ok) {
                tracing::error!(item_type = item_type.as_wire(), "failed to retrieve sku details");
                return SkuDetailsPage::failed(self.status(response).await);
            }
            for json in bundle.details.unwrap_or_default() {
                match serde_json::from_str::<ProductDetails>(&json) {
                    Ok(details) => found.push(self.new_sku_details(details, &json)),
                    Err(e) => tracing::error!(error = %e, payload = %json, "failed to parse sku details"),
                }
            }
        }

        SkuDetailsPage::success(finish_sku_details(resolver, skus, found))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        let mut cursor = self.cursor.lock().await;
        let current = match (start_over, cursor.take()) {
            (false, Some(stored)) => stored,
            _ => Cursor::default(),
        };

        let bundle = self
            .service
            .purchases(current.item_type, current.token.clone())
            .await;
        let response = ResponseCode::parse(bundle.response_code);
        if response != Some(ResponseCode::Ok) {
            tracing::error!("failed to retrieve purchase data");
            *cursor = Some(current);
            return InventoryPage::failed(self.status(response).await);
        }

        let entries = match unpack_purchases(&bundle) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::error!("failed to parse purchase data response");
                *cursor = Some(current);
                return InventoryPage {
                    status: Status::UnknownError,
                    purchases: Vec::new(),
                    has_more: false,
                };
            }
        };

        let mut purchases = Vec::with_capacity(entries.len());
        for (json, signature) in entries {
            match serde_json::from_str::<PurchaseData>(&json) {
                Ok(data) => purchases.push(self.new_purchase(data, &json, Some(signature))),
                Err(e) => tracing::error!(error = %e, "failed to parse purchase data"),
            }
        }

        let next = match continuation(&bundle) {
            Some(token) => Some(Cursor {
                item_type: current.item_type,
                token: Some(token),
            }),
            None if current.item_type == ItemType::InApp => Some(Cursor {
                item_type: ItemType::Subscription,
                token: None,
            }),
            None => None,
        };
        let has_more = next.is_some();
        *cursor = next;
        InventoryPage::success(purchases, has_more)
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        // Google can't sell a SKU without knowing its catalog.
        let Some(item_type) = ItemType::from_sku_type(sku_type) else {
            tracing::error!(sku, "unknown sku type");
            return PurchaseRequest::Failed(Status::ItemUnavailable);
        };

        let bundle = self.service.buy_intent(sku, item_type).await;
        let response = ResponseCode::parse(bundle.response_code);
        match (response, bundle.intent) {
            (Some(ResponseCode::Ok), Some(intent)) => PurchaseRequest::Pending(PendingPurchase {
                provider: NAME.to_string(),
                sku: sku.to_string(),
                sku_type,
                handle: intent,
            }),
            _ => {
                tracing::error!(sku, "failed to retrieve buy intent");
                PurchaseRequest::Failed(self.status(response).await)
            }
        }
    }

    async fn purchase_result(
        &self,
        _pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        let response = ResponseCode::parse(completion.response_code);
        let (Some(data), Some(signature)) = (&completion.purchase_data, &completion.signature) else {
            tracing::error!(code = ?completion.response_code, "purchase result carries no data");
            return (failed_completion(self.status(response).await, completion), None);
        };
        if !completion.accepted || response != Some(ResponseCode::Ok) {
            tracing::error!(code = ?completion.response_code, "purchase was not completed");
            return (failed_completion(self.status(response).await, completion), None);
        }

        match serde_json::from_str::<PurchaseData>(data) {
            Ok(parsed) => (
                Status::Success,
                Some(self.new_purchase(parsed, data, Some(signature.clone()))),
            ),
            Err(e) => {
                tracing::error!(error = %e, payload = %data, "failed to parse purchase data");
                (Status::UnknownError, None)
            }
        }
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        let Some(token) = purchase.token() else {
            tracing::error!(sku = %purchase.sku(), "purchase token is empty");
            return Status::ItemUnavailable;
        };
        let response = ResponseCode::parse(self.service.consume_purchase(token).await);
        if response != Some(ResponseCode::Ok) {
            tracing::error!(sku = %purchase.sku(), "consume failed");
        }
        self.status(response).await
    }
}

/// A completion that produced no purchase can't report success.
pub(crate) fn failed_completion(status: Status, completion: &PurchaseCompletion) -> Status {
    match status {
        Status::Success if !completion.accepted => Status::UserCanceled,
        Status::Success => Status::UnknownError,
        other => other,
    }
}
