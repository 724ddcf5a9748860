use super::{
    finish_sku_details,
    google::failed_completion,
    google_types::{
        continuation, unpack_purchases, BuyIntentBundle, ItemType, ProductDetails, PurchaseData,
        PurchaseState, PurchasesBundle, ResponseCode, SkuDetailsBundle,
    },
    BackendOptions, BillingBackend, InventoryPage, PendingPurchase, PurchaseCompletion,
    PurchaseRequest, SkuDetailsPage,
};
use async_trait::async_trait;
use iab_core::{Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver, SkuType, Status};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

/// Transport into a store implementing the open billing protocol.
#[async_trait]
pub trait OpenStoreService: Send + Sync {
    /// Application package of the store.
    fn store_package(&self) -> &str;
    async fn is_bound(&self) -> bool;
    async fn installer_package(&self) -> Option<String>;
    async fn is_billing_available(&self) -> Option<i64>;
    async fn sku_details(&self, item_type: ItemType, skus: &[String]) -> SkuDetailsBundle;
    async fn purchases(&self, item_type: ItemType, continuation_token: Option<String>) -> PurchasesBundle;
    async fn buy_intent(&self, sku: &str, item_type: ItemType) -> BuyIntentBundle;
    async fn consume_purchase(&self, token: &str) -> Option<i64>;
}

pub fn translate(response: Option<ResponseCode>) -> Status {
    match response {
        Some(ResponseCode::Ok) => Status::Success,
        Some(ResponseCode::UserCanceled) => Status::UserCanceled,
        Some(ResponseCode::ServiceUnavailable) => Status::ServiceUnavailable,
        Some(ResponseCode::BillingUnavailable) => Status::BillingUnavailable,
        Some(ResponseCode::ItemUnavailable) | Some(ResponseCode::ItemNotOwned) => {
            Status::ItemUnavailable
        }
        Some(ResponseCode::ItemAlreadyOwned) => Status::ItemAlreadyOwned,
        Some(ResponseCode::DeveloperError) | Some(ResponseCode::Error) | None => {
            Status::UnknownError
        }
    }
}

/// Adapter for third-party stores speaking the open protocol.
///
/// Each store gets its own backend name, e.g. `OpenStore(com.yandex.store)`.
pub struct OpenStoreBackend<S> {
    name: String,
    service: S,
    options: BackendOptions,
    continuation: Mutex<Option<String>>,
}

impl<S: OpenStoreService> OpenStoreBackend<S> {
    pub fn new(service: S, options: BackendOptions) -> Self {
        Self {
            name: format!("OpenStore({})", service.store_package()),
            service,
            options,
            continuation: Mutex::new(None),
        }
    }

    fn new_purchase(&self, data: PurchaseData, json: &str, signature: Option<String>) -> Purchase {
        Purchase::builder(data.product_id.clone())
            .sku_type(self.options.sku_resolver.resolved_type(&data.product_id))
            .provider_name(self.name.clone())
            .original_json(json)
            .token(data.purchase_token.clone())
            .purchase_time(data.purchased_at())
            // Refunds count as cancellations.
            .canceled(data.state() != Some(PurchaseState::Purchased))
            .signature(signature)
            .build()
    }
}

#[async_trait]
impl<S: OpenStoreService> BillingBackend for OpenStoreBackend<S> {
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
        self.service.is_bound().await
    }

    async fn check_compatibility(&self) -> Compatibility {
        let status = translate(ResponseCode::parse(self.service.is_billing_available().await));
        if status != Status::Success {
            return Compatibility::Incompatible;
        }
        match self.service.installer_package().await {
            Some(installer) if installer == self.service.store_package() => Compatibility::Preferred,
            _ => Compatibility::Compatible,
        }
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        let resolver = self.options.sku_resolver.as_ref();
        let resolved: Vec<String> = skus.iter().map(|s| resolver.resolve_or_same(s)).collect();
        let bundle = self.service.sku_details(ItemType::InApp, &resolved).await;
        let response = ResponseCode::parse(bundle.response_code);
        if response != Some(ResponseCode::Ok) {
            tracing::error!(store = %self.name, "failed to retrieve sku details");
            return SkuDetailsPage::failed(translate(response));
        }

        let mut found = Vec::new();
        for json in bundle.details.unwrap_or_default() {
            match serde_json::from_str::<ProductDetails>(&json) {
                Ok(details) => {
                    let sku_type = match ItemType::from_wire(&details.item_type) {
                        Some(ItemType::Subscription) => SkuType::Subscription,
                        Some(ItemType::InApp) => resolver.resolved_type(&details.product_id),
                        None => SkuType::Unknown,
                    };
                    found.push(
                        SkuDetails::builder(details.product_id)
                            .sku_type(sku_type)
                            .provider_name(self.name.clone())
                            .original_json(json.as_str())
                            .price(details.price)
                            .title(details.title)
                            .description(details.description)
                            .build(),
                    );
                }
                Err(e) => tracing::error!(store = %self.name, error = %e, "failed to parse sku details"),
            }
        }
        SkuDetailsPage::success(finish_sku_details(resolver, skus, found))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        let mut continuation_token = self.continuation.lock().await;
        if start_over {
            *continuation_token = None;
        }
        let bundle = self
            .service
            .purchases(ItemType::InApp, continuation_token.clone())
            .await;
        let response = ResponseCode::parse(bundle.response_code);
        if response != Some(ResponseCode::Ok) {
            tracing::error!(store = %self.name, "failed to retrieve purchase data");
            return InventoryPage::failed(translate(response));
        }
        let Ok(entries) = unpack_purchases(&bundle) else {
            tracing::error!(store = %self.name, "failed to parse purchase data response");
            return InventoryPage::failed(Status::UnknownError);
        };

        let purchases = entries
            .into_iter()
            .filter_map(|(json, signature)| match serde_json::from_str::<PurchaseData>(&json) {
                Ok(data) => Some(self.new_purchase(data, &json, Some(signature))),
                Err(e) => {
                    tracing::error!(store = %self.name, error = %e, "failed to parse purchase data");
                    None
                }
            })
            .collect();
        *continuation_token = continuation(&bundle);
        InventoryPage::success(purchases, continuation_token.is_some())
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        let item_type = ItemType::from_sku_type(sku_type).unwrap_or(ItemType::InApp);
        let bundle = self.service.buy_intent(sku, item_type).await;
        let response = ResponseCode::parse(bundle.response_code);
        match (response, bundle.intent) {
            (Some(ResponseCode::Ok), Some(intent)) => PurchaseRequest::Pending(PendingPurchase {
                provider: self.name.clone(),
                sku: sku.to_string(),
                sku_type,
                handle: intent,
            }),
            _ => PurchaseRequest::Failed(translate(response)),
        }
    }

    async fn purchase_result(
        &self,
        _pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        let response = ResponseCode::parse(completion.response_code);
        match (&completion.purchase_data, completion.accepted, response) {
            (Some(data), true, Some(ResponseCode::Ok)) => {
                match serde_json::from_str::<PurchaseData>(data) {
                    Ok(parsed) => (
                        Status::Success,
                        Some(self.new_purchase(parsed, data, completion.signature.clone())),
                    ),
                    Err(e) => {
                        tracing::error!(store = %self.name, error = %e, "failed to parse purchase data");
                        (Status::UnknownError, None)
                    }
                }
            }
            _ => (failed_completion(translate(response), completion), None),
        }
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        let Some(token) = purchase.token() else {
            return Status::ItemUnavailable;
        };
        translate(ResponseCode::parse(self.service.consume_purchase(token).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_table_is_total() {
        let table = [
            (Some(0), Status::Success),
            (Some(1), Status::UserCanceled),
            (Some(2), Status::ServiceUnavailable),
            // no account check on OpenStore
            (Some(3), Status::BillingUnavailable),
            (Some(4), Status::ItemUnavailable),
            (Some(5), Status::UnknownError),
            (Some(6), Status::UnknownError),
            (Some(7), Status::ItemAlreadyOwned),
            (Some(8), Status::ItemUnavailable),
            (Some(42), Status::UnknownError),
            (Some(-1), Status::UnknownError),
            (None, Status::UnknownError),
        ];
        for (code, expected) in table {
            assert_eq!(translate(ResponseCode::parse(code)), expected, "code {code:?}");
        }
    }

    #[test]
    fn refunded_purchase_is_canceled() {
        let data: PurchaseData =
            serde_json::from_str(r#"{"productId":"gas","purchaseState":2,"purchaseToken":"t"}"#)
                .unwrap();
        assert_eq!(data.state(), Some(PurchaseState::Refunded));
        assert_ne!(data.state(), Some(PurchaseState::Purchased));
    }
}
