use super::{
    finish_sku_details, BackendOptions, BillingBackend, InventoryPage, PendingPurchase,
    PurchaseCompletion, PurchaseRequest, SkuDetailsPage,
};
use async_trait::async_trait;
use iab_core::{
    time_from_millis_opt, Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver,
    SkuType, Status,
};
use serde::Deserialize;
use std::collections::BTreeSet;

pub const NAME: &str = "Amazon";
pub const INSTALLER: &str = "com.amazon.venezia";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Successful,
    Failed,
    InvalidSku,
    AlreadyPurchased,
    NotSupported,
}

impl RequestStatus {
    /// Numeric form used when the status travels inside a purchase completion.
    pub fn code(&self) -> i64 {
        match self {
            RequestStatus::Successful => 0,
            RequestStatus::Failed => 1,
            RequestStatus::InvalidSku => 2,
            RequestStatus::AlreadyPurchased => 3,
            RequestStatus::NotSupported => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(RequestStatus::Successful),
            1 => Some(RequestStatus::Failed),
            2 => Some(RequestStatus::InvalidSku),
            3 => Some(RequestStatus::AlreadyPurchased),
            4 => Some(RequestStatus::NotSupported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Consumable,
    Entitled,
    Subscription,
}

impl From<ProductType> for SkuType {
    fn from(value: ProductType) -> Self {
        match value {
            ProductType::Consumable => SkuType::Consumable,
            ProductType::Entitled => SkuType::Entitlement,
            ProductType::Subscription => SkuType::Subscription,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserData {
    pub status: Option<RequestStatus>,
    pub user_id: Option<String>,
    pub marketplace: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductDataResponse {
    pub status: Option<RequestStatus>,
    /// One JSON document per product.
    pub products: Vec<String>,
    pub unavailable_skus: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseUpdatesResponse {
    pub status: Option<RequestStatus>,
    /// One JSON receipt per purchase.
    pub receipts: Vec<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmazonProduct {
    sku: String,
    product_type: Option<ProductType>,
    price: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    receipt_id: String,
    sku: String,
    product_type: Option<ProductType>,
    purchase_date: Option<i64>,
    cancel_date: Option<i64>,
}

/// Transport into the Amazon Appstore purchasing service.
#[async_trait]
pub trait AmazonPurchasingService: Send + Sync {
    async fn is_installed(&self) -> bool;
    async fn installer_package(&self) -> Option<String>;
    async fn user_data(&self) -> UserData;
    async fn product_data(&self, skus: &[String]) -> ProductDataResponse;
    /// `reset` restarts the update stream from the first page.
    async fn purchase_updates(&self, reset: bool) -> PurchaseUpdatesResponse;
    /// Returns the request id the purchase response will carry.
    async fn purchase(&self, sku: &str) -> Option<String>;
    async fn notify_fulfillment(&self, receipt_id: &str);
}

/// Amazon request status to status.
///
/// `signed_in` only matters for `NotSupported`, which Amazon also reports when
/// no user is signed in.
pub fn translate(status: Option<RequestStatus>, signed_in: bool) -> Status {
    match status {
        Some(RequestStatus::Successful) => Status::Success,
        Some(RequestStatus::Failed) => Status::UnknownError,
        Some(RequestStatus::InvalidSku) => Status::ItemUnavailable,
        Some(RequestStatus::AlreadyPurchased) => Status::ItemAlreadyOwned,
        Some(RequestStatus::NotSupported) if signed_in => Status::BillingUnavailable,
        Some(RequestStatus::NotSupported) => Status::Unauthorised,
        None => Status::UnknownError,
    }
}

pub struct AmazonBackend<S> {
    service: S,
    options: BackendOptions,
}

impl<S: AmazonPurchasingService> AmazonBackend<S> {
    pub fn new(service: S, options: BackendOptions) -> Self {
        Self { service, options }
    }

    async fn signed_in(&self) -> bool {
        let user = self.service.user_data().await;
        user.status == Some(RequestStatus::Successful) && user.user_id.is_some()
    }

    async fn status(&self, status: Option<RequestStatus>) -> Status {
        let signed_in = match status {
            Some(RequestStatus::NotSupported) => self.signed_in().await,
            _ => true,
        };
        translate(status, signed_in)
    }

    fn sku_type(&self, sku: &str, product_type: Option<ProductType>) -> SkuType {
        product_type
            .map(SkuType::from)
            .unwrap_or_else(|| self.options.sku_resolver.resolved_type(sku))
    }

    fn new_purchase(&self, receipt: Receipt, json: &str) -> Purchase {
        Purchase::builder(receipt.sku.clone())
            .sku_type(self.sku_type(&receipt.sku, receipt.product_type))
            .provider_name(NAME)
            .original_json(json)
            .token(Some(receipt.receipt_id))
            .purchase_time(time_from_millis_opt(receipt.purchase_date))
            .canceled(receipt.cancel_date.is_some())
            .build()
    }
}

#[async_trait]
impl<S: AmazonPurchasingService> BillingBackend for AmazonBackend<S> {
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
        self.service.is_installed().await
    }

    async fn is_authorised(&self) -> bool {
        self.signed_in().await
    }

    async fn check_compatibility(&self) -> Compatibility {
        let user = self.service.user_data().await;
        if !matches!(
            user.status,
            Some(RequestStatus::Successful) | Some(RequestStatus::NotSupported)
        ) {
            return Compatibility::Incompatible;
        }
        match self.service.installer_package().await.as_deref() {
            Some(INSTALLER) => Compatibility::Preferred,
            _ => Compatibility::Compatible,
        }
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        let resolver = self.options.sku_resolver.as_ref();
        let resolved: Vec<String> = skus.iter().map(|s| resolver.resolve_or_same(s)).collect();
        let response = self.service.product_data(&resolved).await;
        if response.status != Some(RequestStatus::Successful) {
            tracing::error!(status = ?response.status, "failed to retrieve product data");
            return SkuDetailsPage::failed(self.status(response.status).await);
        }
        if !response.unavailable_skus.is_empty() {
            tracing::debug!(unavailable = ?response.unavailable_skus, "Amazon skus unavailable");
        }

        let mut found = Vec::new();
        for json in response.products {
            match serde_json::from_str::<AmazonProduct>(&json) {
                Ok(product) => found.push(
                    SkuDetails::builder(product.sku.clone())
                        .sku_type(self.sku_type(&product.sku, product.product_type))
                        .provider_name(NAME)
                        .original_json(json.as_str())
                        .price(product.price)
                        .title(product.title)
                        .description(product.description)
                        .build(),
                ),
                Err(e) => tracing::error!(error = %e, "failed to parse product data"),
            }
        }
        SkuDetailsPage::success(finish_sku_details(resolver, skus, found))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        let response = self.service.purchase_updates(start_over).await;
        if response.status != Some(RequestStatus::Successful) {
            tracing::error!(status = ?response.status, "failed to retrieve purchase updates");
            return InventoryPage::failed(self.status(response.status).await);
        }
        let purchases = response
            .receipts
            .iter()
            .filter_map(|json| match serde_json::from_str::<Receipt>(json) {
                Ok(receipt) => Some(self.new_purchase(receipt, json)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse receipt");
                    None
                }
            })
            .collect();
        InventoryPage::success(purchases, response.has_more)
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        match self.service.purchase(sku).await {
            Some(request_id) => PurchaseRequest::Pending(PendingPurchase {
                provider: NAME.to_string(),
                sku: sku.to_string(),
                sku_type,
                handle: request_id,
            }),
            None => PurchaseRequest::Failed(Status::ServiceUnavailable),
        }
    }

    async fn purchase_result(
        &self,
        _pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        let status = completion.response_code.and_then(RequestStatus::from_code);
        if status != Some(RequestStatus::Successful) || !completion.accepted {
            let translated = self.status(status).await;
            return (super::google::failed_completion(translated, completion), None);
        }
        let Some(json) = &completion.purchase_data else {
            return (Status::UnknownError, None);
        };
        match serde_json::from_str::<Receipt>(json) {
            Ok(receipt) => (Status::Success, Some(self.new_purchase(receipt, json))),
            Err(e) => {
                tracing::error!(error = %e, "failed to parse purchase receipt");
                (Status::UnknownError, None)
            }
        }
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        let Some(receipt_id) = purchase.token() else {
            return Status::ItemUnavailable;
        };
        self.service.notify_fulfillment(receipt_id).await;
        Status::Success
    }
}
