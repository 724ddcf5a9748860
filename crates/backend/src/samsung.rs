use super::{
    finish_sku_details, google::failed_completion, BackendError, BackendOptions, BillingBackend,
    InventoryPage, PendingPurchase, PurchaseCompletion, PurchaseRequest, SkuDetailsPage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iab_core::{
    time_from_millis_opt, Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver,
    SkuType, Status,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

pub const NAME: &str = "Samsung";
pub const PACKAGE: &str = "com.sec.android.app.samsungapps";

/// Items requested per inbox or item list call.
pub const PAGE_SIZE: usize = 15;

const ITEM_TYPE_CONSUMABLE: &str = "00";
const ITEM_TYPE_NON_CONSUMABLE: &str = "01";
const ITEM_TYPE_SUBSCRIPTION: &str = "02";

#[derive(Debug, Clone, Default)]
pub struct ItemList {
    pub error_code: i64,
    /// One JSON document per item.
    pub items: Vec<String>,
}

/// Transport into Samsung in-app purchase.
///
/// List ranges are 1-based and inclusive, as the store expects.
#[async_trait]
pub trait SamsungIapService: Send + Sync {
    async fn is_installed(&self) -> bool;
    async fn installer_package(&self) -> Option<String>;
    async fn is_account_certified(&self) -> bool;
    async fn item_list(&self, group_id: &str, start: usize, end: usize) -> ItemList;
    async fn inbox_list(
        &self,
        group_id: &str,
        start: usize,
        end: usize,
        until: DateTime<Utc>,
    ) -> ItemList;
    /// Returns the payment request handle.
    async fn start_payment(&self, group_id: &str, item_id: &str) -> Option<String>;
    async fn consume_purchased_items(&self, purchase_id: &str) -> i64;
}

#[derive(Debug, Clone, Deserialize)]
struct SamsungItem {
    #[serde(rename = "mItemId")]
    item_id: String,
    #[serde(rename = "mType")]
    item_type: Option<String>,
    #[serde(rename = "mItemPriceString")]
    price: Option<String>,
    #[serde(rename = "mItemName")]
    name: Option<String>,
    #[serde(rename = "mItemDesc")]
    description: Option<String>,
    #[serde(rename = "mPurchaseId")]
    purchase_id: Option<String>,
    #[serde(rename = "mPurchaseDate")]
    purchase_date: Option<i64>,
}

/// Samsung error code to status.
///
/// `-1000` stands for both a missing account and an unavailable payment
/// service; `account_certified` tells them apart.
pub fn translate(code: i64, account_certified: bool) -> Status {
    match code {
        0 => Status::Success,
        1 => Status::UserCanceled,
        -1000 if account_certified => Status::BillingUnavailable,
        -1000 => Status::Unauthorised,
        -1001 | -1013 => Status::BillingUnavailable,
        -1002 | -1006 => Status::UnknownError,
        -1003 => Status::ItemAlreadyOwned,
        -1004 => Status::Pending,
        -1005 | -1007 | -1012 => Status::ItemUnavailable,
        -1011..=-1008 => Status::ServiceUnavailable,
        _ => Status::UnknownError,
    }
}

fn sku_type_from_wire(value: Option<&str>) -> Option<SkuType> {
    match value? {
        ITEM_TYPE_CONSUMABLE => Some(SkuType::Consumable),
        ITEM_TYPE_NON_CONSUMABLE => Some(SkuType::Entitlement),
        ITEM_TYPE_SUBSCRIPTION => Some(SkuType::Subscription),
        _ => None,
    }
}

/// Samsung adapter. Every SKU lives in one item group, taken from the resolver.
pub struct SamsungBackend<S> {
    service: S,
    options: BackendOptions,
    group_id: String,
    /// 1-based index of the next inbox page.
    next_index: Mutex<usize>,
}

impl<S: SamsungIapService> SamsungBackend<S> {
    pub fn new(service: S, options: BackendOptions) -> Result<Self, BackendError> {
        let group_id = options
            .sku_resolver
            .group_id()
            .ok_or(BackendError::MissingGroupId(NAME))?
            .to_string();
        Ok(Self {
            service,
            options,
            group_id,
            next_index: Mutex::new(1),
        })
    }

    async fn status(&self, code: i64) -> Status {
        let certified = code != -1000 || self.service.is_account_certified().await;
        translate(code, certified)
    }

    fn sku_type(&self, item: &SamsungItem) -> SkuType {
        sku_type_from_wire(item.item_type.as_deref())
            .unwrap_or_else(|| self.options.sku_resolver.resolved_type(&item.item_id))
    }

    fn new_purchase(&self, item: SamsungItem, json: &str) -> Purchase {
        let sku_type = self.sku_type(&item);
        Purchase::builder(item.item_id)
            .sku_type(sku_type)
            .provider_name(NAME)
            .original_json(json)
            .token(item.purchase_id)
            .purchase_time(time_from_millis_opt(item.purchase_date))
            .build()
    }
}

#[async_trait]
impl<S: SamsungIapService> BillingBackend for SamsungBackend<S> {
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
        self.service.is_account_certified().await
    }

    async fn check_compatibility(&self) -> Compatibility {
        match self.service.installer_package().await.as_deref() {
            Some(PACKAGE) => Compatibility::Preferred,
            _ => Compatibility::Compatible,
        }
    }

    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage {
        let resolver = self.options.sku_resolver.as_ref();
        let wanted: BTreeSet<String> = skus.iter().map(|s| resolver.resolve_or_same(s)).collect();

        // The item list cannot be filtered, so page through the whole group.
        let mut found = Vec::new();
        let mut start = 1;
        loop {
            let list = self
                .service
                .item_list(&self.group_id, start, start + PAGE_SIZE - 1)
                .await;
            if list.error_code != 0 {
                tracing::error!(code = list.error_code, "failed to retrieve item list");
                return SkuDetailsPage::failed(self.status(list.error_code).await);
            }
            let count = list.items.len();
            for json in list.items {
                match serde_json::from_str::<SamsungItem>(&json) {
                    Ok(item) if wanted.contains(&item.item_id) => found.push(
                        SkuDetails::builder(item.item_id.clone())
                            .sku_type(self.sku_type(&item))
                            .provider_name(NAME)
                            .original_json(json.as_str())
                            .price(item.price)
                            .title(item.name)
                            .description(item.description)
                            .build(),
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "failed to parse item"),
                }
            }
            if count < PAGE_SIZE {
                break;
            }
            start += PAGE_SIZE;
        }
        SkuDetailsPage::success(finish_sku_details(resolver, skus, found))
    }

    async fn inventory(&self, start_over: bool) -> InventoryPage {
        let mut next_index = self.next_index.lock().await;
        if start_over {
            *next_index = 1;
        }
        let start = *next_index;
        let list = self
            .service
            .inbox_list(&self.group_id, start, start + PAGE_SIZE - 1, Utc::now())
            .await;
        if list.error_code != 0 {
            tracing::error!(code = list.error_code, "failed to retrieve inbox");
            return InventoryPage::failed(self.status(list.error_code).await);
        }

        let has_more = list.items.len() >= PAGE_SIZE;
        let purchases = list
            .items
            .iter()
            .filter_map(|json| match serde_json::from_str::<SamsungItem>(json) {
                Ok(item) => Some(self.new_purchase(item, json)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse inbox item");
                    None
                }
            })
            .collect();
        *next_index = if has_more { start + PAGE_SIZE } else { 1 };
        InventoryPage::success(purchases, has_more)
    }

    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest {
        match self.service.start_payment(&self.group_id, sku).await {
            Some(handle) => PurchaseRequest::Pending(PendingPurchase {
                provider: NAME.to_string(),
                sku: sku.to_string(),
                sku_type,
                handle,
            }),
            None => PurchaseRequest::Failed(Status::ServiceUnavailable),
        }
    }

    async fn purchase_result(
        &self,
        _pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>) {
        let code = completion.response_code.unwrap_or(-1002);
        match (&completion.purchase_data, completion.accepted, code) {
            (Some(json), true, 0) => match serde_json::from_str::<SamsungItem>(json) {
                Ok(item) => (Status::Success, Some(self.new_purchase(item, json))),
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse payment result");
                    (Status::UnknownError, None)
                }
            },
            _ => (failed_completion(self.status(code).await, completion), None),
        }
    }

    async fn consume(&self, purchase: &Purchase) -> Status {
        let Some(purchase_id) = purchase.token() else {
            return Status::ItemUnavailable;
        };
        let code = self.service.consume_purchased_items(purchase_id).await;
        self.status(code).await
    }
}
