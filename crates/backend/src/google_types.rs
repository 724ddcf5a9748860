//! Payload shapes shared by Google Play and OpenStore, whose billing services
//! speak the same bundle protocol.

use iab_core::{time_from_millis_opt, SkuType};
use serde::Deserialize;

/// Numeric response codes of the bundle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    UserCanceled,
    ServiceUnavailable,
    BillingUnavailable,
    ItemUnavailable,
    DeveloperError,
    Error,
    ItemAlreadyOwned,
    ItemNotOwned,
}

impl ResponseCode {
    pub fn from_code(code: i64) -> Option<Self> {
        let code = match code {
            0 => ResponseCode::Ok,
            1 => ResponseCode::UserCanceled,
            2 => ResponseCode::ServiceUnavailable,
            3 => ResponseCode::BillingUnavailable,
            4 => ResponseCode::ItemUnavailable,
            5 => ResponseCode::DeveloperError,
            6 => ResponseCode::Error,
            7 => ResponseCode::ItemAlreadyOwned,
            8 => ResponseCode::ItemNotOwned,
            _ => return None,
        };
        Some(code)
    }

    pub fn parse(code: Option<i64>) -> Option<Self> {
        code.and_then(Self::from_code)
    }
}

/// Catalog a product lives in on the store side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// Consumables and entitlements share one catalog.
    InApp,
    Subscription,
}

impl ItemType {
    pub fn from_sku_type(sku_type: SkuType) -> Option<Self> {
        match sku_type {
            SkuType::Consumable | SkuType::Entitlement => Some(ItemType::InApp),
            SkuType::Subscription => Some(ItemType::Subscription),
            SkuType::Unknown => None,
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "inapp" => Some(ItemType::InApp),
            "subs" => Some(ItemType::Subscription),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ItemType::InApp => "inapp",
            ItemType::Subscription => "subs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseState {
    Purchased,
    Canceled,
    Refunded,
}

impl PurchaseState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PurchaseState::Purchased),
            1 => Some(PurchaseState::Canceled),
            2 => Some(PurchaseState::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkuDetailsBundle {
    pub response_code: Option<i64>,
    /// One JSON document per product.
    pub details: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct PurchasesBundle {
    pub response_code: Option<i64>,
    pub items: Option<Vec<String>>,
    pub data: Option<Vec<String>>,
    pub signatures: Option<Vec<String>>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuyIntentBundle {
    pub response_code: Option<i64>,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub product_id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub price: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseData {
    pub order_id: Option<String>,
    pub package_name: Option<String>,
    pub product_id: String,
    pub purchase_time: Option<i64>,
    #[serde(default)]
    pub purchase_state: i64,
    pub developer_payload: Option<String>,
    pub purchase_token: Option<String>,
}

impl PurchaseData {
    pub fn state(&self) -> Option<PurchaseState> {
        PurchaseState::from_code(self.purchase_state)
    }

    pub fn purchased_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        time_from_millis_opt(self.purchase_time)
    }
}

/// Malformed bundle, distinct from a bundle that simply holds no purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MismatchedLists;

/// Pairs purchase documents with their signatures.
///
/// Absent lists mean an empty inventory; lists shorter than the data list mean
/// the bundle is corrupt.
pub fn unpack_purchases(bundle: &PurchasesBundle) -> Result<Vec<(String, String)>, MismatchedLists> {
    let (Some(items), Some(data), Some(signatures)) =
        (&bundle.items, &bundle.data, &bundle.signatures)
    else {
        return Ok(Vec::new());
    };
    if items.len() < data.len() || signatures.len() < data.len() {
        return Err(MismatchedLists);
    }
    Ok(data
        .iter()
        .cloned()
        .zip(signatures.iter().cloned())
        .collect())
}

pub fn continuation(bundle: &PurchasesBundle) -> Option<String> {
    bundle
        .continuation_token
        .clone()
        .filter(|token| !token.is_empty())
}
