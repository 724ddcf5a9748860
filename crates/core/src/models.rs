use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Purchase classification shared by every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkuType {
    Consumable,
    Entitlement,
    Subscription,
    #[default]
    Unknown,
}

/// Outcome of any billing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    UserCanceled,
    ItemUnavailable,
    ItemAlreadyOwned,
    Unauthorised,
    ServiceUnavailable,
    BillingUnavailable,
    UnknownError,
    /// Another purchase flow is already in flight.
    Pending,
    /// No backend could be selected during setup.
    NoBillingProvider,
}

impl Status {
    pub fn is_successful(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Statuses after which a different backend may be a better choice.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Status::ServiceUnavailable | Status::BillingUnavailable)
    }
}

/// A backend's fitness for the running app.
///
/// Ordering follows preference, so `max` picks the best candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compatibility {
    Incompatible,
    Compatible,
    /// The backend's store installed this app.
    Preferred,
}

/// Details of a product as reported by a store.
///
/// Equality only looks at sku, type, provider and raw payload; price, title and
/// description are presentation data derived from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuDetails {
    sku: String,
    sku_type: SkuType,
    provider_name: Option<String>,
    original_json: Option<String>,
    price: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

impl SkuDetails {
    /// Placeholder for a SKU the store returned nothing for.
    pub fn placeholder(sku: impl Into<String>) -> Self {
        SkuDetailsBuilder::new(sku).build()
    }

    pub fn builder(sku: impl Into<String>) -> SkuDetailsBuilder {
        SkuDetailsBuilder::new(sku)
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn sku_type(&self) -> SkuType {
        self.sku_type
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn original_json(&self) -> Option<&str> {
        self.original_json.as_deref()
    }

    pub fn price(&self) -> Option<&str> {
        self.price.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True when the store reported nothing for this SKU.
    pub fn is_placeholder(&self) -> bool {
        self.original_json.is_none() && self.provider_name.is_none()
    }

    /// Same details under a different SKU id, e.g. reverted to the abstract id.
    pub fn with_sku(&self, sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            ..self.clone()
        }
    }
}

impl PartialEq for SkuDetails {
    fn eq(&self, other: &Self) -> bool {
        self.sku == other.sku
            && self.sku_type == other.sku_type
            && self.provider_name == other.provider_name
            && self.original_json == other.original_json
    }
}

impl Eq for SkuDetails {}

impl Hash for SkuDetails {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sku.hash(state);
        self.sku_type.hash(state);
        self.provider_name.hash(state);
        self.original_json.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct SkuDetailsBuilder {
    sku: String,
    sku_type: SkuType,
    provider_name: Option<String>,
    original_json: Option<String>,
    price: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

impl SkuDetailsBuilder {
    pub fn new(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            sku_type: SkuType::Unknown,
            provider_name: None,
            original_json: None,
            price: None,
            title: None,
            description: None,
        }
    }

    pub fn sku_type(mut self, sku_type: SkuType) -> Self {
        self.sku_type = sku_type;
        self
    }

    pub fn provider_name(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    pub fn original_json(mut self, original_json: impl Into<String>) -> Self {
        self.original_json = Some(original_json.into());
        self
    }

    pub fn price(mut self, price: Option<String>) -> Self {
        self.price = price;
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn build(self) -> SkuDetails {
        SkuDetails {
            sku: self.sku,
            sku_type: self.sku_type,
            provider_name: self.provider_name,
            original_json: self.original_json,
            price: self.price,
            title: self.title,
            description: self.description,
        }
    }
}

/// A purchase reported by a store, optionally signed.
///
/// A purchase carrying a signature is what the stores call a signed purchase;
/// verifiers check `signature` against `original_json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Purchase {
    sku: String,
    sku_type: SkuType,
    provider_name: Option<String>,
    original_json: Option<String>,
    token: Option<String>,
    purchase_time: Option<DateTime<Utc>>,
    canceled: bool,
    signature: Option<String>,
}

impl Purchase {
    pub fn builder(sku: impl Into<String>) -> PurchaseBuilder {
        PurchaseBuilder::new(sku)
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn sku_type(&self) -> SkuType {
        self.sku_type
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn original_json(&self) -> Option<&str> {
        self.original_json.as_deref()
    }

    /// Opaque handle used to consume or acknowledge the purchase.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn purchase_time(&self) -> Option<DateTime<Utc>> {
        self.purchase_time
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Only consumables may be consumed.
    pub fn is_consumable(&self) -> bool {
        self.sku_type == SkuType::Consumable
    }

    pub fn with_sku(&self, sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseBuilder {
    sku: String,
    sku_type: SkuType,
    provider_name: Option<String>,
    original_json: Option<String>,
    token: Option<String>,
    purchase_time: Option<DateTime<Utc>>,
    canceled: bool,
    signature: Option<String>,
}

impl PurchaseBuilder {
    pub fn new(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            sku_type: SkuType::Unknown,
            provider_name: None,
            original_json: None,
            token: None,
            purchase_time: None,
            canceled: false,
            signature: None,
        }
    }

    /// Copies type, provider and raw payload from an existing purchase.
    pub fn base(mut self, purchase: &Purchase) -> Self {
        self.sku_type = purchase.sku_type;
        self.provider_name = purchase.provider_name.clone();
        self.original_json = purchase.original_json.clone();
        self
    }

    pub fn sku_type(mut self, sku_type: SkuType) -> Self {
        self.sku_type = sku_type;
        self
    }

    pub fn provider_name(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    pub fn original_json(mut self, original_json: impl Into<String>) -> Self {
        self.original_json = Some(original_json.into());
        self
    }

    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn purchase_time(mut self, purchase_time: Option<DateTime<Utc>>) -> Self {
        self.purchase_time = purchase_time;
        self
    }

    pub fn canceled(mut self, canceled: bool) -> Self {
        self.canceled = canceled;
        self
    }

    pub fn signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn build(self) -> Purchase {
        Purchase {
            sku: self.sku,
            sku_type: self.sku_type,
            provider_name: self.provider_name,
            original_json: self.original_json,
            token: self.token,
            purchase_time: self.purchase_time,
            canceled: self.canceled,
            signature: self.signature,
        }
    }
}

/// Converts store timestamps given in milliseconds since the epoch.
pub fn time_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

pub fn time_from_millis_opt(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(time_from_millis)
}
