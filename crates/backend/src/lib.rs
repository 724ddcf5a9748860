//! The contract every store adapter implements, plus the adapters themselves.
//!
//! Adapters own the translation of vendor results into [`Status`] and the
//! shared billing models. The low-level store transport behind each adapter is
//! an injected service trait.

use async_trait::async_trait;
use iab_core::{
    AlwaysSuccessVerifier, Compatibility, Purchase, PurchaseVerifier, SkuDetails, SkuResolver,
    SkuType, Status,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod amazon;
pub mod google;
pub mod google_types;
pub mod mock;
pub mod openstore;
pub mod samsung;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuDetailsPage {
    pub status: Status,
    pub sku_details: Vec<SkuDetails>,
}

impl SkuDetailsPage {
    pub fn success(sku_details: Vec<SkuDetails>) -> Self {
        Self {
            status: Status::Success,
            sku_details,
        }
    }

    pub fn failed(status: Status) -> Self {
        Self {
            status,
            sku_details: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryPage {
    pub status: Status,
    pub purchases: Vec<Purchase>,
    /// More pages remain on the store side.
    pub has_more: bool,
}

impl InventoryPage {
    pub fn success(purchases: Vec<Purchase>, has_more: bool) -> Self {
        Self {
            status: Status::Success,
            purchases,
            has_more,
        }
    }

    pub fn failed(status: Status) -> Self {
        Self {
            status,
            purchases: Vec::new(),
            has_more: false,
        }
    }
}

/// Handle for a purchase waiting on an external payment UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPurchase {
    pub provider: String,
    /// Concrete store SKU.
    pub sku: String,
    pub sku_type: SkuType,
    /// Opaque vendor handle, e.g. a buy intent or request id.
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseRequest {
    Pending(PendingPurchase),
    Failed(Status),
}

/// Raw result delivered by the payment UI once the user is done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCompletion {
    /// The UI step finished normally rather than being dismissed.
    pub accepted: bool,
    pub response_code: Option<i64>,
    pub purchase_data: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0} backend requires a SKU resolver")]
    MissingSkuResolver(&'static str),
    #[error("{0} backend requires a SKU resolver with a group id")]
    MissingGroupId(&'static str),
}

#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Unique name, also stamped on every model this backend produces.
    fn name(&self) -> &str;

    fn sku_resolver(&self) -> &dyn SkuResolver;

    fn purchase_verifier(&self) -> &dyn PurchaseVerifier;

    /// Whether the store client is installed or reachable.
    async fn is_available(&self) -> bool;

    /// Whether the store's user account is signed in.
    async fn is_authorised(&self) -> bool {
        true
    }

    async fn check_compatibility(&self) -> Compatibility;

    /// Details for abstract SKUs. On success every requested SKU is present,
    /// unknown ones as placeholders.
    async fn sku_details(&self, skus: &BTreeSet<String>) -> SkuDetailsPage;

    /// Owned purchases, one page at a time. `start_over` drops any stored cursor.
    async fn inventory(&self, start_over: bool) -> InventoryPage;

    /// Starts buying a concrete SKU.
    async fn purchase(&self, sku: &str, sku_type: SkuType) -> PurchaseRequest;

    /// Translates what the payment UI handed back for `pending`.
    async fn purchase_result(
        &self,
        pending: &PendingPurchase,
        completion: &PurchaseCompletion,
    ) -> (Status, Option<Purchase>);

    async fn consume(&self, purchase: &Purchase) -> Status;
}

/// Resolver and verifier every adapter is built with.
#[derive(Clone)]
pub struct BackendOptions {
    pub sku_resolver: Arc<dyn SkuResolver>,
    pub purchase_verifier: Arc<dyn PurchaseVerifier>,
}

impl BackendOptions {
    pub fn builder() -> BackendOptionsBuilder {
        BackendOptionsBuilder::default()
    }
}

#[derive(Default)]
pub struct BackendOptionsBuilder {
    sku_resolver: Option<Arc<dyn SkuResolver>>,
    purchase_verifier: Option<Arc<dyn PurchaseVerifier>>,
}

impl BackendOptionsBuilder {
    pub fn sku_resolver(mut self, resolver: impl SkuResolver + 'static) -> Self {
        self.sku_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn shared_sku_resolver(mut self, resolver: Arc<dyn SkuResolver>) -> Self {
        self.sku_resolver = Some(resolver);
        self
    }

    pub fn purchase_verifier(mut self, verifier: impl PurchaseVerifier + 'static) -> Self {
        self.purchase_verifier = Some(Arc::new(verifier));
        self
    }

    /// Fails when no resolver was set; the verifier defaults to accepting everything.
    pub fn build(self, backend: &'static str) -> Result<BackendOptions, BackendError> {
        let sku_resolver = self
            .sku_resolver
            .ok_or(BackendError::MissingSkuResolver(backend))?;
        Ok(BackendOptions {
            sku_resolver,
            purchase_verifier: self
                .purchase_verifier
                .unwrap_or_else(|| Arc::new(AlwaysSuccessVerifier)),
        })
    }
}

/// Appends a placeholder for every requested SKU missing from `details`.
pub fn fill_placeholders(requested: &BTreeSet<String>, mut details: Vec<SkuDetails>) -> Vec<SkuDetails> {
    let found: BTreeSet<String> = details.iter().map(|d| d.sku().to_string()).collect();
    details.extend(
        requested
            .iter()
            .filter(|sku| !found.contains(*sku))
            .map(SkuDetails::placeholder),
    );
    details
}

/// Re-keys store details by abstract SKU and fills the gaps.
pub(crate) fn finish_sku_details(
    resolver: &dyn SkuResolver,
    requested: &BTreeSet<String>,
    found: Vec<SkuDetails>,
) -> Vec<SkuDetails> {
    let reverted = found
        .into_iter()
        .map(|d| {
            let sku = resolver.revert(d.sku());
            d.with_sku(sku)
        })
        .filter(|d| requested.contains(d.sku()))
        .collect();
    fill_placeholders(requested, reverted)
}
