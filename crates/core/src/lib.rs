//! Store-agnostic billing vocabulary: value objects, SKU resolution,
//! response events and purchase verification.

pub mod digest;
pub mod events;
pub mod models;
pub mod sku;
pub mod verification;

pub use events::{
    BillingEvent, ConsumeResponse, InventoryResponse, PurchaseResponse, SetupError,
    SetupResponse, SetupStatus, SkuDetailsResponse, VerifiedPurchase,
};
pub use models::{
    time_from_millis, time_from_millis_opt, Compatibility, Purchase, PurchaseBuilder, SkuDetails,
    SkuDetailsBuilder, SkuType, Status,
};
pub use sku::{DefaultSkuResolver, GroupedSkuResolver, MapSkuResolver, SkuResolver};
pub use verification::{
    AlwaysSuccessVerifier, Ed25519PurchaseVerifier, PurchaseVerifier, VerificationResult,
};
