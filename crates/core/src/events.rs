use crate::models::{Purchase, SkuDetails, Status};
use crate::verification::VerificationResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupStatus {
    Success,
    /// A backend was selected and it differs from the previous one.
    ProviderChanged,
    /// A backend was selected but its user is not signed in.
    Unauthorised,
    Failed,
}

impl SetupStatus {
    /// Every status except `Failed` selects a backend.
    pub fn is_successful(&self) -> bool {
        !matches!(self, SetupStatus::Failed)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("setup status {0:?} requires a selected provider")]
    MissingProvider(SetupStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResponse {
    status: SetupStatus,
    provider: Option<String>,
}

impl SetupResponse {
    pub fn new(status: SetupStatus, provider: Option<String>) -> Result<Self, SetupError> {
        if status.is_successful() && provider.is_none() {
            return Err(SetupError::MissingProvider(status));
        }
        Ok(Self { status, provider })
    }

    pub fn failed() -> Self {
        Self {
            status: SetupStatus::Failed,
            provider: None,
        }
    }

    pub fn status(&self) -> SetupStatus {
        self.status
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuDetailsResponse {
    pub status: Status,
    pub provider: Option<String>,
    pub sku_details: Vec<SkuDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub status: Status,
    pub provider: Option<String>,
    pub purchase: Option<Purchase>,
}

impl PurchaseResponse {
    pub fn is_successful(&self) -> bool {
        self.status.is_successful() && self.purchase.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPurchase {
    pub purchase: Purchase,
    pub verification: VerificationResult,
}

/// One page of owned purchases, each paired with its verification outcome.
///
/// Entries are unique per purchase token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub status: Status,
    pub provider: Option<String>,
    pub inventory: Vec<VerifiedPurchase>,
    pub has_more: bool,
}

impl InventoryResponse {
    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }

    pub fn verification_for(&self, token: &str) -> Option<VerificationResult> {
        self.inventory
            .iter()
            .find(|entry| entry.purchase.token() == Some(token))
            .map(|entry| entry.verification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub status: Status,
    pub provider: Option<String>,
    pub purchase: Purchase,
}

/// Every response the orchestrator publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    Setup(SetupResponse),
    SkuDetails(SkuDetailsResponse),
    Purchase(PurchaseResponse),
    Inventory(InventoryResponse),
    Consume(ConsumeResponse),
}

impl BillingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BillingEvent::Setup(_) => "setup",
            BillingEvent::SkuDetails(_) => "sku_details",
            BillingEvent::Purchase(_) => "purchase",
            BillingEvent::Inventory(_) => "inventory",
            BillingEvent::Consume(_) => "consume",
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            BillingEvent::Setup(r) => r.provider(),
            BillingEvent::SkuDetails(r) => r.provider.as_deref(),
            BillingEvent::Purchase(r) => r.provider.as_deref(),
            BillingEvent::Inventory(r) => r.provider.as_deref(),
            BillingEvent::Consume(r) => r.provider.as_deref(),
        }
    }

    /// Status rendered the same way for setup and billing responses.
    pub fn status_label(&self) -> String {
        let value = match self {
            BillingEvent::Setup(r) => serde_json::to_value(r.status()),
            BillingEvent::SkuDetails(r) => serde_json::to_value(r.status),
            BillingEvent::Purchase(r) => serde_json::to_value(r.status),
            BillingEvent::Inventory(r) => serde_json::to_value(r.status),
            BillingEvent::Consume(r) => serde_json::to_value(r.status),
        };
        value
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Billing status of the event; setup events have none.
    pub fn status(&self) -> Option<Status> {
        match self {
            BillingEvent::Setup(_) => None,
            BillingEvent::SkuDetails(r) => Some(r.status),
            BillingEvent::Purchase(r) => Some(r.status),
            BillingEvent::Inventory(r) => Some(r.status),
            BillingEvent::Consume(r) => Some(r.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_setup_requires_provider() {
        assert_eq!(
            SetupResponse::new(SetupStatus::Success, None),
            Err(SetupError::MissingProvider(SetupStatus::Success))
        );
        assert!(SetupResponse::new(SetupStatus::Unauthorised, Some("Google".into())).is_ok());
        let failed = SetupResponse::new(SetupStatus::Failed, None).unwrap();
        assert!(!failed.is_successful());
    }

    #[test]
    fn status_label_uses_wire_names() {
        let event = BillingEvent::Purchase(PurchaseResponse {
            status: Status::UserCanceled,
            provider: None,
            purchase: None,
        });
        assert_eq!(event.status_label(), "USER_CANCELED");
        assert_eq!(event.event_type(), "purchase");
        assert_eq!(
            BillingEvent::Setup(SetupResponse::failed()).status_label(),
            "FAILED"
        );
    }
}
