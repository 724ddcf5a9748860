//! Drives the active billing backend: setup and backend selection, the
//! single-flight purchase flow, inventory verification, and event delivery.

pub mod audit;
pub mod configuration;
pub mod engine;
pub mod error;
pub mod launcher;
pub mod ledger;
pub mod listener;

pub use audit::{AuditEvent, AuditLog};
pub use configuration::{Configuration, ConfigurationBuilder};
pub use engine::{select_backend, BillingHelper, SubscriptionId};
pub use error::BillingError;
pub use launcher::{ChannelLauncher, LoggingLauncher, PurchaseLauncher};
pub use ledger::{ConsumeLedger, InMemoryLedger, SledLedger};
pub use listener::{BillingListener, DefaultBillingListener};
