use anyhow::{Context, Result};
use iab_core::{Compatibility, SkuType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "trivialdrive";
const KEYCHAIN_SERVICE: &str = "trivialdrive.billing";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub auto_recover: bool,
    #[serde(default)]
    pub skip_unauthorised: bool,
    pub audit_log: Option<PathBuf>,
    /// Sled database remembering consumed purchases; in memory when unset.
    pub ledger_path: Option<PathBuf>,
    /// Stores in preference order.
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stores: vec![
                StoreConfig::new("Amazon", Compatibility::Compatible),
                StoreConfig::new("Google", Compatibility::Preferred),
            ],
            products: vec![
                ProductConfig::new("gas", "android.test.gas", SkuType::Consumable, "0.99"),
                ProductConfig::new("premium", "android.test.premium", SkuType::Entitlement, "4.99"),
                ProductConfig::new(
                    "infinite_gas",
                    "android.test.infinite_gas",
                    SkuType::Subscription,
                    "1.99",
                ),
            ],
            auto_recover: true,
            skip_unauthorised: false,
            audit_log: Some(PathBuf::from("billing-audit.jsonl")),
            ledger_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    #[serde(default = "default_compatibility")]
    pub compatibility: Compatibility,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default = "default_true")]
    pub authorised: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Simulated store round trip.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

impl StoreConfig {
    pub fn new(name: &str, compatibility: Compatibility) -> Self {
        Self {
            name: name.to_string(),
            compatibility,
            available: true,
            authorised: true,
            page_size: default_page_size(),
            latency_ms: default_latency_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfig {
    /// Store-agnostic id used by the app.
    pub sku: String,
    /// Id in the store catalog.
    pub store_sku: String,
    pub sku_type: SkuType,
    pub price: String,
}

impl ProductConfig {
    pub fn new(sku: &str, store_sku: &str, sku_type: SkuType, price: &str) -> Self {
        Self {
            sku: sku.to_string(),
            store_sku: store_sku.to_string(),
            sku_type,
            price: price.to_string(),
        }
    }
}

fn default_compatibility() -> Compatibility {
    Compatibility::Compatible
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    20
}

fn default_latency_ms() -> u64 {
    100
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn load_from(path: &Path) -> Result<AppConfig> {
    confy::load_path(path).with_context(|| format!("Failed to load app config from {}", path.display()))
}

pub fn store_to(path: &Path, cfg: &AppConfig) -> Result<()> {
    confy::store_path(path, cfg)
        .with_context(|| format!("Failed to store app config to {}", path.display()))
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

fn is_missing_entry(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<keyring::Error>(),
        Some(keyring::Error::NoEntry)
    )
}

fn verification_key_name(store: &str) -> String {
    format!("verification-key.{store}")
}

/// Base64 Ed25519 public key used to verify purchases from `store`, if one was saved.
pub fn verification_key(store: &str) -> Result<Option<String>> {
    match get_secret(&verification_key_name(store)) {
        Ok(key) => Ok(Some(key)),
        Err(e) if is_missing_entry(&e) => Ok(None),
        Err(e) => Err(e).context("Failed to read verification key"),
    }
}

pub fn store_verification_key(store: &str, key: &str) -> Result<()> {
    store_secret(&verification_key_name(store), key)
}

pub fn delete_verification_key(store: &str) -> Result<()> {
    delete_secret(&verification_key_name(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trivialdrive.toml");
        let mut cfg = AppConfig::default();
        cfg.skip_unauthorised = true;
        cfg.stores[0].available = false;

        store_to(&path, &cfg).unwrap();
        let loaded = load_from(&path).unwrap();
        assert!(loaded.skip_unauthorised);
        assert_eq!(loaded.stores, cfg.stores);
        assert_eq!(loaded.products, cfg.products);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trivialdrive.toml");
        std::fs::write(&path, "[[stores]]\nname = \"Google\"\n").unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.stores.len(), 1);
        assert_eq!(loaded.stores[0].compatibility, Compatibility::Compatible);
        assert_eq!(loaded.stores[0].page_size, 20);
        assert!(loaded.products.is_empty());
        assert!(!loaded.auto_recover);
    }

    #[test]
    fn only_a_missing_entry_means_no_key() {
        assert!(is_missing_entry(&anyhow::Error::from(keyring::Error::NoEntry)));
        let locked = anyhow::Error::from(keyring::Error::NoStorageAccess(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into(),
        ));
        assert!(!is_missing_entry(&locked));
        assert_eq!(verification_key_name("Google"), "verification-key.Google");
    }
}
