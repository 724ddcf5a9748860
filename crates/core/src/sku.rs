use crate::models::SkuType;
use std::collections::HashMap;

/// Maps store-agnostic SKU ids to the ids a particular store knows about.
pub trait SkuResolver: Send + Sync {
    /// Concrete store SKU for an abstract one, `None` if nothing was registered.
    fn resolve(&self, sku: &str) -> Option<String>;

    /// Abstract SKU for a concrete one. Unknown ids map to themselves.
    fn revert(&self, resolved: &str) -> String;

    /// `Unknown` unless a type was registered for the abstract SKU.
    fn resolve_type(&self, sku: &str) -> SkuType;

    /// Catalog partition some stores require next to the SKU.
    fn group_id(&self) -> Option<&str> {
        None
    }

    /// Type of a concrete store SKU.
    fn resolved_type(&self, resolved: &str) -> SkuType {
        self.resolve_type(&self.revert(resolved))
    }

    /// Concrete SKU, falling back to the abstract id for stores that share ids.
    fn resolve_or_same(&self, sku: &str) -> String {
        self.resolve(sku).unwrap_or_else(|| sku.to_string())
    }
}

/// Identity resolver for apps that use store ids directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSkuResolver;

impl SkuResolver for DefaultSkuResolver {
    fn resolve(&self, sku: &str) -> Option<String> {
        Some(sku.to_string())
    }

    fn revert(&self, resolved: &str) -> String {
        resolved.to_string()
    }

    fn resolve_type(&self, _sku: &str) -> SkuType {
        SkuType::Unknown
    }
}

#[derive(Debug, Clone)]
struct Entry {
    resolved: String,
    sku_type: SkuType,
}

/// Flat lookup table with an explicit type per entry.
#[derive(Debug, Clone, Default)]
pub struct MapSkuResolver {
    entries: HashMap<String, Entry>,
    reverse: HashMap<String, String>,
}

impl MapSkuResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping. Re-registering an abstract SKU replaces the old entry.
    pub fn add(
        &mut self,
        sku: impl Into<String>,
        resolved: impl Into<String>,
        sku_type: SkuType,
    ) -> &mut Self {
        let sku = sku.into();
        let resolved = resolved.into();
        if let Some(previous) = self.entries.get(&sku) {
            if self.reverse.get(&previous.resolved) == Some(&sku) {
                self.reverse.remove(&previous.resolved);
            }
        }
        self.reverse.insert(resolved.clone(), sku.clone());
        self.entries.insert(sku, Entry { resolved, sku_type });
        self
    }

    pub fn with(mut self, sku: &str, resolved: &str, sku_type: SkuType) -> Self {
        self.add(sku, resolved, sku_type);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SkuResolver for MapSkuResolver {
    fn resolve(&self, sku: &str) -> Option<String> {
        self.entries.get(sku).map(|e| e.resolved.clone())
    }

    fn revert(&self, resolved: &str) -> String {
        self.reverse
            .get(resolved)
            .cloned()
            .unwrap_or_else(|| resolved.to_string())
    }

    fn resolve_type(&self, sku: &str) -> SkuType {
        self.entries
            .get(sku)
            .map(|e| e.sku_type)
            .unwrap_or(SkuType::Unknown)
    }
}

/// Typed lookup table bound to a store catalog group.
#[derive(Debug, Clone)]
pub struct GroupedSkuResolver {
    group_id: String,
    inner: MapSkuResolver,
}

impl GroupedSkuResolver {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            inner: MapSkuResolver::new(),
        }
    }

    pub fn add(
        &mut self,
        sku: impl Into<String>,
        resolved: impl Into<String>,
        sku_type: SkuType,
    ) -> &mut Self {
        self.inner.add(sku, resolved, sku_type);
        self
    }

    pub fn with(mut self, sku: &str, resolved: &str, sku_type: SkuType) -> Self {
        self.inner.add(sku, resolved, sku_type);
        self
    }
}

impl SkuResolver for GroupedSkuResolver {
    fn resolve(&self, sku: &str) -> Option<String> {
        self.inner.resolve(sku)
    }

    fn revert(&self, resolved: &str) -> String {
        self.inner.revert(resolved)
    }

    fn resolve_type(&self, sku: &str) -> SkuType {
        self.inner.resolve_type(sku)
    }

    fn group_id(&self) -> Option<&str> {
        Some(&self.group_id)
    }
}
