use crate::audit::AuditLog;
use crate::error::BillingError;
use crate::launcher::{LoggingLauncher, PurchaseLauncher};
use crate::listener::BillingListener;
use backend::BillingBackend;
use std::sync::Arc;

/// Everything the engine needs, fixed before it starts.
///
/// Backends are kept in registration order, which is also the fallback order
/// when several backends rank the same.
pub struct Configuration {
    backends: Vec<Arc<dyn BillingBackend>>,
    listener: Option<Arc<dyn BillingListener>>,
    launcher: Arc<dyn PurchaseLauncher>,
    auto_recover: bool,
    skip_unauthorised: bool,
    audit_log: Option<AuditLog>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn backends(&self) -> &[Arc<dyn BillingBackend>] {
        &self.backends
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<dyn BillingBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn listener(&self) -> Option<&Arc<dyn BillingListener>> {
        self.listener.as_ref()
    }

    pub fn launcher(&self) -> &dyn PurchaseLauncher {
        self.launcher.as_ref()
    }

    pub fn auto_recover(&self) -> bool {
        self.auto_recover
    }

    pub fn skip_unauthorised(&self) -> bool {
        self.skip_unauthorised
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit_log.as_ref()
    }
}

pub struct ConfigurationBuilder {
    backends: Vec<Arc<dyn BillingBackend>>,
    listener: Option<Arc<dyn BillingListener>>,
    launcher: Arc<dyn PurchaseLauncher>,
    auto_recover: bool,
    skip_unauthorised: bool,
    audit_log: Option<AuditLog>,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            listener: None,
            launcher: Arc::new(LoggingLauncher),
            auto_recover: false,
            skip_unauthorised: false,
            audit_log: None,
        }
    }
}

impl ConfigurationBuilder {
    pub fn add_backend(self, backend: impl BillingBackend + 'static) -> Self {
        self.add_shared_backend(Arc::new(backend))
    }

    /// Backends are unique by name; a second registration is ignored.
    pub fn add_shared_backend(mut self, backend: Arc<dyn BillingBackend>) -> Self {
        if self.backends.iter().any(|b| b.name() == backend.name()) {
            tracing::warn!(provider = %backend.name(), "duplicate billing backend ignored");
        } else {
            self.backends.push(backend);
        }
        self
    }

    pub fn listener(mut self, listener: Arc<dyn BillingListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn PurchaseLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn auto_recover(mut self, auto_recover: bool) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    pub fn skip_unauthorised(mut self, skip_unauthorised: bool) -> Self {
        self.skip_unauthorised = skip_unauthorised;
        self
    }

    pub fn audit_log(mut self, audit_log: AuditLog) -> Self {
        self.audit_log = Some(audit_log);
        self
    }

    pub fn build(self) -> Result<Configuration, BillingError> {
        if self.backends.is_empty() {
            return Err(BillingError::NoBackends);
        }
        Ok(Configuration {
            backends: self.backends,
            listener: self.listener,
            launcher: self.launcher,
            auto_recover: self.auto_recover,
            skip_unauthorised: self.skip_unauthorised,
            audit_log: self.audit_log,
        })
    }
}
