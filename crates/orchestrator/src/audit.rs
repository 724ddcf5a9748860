use anyhow::Result;
use chrono::Utc;
use iab_core::{digest::payload_digest, BillingEvent, Purchase};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub provider: Option<String>,
    pub status: String,
    pub sku: Option<String>,
    /// SHA-256 of the raw store payload, never the payload itself.
    pub payload_digest: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, status: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            provider: None,
            status: status.to_string(),
            sku: None,
            payload_digest: None,
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_purchase(mut self, purchase: &Purchase) -> Self {
        self.sku = Some(purchase.sku().to_string());
        self.payload_digest = purchase.original_json().map(payload_digest);
        self
    }

    pub fn from_event(event: &BillingEvent) -> Self {
        let mut audit = Self::new(event.event_type(), &event.status_label());
        if let Some(provider) = event.provider() {
            audit = audit.with_provider(provider);
        }
        match event {
            BillingEvent::Purchase(response) => match &response.purchase {
                Some(purchase) => audit.with_purchase(purchase),
                None => audit,
            },
            BillingEvent::Consume(response) => audit.with_purchase(&response.purchase),
            _ => audit,
        }
    }
}

/// Append-only JSONL file of published events.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type = %event.event_type, status = %event.status, "audit event written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iab_core::{ConsumeResponse, SkuType, Status};

    #[test]
    fn consume_event_records_digest_not_payload() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.jsonl"));
        let purchase = Purchase::builder("gas")
            .sku_type(SkuType::Consumable)
            .provider_name("Google")
            .original_json(r#"{"secret":"payload"}"#)
            .build();
        let event = BillingEvent::Consume(ConsumeResponse {
            status: Status::Success,
            provider: Some("Google".into()),
            purchase,
        });

        log.append(&AuditEvent::from_event(&event)).unwrap();
        log.append(&AuditEvent::from_event(&event)).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.event_type, "consume");
        assert_eq!(parsed.status, "SUCCESS");
        assert_eq!(parsed.sku.as_deref(), Some("gas"));
        assert_eq!(parsed.payload_digest.map(|d| d.len()), Some(64));
        assert!(!contents.contains("secret"));
    }
}
