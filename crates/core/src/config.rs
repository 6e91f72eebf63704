//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into the lifecycle manager. Request handling never reads process-wide environment
//! variables.

use crate::{CoreError, CoreResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    event_service_url: String,
    xds_domain_key: String,
    patient_id_root: String,
    dsub_broker_url: String,
    dsub_consumer_url: String,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Arguments
    ///
    /// * `event_service_url` - Base of the back-reference written on inline-reference parts.
    /// * `xds_domain_key` - Cross-reference key whose local id is the home community id.
    /// * `patient_id_root` - OID of the patient identifier domain.
    /// * `dsub_broker_url` - Notification broker endpoint (may be empty when no broker is used).
    /// * `dsub_consumer_url` - Endpoint the broker notifies (may be empty when no broker is used).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if any of the first three values is blank.
    pub fn new(
        event_service_url: String,
        xds_domain_key: String,
        patient_id_root: String,
        dsub_broker_url: String,
        dsub_consumer_url: String,
    ) -> CoreResult<Self> {
        for (name, value) in [
            ("event_service_url", &event_service_url),
            ("xds_domain_key", &xds_domain_key),
            ("patient_id_root", &patient_id_root),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!("{name} cannot be empty")));
            }
        }

        Ok(Self {
            event_service_url: event_service_url.trim().trim_end_matches('?').to_string(),
            xds_domain_key: xds_domain_key.trim().to_string(),
            patient_id_root: patient_id_root.trim().to_string(),
            dsub_broker_url: dsub_broker_url.trim().to_string(),
            dsub_consumer_url: dsub_consumer_url.trim().to_string(),
        })
    }

    pub fn event_service_url(&self) -> &str {
        &self.event_service_url
    }

    pub fn xds_domain_key(&self) -> &str {
        &self.xds_domain_key
    }

    pub fn patient_id_root(&self) -> &str {
        &self.patient_id_root
    }

    pub fn dsub_broker_url(&self) -> &str {
        &self.dsub_broker_url
    }

    pub fn dsub_consumer_url(&self) -> &str {
        &self.dsub_consumer_url
    }

    /// Deterministic back-reference to an event in the event service.
    pub fn event_reference(&self, event_id: u64) -> String {
        format!("{}?act=events&id={event_id}", self.event_service_url)
    }
}

/// Use `value` if it is present and not blank, otherwise `default`.
pub fn value_or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
