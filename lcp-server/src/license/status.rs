//! License lifecycle state machine and status-document synthesis.
//!
//! States: `ready → active → {returned, expired, revoked}`, plus
//! `ready → cancelled` and `ready → revoked` through the revoke operation.
//! `expired` is never written: it is derived at read time from the end date,
//! and a renew (when permitted) or a revoke moves the stored row past it.
//!
//! Every mutation runs read-validate-mutate-append inside one store
//! transaction, so concurrent requests against the same license serialize
//! and the journal can never disagree with the row.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::template;
use super::types::{
    Event, EventType, LICENSE_MIME, LicenseInfo, LicenseStatus, Link, PotentialRights,
    STATUS_MIME, StatusDocument, Updated,
};
use crate::store::{Store, StoreError};

/// Device `id` and `name` query parameters are bounded to this many octets.
pub const MAX_DEVICE_PARAM: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("license not found")]
    NotFound,
    #[error("forbidden transition: {0}")]
    Forbidden(String),
    #[error("bad end date: {0}")]
    BadEnd(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Opaque reading-system identity supplied by the client.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
}

impl Device {
    /// Both parameters are required and 1..=255 octets.
    pub fn validate(id: Option<String>, name: Option<String>) -> Result<Device, String> {
        let id = id.unwrap_or_default();
        let name = name.unwrap_or_default();
        if id.is_empty() || id.len() > MAX_DEVICE_PARAM {
            return Err(format!(
                "device id must be 1..={MAX_DEVICE_PARAM} octets"
            ));
        }
        if name.is_empty() || name.len() > MAX_DEVICE_PARAM {
            return Err(format!(
                "device name must be 1..={MAX_DEVICE_PARAM} octets"
            ));
        }
        Ok(Device { id, name })
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Public base URL, no trailing slash.
    pub public_base_url: String,
    /// Fresh-license URI template with `{license_id}`.
    pub fresh_license_link: String,
    /// External renew URI template with `{license_id}`, if any.
    pub renew_link: Option<String>,
    pub allow_renew_on_expired: bool,
    pub renew_default_days: i64,
    pub renew_max_days: i64,
}

/// Orchestrates register/renew/return/revoke and computes status documents.
pub struct StatusController {
    store: Arc<Store>,
    config: StatusConfig,
}

/// Read-time status: a stored `ready`/`active` row whose end date has passed
/// reports `expired` without being touched.
pub fn effective_status(info: &LicenseInfo, now: DateTime<Utc>) -> LicenseStatus {
    match info.status {
        LicenseStatus::Ready | LicenseStatus::Active => match info.end {
            Some(end) if end <= now => LicenseStatus::Expired,
            _ => info.status,
        },
        other => other,
    }
}

impl StatusController {
    pub fn new(store: Arc<Store>, config: StatusConfig) -> Self {
        StatusController { store, config }
    }

    /// `GET /status/{id}` — pure read.
    pub fn status(&self, license_id: &str) -> Result<StatusDocument, StatusError> {
        let now = Utc::now();
        self.store.view(|s| {
            let info = s
                .licenses()
                .get(license_id)?
                .ok_or(StatusError::NotFound)?;
            let events = s.events().list(license_id)?;
            Ok(self.synthesize(&info, events, now))
        })
    }

    /// Register a device. Idempotent per `(license, device)`: a re-register
    /// returns the current document without touching row or journal.
    pub fn register(&self, license_id: &str, device: &Device) -> Result<StatusDocument, StatusError> {
        let now = Utc::now();
        self.store.in_transaction(|s| {
            let mut info = s
                .licenses()
                .get(license_id)?
                .ok_or(StatusError::NotFound)?;
            match effective_status(&info, now) {
                LicenseStatus::Ready | LicenseStatus::Active => {}
                other => {
                    return Err(StatusError::Forbidden(format!(
                        "cannot register a device on a {other} license"
                    )));
                }
            }

            if s
                .events()
                .get_register_by_device(license_id, &device.id)?
                .is_none()
            {
                info.device_count += 1;
                info.status = LicenseStatus::Active;
                info.status_updated = Some(now);
                s.licenses().update(&info)?;
                s.events().create(&Event {
                    license_id: license_id.to_string(),
                    event_type: EventType::Register,
                    device_id: device.id.clone(),
                    device_name: device.name.clone(),
                    timestamp: now,
                })?;
                tracing::info!(
                    license = license_id,
                    device = %device.id,
                    devices = info.device_count,
                    "device registered"
                );
            }

            let events = s.events().list(license_id)?;
            Ok(self.synthesize(&info, events, now))
        })
    }

    /// Extend the end date. Requires a previously registered device and an
    /// existing end date; an explicit request is clamped to `max_end`.
    pub fn renew(
        &self,
        license_id: &str,
        device: &Device,
        requested_end: Option<DateTime<Utc>>,
    ) -> Result<StatusDocument, StatusError> {
        let now = Utc::now();
        self.store.in_transaction(|s| {
            let mut info = s
                .licenses()
                .get(license_id)?
                .ok_or(StatusError::NotFound)?;
            let current_end = info.end.ok_or_else(|| {
                StatusError::Forbidden("license has no end date to renew".into())
            })?;
            match effective_status(&info, now) {
                LicenseStatus::Active => {}
                LicenseStatus::Expired if self.config.allow_renew_on_expired => {}
                other => {
                    return Err(StatusError::Forbidden(format!(
                        "cannot renew a {other} license"
                    )));
                }
            }
            if s
                .events()
                .get_register_by_device(license_id, &device.id)?
                .is_none()
            {
                return Err(StatusError::Forbidden(
                    "device was never registered on this license".into(),
                ));
            }

            let mut new_end = match requested_end {
                Some(end) => {
                    // Tolerate sub-second clock skew, nothing more: a renew
                    // must not shorten the loan.
                    if end <= current_end - Duration::seconds(1) {
                        return Err(StatusError::BadEnd(format!(
                            "requested end {end} precedes the current end {current_end}"
                        )));
                    }
                    end
                }
                None => now + Duration::days(self.config.renew_default_days),
            };
            if let Some(max_end) = info.max_end {
                if new_end > max_end {
                    tracing::info!(
                        license = license_id,
                        requested = %new_end,
                        ceiling = %max_end,
                        "renew clamped to ceiling"
                    );
                    new_end = max_end;
                }
            }

            info.end = Some(new_end);
            info.status = LicenseStatus::Active;
            info.updated_at = Some(now);
            info.status_updated = Some(now);
            s.licenses().update(&info)?;
            s.events().create(&Event {
                license_id: license_id.to_string(),
                event_type: EventType::Renew,
                device_id: device.id.clone(),
                device_name: device.name.clone(),
                timestamp: now,
            })?;

            let events = s.events().list(license_id)?;
            Ok(self.synthesize(&info, events, now))
        })
    }

    /// Return the loan early: the end date collapses to now.
    pub fn return_license(
        &self,
        license_id: &str,
        device: &Device,
    ) -> Result<StatusDocument, StatusError> {
        let now = Utc::now();
        self.store.in_transaction(|s| {
            let mut info = s
                .licenses()
                .get(license_id)?
                .ok_or(StatusError::NotFound)?;
            info.end.ok_or_else(|| {
                StatusError::Forbidden("license has no end date to return against".into())
            })?;
            // An active status here implies end > now; a past end would have
            // read as expired.
            match effective_status(&info, now) {
                LicenseStatus::Active => {}
                other => {
                    return Err(StatusError::Forbidden(format!(
                        "cannot return a {other} license"
                    )));
                }
            }
            if s
                .events()
                .get_register_by_device(license_id, &device.id)?
                .is_none()
            {
                return Err(StatusError::Forbidden(
                    "device was never registered on this license".into(),
                ));
            }

            info.status = LicenseStatus::Returned;
            info.end = Some(now);
            info.status_updated = Some(now);
            s.licenses().update(&info)?;
            s.events().create(&Event {
                license_id: license_id.to_string(),
                event_type: EventType::Return,
                device_id: device.id.clone(),
                device_name: device.name.clone(),
                timestamp: now,
            })?;

            let events = s.events().list(license_id)?;
            Ok(self.synthesize(&info, events, now))
        })
    }

    /// Provider-side kill switch. A `ready` license is cancelled, a live or
    /// expired one revoked; a second call is idempotent and changes nothing.
    pub fn revoke(&self, license_id: &str) -> Result<StatusDocument, StatusError> {
        let now = Utc::now();
        self.store.in_transaction(|s| {
            let mut info = s
                .licenses()
                .get(license_id)?
                .ok_or(StatusError::NotFound)?;

            let (status, event_type) = match effective_status(&info, now) {
                LicenseStatus::Ready => (LicenseStatus::Cancelled, EventType::Cancel),
                LicenseStatus::Active | LicenseStatus::Expired => {
                    (LicenseStatus::Revoked, EventType::Revoke)
                }
                _terminal => {
                    let events = s.events().list(license_id)?;
                    return Ok(self.synthesize(&info, events, now));
                }
            };

            info.status = status;
            info.end = Some(now);
            info.status_updated = Some(now);
            s.licenses().update(&info)?;
            s.events().create(&Event {
                license_id: license_id.to_string(),
                event_type,
                device_id: String::new(),
                device_name: String::new(),
                timestamp: now,
            })?;
            tracing::info!(license = license_id, status = %status, "license revoked");

            let events = s.events().list(license_id)?;
            Ok(self.synthesize(&info, events, now))
        })
    }

    /// Renew ceiling for a newly created license without an explicit one.
    pub fn default_max_end(&self, end: DateTime<Utc>) -> DateTime<Utc> {
        end + Duration::days(self.config.renew_max_days)
    }

    /// Derive a status document from persistent state. Never stored.
    fn synthesize(
        &self,
        info: &LicenseInfo,
        events: Vec<Event>,
        now: DateTime<Utc>,
    ) -> StatusDocument {
        let status = effective_status(info, now);
        let message = if status == LicenseStatus::Expired {
            format!(
                "The license has expired on {}",
                info.end.map(|e| e.to_rfc2822()).unwrap_or_default()
            )
        } else {
            format!("The license is in {status} state")
        };

        let updated_license = info.updated_at.unwrap_or(info.created_at);
        let updated_status = info.status_updated.unwrap_or(updated_license);

        let potential_rights = matches!(status, LicenseStatus::Ready | LicenseStatus::Active)
            .then_some(info.max_end)
            .flatten()
            .map(|end| PotentialRights { end });

        StatusDocument {
            id: info.uuid.clone(),
            status,
            message,
            updated: Updated {
                license: updated_license,
                status: updated_status,
            },
            links: self.links(&info.uuid),
            potential_rights,
            events,
        }
    }

    /// The four actionable links. Query-form expressions stay in the href
    /// for the client to expand.
    fn links(&self, license_id: &str) -> Vec<Link> {
        let base = &self.config.public_base_url;
        let vars = [("license_id", license_id)];

        let renew_href = match &self.config.renew_link {
            Some(tpl) => format!("{}{{?end,id,name}}", template::expand(tpl, &vars)),
            None => format!("{base}/renew/{license_id}{{?end,id,name}}"),
        };

        vec![
            Link::new("license", template::expand(&self.config.fresh_license_link, &vars))
                .with_type(LICENSE_MIME)
                .templated(),
            Link::new("register", format!("{base}/register/{license_id}{{?id,name}}"))
                .with_type(STATUS_MIME)
                .templated(),
            Link::new("renew", renew_href).with_type(STATUS_MIME).templated(),
            Link::new("return", format!("{base}/return/{license_id}{{?id,name}}"))
                .with_type(STATUS_MIME)
                .templated(),
        ]
    }
}
