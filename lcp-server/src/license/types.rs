//! Core entities and wire documents.
//!
//! All objects are designed to be:
//! - Serializable via serde_json
//! - Canonicalized before signing (license documents)
//! - Persisted through the store (publications, license infos, events)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type of a License Document.
pub const LICENSE_MIME: &str = "application/vnd.readium.lcp.license.v1.0+json";

/// MIME type of a Status Document.
pub const STATUS_MIME: &str = "application/vnd.readium.license.status.v1.0+json";

/// Accepted publication content types.
pub const CONTENT_TYPES: [&str; 4] = [
    "application/epub+zip",
    "application/pdf+lcp",
    "application/audiobook+lcp",
    "application/divina+lcp",
];

/// Storage sentinel for "no limit" on print/copy rights.
pub const UNLIMITED: i32 = -1;

// ─── Entities ──────────────────────────────────────────────────────────

/// An encrypted publication registered with the server.
///
/// `encryption_key` is the raw AES-256 content key; it only ever appears in
/// authenticated admin responses (base64) and is wrapped under the user key
/// inside issued licenses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    #[serde(default)]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Absolute URL of the encrypted file.
    pub href: String,
    pub content_type: String,
    /// Size of the encrypted file in octets.
    pub size: u64,
    /// SHA-256 of the encrypted file, base64.
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub encryption_key: Vec<u8>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// License lifecycle state.
///
/// `Expired` is derived at read time from the end date; the store only ever
/// holds it transiently (a stored `ready`/`active` row with a past end date
/// reports `expired`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Ready,
    Active,
    Expired,
    Returned,
    Cancelled,
    Revoked,
}

impl LicenseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LicenseStatus::Ready => "ready",
            LicenseStatus::Active => "active",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Returned => "returned",
            LicenseStatus::Cancelled => "cancelled",
            LicenseStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(LicenseStatus::Ready),
            "active" => Some(LicenseStatus::Active),
            "expired" => Some(LicenseStatus::Expired),
            "returned" => Some(LicenseStatus::Returned),
            "cancelled" => Some(LicenseStatus::Cancelled),
            "revoked" => Some(LicenseStatus::Revoked),
            _ => None,
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent shadow of an issued license.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseInfo {
    pub uuid: String,
    /// UUID of the publication this license grants access to.
    pub publication_id: String,
    pub user_id: String,
    /// Possibly ciphertext: when field encryption was requested at issuance,
    /// the stored value is the base64 ciphertext, never the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Field names the client asked to encrypt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_encrypted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// License-content updated timestamp, distinct from `status_updated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: LicenseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Renew ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_end: Option<DateTime<Utc>>,
    /// `-1` means "no limit"; the sentinel never reaches an outbound license.
    #[serde(default = "unlimited")]
    pub print: i32,
    #[serde(default = "unlimited")]
    pub copy: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_status() -> LicenseStatus {
    LicenseStatus::Ready
}

fn unlimited() -> i32 {
    UNLIMITED
}

/// Lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Register,
    Renew,
    Return,
    Revoke,
    Cancel,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Register => "register",
            EventType::Renew => "renew",
            EventType::Return => "return",
            EventType::Revoke => "revoke",
            EventType::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "register" => Some(EventType::Register),
            "renew" => Some(EventType::Renew),
            "return" => Some(EventType::Return),
            "revoke" => Some(EventType::Revoke),
            "cancel" => Some(EventType::Cancel),
            _ => None,
        }
    }
}

/// One journal entry: a device acting on a license.
///
/// Serialized into status documents as `{type, name, id, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(skip_serializing, default)]
    pub license_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "id")]
    pub device_id: String,
    #[serde(rename = "name")]
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
}

// ─── License Document ──────────────────────────────────────────────────

/// A signed LCP License Document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseDocument {
    pub id: String,
    pub issued: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    pub provider: String,
    pub encryption: Encryption,
    pub links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights: Option<Rights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encryption {
    pub profile: String,
    pub content_key: ContentKey,
    pub user_key: UserKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentKey {
    pub algorithm: String,
    /// Content key wrapped under the user key, base64.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserKey {
    pub algorithm: String,
    pub text_hint: String,
    /// License id encrypted under the user key, base64. A reader holding the
    /// right passphrase decrypts this and compares it with `id`.
    #[serde(with = "base64_bytes")]
    pub key_check: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Rights {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl Rights {
    pub fn is_empty(&self) -> bool {
        self.print.is_none() && self.copy.is_none() && self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signature {
    /// XMLDSIG algorithm URI.
    pub algorithm: String,
    /// DER of the leaf signing certificate, base64.
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    /// Raw signature bytes, base64.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub templated: bool,
}

impl Link {
    pub fn new(rel: &str, href: String) -> Self {
        Link {
            rel: rel.to_string(),
            href,
            mime_type: None,
            title: None,
            length: None,
            hash: None,
            templated: false,
        }
    }

    pub fn with_type(mut self, mime: &str) -> Self {
        self.mime_type = Some(mime.to_string());
        self
    }

    pub fn templated(mut self) -> Self {
        self.templated = true;
        self
    }
}

// ─── Status Document ───────────────────────────────────────────────────

/// A Status Document, always computed from persistent state, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusDocument {
    pub id: String,
    pub status: LicenseStatus,
    pub message: String,
    pub updated: Updated,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_rights: Option<PotentialRights>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Updated {
    pub license: DateTime<Utc>,
    pub status: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PotentialRights {
    pub end: DateTime<Utc>,
}

// ─── License issuance request ──────────────────────────────────────────

/// Body of `POST /licenses/` and `POST /licenses/{id}`.
///
/// Carries everything the server does not persist: the user's plaintext
/// fields, the passphrase hash, and the encryption profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseRequest {
    #[serde(default)]
    pub publication_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_encrypted: Vec<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    pub text_hint: String,
    /// Hex-encoded SHA-256 of the user passphrase.
    pub pass_hash: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_end: Option<DateTime<Utc>>,
    #[serde(default = "unlimited")]
    pub print: i32,
    #[serde(default = "unlimited")]
    pub copy: i32,
}

// ─── Serde helpers ─────────────────────────────────────────────────────

/// Base64 (standard alphabet) for byte fields in wire documents.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LicenseStatus::Revoked).unwrap(),
            "\"revoked\""
        );
        assert_eq!(LicenseStatus::parse("cancelled"), Some(LicenseStatus::Cancelled));
        assert_eq!(LicenseStatus::parse("bogus"), None);
    }

    #[test]
    fn event_wire_shape() {
        let e = Event {
            license_id: "l-1".into(),
            event_type: EventType::Register,
            device_id: "d-1".into(),
            device_name: "reader one".into(),
            timestamp: "2026-03-01T10:00:00Z".parse().unwrap(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "register");
        assert_eq!(v["id"], "d-1");
        assert_eq!(v["name"], "reader one");
        assert!(v.get("license_id").is_none());
    }

    #[test]
    fn publication_key_round_trips_base64() {
        let p = Publication {
            uuid: "p-1".into(),
            alt_id: None,
            title: "T".into(),
            authors: None,
            publishers: None,
            description: None,
            cover_url: None,
            href: "https://host/f.epub".into(),
            content_type: "application/epub+zip".into(),
            size: 100,
            checksum: "c2hh".into(),
            encryption_key: vec![7u8; 32],
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert!(json["encryption_key"].is_string());
        let back: Publication = serde_json::from_value(json).unwrap();
        assert_eq!(back.encryption_key, vec![7u8; 32]);
    }

    #[test]
    fn rights_sentinel_stays_internal() {
        let r = Rights::default();
        assert!(r.is_empty());
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn license_request_defaults() {
        let req: LicenseRequest = serde_json::from_str(
            r#"{"publication_id":"p","user_id":"u","text_hint":"h","pass_hash":"ab"}"#,
        )
        .unwrap();
        assert_eq!(req.print, UNLIMITED);
        assert_eq!(req.copy, UNLIMITED);
        assert!(req.user_encrypted.is_empty());
        assert!(req.profile.is_none());
    }

    #[test]
    fn untemplated_link_omits_flag() {
        let link = Link::new("publication", "https://host/f.epub".into());
        let v = serde_json::to_value(&link).unwrap();
        assert!(v.get("templated").is_none());
        let t = Link::new("register", "x".into()).templated();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["templated"], true);
    }
}
