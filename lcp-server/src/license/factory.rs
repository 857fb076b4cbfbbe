//! License assembly and signing.
//!
//! The factory binds a publication's content key to a user passphrase:
//! derive the user key from the passphrase hash, wrap the content key,
//! produce the key check, encrypt flagged user fields, build the link set,
//! then canonicalize and sign. The factory touches no storage; callers load
//! the publication and license info and persist the outcome.

use std::sync::Arc;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use regex::Regex;

use super::crypto::{AES256_CBC_URI, AesCbcEncrypter, CryptoError, Encrypter, SHA256_URI, user_key_from_hex};
use super::sign::{SignError, SigningCert};
use super::template;
use super::types::{
    ContentKey, Encryption, LicenseDocument, LicenseInfo, Link, Publication, Rights, STATUS_MIME,
    UNLIMITED, UserInfo, UserKey,
};

/// The only profile with a key-derivation implementation in this build.
pub const PROFILE_BASIC: &str = "http://readium.org/lcp/basic-profile";

/// Publication hrefs with this prefix are rewritten onto the server's
/// static-resources surface.
const LOCALHOST_PREFIX: &str = "http://localhost/";

static PROFILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^http://readium\.org/lcp/(basic-profile|profile-1\.0|profile-2\.[0-9x])$")
        .unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum LicenseError {
    #[error("publication not found")]
    PublicationNotFound,
    #[error("no encryption profile requested and no default configured")]
    MissingProfile,
    #[error("unsupported encryption profile: {0}")]
    UnsupportedProfile(String),
    #[error("bad passphrase hash: {0}")]
    BadPassHash(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Signing(#[from] SignError),
}

/// Encryption parameters supplied by the client at issuance.
#[derive(Debug, Clone)]
pub struct EncryptionRequest {
    pub profile: Option<String>,
    pub text_hint: String,
    /// Hex-encoded SHA-256 of the user passphrase.
    pub pass_hash: String,
}

/// Issuance-time configuration.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Provider URI stamped on licenses without an explicit provider.
    pub provider: String,
    /// Public base URL, no trailing slash.
    pub public_base_url: String,
    /// Profile used when the request names none.
    pub default_profile: Option<String>,
    /// Hint-page URI template with `{license_id}`.
    pub hint_link: String,
}

pub struct LicenseFactory {
    config: FactoryConfig,
    cert: Arc<SigningCert>,
    encrypter: AesCbcEncrypter,
}

impl LicenseFactory {
    pub fn new(config: FactoryConfig, cert: Arc<SigningCert>) -> Self {
        LicenseFactory {
            config,
            cert,
            encrypter: AesCbcEncrypter,
        }
    }

    /// Resolve the effective profile URI.
    ///
    /// `…profile-2.x` draws its minor digit uniformly at issuance time.
    pub fn resolve_profile(&self, requested: Option<&str>) -> Result<String, LicenseError> {
        let profile = requested
            .or(self.config.default_profile.as_deref())
            .ok_or(LicenseError::MissingProfile)?;
        if !PROFILE_RE.is_match(profile) {
            return Err(LicenseError::UnsupportedProfile(profile.to_string()));
        }
        if let Some(base) = profile.strip_suffix("2.x") {
            let digit = rand::thread_rng().gen_range(0..=9);
            return Ok(format!("{base}2.{digit}"));
        }
        Ok(profile.to_string())
    }

    /// Assemble and sign a license document.
    pub fn build(
        &self,
        publication: &Publication,
        info: &LicenseInfo,
        user: &UserInfo,
        request: &EncryptionRequest,
    ) -> Result<LicenseDocument, LicenseError> {
        let profile = self.resolve_profile(request.profile.as_deref())?;

        // Key derivation exists for the basic profile only; 1.0/2.x keys
        // live in the private profile builds.
        if profile != PROFILE_BASIC {
            return Err(LicenseError::UnsupportedProfile(profile));
        }
        let user_key = user_key_from_hex(&request.pass_hash)
            .map_err(|e| LicenseError::BadPassHash(e.to_string()))?;

        let content_key_value = self
            .encrypter
            .encrypt(&user_key, &publication.encryption_key)?;
        let key_check = self.encrypter.encrypt(&user_key, info.uuid.as_bytes())?;

        let mut license = LicenseDocument {
            id: info.uuid.clone(),
            issued: info.created_at,
            updated: info.updated_at,
            provider: info
                .provider
                .clone()
                .unwrap_or_else(|| self.config.provider.clone()),
            encryption: Encryption {
                profile,
                content_key: ContentKey {
                    algorithm: AES256_CBC_URI.to_string(),
                    value: content_key_value,
                },
                user_key: UserKey {
                    algorithm: SHA256_URI.to_string(),
                    text_hint: request.text_hint.clone(),
                    key_check,
                },
            },
            links: self.links(publication, &info.uuid),
            user: Some(self.user_payload(user, &user_key)?),
            rights: rights_from_info(info),
            signature: None,
        };

        self.cert.sign(&mut license)?;
        Ok(license)
    }

    fn links(&self, publication: &Publication, license_id: &str) -> Vec<Link> {
        let base = &self.config.public_base_url;
        let pub_href = if let Some(rest) = publication.href.strip_prefix(LOCALHOST_PREFIX) {
            format!("{base}/resources/{rest}")
        } else {
            publication.href.clone()
        };

        let mut publication_link =
            Link::new("publication", pub_href).with_type(&publication.content_type);
        publication_link.title = Some(publication.title.clone());
        publication_link.length = Some(publication.size);
        publication_link.hash = Some(publication.checksum.clone());

        vec![
            Link::new("hint", template::expand(&self.config.hint_link, &[("license_id", license_id)]))
                .with_type("text/html"),
            publication_link,
            Link::new("status", format!("{base}/status/{license_id}")).with_type(STATUS_MIME),
        ]
    }

    /// Copy user info into the license, replacing each flagged field with
    /// the base64 of its ciphertext under the user key. Field names match
    /// case-insensitively.
    fn user_payload(&self, user: &UserInfo, user_key: &[u8]) -> Result<UserInfo, LicenseError> {
        let mut out = user.clone();
        for field in &user.encrypted {
            match field.to_ascii_lowercase().as_str() {
                "name" => {
                    if let Some(name) = &user.name {
                        out.name = Some(self.encrypt_field(user_key, name)?);
                    }
                }
                "email" => {
                    if let Some(email) = &user.email {
                        out.email = Some(self.encrypt_field(user_key, email)?);
                    }
                }
                other => {
                    tracing::warn!(field = other, "ignoring unknown encrypted field");
                }
            }
        }
        Ok(out)
    }

    fn encrypt_field(&self, user_key: &[u8], value: &str) -> Result<String, LicenseError> {
        let ciphertext = self.encrypter.encrypt(user_key, value.as_bytes())?;
        Ok(STANDARD.encode(ciphertext))
    }
}

/// Map stored rights onto the outbound license: the `-1` storage sentinel
/// becomes an absent member.
fn rights_from_info(info: &LicenseInfo) -> Option<Rights> {
    let rights = Rights {
        print: (info.print > UNLIMITED).then_some(info.print),
        copy: (info.copy > UNLIMITED).then_some(info.copy),
        start: info.start,
        end: info.end,
    };
    (!rights.is_empty()).then_some(rights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::sign::SigningKeyMaterial;
    use chrono::Utc;
    use p256::pkcs8::DecodePrivateKey as _;

    fn factory() -> LicenseFactory {
        let certified = rcgen::generate_simple_self_signed(vec!["lcp.example.org".into()]).unwrap();
        let secret = p256::SecretKey::from_pkcs8_pem(&certified.key_pair.serialize_pem()).unwrap();
        let cert = SigningCert::from_parts(
            certified.cert.der().to_vec(),
            SigningKeyMaterial::Ecdsa(secret.into()),
        );
        LicenseFactory::new(
            FactoryConfig {
                provider: "https://lcp.example.org".into(),
                public_base_url: "https://front.example.org/lcp".into(),
                default_profile: None,
                hint_link: "https://front.example.org/hint/{license_id}".into(),
            },
            Arc::new(cert),
        )
    }

    fn publication() -> Publication {
        Publication {
            uuid: "c6abe80a-1681-4694-b6f4-80c165213780".into(),
            alt_id: None,
            title: "Encrypted Treasure".into(),
            authors: None,
            publishers: None,
            description: None,
            cover_url: None,
            href: "http://localhost/c6abe80a.epub".into(),
            content_type: "application/epub+zip".into(),
            size: 7_624_901,
            checksum: "JR0A7zNuUkbAC9M2Gqe1e5oKY8H7BQXmOWator0D5Tw=".into(),
            encryption_key: vec![0xA7; 32],
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    fn info() -> LicenseInfo {
        LicenseInfo {
            uuid: "3cb57462-4bb4-47a2-9f8c-d03e14ab7806".into(),
            publication_id: "c6abe80a-1681-4694-b6f4-80c165213780".into(),
            user_id: "U1".into(),
            user_name: None,
            user_email: None,
            user_encrypted: vec![],
            provider: None,
            created_at: Utc::now(),
            updated_at: None,
            status: crate::license::types::LicenseStatus::Ready,
            status_updated: None,
            device_count: 0,
            start: None,
            end: None,
            max_end: None,
            print: UNLIMITED,
            copy: UNLIMITED,
            deleted_at: None,
        }
    }

    const PASS_HASH: &str = "faeb00ca518bea7cb11a7ef31fb6183b489b1b6eadb792bec64a03b3f6ff80a8";

    fn request() -> EncryptionRequest {
        EncryptionRequest {
            profile: Some(PROFILE_BASIC.into()),
            text_hint: "the usual".into(),
            pass_hash: PASS_HASH.into(),
        }
    }

    #[test]
    fn missing_profile_rejected() {
        let f = factory();
        assert!(matches!(
            f.resolve_profile(None),
            Err(LicenseError::MissingProfile)
        ));
    }

    #[test]
    fn unknown_profile_rejected() {
        let f = factory();
        assert!(matches!(
            f.resolve_profile(Some("http://readium.org/lcp/profile-9.9")),
            Err(LicenseError::UnsupportedProfile(_))
        ));
    }

    #[test]
    fn profile_lottery_resolves_2x() {
        let f = factory();
        for _ in 0..20 {
            let p = f
                .resolve_profile(Some("http://readium.org/lcp/profile-2.x"))
                .unwrap();
            let digit: u32 = p
                .strip_prefix("http://readium.org/lcp/profile-2.")
                .unwrap()
                .parse()
                .unwrap();
            assert!(digit <= 9);
        }
    }

    #[test]
    fn non_basic_profile_fails_generation() {
        let f = factory();
        let mut req = request();
        req.profile = Some("http://readium.org/lcp/profile-1.0".into());
        let err = f.build(&publication(), &info(), &user(), &req).unwrap_err();
        assert!(matches!(err, LicenseError::UnsupportedProfile(_)));
    }

    fn user() -> UserInfo {
        UserInfo {
            id: "U1".into(),
            name: Some("John Doe".into()),
            email: Some("j@x".into()),
            encrypted: vec![],
        }
    }

    #[test]
    fn bad_pass_hash_rejected() {
        let f = factory();
        let mut req = request();
        req.pass_hash = "definitely-not-hex".into();
        let err = f.build(&publication(), &info(), &user(), &req).unwrap_err();
        assert!(matches!(err, LicenseError::BadPassHash(_)));
    }

    #[test]
    fn localhost_href_rewritten_to_resources() {
        let f = factory();
        let license = f
            .build(&publication(), &info(), &user(), &request())
            .unwrap();
        let link = license.links.iter().find(|l| l.rel == "publication").unwrap();
        assert_eq!(
            link.href,
            "https://front.example.org/lcp/resources/c6abe80a.epub"
        );
        assert_eq!(link.length, Some(7_624_901));
    }

    #[test]
    fn hint_and_status_links_built() {
        let f = factory();
        let license = f
            .build(&publication(), &info(), &user(), &request())
            .unwrap();
        let hint = license.links.iter().find(|l| l.rel == "hint").unwrap();
        assert_eq!(
            hint.href,
            "https://front.example.org/hint/3cb57462-4bb4-47a2-9f8c-d03e14ab7806"
        );
        let status = license.links.iter().find(|l| l.rel == "status").unwrap();
        assert_eq!(
            status.href,
            "https://front.example.org/lcp/status/3cb57462-4bb4-47a2-9f8c-d03e14ab7806"
        );
    }

    #[test]
    fn rights_sentinel_maps_to_absent() {
        let f = factory();
        let mut i = info();
        i.print = 10;
        i.copy = UNLIMITED;
        let license = f.build(&publication(), &i, &user(), &request()).unwrap();
        let rights = license.rights.unwrap();
        assert_eq!(rights.print, Some(10));
        assert_eq!(rights.copy, None);
    }

    #[test]
    fn no_rights_at_all_omits_member() {
        let f = factory();
        let license = f
            .build(&publication(), &info(), &user(), &request())
            .unwrap();
        assert!(license.rights.is_none());
    }
}
