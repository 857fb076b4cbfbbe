//! License signing and verification over the canonical JSON form.
//!
//! The signature input is the fully populated license with `signature`
//! absent. Whether RSA-PKCS1v15-SHA256 or ECDSA-P256-SHA256 is used follows
//! from the private-key type of the configured certificate; the matching
//! XMLDSIG algorithm URI is written into the signature object.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rustls_pemfile::Item;
use x509_parser::prelude::*;

use super::canonical;
use super::types::{LicenseDocument, Signature};

/// XMLDSIG URI for RSA-PKCS1v15-SHA256.
pub const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// XMLDSIG URI for ECDSA-SHA256. The signature value is `r || s`, each
/// left-padded to the field width (32 octets for P-256).
pub const ECDSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("certificate unavailable: {0}")]
    CertificateUnavailable(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKey(String),
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] serde_json::Error),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("signature verification failed: {0}")]
    Verification(String),
}

/// Private key material behind a signing certificate.
pub enum SigningKeyMaterial {
    Rsa(rsa::RsaPrivateKey),
    Ecdsa(p256::ecdsa::SigningKey),
}

impl SigningKeyMaterial {
    fn algorithm(&self) -> &'static str {
        match self {
            SigningKeyMaterial::Rsa(_) => RSA_SHA256_URI,
            SigningKeyMaterial::Ecdsa(_) => ECDSA_SHA256_URI,
        }
    }
}

/// The provider signing certificate: leaf DER plus its private key.
/// Loaded once at startup and shared read-only across request handlers.
pub struct SigningCert {
    certificate: Vec<u8>,
    key: SigningKeyMaterial,
}

impl SigningCert {
    /// Load the certificate (first PEM block = leaf) and private key.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, SignError> {
        let mut reader = BufReader::new(File::open(cert_path).map_err(|e| {
            SignError::CertificateUnavailable(format!("{}: {e}", cert_path.display()))
        })?);
        let certificate = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or_else(|| {
                SignError::CertificateUnavailable(format!(
                    "no certificate in {}",
                    cert_path.display()
                ))
            })?
            .map_err(|e| SignError::CertificateUnavailable(e.to_string()))?
            .to_vec();

        let mut reader = BufReader::new(File::open(key_path).map_err(|e| {
            SignError::CertificateUnavailable(format!("{}: {e}", key_path.display()))
        })?);
        let item = rustls_pemfile::read_one(&mut reader)
            .map_err(|e| SignError::CertificateUnavailable(e.to_string()))?
            .ok_or_else(|| {
                SignError::CertificateUnavailable(format!(
                    "no private key in {}",
                    key_path.display()
                ))
            })?;

        let key = match item {
            Item::Pkcs1Key(der) => SigningKeyMaterial::Rsa(
                rsa::RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
                    .map_err(|e| SignError::CertificateUnavailable(e.to_string()))?,
            ),
            Item::Sec1Key(der) => SigningKeyMaterial::Ecdsa(
                p256::SecretKey::from_sec1_der(der.secret_sec1_der())
                    .map_err(|e| SignError::CertificateUnavailable(e.to_string()))?
                    .into(),
            ),
            // PKCS#8 wraps either key type; try RSA first, then P-256
            Item::Pkcs8Key(der) => {
                if let Ok(k) = rsa::RsaPrivateKey::from_pkcs8_der(der.secret_pkcs8_der()) {
                    SigningKeyMaterial::Rsa(k)
                } else {
                    SigningKeyMaterial::Ecdsa(
                        p256::SecretKey::from_pkcs8_der(der.secret_pkcs8_der())
                            .map_err(|e| SignError::CertificateUnavailable(e.to_string()))?
                            .into(),
                    )
                }
            }
            other => {
                return Err(SignError::UnsupportedKey(format!(
                    "unexpected PEM item {other:?}"
                )));
            }
        };

        Ok(SigningCert { certificate, key })
    }

    /// Assemble from already-parsed parts.
    pub fn from_parts(certificate_der: Vec<u8>, key: SigningKeyMaterial) -> Self {
        SigningCert {
            certificate: certificate_der,
            key,
        }
    }

    /// XMLDSIG algorithm URI this certificate signs with.
    pub fn algorithm(&self) -> &'static str {
        self.key.algorithm()
    }

    /// DER of the leaf certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate
    }

    /// Sign the license in place: canonicalize with `signature` absent,
    /// sign the canonical bytes, insert the signature object.
    pub fn sign(&self, license: &mut LicenseDocument) -> Result<(), SignError> {
        license.signature = None;
        let canonical = canonical::canonicalize(license)?;

        let value = match &self.key {
            SigningKeyMaterial::Rsa(key) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                signing_key.sign(canonical.as_bytes()).to_vec()
            }
            SigningKeyMaterial::Ecdsa(key) => {
                let signature: p256::ecdsa::Signature = key.sign(canonical.as_bytes());
                signature.to_bytes().to_vec()
            }
        };

        license.signature = Some(Signature {
            algorithm: self.key.algorithm().to_string(),
            certificate: self.certificate.clone(),
            value,
        });
        Ok(())
    }
}

/// Verify a signed license: strip the signature, canonicalize the remainder,
/// verify the value over the embedded leaf certificate's public key.
pub fn verify(license: &LicenseDocument) -> Result<(), SignError> {
    let signature = license
        .signature
        .as_ref()
        .ok_or_else(|| SignError::Verification("license carries no signature".into()))?;

    let mut unsigned = license.clone();
    unsigned.signature = None;
    let canonical = canonical::canonicalize(&unsigned)?;

    let (_, cert) = X509Certificate::from_der(&signature.certificate)
        .map_err(|e| SignError::Verification(format!("bad certificate: {e}")))?;
    let spki = cert.public_key();

    match spki.parsed() {
        Ok(x509_parser::public_key::PublicKey::RSA(_)) => {
            let public = rsa::RsaPublicKey::from_pkcs1_der(spki.subject_public_key.data.as_ref())
                .map_err(|e| SignError::Verification(format!("bad RSA key: {e}")))?;
            let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public);
            let sig = rsa::pkcs1v15::Signature::try_from(signature.value.as_slice())
                .map_err(|e| SignError::Verification(e.to_string()))?;
            verifying_key
                .verify(canonical.as_bytes(), &sig)
                .map_err(|e| SignError::Verification(e.to_string()))
        }
        Ok(x509_parser::public_key::PublicKey::EC(point)) => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(point.data())
                .map_err(|e| SignError::Verification(format!("bad EC key: {e}")))?;
            let sig = p256::ecdsa::Signature::from_slice(&signature.value)
                .map_err(|e| SignError::Verification(e.to_string()))?;
            verifying_key
                .verify(canonical.as_bytes(), &sig)
                .map_err(|e| SignError::Verification(e.to_string()))
        }
        _ => Err(SignError::UnsupportedKey(
            "certificate key is neither RSA nor EC".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::types::{ContentKey, Encryption, Link, UserKey};
    use p256::pkcs8::DecodePrivateKey as _;

    fn sample_license() -> LicenseDocument {
        LicenseDocument {
            id: "3cb57462-4bb4-47a2-9f8c-d03e14ab7806".into(),
            issued: "2026-03-01T10:00:00Z".parse().unwrap(),
            updated: None,
            provider: "https://lcp.example.org".into(),
            encryption: Encryption {
                profile: "http://readium.org/lcp/basic-profile".into(),
                content_key: ContentKey {
                    algorithm: crate::license::crypto::AES256_CBC_URI.into(),
                    value: vec![1u8; 48],
                },
                user_key: UserKey {
                    algorithm: crate::license::crypto::SHA256_URI.into(),
                    text_hint: "the usual".into(),
                    key_check: vec![2u8; 64],
                },
            },
            links: vec![Link::new("hint", "https://example.org/hint".into())],
            user: None,
            rights: None,
            signature: None,
        }
    }

    fn ecdsa_cert() -> SigningCert {
        let certified = rcgen::generate_simple_self_signed(vec!["lcp.example.org".into()]).unwrap();
        let secret =
            p256::SecretKey::from_pkcs8_pem(&certified.key_pair.serialize_pem()).unwrap();
        SigningCert::from_parts(
            certified.cert.der().to_vec(),
            SigningKeyMaterial::Ecdsa(secret.into()),
        )
    }

    #[test]
    fn ecdsa_sign_and_verify() {
        let cert = ecdsa_cert();
        let mut license = sample_license();
        cert.sign(&mut license).unwrap();

        let sig = license.signature.as_ref().unwrap();
        assert_eq!(sig.algorithm, ECDSA_SHA256_URI);
        assert_eq!(sig.value.len(), 64); // r || s, 32 octets each
        verify(&license).unwrap();
    }

    #[test]
    fn tampering_breaks_verification() {
        let cert = ecdsa_cert();
        let mut license = sample_license();
        cert.sign(&mut license).unwrap();

        license.provider = "https://evil.example.org".into();
        assert!(verify(&license).is_err());
    }

    #[test]
    fn unsigned_license_fails_verification() {
        let license = sample_license();
        assert!(matches!(verify(&license), Err(SignError::Verification(_))));
    }

    #[test]
    fn rsa_signatures_are_deterministic() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let cert = SigningCert::from_parts(vec![], SigningKeyMaterial::Rsa(key.clone()));
        assert_eq!(cert.algorithm(), RSA_SHA256_URI);

        let mut a = sample_license();
        let mut b = sample_license();
        cert.sign(&mut a).unwrap();
        cert.sign(&mut b).unwrap();
        let sig_a = a.signature.unwrap();
        assert_eq!(sig_a.value, b.signature.unwrap().value);

        // PKCS1v15 verifies against the bare public key
        let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.to_public_key());
        let mut unsigned = sample_license();
        unsigned.signature = None;
        let canonical = canonical::canonicalize(&unsigned).unwrap();
        let sig = rsa::pkcs1v15::Signature::try_from(sig_a.value.as_slice()).unwrap();
        verifying_key.verify(canonical.as_bytes(), &sig).unwrap();
    }
}
