//! Credential and TLS material resolution
//!
//! A command authenticates to the HTTPS catalog service either with a
//! username/password pair or with an mTLS key/cert/CA triple. Material is
//! held in memory by the options and never written to disk or to logs.

use crate::error::{OpsError, Result};
use std::fmt;
use std::path::Path;

/// How server certificates presented by the agents are validated.
/// Verification is off by default; clusters commonly run self-signed
/// certificates on the internal network.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsPolicy {
    /// Verify the NMA's server certificate.
    pub verify_nma_cert: bool,
    /// Verify the HTTPS catalog service's server certificate.
    pub verify_https_cert: bool,
    /// Verify that peer certificates match the contacted hostname.
    pub verify_peer_hostname: bool,
}

/// PEM material for mutual TLS.
#[derive(Clone)]
pub struct CertificateBundle {
    pub key_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    pub ca_cert_pem: Vec<u8>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material must never reach a log sink.
        f.debug_struct("CertificateBundle")
            .field("key_pem", &"<redacted>")
            .field("cert_pem", &format!("{} bytes", self.cert_pem.len()))
            .field("ca_cert_pem", &format!("{} bytes", self.ca_cert_pem.len()))
            .finish()
    }
}

impl CertificateBundle {
    /// Load key, certificate and CA certificate from files.
    pub fn from_files(
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        ca_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let read = |p: &Path| -> Result<Vec<u8>> {
            std::fs::read(p).map_err(|e| {
                OpsError::Validation(format!("cannot read certificate file {}: {e}", p.display()))
            })
        };
        Ok(Self {
            key_pem: read(key_path.as_ref())?,
            cert_pem: read(cert_path.as_ref())?,
            ca_cert_pem: read(ca_path.as_ref())?,
        })
    }

    /// Load `key.pem`, `cert.pem` and `ca.pem` from one directory, the
    /// layout used by the standard client-certificate drop location.
    pub fn from_cert_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(dir.join("key.pem"), dir.join("cert.pem"), dir.join("ca.pem"))
    }
}

/// Either a password or a certificate pair; exactly one is required.
#[derive(Clone)]
pub enum CredentialSet {
    Password {
        /// Defaults to the OS user when the caller omits it.
        username: String,
        password: String,
    },
    Certificates(CertificateBundle),
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSet::Password { username, .. } => f
                .debug_struct("CredentialSet::Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            CredentialSet::Certificates(bundle) => {
                f.debug_tuple("CredentialSet::Certificates").field(bundle).finish()
            }
        }
    }
}

fn os_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "dbadmin".to_string())
}

impl CredentialSet {
    /// Build a password credential, falling back to the OS user when no
    /// username was supplied.
    pub fn password(username: Option<String>, password: impl Into<String>) -> Self {
        let username = match username {
            Some(name) if !name.is_empty() => name,
            _ => os_user(),
        };
        CredentialSet::Password {
            username,
            password: password.into(),
        }
    }

    pub fn certificates(bundle: CertificateBundle) -> Self {
        CredentialSet::Certificates(bundle)
    }

    /// Validate that the credential is usable for HTTPS operations.
    pub fn validate(&self) -> Result<()> {
        match self {
            CredentialSet::Password { username, .. } => {
                if username.is_empty() {
                    return Err(OpsError::Validation(
                        "username must not be empty for password authentication".into(),
                    ));
                }
                Ok(())
            }
            CredentialSet::Certificates(bundle) => {
                if bundle.key_pem.is_empty() || bundle.cert_pem.is_empty() {
                    return Err(OpsError::Validation(
                        "both key and certificate are required for mTLS authentication".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn uses_password(&self) -> bool {
        matches!(self, CredentialSet::Password { .. })
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            CredentialSet::Password { username, .. } => Some(username),
            CredentialSet::Certificates(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_defaults_username_to_os_user() {
        let creds = CredentialSet::password(None, "secret");
        match &creds {
            CredentialSet::Password { username, .. } => assert!(!username.is_empty()),
            _ => panic!("expected password credentials"),
        }
        assert!(creds.uses_password());
        creds.validate().unwrap();
    }

    #[test]
    fn explicit_username_is_kept() {
        let creds = CredentialSet::password(Some("dbadmin".into()), "secret");
        assert_eq!(creds.username(), Some("dbadmin"));
    }

    #[test]
    fn empty_cert_material_fails_validation() {
        let creds = CredentialSet::certificates(CertificateBundle {
            key_pem: vec![],
            cert_pem: vec![],
            ca_cert_pem: vec![],
        });
        assert!(creds.validate().unwrap_err().is_validation());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = CredentialSet::password(Some("admin".into()), "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
