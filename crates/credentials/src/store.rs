//! On-disk persistence of issued credentials.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::bundle::CredentialPaths;
use crate::{CLIENT_CERT_FILE, CredentialError, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};

/// Credentials returned by the identity provisioner.
#[derive(Clone)]
pub struct IssuedCredentials {
    pub certificate_pem: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

/// Result of [`CertStore::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// All three files were written.
    Written,
    /// At least one file already existed; nothing was touched.
    AlreadyPresent,
}

/// Directory holding the device's credential files.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths the bundle loader reads from this store.
    pub fn paths(&self) -> CredentialPaths {
        CredentialPaths::in_dir(&self.dir)
    }

    fn issued_paths(&self) -> [PathBuf; 3] {
        [
            self.dir.join(CLIENT_CERT_FILE),
            self.dir.join(PUBLIC_KEY_FILE),
            self.dir.join(PRIVATE_KEY_FILE),
        ]
    }

    /// Returns true if any issued credential file is on disk.
    pub fn has_issued(&self) -> bool {
        self.issued_paths().iter().any(|p| p.exists())
    }

    /// Writes freshly issued credentials.
    ///
    /// Never overwrites: if any of the certificate, public key or private key
    /// files exists, the store is left as is.
    pub fn persist(&self, issued: &IssuedCredentials) -> Result<PersistOutcome, CredentialError> {
        std::fs::create_dir_all(&self.dir)?;

        if self.has_issued() {
            debug!(dir = %self.dir.display(), "credentials already present, skipping");
            return Ok(PersistOutcome::AlreadyPresent);
        }

        let [cert, public, private] = self.issued_paths();
        std::fs::write(&cert, &issued.certificate_pem)?;
        std::fs::write(&private, &issued.private_key_pem)?;
        std::fs::write(&public, &issued.public_key_pem)?;

        info!(dir = %self.dir.display(), "persisted issued credentials");
        Ok(PersistOutcome::Written)
    }
}
