use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{CLIENT_CERT_FILE, CredentialError, PRIVATE_KEY_FILE, ROOT_CA_FILE};

const PEM_MARKER: &str = "-----BEGIN ";

/// Locations of the three credential artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialPaths {
    pub root_authority_cert: PathBuf,
    pub client_cert: PathBuf,
    pub private_key: PathBuf,
}

impl CredentialPaths {
    /// Uses the conventional file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            root_authority_cert: dir.join(ROOT_CA_FILE),
            client_cert: dir.join(CLIENT_CERT_FILE),
            private_key: dir.join(PRIVATE_KEY_FILE),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [
            &self.root_authority_cert,
            &self.client_cert,
            &self.private_key,
        ]
    }
}

/// PEM material the device authenticates with.
///
/// Immutable once loaded. Share it behind an `Arc`.
#[derive(Clone, PartialEq)]
pub struct CredentialBundle {
    root_authority_cert: Vec<u8>,
    client_cert: Vec<u8>,
    private_key: Vec<u8>,
}

impl CredentialBundle {
    pub fn new(root_authority_cert: Vec<u8>, client_cert: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            root_authority_cert,
            client_cert,
            private_key,
        }
    }

    pub fn root_authority_cert(&self) -> &[u8] {
        &self.root_authority_cert
    }

    pub fn client_cert(&self) -> &[u8] {
        &self.client_cert
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Client certificate followed by the private key, the layout TLS
    /// identity loaders expect.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = Vec::with_capacity(self.client_cert.len() + self.private_key.len() + 1);
        pem.extend_from_slice(&self.client_cert);
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.private_key);
        pem
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("root_authority_cert", &self.root_authority_cert.len())
            .field("client_cert", &self.client_cert.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Loads the bundle, failing closed.
///
/// Presence of all three files is checked before any is read, so a partial
/// set reports every absent path at once.
pub fn load(paths: &CredentialPaths) -> Result<CredentialBundle, CredentialError> {
    let missing: Vec<PathBuf> = paths
        .all()
        .into_iter()
        .filter(|p| !p.is_file())
        .map(Path::to_path_buf)
        .collect();
    if !missing.is_empty() {
        return Err(CredentialError::Missing { missing });
    }

    let bundle = CredentialBundle {
        root_authority_cert: read_pem(&paths.root_authority_cert)?,
        client_cert: read_pem(&paths.client_cert)?,
        private_key: read_pem(&paths.private_key)?,
    };
    debug!(?bundle, "loaded credential bundle");
    Ok(bundle)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, CredentialError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(CredentialError::NotPem {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    if !text.contains(PEM_MARKER) {
        return Err(CredentialError::NotPem {
            path: path.to_path_buf(),
        });
    }
    Ok(text.into_bytes())
}
