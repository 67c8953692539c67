//! Device credential bundle.
//!
//! Loads the root authority certificate, client certificate and private key
//! the device authenticates with, and persists freshly issued credentials.

pub mod bundle;
pub mod store;

pub use bundle::{CredentialBundle, CredentialPaths, load};
pub use store::{CertStore, IssuedCredentials, PersistOutcome};

use std::path::PathBuf;

/// File name of the root trust anchor.
pub const ROOT_CA_FILE: &str = "root-ca.pem";

/// File name of the client certificate.
pub const CLIENT_CERT_FILE: &str = "cert.pem.crt";

/// File name of the public key written at provisioning time.
pub const PUBLIC_KEY_FILE: &str = "public.pem.key";

/// File name of the private key.
pub const PRIVATE_KEY_FILE: &str = "private.pem.key";

/// Errors for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential missing: {}", display_paths(.missing))]
    Missing { missing: Vec<PathBuf> },

    #[error("{} is not PEM-encoded", .path.display())]
    NotPem { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
