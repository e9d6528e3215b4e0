#![forbid(unsafe_code)]

//! Node transport identity, stored next to the account key files and written
//! through the same private atomic-write path.

use std::{fs, io::ErrorKind, path::Path};

use libp2p::{identity, PeerId};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

use crate::core::security::keystore::{atomic_write_private, KeystoreError};

const IDENTITY_FILE: &str = "p2p_identity.key";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity io: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity write: {0}")]
    Write(#[from] KeystoreError),
    #[error("identity decode")]
    Decode,
}

/// Ed25519 keypair from `data_dir/p2p_identity.key`. A missing file gets a
/// fresh keypair, persisted with owner-only permissions.
pub fn load_or_create_identity(
    data_dir: impl AsRef<Path>,
) -> Result<(PeerId, identity::Keypair), IdentityError> {
    let path = data_dir.as_ref().join(IDENTITY_FILE);

    match fs::read(&path) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            let kp = identity::Keypair::from_protobuf_encoding(&bytes)
                .map_err(|_| IdentityError::Decode)?;
            let pid = kp.public().to_peer_id();
            info!(peer_id = %pid, "p2p identity loaded");
            Ok((pid, kp))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let kp = identity::Keypair::generate_ed25519();
            let encoded = Zeroizing::new(kp.to_protobuf_encoding().map_err(|_| IdentityError::Decode)?);
            atomic_write_private(&path, &encoded)?;
            let pid = kp.public().to_peer_id();
            info!(peer_id = %pid, path = %path.display(), "p2p identity created");
            Ok((pid, kp))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = load_or_create_identity(dir.path()).unwrap();
        let (b, _) = load_or_create_identity(dir.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_data_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("node-a").join("data");
        load_or_create_identity(&nested).unwrap();
        assert!(nested.join(IDENTITY_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        load_or_create_identity(dir.path()).unwrap();
        let mode = fs::metadata(dir.path().join(IDENTITY_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(IDENTITY_FILE), b"junk").unwrap();
        assert!(matches!(load_or_create_identity(dir.path()), Err(IdentityError::Decode)));
    }
}
