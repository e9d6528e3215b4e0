// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Keystore: secp256k1 signing keys encrypted at rest.
//!
//! ## Production hardening
//! - **Atomic writes** for private key material (tmp + fsync + rename, 0600).
//! - **Memory-hard KDF**: Argon2id derives the AES key from the passphrase.
//! - **Best-effort zeroization** of sensitive buffers.
//!
//! ### Key file format
//! `MAGIC(8) || M_COST(4) || T_COST(4) || P_COST(4) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)`
//! where the ciphertext is AES-256-GCM over the 32-byte secp256k1 secret scalar and
//! the Argon2id parameters are big-endian. Storing the parameters lets a file be
//! decrypted without the configuration it was created under.

use argon2::{Algorithm, Argon2, Params, Version};
use k256::ecdsa::{
    RecoveryId, Signature as EcdsaSignature, SigningKey as K256SigningKey, VerifyingKey,
};
use ring::{
    aead,
    rand::{SecureRandom, SystemRandom},
};
use std::{
    fmt, fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::core::{config::KdfParams, types::Address};

const KEY_FILE_MAGIC: &[u8] = b"AMUNKEY2"; // 8 bytes
const KDF_HEADER_LEN: usize = 12;
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Recoverable signature width: `r(32) || s(32) || v(1)`.
pub const RECOVERABLE_SIG_LEN: usize = 65;

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Filesystem failure while reading or writing key material.
    #[error("io")]
    Io,
    /// Key file does not exist.
    #[error("key file not found")]
    NotFound,
    /// File is not a keystore file or is truncated.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Passphrase does not open the stored material.
    #[error("wrong passphrase")]
    Authentication,
    /// KDF, RNG or cipher failure.
    #[error("crypto")]
    Crypto,
    /// Signing algorithm failure.
    #[error("signing")]
    Signing,
}

/// Decrypted secp256k1 signing key.
///
/// The k256 key type zeroizes its scalar on drop.
#[derive(Clone)]
pub struct SigningKey {
    inner: K256SigningKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Fresh key from the system RNG.
    pub fn generate() -> Result<Self, KeystoreError> {
        let rng = SystemRandom::new();
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        // A uniformly random 32-byte string is out of range with negligible probability.
        loop {
            rng.fill(&mut bytes[..]).map_err(|_| KeystoreError::Crypto)?;
            if let Ok(inner) = K256SigningKey::from_slice(&bytes[..]) {
                return Ok(Self { inner });
            }
        }
    }

    /// Parse a 32-byte secret scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeystoreError> {
        let inner = K256SigningKey::from_slice(bytes).map_err(|_| KeystoreError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Secret scalar bytes, wiped when dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; SECRET_LEN]> {
        let mut out = Zeroizing::new([0u8; SECRET_LEN]);
        out.copy_from_slice(&self.inner.to_bytes());
        out
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        address_of(self.inner.verifying_key())
    }

    /// Sign a 32-byte digest, returning `r || s || v` with low-S and `v` in {0, 1}.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; RECOVERABLE_SIG_LEN], KeystoreError> {
        let (sig, recid) = self
            .inner
            .sign_prehash_recoverable(digest)
            .map_err(|_| KeystoreError::Signing)?;
        let mut out = [0u8; RECOVERABLE_SIG_LEN];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte();
        Ok(out)
    }
}

fn address_of(vk: &VerifyingKey) -> Address {
    let point = vk.to_encoded_point(false);
    // Uncompressed encoding is always 65 bytes with the 0x04 tag.
    Address::from_uncompressed_pubkey(point.as_bytes()).unwrap_or(Address::from_bytes([0u8; 20]))
}

/// Recover the signer address from a recoverable signature over `digest`.
///
/// Returns `None` for any malformed or malleable (high-S) signature.
pub fn recover_signer(digest: &[u8; 32], sig: &[u8]) -> Option<Address> {
    if sig.len() != RECOVERABLE_SIG_LEN {
        return None;
    }
    let parsed = EcdsaSignature::from_slice(&sig[..64]).ok()?;
    if parsed.normalize_s().is_some() {
        return None;
    }
    let v = match sig[64] {
        27 | 28 => sig[64] - 27,
        v => v,
    };
    let recid = RecoveryId::from_byte(v)?;
    let vk = VerifyingKey::recover_from_prehash(digest, &parsed, recid).ok()?;
    Some(address_of(&vk))
}

/// Constant-time check that `sig` over `digest` was produced by `expected`.
pub fn verify_signer(digest: &[u8; 32], sig: &[u8], expected: &Address) -> bool {
    match recover_signer(digest, sig) {
        Some(addr) => bool::from(addr.as_bytes().ct_eq(expected.as_bytes())),
        None => false,
    }
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename) with owner-only
/// permissions. Parent directories are created as needed.
pub(crate) fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(
    passphrase: &[u8],
    salt: &[u8; KEY_SALT_LEN],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|_| KeystoreError::Crypto)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut out[..])
        .map_err(|_| KeystoreError::Crypto)?;
    Ok(out)
}

fn seal_secret(passphrase: &[u8], secret: &[u8], kdf: &KdfParams) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();

    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;

    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let key = derive_aes256gcm_key(passphrase, &salt, kdf)?;
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key[..]).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    // ciphertext buffer = plaintext + tag
    let mut in_out = secret.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::from(KEY_FILE_MAGIC), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;

    let mut out = Vec::with_capacity(
        KEY_FILE_MAGIC.len() + KDF_HEADER_LEN + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len(),
    );
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&kdf.memory_kib.to_be_bytes());
    out.extend_from_slice(&kdf.iterations.to_be_bytes());
    out.extend_from_slice(&kdf.parallelism.to_be_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(b)
}

/// Header parameters are untrusted: out-of-range values are a corrupt file.
fn validate_stored(kdf: &KdfParams) -> Result<(), KeystoreError> {
    kdf.validate().map_err(|_| KeystoreError::InvalidKey)
}

fn open_secret(passphrase: &[u8], bytes: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeystoreError> {
    let header = KEY_FILE_MAGIC.len() + KDF_HEADER_LEN;
    if bytes.len() != header + KEY_SALT_LEN + KEY_NONCE_LEN + SECRET_LEN + TAG_LEN {
        return Err(KeystoreError::InvalidKey);
    }
    if &bytes[..KEY_FILE_MAGIC.len()] != KEY_FILE_MAGIC {
        return Err(KeystoreError::InvalidKey);
    }

    let m = KEY_FILE_MAGIC.len();
    let kdf = KdfParams {
        memory_kib: read_u32(bytes, m),
        iterations: read_u32(bytes, m + 4),
        parallelism: read_u32(bytes, m + 8),
    };
    validate_stored(&kdf)?;

    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[header..header + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(&bytes[header + KEY_SALT_LEN..header + KEY_SALT_LEN + KEY_NONCE_LEN]);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let key = derive_aes256gcm_key(passphrase, &salt, &kdf)?;
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key[..]).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = Zeroizing::new(bytes[header + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec());
    // A wrong passphrase yields a wrong key, which fails tag verification.
    let plain_len = less_safe
        .open_in_place(nonce, aead::Aad::from(KEY_FILE_MAGIC), &mut in_out[..])
        .map_err(|_| KeystoreError::Authentication)?
        .len();
    in_out.truncate(plain_len);
    Ok(in_out)
}

fn unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Directory of encrypted key files.
#[derive(Clone, Debug)]
pub struct Keystore {
    dir: PathBuf,
    kdf: KdfParams,
}

impl Keystore {
    /// Keystore rooted at `data_dir/keystore`.
    pub fn new(data_dir: &Path, kdf: KdfParams) -> Self {
        Self { dir: data_dir.join("keystore"), kdf }
    }

    /// Directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate a key, encrypt it under `passphrase` and write it as
    /// `<unix_ms>--<address>.key`. Returns the key and the file path.
    pub fn create_key(&self, passphrase: &str) -> Result<(SigningKey, PathBuf), KeystoreError> {
        let key = SigningKey::generate()?;
        let address = key.address();

        let secret = key.to_bytes();
        let sealed = seal_secret(passphrase.as_bytes(), &secret[..], &self.kdf)?;

        let path = self.dir.join(format!("{}--{}.key", unix_ms(), address.to_hex()));
        atomic_write_private(&path, &sealed)?;
        debug!(%address, path = %path.display(), "key file written");
        Ok((key, path))
    }
}

/// Decrypt a key file written by [`Keystore::create_key`].
pub fn decrypt_key_file(path: &Path, passphrase: &str) -> Result<SigningKey, KeystoreError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => KeystoreError::NotFound,
        _ => KeystoreError::Io,
    })?;
    let mut pass = passphrase.as_bytes().to_vec();
    let secret = open_secret(&pass, &bytes);
    pass.zeroize();
    SigningKey::from_bytes(&secret?[..])
}
