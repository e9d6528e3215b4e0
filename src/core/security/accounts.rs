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
#![warn(missing_docs)]

//! Local accounts: a keystore file plus an index record `account-<id>`.
//!
//! Deleting an account removes the index record only. Key files are left for
//! the operator to archive or destroy.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::{
    config::KdfParams,
    security::keystore::{decrypt_key_file, Keystore, KeystoreError, SigningKey},
    storage::kv::{KeyValueStorer, KvError, Visit},
    types::{decode_canonical_limited, encode_canonical, Address},
};

const ACCOUNT_PREFIX: &str = "account-";
const RECORD_VERSION: u8 = 1;
const MAX_RECORD_BYTES: usize = 8 * 1024;

/// Field name -> message, returned to clients on invalid input.
pub type FieldErrors = BTreeMap<&'static str, String>;

/// Account errors.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Client input failed validation.
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    /// Passphrase does not decrypt the key.
    #[error("authentication failed")]
    Authentication,
    /// Unknown account or key file.
    #[error("not found")]
    NotFound,
    /// Store or filesystem failure.
    #[error("storage: {0}")]
    Storage(String),
    /// Stored bytes are not a valid record.
    #[error("deserialization")]
    Deserialization,
}

impl From<KvError> for AccountError {
    fn from(e: KvError) -> Self {
        AccountError::Storage(e.to_string())
    }
}

impl From<KeystoreError> for AccountError {
    fn from(e: KeystoreError) -> Self {
        match e {
            KeystoreError::NotFound => AccountError::NotFound,
            KeystoreError::Authentication => AccountError::Authentication,
            KeystoreError::InvalidKey => AccountError::Deserialization,
            other => AccountError::Storage(other.to_string()),
        }
    }
}

/// Locally held identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Caller-chosen logical name, unique in the local store.
    pub id: String,
    /// Path of the encrypted key file.
    pub wallet_filepath: String,
    /// Address derived once at creation.
    pub wallet_address: Address,
}

#[derive(Serialize, Deserialize)]
struct StoredAccount {
    version: u8,
    account: Account,
}

fn encode_record(account: &Account) -> Result<Vec<u8>, AccountError> {
    encode_canonical(&StoredAccount { version: RECORD_VERSION, account: account.clone() })
        .map_err(|e| AccountError::Storage(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> Result<Account, AccountError> {
    let rec: StoredAccount =
        decode_canonical_limited(bytes, MAX_RECORD_BYTES).map_err(|_| AccountError::Deserialization)?;
    if rec.version != RECORD_VERSION {
        return Err(AccountError::Deserialization);
    }
    Ok(rec.account)
}

fn account_key(id: &str) -> Vec<u8> {
    format!("{ACCOUNT_PREFIX}{id}").into_bytes()
}

/// Account index capability.
pub trait AccountRepository: Send + Sync {
    /// Insert or replace the record for `account.id`.
    fn upsert(&self, account: &Account) -> Result<(), AccountError>;
    /// Fetch by id.
    fn get_by_id(&self, id: &str) -> Result<Account, AccountError>;
    /// All accounts; empty when none exist.
    fn list(&self) -> Result<Vec<Account>, AccountError>;
    /// Remove the record for `id`.
    fn delete_by_id(&self, id: &str) -> Result<(), AccountError>;
}

/// Account index stored in the node's key-value store.
pub struct KvAccountRepository {
    store: Arc<dyn KeyValueStorer>,
}

impl KvAccountRepository {
    /// Wrap a store.
    pub fn new(store: Arc<dyn KeyValueStorer>) -> Self {
        Self { store }
    }
}

impl AccountRepository for KvAccountRepository {
    fn upsert(&self, account: &Account) -> Result<(), AccountError> {
        let bytes = encode_record(account)?;
        self.store.set(&account_key(&account.id), &bytes)?;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Account, AccountError> {
        match self.store.get(&account_key(id))? {
            Some(bytes) => decode_record(&bytes),
            None => Err(AccountError::NotFound),
        }
    }

    fn list(&self) -> Result<Vec<Account>, AccountError> {
        let mut out = Vec::new();
        let mut corrupt = false;
        self.store.iterate_prefix(ACCOUNT_PREFIX.as_bytes(), &mut |_, v| {
            match decode_record(v) {
                Ok(a) => {
                    out.push(a);
                    Ok(Visit::Continue)
                }
                Err(_) => {
                    corrupt = true;
                    Ok(Visit::Stop)
                }
            }
        })?;
        if corrupt {
            return Err(AccountError::Deserialization);
        }
        Ok(out)
    }

    fn delete_by_id(&self, id: &str) -> Result<(), AccountError> {
        let key = account_key(id);
        if self.store.get(&key)?.is_none() {
            return Err(AccountError::NotFound);
        }
        self.store.delete(&key)?;
        Ok(())
    }
}

/// Creates keys and keeps the account index in sync with them.
pub struct AccountManager {
    repo: Arc<dyn AccountRepository>,
    kdf: KdfParams,
    // Serializes the exists-check and the index write in `create_account`.
    create_lock: Mutex<()>,
}

impl AccountManager {
    /// Manager over an account index.
    pub fn new(repo: Arc<dyn AccountRepository>, kdf: KdfParams) -> Self {
        Self { repo, kdf, create_lock: Mutex::new(()) }
    }

    /// Generate a key under `data_dir/keystore`, encrypt it with `passphrase`
    /// and record it as account `id`.
    pub fn create_account(
        &self,
        data_dir: &str,
        id: &str,
        passphrase: &str,
    ) -> Result<Account, AccountError> {
        let mut errors = FieldErrors::new();
        if data_dir.trim().is_empty() {
            errors.insert("data_dir", "is required".to_string());
        }
        if id.trim().is_empty() {
            errors.insert("id", "is required".to_string());
        }
        if passphrase.is_empty() {
            errors.insert("passphrase", "is required".to_string());
        }
        if !errors.is_empty() {
            return Err(AccountError::Validation(errors));
        }

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| AccountError::Storage("account lock poisoned".to_string()))?;

        match self.repo.get_by_id(id) {
            Ok(_) => {
                let mut errors = FieldErrors::new();
                errors.insert("id", "already exists".to_string());
                return Err(AccountError::Validation(errors));
            }
            Err(AccountError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let keystore = Keystore::new(Path::new(data_dir), self.kdf);
        let (key, path) = keystore.create_key(passphrase)?;
        let account = Account {
            id: id.to_string(),
            wallet_filepath: path.to_string_lossy().into_owned(),
            wallet_address: key.address(),
        };

        if let Err(e) = self.repo.upsert(&account) {
            warn!(id, path = %account.wallet_filepath, error = %e, "key file written but account index update failed");
            return Err(e);
        }
        info!(id, address = %account.wallet_address, "account created");
        Ok(account)
    }

    /// Look up an account.
    pub fn get_account(&self, id: &str) -> Result<Account, AccountError> {
        self.repo.get_by_id(id)
    }

    /// All local accounts.
    pub fn list_accounts(&self) -> Result<Vec<Account>, AccountError> {
        self.repo.list()
    }

    /// Drop the index record; the key file stays on disk.
    pub fn delete_account(&self, id: &str) -> Result<(), AccountError> {
        self.repo.delete_by_id(id)?;
        info!(id, "account removed from index");
        Ok(())
    }

    /// Decrypt a key file.
    pub fn decrypt_signing_key(
        &self,
        wallet_filepath: &str,
        passphrase: &str,
    ) -> Result<SigningKey, AccountError> {
        if wallet_filepath.trim().is_empty() {
            return Err(AccountError::NotFound);
        }
        Ok(decrypt_key_file(Path::new(wallet_filepath), passphrase)?)
    }

    /// Resolve `id` and decrypt its key, checking the key still matches the
    /// recorded address.
    pub fn unlock(&self, id: &str, passphrase: &str) -> Result<(Account, SigningKey), AccountError> {
        if passphrase.is_empty() {
            let mut errors = FieldErrors::new();
            errors.insert("passphrase", "is required".to_string());
            return Err(AccountError::Validation(errors));
        }
        let account = self.repo.get_by_id(id)?;
        let key = self.decrypt_signing_key(&account.wallet_filepath, passphrase)?;
        if key.address() != account.wallet_address {
            warn!(id, "key file does not match recorded address");
            return Err(AccountError::Storage("key file does not match account address".to_string()));
        }
        Ok((account, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::kv::SledStore;

    fn manager() -> (AccountManager, Arc<dyn KeyValueStorer>) {
        let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::temporary().unwrap());
        let repo = Arc::new(KvAccountRepository::new(store.clone()));
        (AccountManager::new(repo, KdfParams::insecure_for_tests()), store)
    }

    #[test]
    fn empty_inputs_report_every_field() {
        let (mgr, _) = manager();
        match mgr.create_account("", " ", "") {
            Err(AccountError::Validation(errs)) => {
                assert_eq!(errs.keys().copied().collect::<Vec<_>>(), vec!["data_dir", "id", "passphrase"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager();
        let data_dir = dir.path().to_str().unwrap();
        mgr.create_account(data_dir, "alice", "pw").unwrap();
        match mgr.create_account(data_dir, "alice", "pw2") {
            Err(AccountError::Validation(errs)) => assert_eq!(errs["id"], "already exists"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn delete_keeps_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager();
        let acct = mgr.create_account(dir.path().to_str().unwrap(), "alice", "pw").unwrap();

        mgr.delete_account("alice").unwrap();
        assert!(matches!(mgr.get_account("alice"), Err(AccountError::NotFound)));
        assert!(matches!(mgr.delete_account("alice"), Err(AccountError::NotFound)));
        assert!(Path::new(&acct.wallet_filepath).exists());
        // the key is still usable by path
        let key = mgr.decrypt_signing_key(&acct.wallet_filepath, "pw").unwrap();
        assert_eq!(key.address(), acct.wallet_address);
    }

    #[test]
    fn corrupt_record_is_a_deserialization_error() {
        let (mgr, store) = manager();
        store.set(b"account-bob", b"\xff\x00garbage").unwrap();
        assert!(matches!(mgr.get_account("bob"), Err(AccountError::Deserialization)));
        assert!(matches!(mgr.list_accounts(), Err(AccountError::Deserialization)));
    }

    #[test]
    fn unlock_requires_passphrase_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager();
        let acct = mgr.create_account(dir.path().to_str().unwrap(), "carol", "pw").unwrap();

        let (a, key) = mgr.unlock("carol", "pw").unwrap();
        assert_eq!(a, acct);
        assert_eq!(key.address(), acct.wallet_address);
        assert!(matches!(mgr.unlock("carol", "bad"), Err(AccountError::Authentication)));
        assert!(matches!(mgr.unlock("carol", ""), Err(AccountError::Validation(_))));
    }
}
