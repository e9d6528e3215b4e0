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

use std::sync::Arc;

use amunchain_ledger::core::{
    chain::{genesis::load_genesis, ledger::Chain},
    config::KdfParams,
    security::accounts::{AccountError, AccountManager, AccountRepository, KvAccountRepository},
    storage::kv::{KeyValueStorer, SledStore},
    tx::Transaction,
    types::Address,
};

fn manager() -> (AccountManager, Arc<KvAccountRepository>, Arc<dyn KeyValueStorer>) {
    let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::temporary().unwrap());
    let repo = Arc::new(KvAccountRepository::new(store.clone()));
    let mgr = AccountManager::new(repo.clone(), KdfParams::insecure_for_tests());
    (mgr, repo, store)
}

#[test]
fn create_sign_verify_then_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, _, _) = manager();

    let a = mgr.create_account(dir.path().to_str().unwrap(), "A", "P").unwrap();
    let key = mgr.decrypt_signing_key(&a.wallet_filepath, "P").unwrap();
    let b = Address::from_bytes([0xbb; 20]);

    let mut tx = Transaction::new(a.wallet_address, b, 100u64, vec![], 0).unwrap();
    tx.sign(&key).unwrap();
    assert!(tx.verify());

    let sig = tx.signature.as_mut().unwrap();
    sig[10] ^= 0x01;
    assert!(!tx.verify());
}

#[test]
fn wrong_passphrase_is_an_authentication_error() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("x");
    let (mgr, _, _) = manager();

    let acct = mgr
        .create_account(data_dir.to_str().unwrap(), "alice", "correct-pw")
        .unwrap();
    assert!(matches!(
        mgr.decrypt_signing_key(&acct.wallet_filepath, "wrong-pw"),
        Err(AccountError::Authentication)
    ));
    let key = mgr.decrypt_signing_key(&acct.wallet_filepath, "correct-pw").unwrap();
    assert_eq!(key.address(), acct.wallet_address);
}

#[test]
fn deleted_accounts_are_gone_but_keys_remain() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, repo, _) = manager();
    assert!(repo.list().unwrap().is_empty());

    let acct = mgr.create_account(dir.path().to_str().unwrap(), "alice", "pw").unwrap();
    repo.delete_by_id("alice").unwrap();
    assert!(matches!(repo.get_by_id("alice"), Err(AccountError::NotFound)));
    assert!(repo.list().unwrap().is_empty());
    assert!(std::path::Path::new(&acct.wallet_filepath).exists());
    assert!(matches!(repo.delete_by_id("alice"), Err(AccountError::NotFound)));
}

#[test]
fn signed_transfer_lands_in_a_block() {
    let dir = tempfile::tempdir().unwrap();
    let (mgr, _, store) = manager();
    let chain = Chain::open(store).unwrap();
    let genesis = load_genesis(None).unwrap();
    chain.initialize(&genesis).unwrap();

    mgr.create_account(dir.path().to_str().unwrap(), "A", "P").unwrap();
    let (acct, key) = mgr.unlock("A", "P").unwrap();

    let mut txs = Vec::new();
    for nonce in 0..3 {
        let mut tx = Transaction::new(acct.wallet_address, Address::from_bytes([2; 20]), 100u64, vec![], nonce).unwrap();
        tx.sign(&key).unwrap();
        txs.push(tx);
    }
    let block = chain.build_next_block(txs, acct.wallet_address, 1_767_225_601_000, vec![]).unwrap();
    assert_eq!(block.header.parent_hash, Some(genesis.hash()));

    let hash = chain.accept_block(block).unwrap();
    assert_eq!(chain.canonical_hash().unwrap(), hash);
    assert_eq!(chain.next_nonce(&acct.wallet_address).unwrap(), 3);
    assert_eq!(chain.block_by_hash(&hash).unwrap().unwrap().transactions.len(), 3);
}
