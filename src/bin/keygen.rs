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

//! `keygen <account-id> [data-dir]`: create an encrypted account key.
//! The passphrase is read from `AMUNCHAIN_KEY_PASSPHRASE`.

use anyhow::{bail, Context, Result};
use std::{path::PathBuf, sync::Arc};

use amunchain_ledger::core::{
    config::KdfParams,
    security::accounts::{AccountManager, KvAccountRepository},
    storage::kv::{KeyValueStorer, SledStore},
};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(id) = args.next() else {
        bail!("usage: keygen <account-id> [data-dir]");
    };
    let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "data".to_string()));
    let passphrase = std::env::var("AMUNCHAIN_KEY_PASSPHRASE")
        .context("AMUNCHAIN_KEY_PASSPHRASE is not set")?;

    std::fs::create_dir_all(&data_dir)?;
    let store: Arc<dyn KeyValueStorer> =
        Arc::new(SledStore::open(&data_dir.join("db").to_string_lossy())?);
    let mgr = AccountManager::new(Arc::new(KvAccountRepository::new(store.clone())), KdfParams::default());

    let account = mgr.create_account(&data_dir.to_string_lossy(), &id, &passphrase)?;
    store.close()?;

    println!("{}", account.wallet_address.to_checksum());
    eprintln!("key file: {}", account.wallet_filepath);
    Ok(())
}
