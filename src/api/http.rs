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

//! HTTP surface:
//! - `POST /accounts`              create `{id, passphrase}`
//! - `GET  /accounts`              list
//! - `GET  /accounts/:id`          fetch
//! - `POST /accounts/:id/key`      decrypt `{passphrase}` (required on every call)
//! - `POST /transactions/verify`   verify a JSON transaction
//! - `POST /blocks`                assemble a block on the head and append it
//! - `GET  /chain/head`            canonical head
//! - `GET  /metrics`               Prometheus text
//!
//! Client mistakes return 422 `{"errors": {field: message}}`. Internal
//! failures return an opaque 500 and are logged.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    core::{
        chain::ledger::{Chain, ChainError, ChainStatus},
        security::accounts::{Account, AccountError, AccountManager, FieldErrors},
        tx::{Transaction, TxJson},
        types::{decode_hex_prefixed, encode_hex_prefixed, Address},
    },
    monitoring::metrics::Metrics,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Account manager.
    pub accounts: Arc<AccountManager>,
    /// Canonical chain.
    pub chain: Arc<Chain>,
    /// Metrics registry.
    pub metrics: Arc<Metrics>,
    /// Node data directory; key files go under `<data_dir>/keystore`.
    pub data_dir: String,
}

/// Handler errors mapped onto status codes.
#[derive(Debug)]
pub enum ApiError {
    /// 422 with a field map.
    Validation(FieldErrors),
    /// 401.
    Authentication,
    /// 404.
    NotFound,
    /// 500; detail is logged, never returned.
    Internal(String),
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(f) => ApiError::Validation(f),
            AccountError::Authentication => ApiError::Authentication,
            AccountError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::NotInitialized | ChainError::Storage(_) | ChainError::Corrupt => {
                ApiError::Internal(e.to_string())
            }
            rejected => field_error("block", rejected.to_string()),
        }
    }
}

fn field_error(field: &'static str, message: String) -> ApiError {
    let mut fields = FieldErrors::new();
    fields.insert(field, message);
    ApiError::Validation(fields)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(fields) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "errors": fields }))).into_response()
            }
            ApiError::Authentication => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "authentication failed" })))
                    .into_response()
            }
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
            }
            ApiError::Internal(detail) => {
                error!(%detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "internal error" })))
                    .into_response()
            }
        }
    }
}

/// Account as rendered to clients.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountView {
    /// Logical name.
    pub id: String,
    /// Key file path.
    pub wallet_filepath: String,
    /// Checksummed address.
    pub wallet_address: String,
}

impl From<Account> for AccountView {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            wallet_filepath: a.wallet_filepath,
            wallet_address: a.wallet_address.to_checksum(),
        }
    }
}

/// `POST /accounts` body.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Logical name.
    #[serde(default)]
    pub id: String,
    /// Encryption passphrase.
    #[serde(default)]
    pub passphrase: String,
}

/// `POST /accounts/:id/key` body.
#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    /// Passphrase.
    #[serde(default)]
    pub passphrase: String,
}

/// Decrypted key material.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyView {
    /// Logical name.
    pub id: String,
    /// Checksummed address.
    pub address: String,
    /// `0x` hex secp256k1 secret.
    pub private_key: String,
}

/// Verification outcome.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyView {
    /// Transaction hash.
    pub hash: String,
    /// Signature recovers to `from`.
    pub valid: bool,
}

/// Canonical head.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeadView {
    /// `uninitialized`, `genesis` or `synced`.
    pub status: String,
    /// Head height.
    pub height: Option<u64>,
    /// Head hash.
    pub hash: Option<String>,
}

/// `POST /blocks` body.
#[derive(Debug, Deserialize)]
pub struct SubmitBlockRequest {
    /// Producer address.
    pub producer: String,
    /// Signed transactions, in block order.
    #[serde(default)]
    pub transactions: Vec<TxJson>,
    /// `0x` hex header extra data.
    #[serde(default)]
    pub extra: String,
}

/// Appended block.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockView {
    /// Block hash.
    pub hash: String,
    /// Block height.
    pub height: u64,
    /// Transactions included.
    pub transactions: usize,
}

async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(Into::into)
}

/// `POST /accounts`
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountView>), ApiError> {
    let mgr = state.accounts.clone();
    let data_dir = state.data_dir.clone();
    let account = blocking(move || mgr.create_account(&data_dir, &req.id, &req.passphrase)).await?;
    state.metrics.accounts_created_total.inc();
    Ok((StatusCode::CREATED, Json(account.into())))
}

/// `GET /accounts`
pub async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<AccountView>>, ApiError> {
    let mgr = state.accounts.clone();
    let accounts = blocking(move || mgr.list_accounts()).await?;
    Ok(Json(accounts.into_iter().map(AccountView::from).collect()))
}

/// `GET /accounts/:id`
pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    let mgr = state.accounts.clone();
    let account = blocking(move || mgr.get_account(&id)).await?;
    Ok(Json(account.into()))
}

/// `POST /accounts/:id/key`
pub async fn unlock_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<KeyView>, ApiError> {
    let mgr = state.accounts.clone();
    let (account, key) = blocking(move || mgr.unlock(&id, &req.passphrase)).await?;
    info!(id = %account.id, "signing key released");
    let secret = key.to_bytes();
    Ok(Json(KeyView {
        id: account.id,
        address: account.wallet_address.to_checksum(),
        private_key: encode_hex_prefixed(&secret[..]),
    }))
}

/// `POST /transactions/verify`
pub async fn verify_transaction(
    State(state): State<AppState>,
    Json(body): Json<TxJson>,
) -> Result<Json<VerifyView>, ApiError> {
    let tx = Transaction::try_from(body).map_err(|e| field_error("transaction", e.to_string()))?;
    let valid = tx.verify();
    if valid {
        state.metrics.tx_verified_total.inc();
    } else {
        state.metrics.tx_rejected_total.inc();
    }
    Ok(Json(VerifyView { hash: tx.hash().to_hex(), valid }))
}

/// `POST /blocks`
///
/// Builds the next block from the submitted transactions and appends it; the
/// usual parent, signature and nonce checks apply.
pub async fn submit_block(
    State(state): State<AppState>,
    Json(req): Json<SubmitBlockRequest>,
) -> Result<(StatusCode, Json<BlockView>), ApiError> {
    let producer =
        Address::from_str(&req.producer).map_err(|e| field_error("producer", e.to_string()))?;
    let extra = decode_hex_prefixed(&req.extra).map_err(|e| field_error("extra", e.to_string()))?;
    let transactions = req
        .transactions
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            Transaction::try_from(t).map_err(|e| field_error("transactions", format!("{i}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let count = transactions.len();
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let chain = state.chain.clone();
    let (hash, height) = blocking(move || {
        let block = chain.build_next_block(transactions, producer, timestamp_ms, extra)?;
        let height = block.header.height;
        let hash = chain.accept_block(block)?;
        Ok::<_, ChainError>((hash, height))
    })
    .await?;
    info!(%hash, height, transactions = count, "block appended via http");
    Ok((StatusCode::CREATED, Json(BlockView { hash: hash.to_hex(), height, transactions: count })))
}

/// `GET /chain/head`
pub async fn chain_head(State(state): State<AppState>) -> Json<HeadView> {
    let status = match state.chain.status() {
        ChainStatus::Uninitialized => "uninitialized",
        ChainStatus::GenesisLoaded => "genesis",
        ChainStatus::Synced { .. } => "synced",
    };
    let head = state.chain.head();
    Json(HeadView {
        status: status.to_string(),
        height: head.map(|h| h.height),
        hash: head.map(|h| h.hash.to_hex()),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

/// Assemble the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/key", post(unlock_account))
        .route("/transactions/verify", post(verify_transaction))
        .route("/blocks", post(submit_block))
        .route("/chain/head", get(chain_head))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the listener fails or `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, state: AppState, shutdown: S) -> std::io::Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        chain::genesis::load_genesis,
        config::KdfParams,
        security::{accounts::KvAccountRepository, keystore::SigningKey},
        storage::kv::{KeyValueStorer, SledStore},
    };

    fn state(dir: &tempfile::TempDir) -> AppState {
        let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::temporary().unwrap());
        let repo = Arc::new(KvAccountRepository::new(store.clone()));
        let chain = Chain::open(store).unwrap();
        chain.initialize(&load_genesis(None).unwrap()).unwrap();
        AppState {
            accounts: Arc::new(AccountManager::new(repo, KdfParams::insecure_for_tests())),
            chain: Arc::new(chain),
            metrics: Arc::new(Metrics::new().unwrap()),
            data_dir: dir.path().to_string_lossy().into_owned(),
        }
    }

    fn status_of(e: ApiError) -> StatusCode {
        e.into_response().status()
    }

    #[tokio::test]
    async fn create_then_fetch_and_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);

        let req = CreateAccountRequest { id: "alice".into(), passphrase: "pw".into() };
        let (code, Json(created)) = create_account(State(st.clone()), Json(req)).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);

        let Json(fetched) = get_account(State(st.clone()), Path("alice".to_string())).await.unwrap();
        assert_eq!(fetched, created);

        let Json(all) = list_accounts(State(st.clone())).await.unwrap();
        assert_eq!(all.len(), 1);

        let Json(key) = unlock_account(
            State(st.clone()),
            Path("alice".to_string()),
            Json(UnlockRequest { passphrase: "pw".into() }),
        )
        .await
        .unwrap();
        assert_eq!(key.address, created.wallet_address);

        let wrong = unlock_account(
            State(st.clone()),
            Path("alice".to_string()),
            Json(UnlockRequest { passphrase: "nope".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(status_of(wrong), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_input_yields_field_map() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let req = CreateAccountRequest { id: String::new(), passphrase: String::new() };
        match create_account(State(st.clone()), Json(req)).await {
            Err(ApiError::Validation(fields)) => {
                assert!(fields.contains_key("id"));
                assert!(fields.contains_key("passphrase"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let missing = get_account(State(st), Path("ghost".to_string())).await.unwrap_err();
        assert_eq!(status_of(missing), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn verify_reports_validity_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let key = SigningKey::generate().unwrap();
        let mut tx = Transaction::new(key.address(), Address::from_bytes([2; 20]), 100u64, vec![], 0).unwrap();
        tx.sign(&key).unwrap();

        let Json(ok) = verify_transaction(State(st.clone()), Json(TxJson::from(&tx))).await.unwrap();
        assert!(ok.valid);
        assert_eq!(ok.hash, tx.hash().to_hex());

        let mut forged = TxJson::from(&tx);
        forged.value = "101".into();
        let Json(bad) = verify_transaction(State(st.clone()), Json(forged)).await.unwrap();
        assert!(!bad.valid);

        let mut junk = TxJson::from(&tx);
        junk.value = "-1".into();
        let err = verify_transaction(State(st.clone()), Json(junk)).await.unwrap_err();
        assert_eq!(status_of(err), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(st.metrics.tx_verified_total.get(), 1);
        assert_eq!(st.metrics.tx_rejected_total.get(), 1);
    }

    #[tokio::test]
    async fn submitted_block_advances_the_head() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let key = SigningKey::generate().unwrap();
        let tx_at = |nonce| {
            let mut tx =
                Transaction::new(key.address(), Address::from_bytes([2; 20]), 5u64, vec![], nonce).unwrap();
            tx.sign(&key).unwrap();
            TxJson::from(&tx)
        };

        let req = SubmitBlockRequest {
            producer: key.address().to_checksum(),
            transactions: vec![tx_at(0), tx_at(1)],
            extra: "0x01".into(),
        };
        let (code, Json(view)) = submit_block(State(st.clone()), Json(req)).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(view.height, 1);
        assert_eq!(view.transactions, 2);

        let Json(head) = chain_head(State(st.clone())).await;
        assert_eq!(head.status, "synced");
        assert_eq!(head.hash, Some(view.hash));

        // Replaying nonce 0 is a client error and leaves the head alone.
        let replay = SubmitBlockRequest {
            producer: key.address().to_checksum(),
            transactions: vec![tx_at(0)],
            extra: String::new(),
        };
        let err = submit_block(State(st.clone()), Json(replay)).await.unwrap_err();
        assert_eq!(status_of(err), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(st.chain.head().unwrap().height, 1);

        let bad_producer =
            SubmitBlockRequest { producer: "0xzz".into(), transactions: vec![], extra: String::new() };
        match submit_block(State(st), Json(bad_producer)).await {
            Err(ApiError::Validation(fields)) => assert!(fields.contains_key("producer")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn head_reports_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let Json(head) = chain_head(State(st.clone())).await;
        assert_eq!(head.status, "genesis");
        assert_eq!(head.height, Some(0));
        assert_eq!(head.hash, Some(load_genesis(None).unwrap().hash().to_hex()));
    }
}
