#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Amunchain ledger node entrypoint (systemd-friendly).
//!
//! `amunchain-ledger [config.toml]`; the path may also come from
//! `AMUNCHAIN_CONFIG`. Without one, defaults apply. Set
//! `AMUNCHAIN_LOG_FORMAT=json` for JSON logs; filtering follows `RUST_LOG`.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use amunchain_ledger::{
    api::http::{self, AppState},
    core::{
        chain::{genesis::load_genesis, ledger::Chain},
        config::NodeConfig,
        consensus::coordinator::{ConsensusCoordinator, ConsensusError},
        security::accounts::{AccountManager, KvAccountRepository},
        storage::kv::{KeyValueStorer, SledStore},
        types::NodeId,
    },
    monitoring::metrics::Metrics,
    networking::{
        p2p::spawn_p2p,
        pubsub::{InMemoryBroker, PubSubBroker},
    },
};

const SYNC_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("AMUNCHAIN_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn load_config() -> Result<NodeConfig> {
    let path = std::env::args().nth(1).or_else(|| std::env::var("AMUNCHAIN_CONFIG").ok());
    let cfg = match path {
        Some(p) => NodeConfig::load(Path::new(&p)).with_context(|| format!("loading {p}"))?,
        None => NodeConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Periodically ask peers for their canonical hash and report divergence.
async fn sync_check(coordinator: Arc<ConsensusCoordinator>, chain: Arc<Chain>) {
    let mut tick = tokio::time::interval(SYNC_CHECK_INTERVAL);
    loop {
        tick.tick().await;
        if let Err(e) = coordinator.broadcast_request_to_network() {
            debug!(error = %e, "sync check skipped");
            continue;
        }
        match coordinator.receive_majority_vote_consensus_response_from_network().await {
            Ok(agreed) => match chain.canonical_hash() {
                Ok(local) if local == agreed => debug!(%agreed, "in sync with network"),
                Ok(local) => warn!(%local, %agreed, "local head differs from network majority"),
                Err(e) => warn!(error = %e, "no local head"),
            },
            Err(ConsensusError::TimedOut) => debug!("no peers answered"),
            Err(e) => info!(error = %e, "sync check unresolved"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config()?;
    let data_dir = Path::new(&cfg.node.data_dir);
    std::fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;

    info!(node = %cfg.node.name, data_dir = %data_dir.display(), "amunchain ledger node starting");

    let metrics = Arc::new(Metrics::new()?);
    let db_path = data_dir.join("db");
    let store: Arc<dyn KeyValueStorer> = Arc::new(SledStore::open(&db_path.to_string_lossy())?);

    let genesis = load_genesis(cfg.node.genesis_path.as_deref().map(Path::new))?;
    let chain = Arc::new(Chain::open(store.clone())?.with_metrics(metrics.clone()));
    chain.initialize(&genesis)?;

    let accounts = Arc::new(AccountManager::new(
        Arc::new(KvAccountRepository::new(store.clone())),
        cfg.keystore,
    ));

    let (broker, node_id, p2p_handle): (Arc<dyn PubSubBroker>, NodeId, _) = if cfg.p2p.enabled {
        let (gossip, handle) = spawn_p2p(&cfg.p2p, data_dir, Some(metrics.clone()))?;
        let id = NodeId(gossip.peer_id().to_string());
        let b: Arc<dyn PubSubBroker> = gossip;
        (b, id, Some(handle))
    } else {
        let b: Arc<dyn PubSubBroker> = Arc::new(InMemoryBroker::new());
        (b, NodeId(cfg.node.name.clone()), None)
    };

    let coordinator = Arc::new(
        ConsensusCoordinator::new(node_id.clone(), cfg.consensus.clone(), broker.clone())?
            .with_metrics(metrics.clone()),
    );
    info!(node_id = %node_id, p2p = cfg.p2p.enabled, "consensus coordinator ready");

    let responder = {
        let coordinator = coordinator.clone();
        let chain = chain.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.serve_requests(|| chain.canonical_hash().ok()).await {
                warn!(error = %e, "consensus responder stopped");
            }
        })
    };
    let checker = cfg
        .p2p
        .enabled
        .then(|| tokio::spawn(sync_check(coordinator.clone(), chain.clone())));

    let listener = tokio::net::TcpListener::bind(&cfg.http.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.http.listen_addr))?;
    let state = AppState {
        accounts,
        chain,
        metrics,
        data_dir: cfg.node.data_dir.clone(),
    };
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    };
    http::serve(listener, state, shutdown).await?;

    broker.close();
    responder.abort();
    if let Some(c) = checker {
        c.abort();
    }
    if let Some(h) = p2p_handle {
        let _ = h.await;
    }
    store.close()?;
    info!("node stopped");
    Ok(())
}
