//! Aegis402 Server - credit clearinghouse for agent-to-agent payments
//!
//! Merchants lock collateral with the on-ledger credit contract through
//! `/subscribe` (gated by an x402 stake payment); clients discover
//! merchants with `/quote`, pay them directly on the value ledger, and
//! settle or slash through `/settle` and `/slash`. The chain watcher
//! attributes direct payments, the deadline scheduler expires stale
//! ones, and the registry is rebuilt from ledger history on every start.
//!
//! # Quick Start
//!
//! ```bash
//! # Minimal local run against a gateway on :8545
//! AEGIS__LEDGER__PRIVATE_KEY=0x... \
//! AEGIS__LEDGER__AGENT_ADDRESS=0x... \
//! AEGIS__LEDGER__CREDIT_MANAGER_ADDRESS=0x... \
//! AEGIS__LEDGER__ASSET_ADDRESS=0x... \
//! aegis-server --port 4020
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aegis_chain::{ChainWatcher, RpcClient, RpcCreditManager, RpcLedger, WatchSet};
use aegis_clearing::{recover, ClearingCore, CoreConfig, DeadlineScheduler};
use aegis_reputation::{FixedReputation, HttpReputation, ReputationReader};
use aegis_types::RepFactor;
use aegis_x402::HttpFacilitator;

use aegis_api::{router, AegisConfig, App};

/// Aegis402 - the x402 credit clearinghouse
#[derive(Parser, Debug)]
#[command(name = "aegis-server", about = "Aegis402 credit clearinghouse", version)]
struct Args {
    /// Config file path (overrides config/default and config/local)
    #[arg(long, env = "AEGIS_CONFIG")]
    config: Option<String>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match AegisConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Adapters own the gateway connection; one RPC client is shared.
    let rpc = Arc::new(RpcClient::new(
        &config.ledger.rpc_url,
        config.ledger.private_key.clone(),
    ));
    let ledger = Arc::new(RpcLedger::new(rpc.clone(), config.ledger.asset_address.clone()));
    let credit = Arc::new(RpcCreditManager::new(
        rpc,
        config.ledger.credit_manager_address.clone(),
    ));

    let reputation: Arc<dyn ReputationReader> = match &config.clearing.reputation_url {
        Some(url) => Arc::new(HttpReputation::new(
            url,
            RepFactor::from_permille(config.clearing.rep_factor_permille),
        )),
        None => Arc::new(FixedReputation::new(RepFactor::from_permille(
            config.clearing.rep_factor_permille,
        ))),
    };

    let watch = WatchSet::new();
    let core = Arc::new(ClearingCore::new(
        credit,
        reputation,
        watch.clone(),
        CoreConfig::new(config.ledger.agent_address.clone())
            .with_deadline_secs(config.clearing.default_deadline_seconds),
    ));

    // Rebuild the registry from ledger history. Best-effort: failures
    // are logged inside and never block start-up.
    let report = recover(&core, ledger.as_ref(), config.ledger.start_block).await;
    tracing::info!(
        merchants = report.merchants_loaded,
        payments = report.payments_loaded,
        "registry recovered"
    );

    // Observed transfers flow watcher → channel → clearing core.
    let (transfer_tx, mut transfer_rx) = tokio::sync::mpsc::channel(256);
    ChainWatcher::new(ledger, watch, config.clearing.poll_interval()).spawn(transfer_tx);
    {
        let core = core.clone();
        tokio::spawn(async move {
            while let Some(transfer) = transfer_rx.recv().await {
                core.payment_detected(transfer).await;
            }
        });
    }

    DeadlineScheduler::spawn(core.clone(), config.clearing.sweep_interval());

    let app = Arc::new(App {
        core,
        facilitator: Arc::new(HttpFacilitator::new(
            &config.facilitator.url,
            config.facilitator.api_key.clone(),
        )),
        network: config.ledger.network.clone(),
        asset_address: config.ledger.asset_address.clone(),
        agent_address: config.ledger.agent_address.clone(),
        credit_manager_address: config.ledger.credit_manager_address.clone(),
        min_stake: config.clearing.min_stake_amount,
        slash_bond: config.clearing.slash_bond_amount,
    });

    let addr = config.server.socket_addr();
    tracing::info!("Aegis402 clearinghouse listening on http://{addr}");
    tracing::info!("Agent:          {}", config.ledger.agent_address);
    tracing::info!("Credit manager: {}", config.ledger.credit_manager_address);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, router(app))
        .await
        .expect("server error");
}
