//! Entry point: loads configuration, wires every adapter and core
//! component, spawns the daemon's long-running tasks under one shared
//! cancellation token, and waits for them to wind down on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use clap::Parser;
use mpc_client::{PublicKeyOutput, SecretKeyShare};
use solana_sdk::pubkey::Pubkey;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relayer::adapters::{
    AptosHttpViewRpc, EvmHttpNftRpc, HttpAttestationIndexer, HttpCoordinationChain, HttpContentStore,
    HttpMpcService, NearHttpViewRpc, SolanaTargetChainSubmitter, SuiHttpObjectRpc,
};
use relayer::attestation_ingester::{AttestationIngester, AttestationIngesterConfig};
use relayer::deposit_verifier::{ChainDepositVerifier, SourceChainRpcUrls};
use relayer::event_poller::{EventPoller, EventPollerConfig};
use relayer::external::{ContentStore, CoordinationChain};
use relayer::health::HealthChecker;
use relayer::metadata_pipeline::MetadataPipeline;
use relayer::metrics;
use relayer::mint_submitter::MintSubmitter;
use relayer::presign_pool::PresignPool;
use relayer::sequencer::TxSequencer;
use relayer::session_fsm::{SealSignedHandler, SessionFsm};
use relayer::settings::{CliOptions, CfSettings, Settings};
use relayer::shutdown;
use relayer::signing_orchestrator::SigningOrchestrator;
use relayer::store::Store;
use relayer::treasury::Treasury;
use relayer::{api, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse();
    let settings = match Settings::load(options) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("failed to load configuration: {error:#}");
            std::process::exit(1);
        }
    };

    logging::init(&settings.logging.level);
    metrics::register_metrics();

    if let Err(error) = run(settings).await {
        error!(%error, "relayer exited with an error");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting relayer");

    let shutdown = CancellationToken::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let store = Store::open(&settings.database.path)?;

    let coordination_chain: Arc<dyn CoordinationChain> = Arc::new(HttpCoordinationChain::new(
        settings.coordination.rpc_url.clone(),
        settings.coordination.registry_object_id.clone(),
        settings.coordination.admin_capability_object_id.clone(),
    ));
    let sequencer = TxSequencer::spawn(coordination_chain.clone(), shutdown.clone());

    let mpc = Arc::new(HttpMpcService::new(settings.mpc.service_url.clone()));

    let treasury = Arc::new(Treasury::new(
        coordination_chain.clone(),
        sequencer.clone(),
        settings.treasury.min_fee_balance,
        settings.treasury.min_gas_balance,
    ));

    let presign_pool = Arc::new(PresignPool::new(
        store.clone(),
        sequencer.clone(),
        mpc.clone(),
        treasury.clone(),
        ChronoDuration::seconds(settings.presign_pool.lease_ttl_secs as i64),
    ));

    let program_id: Pubkey = settings
        .target
        .program_id
        .parse()
        .map_err(|e| anyhow::anyhow!("target.program_id is not a valid pubkey: {e}"))?;

    let target_chain = Arc::new(SolanaTargetChainSubmitter::new(
        settings.target.rpc_url.clone(),
        program_id,
        &settings.signer.key_file,
    )?);

    let mint_submitter = Arc::new(MintSubmitter::new(
        target_chain.clone(),
        program_id,
        settings.retry.max_retries,
        Duration::from_millis(settings.retry.base_delay_ms),
    ));

    let deposit_verifier = Arc::new(ChainDepositVerifier::new(
        SourceChainRpcUrls {
            ethereum_sepolia: settings.source_chains.ethereum_sepolia_rpc_url.clone(),
            sui: settings.source_chains.sui_rpc_url.clone(),
            near: settings.source_chains.near_rpc_url.clone(),
            aptos: settings.source_chains.aptos_rpc_url.clone(),
        },
        Box::new(EvmHttpNftRpc::default()),
        Box::new(SuiHttpObjectRpc::default()),
        Box::new(NearHttpViewRpc::default()),
        Box::new(AptosHttpViewRpc::default()),
    ));

    let content_store: Option<Arc<dyn ContentStore>> = if settings.metadata.content_network_enabled {
        Some(Arc::new(HttpContentStore::new(
            settings.metadata.upload_url.clone(),
            settings.metadata.upload_secret.clone().unwrap_or_default(),
        )))
    } else {
        None
    };
    let metadata_pipeline = Arc::new(MetadataPipeline::new(content_store, settings.metadata.gateways())?);

    let fsm = SessionFsm::new(
        store.clone(),
        sequencer.clone(),
        target_chain.clone(),
        deposit_verifier,
        metadata_pipeline,
        settings.fee.payment_address.clone(),
        settings.fee.amount,
    );

    let secret_share_bytes = std::fs::read(&settings.mpc.secret_share_path)
        .map_err(|e| anyhow::anyhow!("could not read mpc.secret_share_path: {e}"))?;
    let secret_share = SecretKeyShare::from_bytes(secret_share_bytes)
        .map_err(|e| anyhow::anyhow!("malformed secret key share: {e}"))?;
    let public_output_bytes: [u8; 32] = hex::decode(&settings.mpc.public_key_output_hex)
        .map_err(|e| anyhow::anyhow!("mpc.public_key_output_hex must be hex: {e}"))?
        .try_into()
        .map_err(|_| anyhow::anyhow!("mpc.public_key_output_hex must decode to 32 bytes"))?;
    let public_output = PublicKeyOutput(public_output_bytes);

    let signing_orchestrator = Arc::new(SigningOrchestrator::new(
        presign_pool.clone(),
        mpc.clone(),
        sequencer.clone(),
        secret_share,
        public_output,
    ));

    let seal_signed_handler = Arc::new(SealSignedHandler::new(store.clone(), mint_submitter.clone()));

    let sign_pending_poller = EventPoller::new(
        store.clone(),
        coordination_chain.clone(),
        EventPollerConfig {
            stream_name: "sign_pending".into(),
            fully_qualified_event_type: "SignPending".into(),
            poll_interval: Duration::from_millis(settings.indexer.poll_interval_ms),
            page_size: 50,
        },
        signing_orchestrator,
    );
    let seal_signed_poller = EventPoller::new(
        store.clone(),
        coordination_chain.clone(),
        EventPollerConfig {
            stream_name: "seal_signed".into(),
            fully_qualified_event_type: "SealSigned".into(),
            poll_interval: Duration::from_millis(settings.indexer.poll_interval_ms),
            page_size: 50,
        },
        seal_signed_handler,
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(sign_pending_poller.run(shutdown.clone())));
    tasks.push(tokio::spawn(seal_signed_poller.run(shutdown.clone())));

    let emitters = settings.indexer.parsed_emitters()?;
    let attestation_ingester = AttestationIngester::new(
        store.clone(),
        Arc::new(HttpAttestationIndexer::new(settings.indexer.base_url.clone())),
        coordination_chain.clone(),
        sequencer.clone(),
        AttestationIngesterConfig {
            emitters,
            poll_interval: Duration::from_millis(settings.indexer.poll_interval_ms),
            enabled: settings.indexer.enable_attestation_ingester,
        },
    );
    tasks.push(tokio::spawn(attestation_ingester.run(shutdown.clone())));

    tasks.push(tokio::spawn(spawn_expiry_sweeper(store.clone(), shutdown.clone())));
    tasks.push(tokio::spawn(spawn_presign_replenisher(presign_pool.clone(), settings.presign_pool.min_available, shutdown.clone())));

    let health_checker = HealthChecker::new("0.0.0.0", settings.health_check.port).await?;
    let health_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(error) = health_checker.run(health_shutdown).await {
            error!(%error, "health checker exited with an error");
        }
    }));

    let metrics_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(error) = metrics::start("0.0.0.0", settings.metrics.port, metrics_shutdown).await {
            error!(%error, "metrics server exited with an error");
        }
    }));

    let api_shutdown = shutdown.clone();
    let api_port = settings.api.port;
    let api_treasury = settings.treasury.enabled.then(|| treasury);
    let api_presign_pool = settings.presign_pool.enabled.then(|| presign_pool);
    tasks.push(tokio::spawn(async move {
        if let Err(error) =
            api::serve("0.0.0.0", api_port, fsm, api_treasury, api_presign_pool, api_shutdown).await
        {
            error!(%error, "api server exited with an error");
        }
    }));

    for task in tasks {
        let _ = task.await;
    }

    info!("relayer shut down cleanly");
    Ok(())
}

async fn spawn_expiry_sweeper(store: Arc<Store>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                if let Err(error) = store.expire_stale_sessions(ChronoDuration::hours(1)).await {
                    error!(%error, "session expiry sweep failed");
                }
            }
        }
    }
}

async fn spawn_presign_replenisher(pool: Arc<PresignPool>, min_available: u32, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                match pool.stats() {
                    Ok(stats) if stats.available < min_available as u64 => {
                        let deficit = min_available as u64 - stats.available;
                        pool.replenish(deficit as u32).await;
                    }
                    Ok(_) => {}
                    Err(error) => error!(%error, "could not read presign pool stats"),
                }
            }
        }
    }
}
