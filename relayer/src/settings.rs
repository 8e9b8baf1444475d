//! Layered configuration: built-in defaults, overridden by an optional config
//! file, overridden by environment variables, overridden by explicit CLI
//! flags. Shaped after the settings/`CliOptions`+`Source` split used
//! throughout this daemon family's binaries.

use clap::Parser;
use config::{
    builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, Map, Source,
    Value, ValueKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about = "Cross-chain NFT bridge relayer daemon")]
pub struct CliOptions {
    #[clap(long = "config-file", env = "CONFIG_FILE")]
    pub config_file: Option<String>,

    #[clap(long = "coordination-rpc-url", env = "COORDINATION_RPC_URL")]
    pub coordination_rpc_url: Option<String>,
    #[clap(long = "coordination-package-id", env = "COORDINATION_PACKAGE_ID")]
    pub coordination_package_id: Option<String>,
    #[clap(long = "registry-object-id", env = "REGISTRY_OBJECT_ID")]
    pub registry_object_id: Option<String>,
    #[clap(long = "orchestrator-state-object-id", env = "ORCHESTRATOR_STATE_OBJECT_ID")]
    pub orchestrator_state_object_id: Option<String>,
    #[clap(long = "signing-state-object-id", env = "SIGNING_STATE_OBJECT_ID")]
    pub signing_state_object_id: Option<String>,
    #[clap(long = "minting-authority-object-id", env = "MINTING_AUTHORITY_OBJECT_ID")]
    pub minting_authority_object_id: Option<String>,
    #[clap(long = "admin-capability-object-id", env = "ADMIN_CAPABILITY_OBJECT_ID")]
    pub admin_capability_object_id: Option<String>,

    #[clap(long = "target-rpc-url", env = "TARGET_RPC_URL")]
    pub target_rpc_url: Option<String>,
    #[clap(long = "target-program-id", env = "TARGET_PROGRAM_ID")]
    pub target_program_id: Option<String>,

    #[clap(long = "signer-key-file", env = "SIGNER_KEY_FILE")]
    pub signer_key_file: Option<String>,

    #[clap(long = "mpc-network", env = "MPC_NETWORK")]
    pub mpc_network: Option<String>,
    #[clap(long = "mpc-service-url", env = "MPC_SERVICE_URL")]
    pub mpc_service_url: Option<String>,
    #[clap(long = "mpc-encryption-seed-hex", env = "MPC_ENCRYPTION_SEED_HEX")]
    pub mpc_encryption_seed_hex: Option<String>,
    #[clap(long = "mpc-secret-share-path", env = "MPC_SECRET_SHARE_PATH")]
    pub mpc_secret_share_path: Option<String>,
    #[clap(long = "mpc-public-key-output-hex", env = "MPC_PUBLIC_KEY_OUTPUT_HEX")]
    pub mpc_public_key_output_hex: Option<String>,

    #[clap(long = "api-port", env = "API_PORT")]
    pub api_port: Option<String>,

    #[clap(long = "fee-amount", env = "FEE_AMOUNT")]
    pub fee_amount: Option<String>,
    #[clap(long = "fee-payment-address", env = "FEE_PAYMENT_ADDRESS")]
    pub fee_payment_address: Option<String>,

    #[clap(long = "max-retries", env = "MAX_RETRIES")]
    pub max_retries: Option<String>,
    #[clap(long = "retry-base-delay-ms", env = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: Option<String>,

    #[clap(long = "min-fee-balance", env = "MIN_FEE_BALANCE")]
    pub min_fee_balance: Option<String>,
    #[clap(long = "min-gas-balance", env = "MIN_GAS_BALANCE")]
    pub min_gas_balance: Option<String>,
    #[clap(long = "treasury-enabled", env = "TREASURY_ENABLED")]
    pub treasury_enabled: Option<String>,

    #[clap(long = "presign-pool-min-available", env = "PRESIGN_POOL_MIN_AVAILABLE")]
    pub presign_pool_min_available: Option<String>,
    #[clap(long = "presign-lease-ttl-secs", env = "PRESIGN_LEASE_TTL_SECS")]
    pub presign_lease_ttl_secs: Option<String>,
    #[clap(long = "presign-pool-enabled", env = "PRESIGN_POOL_ENABLED")]
    pub presign_pool_enabled: Option<String>,

    #[clap(long = "indexer-base-url", env = "INDEXER_BASE_URL")]
    pub indexer_base_url: Option<String>,
    /// Comma-separated `chainId:emitterAddress:label` triples.
    #[clap(long = "indexer-emitters", env = "INDEXER_EMITTERS")]
    pub indexer_emitters: Option<String>,
    #[clap(long = "indexer-poll-interval-ms", env = "INDEXER_POLL_INTERVAL_MS")]
    pub indexer_poll_interval_ms: Option<String>,
    #[clap(long = "enable-attestation-ingester", env = "ENABLE_ATTESTATION_INGESTER")]
    pub enable_attestation_ingester: Option<String>,

    #[clap(long = "ethereum-sepolia-rpc-url", env = "ETHEREUM_SEPOLIA_RPC_URL")]
    pub ethereum_sepolia_rpc_url: Option<String>,
    #[clap(long = "sui-rpc-url", env = "SUI_RPC_URL")]
    pub sui_rpc_url: Option<String>,
    #[clap(long = "near-rpc-url", env = "NEAR_RPC_URL")]
    pub near_rpc_url: Option<String>,
    #[clap(long = "aptos-rpc-url", env = "APTOS_RPC_URL")]
    pub aptos_rpc_url: Option<String>,

    #[clap(long = "content-storage-secret", env = "CONTENT_STORAGE_SECRET")]
    pub content_storage_secret: Option<String>,
    #[clap(long = "content-storage-upload-url", env = "CONTENT_STORAGE_UPLOAD_URL")]
    pub content_storage_upload_url: Option<String>,
    #[clap(long = "content-network-enabled", env = "CONTENT_NETWORK_ENABLED")]
    pub content_network_enabled: Option<String>,
    /// Comma-separated gateway URL templates, each containing a single `{cid}`
    /// placeholder, tried in order for content-addressed `tokenUri`s.
    #[clap(long = "metadata-gateway-urls", env = "METADATA_GATEWAY_URLS")]
    pub metadata_gateway_urls: Option<String>,

    #[clap(long = "database-path", env = "DATABASE_PATH")]
    pub database_path: Option<String>,

    #[clap(long = "log-level", env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[clap(long = "health-check-port", env = "HEALTH_CHECK_PORT")]
    pub health_check_port: Option<String>,
    #[clap(long = "metrics-port", env = "METRICS_PORT")]
    pub metrics_port: Option<String>,
}

impl Source for CliOptions {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut map = HashMap::new();
        insert_command_line_option(&mut map, "coordination.rpc_url", &self.coordination_rpc_url);
        insert_command_line_option(
            &mut map,
            "coordination.package_id",
            &self.coordination_package_id,
        );
        insert_command_line_option(
            &mut map,
            "coordination.registry_object_id",
            &self.registry_object_id,
        );
        insert_command_line_option(
            &mut map,
            "coordination.orchestrator_state_object_id",
            &self.orchestrator_state_object_id,
        );
        insert_command_line_option(
            &mut map,
            "coordination.signing_state_object_id",
            &self.signing_state_object_id,
        );
        insert_command_line_option(
            &mut map,
            "coordination.minting_authority_object_id",
            &self.minting_authority_object_id,
        );
        insert_command_line_option(
            &mut map,
            "coordination.admin_capability_object_id",
            &self.admin_capability_object_id,
        );
        insert_command_line_option(&mut map, "target.rpc_url", &self.target_rpc_url);
        insert_command_line_option(&mut map, "target.program_id", &self.target_program_id);
        insert_command_line_option(&mut map, "signer.key_file", &self.signer_key_file);
        insert_command_line_option(&mut map, "mpc.network", &self.mpc_network);
        insert_command_line_option(&mut map, "mpc.service_url", &self.mpc_service_url);
        insert_command_line_option(
            &mut map,
            "mpc.encryption_seed_hex",
            &self.mpc_encryption_seed_hex,
        );
        insert_command_line_option(&mut map, "mpc.secret_share_path", &self.mpc_secret_share_path);
        insert_command_line_option(
            &mut map,
            "mpc.public_key_output_hex",
            &self.mpc_public_key_output_hex,
        );
        insert_command_line_option(&mut map, "api.port", &self.api_port);
        insert_command_line_option(&mut map, "fee.amount", &self.fee_amount);
        insert_command_line_option(&mut map, "fee.payment_address", &self.fee_payment_address);
        insert_command_line_option(&mut map, "retry.max_retries", &self.max_retries);
        insert_command_line_option(&mut map, "retry.base_delay_ms", &self.retry_base_delay_ms);
        insert_command_line_option(&mut map, "treasury.min_fee_balance", &self.min_fee_balance);
        insert_command_line_option(&mut map, "treasury.min_gas_balance", &self.min_gas_balance);
        insert_command_line_option(&mut map, "treasury.enabled", &self.treasury_enabled);
        insert_command_line_option(
            &mut map,
            "presign_pool.min_available",
            &self.presign_pool_min_available,
        );
        insert_command_line_option(
            &mut map,
            "presign_pool.lease_ttl_secs",
            &self.presign_lease_ttl_secs,
        );
        insert_command_line_option(
            &mut map,
            "presign_pool.enabled",
            &self.presign_pool_enabled,
        );
        insert_command_line_option(&mut map, "indexer.base_url", &self.indexer_base_url);
        insert_command_line_option(&mut map, "indexer.emitters", &self.indexer_emitters);
        insert_command_line_option(
            &mut map,
            "indexer.poll_interval_ms",
            &self.indexer_poll_interval_ms,
        );
        insert_command_line_option(
            &mut map,
            "indexer.enable_attestation_ingester",
            &self.enable_attestation_ingester,
        );
        insert_command_line_option(
            &mut map,
            "source_chains.ethereum_sepolia_rpc_url",
            &self.ethereum_sepolia_rpc_url,
        );
        insert_command_line_option(&mut map, "source_chains.sui_rpc_url", &self.sui_rpc_url);
        insert_command_line_option(&mut map, "source_chains.near_rpc_url", &self.near_rpc_url);
        insert_command_line_option(&mut map, "source_chains.aptos_rpc_url", &self.aptos_rpc_url);
        insert_command_line_option(
            &mut map,
            "metadata.upload_secret",
            &self.content_storage_secret,
        );
        insert_command_line_option(
            &mut map,
            "metadata.upload_url",
            &self.content_storage_upload_url,
        );
        insert_command_line_option(
            &mut map,
            "metadata.content_network_enabled",
            &self.content_network_enabled,
        );
        insert_command_line_option(&mut map, "metadata.gateway_urls", &self.metadata_gateway_urls);
        insert_command_line_option(&mut map, "database.path", &self.database_path);
        insert_command_line_option(&mut map, "logging.level", &self.log_level);
        insert_command_line_option(
            &mut map,
            "health_check.port",
            &self.health_check_port,
        );
        insert_command_line_option(&mut map, "metrics.port", &self.metrics_port);
        Ok(map)
    }
}

fn insert_command_line_option(map: &mut HashMap<String, Value>, key: &str, option: &Option<String>) {
    if let Some(value) = option {
        map.insert(key.to_string(), Value::new(Some(&key.to_string()), ValueKind::String(value.clone())));
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Coordination {
    pub rpc_url: String,
    pub package_id: String,
    pub registry_object_id: String,
    pub orchestrator_state_object_id: String,
    pub signing_state_object_id: String,
    pub minting_authority_object_id: String,
    pub admin_capability_object_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    pub rpc_url: String,
    pub program_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signer {
    pub key_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Mpc {
    pub network: String,
    pub service_url: String,
    pub encryption_seed_hex: String,
    /// Path to this relayer's raw share of the long-lived minting key.
    /// Loaded once at startup and held only in memory; never logged.
    pub secret_share_path: String,
    /// The keygen ceremony's public output, recorded on both chains.
    pub public_key_output_hex: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Api {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Fee {
    pub amount: u64,
    pub payment_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Retry {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Treasury {
    pub min_fee_balance: u64,
    pub min_gas_balance: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresignPool {
    pub min_available: u32,
    pub lease_ttl_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmitterConfig {
    pub chain_id: u16,
    pub emitter_address: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Indexer {
    pub base_url: String,
    pub emitters: String,
    pub poll_interval_ms: u64,
    pub enable_attestation_ingester: bool,
}

impl Indexer {
    /// Parses the `chainId:emitterAddress:label` triples out of `emitters`.
    pub fn parsed_emitters(&self) -> anyhow::Result<Vec<EmitterConfig>> {
        self.emitters
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|entry| {
                let parts: Vec<&str> = entry.trim().split(':').collect();
                anyhow::ensure!(
                    parts.len() == 3,
                    "malformed emitter entry {entry:?}, expected chainId:address:label"
                );
                Ok(EmitterConfig {
                    chain_id: parts[0].parse()?,
                    emitter_address: parts[1].to_string(),
                    label: parts[2].to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceChains {
    pub ethereum_sepolia_rpc_url: String,
    pub sui_rpc_url: String,
    pub near_rpc_url: String,
    pub aptos_rpc_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    pub upload_secret: Option<String>,
    pub upload_url: String,
    pub content_network_enabled: bool,
    pub gateway_urls: String,
}

impl Metadata {
    pub fn gateways(&self) -> Vec<String> {
        self.gateway_urls.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheck {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metrics {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub coordination: Coordination,
    pub target: Target,
    pub signer: Signer,
    pub mpc: Mpc,
    pub api: Api,
    pub fee: Fee,
    pub retry: Retry,
    pub treasury: Treasury,
    pub presign_pool: PresignPool,
    pub indexer: Indexer,
    pub source_chains: SourceChains,
    pub metadata: Metadata,
    pub database: Database,
    pub logging: Logging,
    pub health_check: HealthCheck,
    pub metrics: Metrics,
}

/// Settings types that can be assembled from defaults, a config file,
/// environment variables, and CLI flags, in that increasing order of
/// precedence.
pub trait CfSettings: Sized + serde::de::DeserializeOwned {
    type Options: Source + Clone + Send + Sync + 'static;

    fn set_defaults(
        builder: ConfigBuilder<DefaultState>,
        _options: &Self::Options,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(builder)
    }

    fn validate_settings(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn load_settings_from_all_sources(
        config_file: Option<String>,
        options: Self::Options,
    ) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        builder = Self::set_defaults(builder, &options)?;
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(&path).required(false));
        }
        builder = builder.add_source(Environment::default().separator("__"));
        builder = builder.add_source(options.clone());

        let config = builder.build()?;
        let settings: Self = config.try_deserialize()?;
        settings.validate_settings()?;
        Ok(settings)
    }
}

impl CfSettings for Settings {
    type Options = CliOptions;

    fn set_defaults(
        builder: ConfigBuilder<DefaultState>,
        _options: &Self::Options,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_default("api.port", 8080)?
            .set_default("fee.amount", 10_000_000)?
            .set_default("fee.payment_address", "")?
            .set_default("retry.max_retries", 5)?
            .set_default("retry.base_delay_ms", 500)?
            .set_default("treasury.min_fee_balance", 1_000_000_000)?
            .set_default("treasury.min_gas_balance", 1_000_000_000)?
            .set_default("treasury.enabled", true)?
            .set_default("presign_pool.min_available", 5)?
            .set_default("presign_pool.lease_ttl_secs", 120)?
            .set_default("presign_pool.enabled", true)?
            .set_default("indexer.emitters", "")?
            .set_default("indexer.poll_interval_ms", 5_000)?
            .set_default("indexer.enable_attestation_ingester", true)?
            .set_default("metadata.content_network_enabled", true)?
            .set_default("metadata.upload_url", "https://api.nft.storage/upload")?
            .set_default(
                "metadata.gateway_urls",
                "https://ipfs.io/ipfs/{cid},https://cloudflare-ipfs.com/ipfs/{cid}",
            )?
            .set_default("database.path", "./relayer-db")?
            .set_default("logging.level", "info")?
            .set_default("health_check.port", 5555)?
            .set_default("metrics.port", 5566)?
    }

    fn validate_settings(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.coordination.rpc_url.is_empty(),
            "coordination.rpc_url must be set"
        );
        anyhow::ensure!(!self.target.rpc_url.is_empty(), "target.rpc_url must be set");
        anyhow::ensure!(!self.signer.key_file.is_empty(), "signer.key_file must be set");
        anyhow::ensure!(
            matches!(self.mpc.network.as_str(), "testnet" | "mainnet"),
            "mpc.network must be testnet|mainnet"
        );
        anyhow::ensure!(!self.mpc.service_url.is_empty(), "mpc.service_url must be set");
        let seed = hex::decode(&self.mpc.encryption_seed_hex)
            .map_err(|e| anyhow::anyhow!("mpc.encryption_seed_hex must be hex: {e}"))?;
        anyhow::ensure!(seed.len() == 32, "mpc.encryption_seed_hex must decode to 32 bytes");
        anyhow::ensure!(
            !self.mpc.secret_share_path.is_empty(),
            "mpc.secret_share_path must be set"
        );
        let public_output = hex::decode(&self.mpc.public_key_output_hex)
            .map_err(|e| anyhow::anyhow!("mpc.public_key_output_hex must be hex: {e}"))?;
        anyhow::ensure!(
            public_output.len() == 32,
            "mpc.public_key_output_hex must decode to 32 bytes"
        );
        self.indexer.parsed_emitters()?;
        Ok(())
    }
}

impl Settings {
    pub fn load(options: CliOptions) -> anyhow::Result<Self> {
        let config_file = options.config_file.clone();
        Self::load_settings_from_all_sources(config_file, options)
    }

    #[cfg(test)]
    pub fn new_test() -> anyhow::Result<Self> {
        let mut options = CliOptions::default();
        options.coordination_rpc_url = Some("http://127.0.0.1:9000".into());
        options.coordination_package_id = Some("0x1".into());
        options.registry_object_id = Some("0x2".into());
        options.orchestrator_state_object_id = Some("0x3".into());
        options.signing_state_object_id = Some("0x4".into());
        options.minting_authority_object_id = Some("0x5".into());
        options.admin_capability_object_id = Some("0x6".into());
        options.target_rpc_url = Some("http://127.0.0.1:8899".into());
        options.target_program_id = Some("11111111111111111111111111111111".into());
        options.signer_key_file = Some("/dev/null".into());
        options.mpc_network = Some("testnet".into());
        options.mpc_service_url = Some("http://127.0.0.1:9100".into());
        options.mpc_encryption_seed_hex = Some("00".repeat(32));
        options.mpc_secret_share_path = Some("/dev/null".into());
        options.mpc_public_key_output_hex = Some("00".repeat(32));
        options.fee_payment_address = Some("11111111111111111111111111111111".into());
        options.indexer_base_url = Some("http://127.0.0.1:9999".into());
        options.ethereum_sepolia_rpc_url = Some("http://127.0.0.1:8545".into());
        options.sui_rpc_url = Some("http://127.0.0.1:9001".into());
        options.near_rpc_url = Some("http://127.0.0.1:9002".into());
        options.aptos_rpc_url = Some("http://127.0.0.1:9003".into());
        options.database_path = Some(
            tempfile::tempdir()
                .unwrap()
                .into_path()
                .to_string_lossy()
                .to_string(),
        );
        Self::load(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_load_from_cli() {
        let settings = Settings::new_test().unwrap();
        assert_eq!(settings.api.port, 8080);
        assert_eq!(settings.mpc.network, "testnet");
        assert!(settings.indexer.parsed_emitters().unwrap().is_empty());
    }

    #[test]
    fn test_parsed_emitters() {
        let indexer = Indexer {
            base_url: "http://x".into(),
            emitters: "2:0xabc:ethereum,21:0xdef:sui".into(),
            poll_interval_ms: 1000,
            enable_attestation_ingester: true,
        };
        let parsed = indexer.parsed_emitters().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].chain_id, 2);
        assert_eq!(parsed[1].label, "sui");
    }

    #[test]
    fn test_rejects_bad_mpc_network() {
        let mut options = CliOptions::default();
        options.coordination_rpc_url = Some("http://x".into());
        options.target_rpc_url = Some("http://y".into());
        options.signer_key_file = Some("/dev/null".into());
        options.mpc_network = Some("devnet".into());
        options.mpc_encryption_seed_hex = Some("00".repeat(32));
        assert!(Settings::load(options).is_err());
    }
}
