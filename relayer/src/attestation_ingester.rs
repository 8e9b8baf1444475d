//! Polls a Wormhole-style attestation indexer per configured emitter,
//! decodes the VAA envelope, and submits verified attestations on-chain via
//! the [`TxSequencer`]. Disabled outright when the `EnableAttestationIngester`
//! feature flag is off.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    errors::RelayerError,
    external::{CoordinationCall, CoordinationChain},
    sequencer::TxSequencer,
    settings::EmitterConfig,
    store::Store,
};

/// One decoded attestation, ready for in-flight dedup and on-chain lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttestation {
    pub emitter_chain_id: u16,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub source_chain_id: u16,
    pub deposit_address: Vec<u8>,
}

const SIGNATURE_LEN: usize = 66;
const BODY_HEADER_LEN: usize = 4 + 4 + 2 + 32 + 8 + 1;

/// Parses a Wormhole VAA: `version(1) | guardianSetIndex(4) |
/// signatureCount(1) | signatures[count * 66] | body`, where `body` is
/// `timestamp(4) | nonce(4) | emitterChainId(2) | emitterAddress(32) |
/// sequence(8) | consistencyLevel(1) | payload`.
///
/// Within `payload`, this relayer's custom message layout places the
/// `sourceChainId` (u16) at bytes `1..3` and the 32-byte `depositAddress` at
/// bytes `67..99`. EVM-origin deposit addresses are left-padded to 32 bytes
/// upstream; the leading 12 bytes are stripped here so callers always see
/// the chain-native address width.
pub fn parse_vaa(bytes: &[u8]) -> Result<ParsedAttestation, RelayerError> {
    if bytes.len() < 6 {
        return Err(RelayerError::ValidationFailure("VAA too short for envelope header".into()));
    }
    let signature_count = bytes[5] as usize;
    let sigs_end = 6 + signature_count * SIGNATURE_LEN;
    let body_header_end = sigs_end + BODY_HEADER_LEN;
    if bytes.len() < body_header_end {
        return Err(RelayerError::ValidationFailure("VAA truncated before body header".into()));
    }

    let body = &bytes[sigs_end..];
    let emitter_chain_id = u16::from_be_bytes([body[8], body[9]]);
    let mut emitter_address = [0u8; 32];
    emitter_address.copy_from_slice(&body[10..42]);
    let sequence = u64::from_be_bytes(body[42..50].try_into().unwrap());

    let payload = &bytes[body_header_end..];
    if payload.len() < 99 {
        return Err(RelayerError::ValidationFailure("VAA payload too short for deposit address".into()));
    }
    let source_chain_id = u16::from_be_bytes([payload[1], payload[2]]);
    let raw_deposit = &payload[67..99];

    let deposit_address = match crate::chains::SourceChain::from_wormhole_chain_id(source_chain_id) {
        Some(chain) if chain.address_len() == 20 => raw_deposit[12..].to_vec(),
        _ => raw_deposit.to_vec(),
    };

    Ok(ParsedAttestation { emitter_chain_id, emitter_address, sequence, source_chain_id, deposit_address })
}

#[async_trait]
pub trait AttestationIndexer: Send + Sync {
    /// Fetches attestations for `(chain_id, emitter_address)` strictly after
    /// `after_sequence`, ascending, up to `page_size`. Returned sequences are
    /// decimal strings (Wormhole sequences can exceed 64 bits).
    async fn fetch_after(
        &self,
        chain_id: u16,
        emitter_address: &str,
        after_sequence: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<RawAttestation>, RelayerError>;
}

#[derive(Debug, Clone)]
pub struct RawAttestation {
    pub sequence: String,
    pub vaa_bytes: Vec<u8>,
}

pub struct AttestationIngesterConfig {
    pub emitters: Vec<EmitterConfig>,
    pub poll_interval: Duration,
    pub enabled: bool,
}

pub struct AttestationIngester {
    store: Arc<Store>,
    indexer: Arc<dyn AttestationIndexer>,
    chain: Arc<dyn CoordinationChain>,
    sequencer: TxSequencer,
    config: AttestationIngesterConfig,
    in_flight: Mutex<HashSet<(u16, [u8; 32], u64)>>,
}

impl AttestationIngester {
    pub fn new(
        store: Arc<Store>,
        indexer: Arc<dyn AttestationIndexer>,
        chain: Arc<dyn CoordinationChain>,
        sequencer: TxSequencer,
        config: AttestationIngesterConfig,
    ) -> Self {
        Self { store, indexer, chain, sequencer, config, in_flight: Mutex::new(HashSet::new()) }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("attestation ingester disabled by feature flag");
            return;
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("attestation ingester stopping");
                    return;
                }
                _ = interval.tick() => {
                    for emitter in &self.config.emitters {
                        if let Err(error) = self.poll_emitter(emitter).await {
                            warn!(label = emitter.label, %error, "attestation poll failed for emitter");
                        }
                    }
                }
            }
        }
    }

    fn emitter_key(emitter: &EmitterConfig) -> String {
        format!("{}:{}", emitter.chain_id, emitter.emitter_address)
    }

    async fn poll_emitter(&self, emitter: &EmitterConfig) -> Result<(), RelayerError> {
        let key = Self::emitter_key(emitter);
        let after = self.store.get_sequence(&key)?;

        let batch = self
            .indexer
            .fetch_after(emitter.chain_id, &emitter.emitter_address, after.as_deref(), 50)
            .await?;

        for raw in batch {
            self.process_one(&key, &raw).await;
        }
        Ok(())
    }

    async fn process_one(&self, emitter_key: &str, raw: &RawAttestation) {
        let parsed = match parse_vaa(&raw.vaa_bytes) {
            Ok(p) => p,
            Err(error) => {
                warn!(%error, sequence = raw.sequence, "malformed attestation, skipping");
                return;
            }
        };

        let dedup_key = (parsed.emitter_chain_id, parsed.emitter_address, parsed.sequence);
        if !self.in_flight.lock().unwrap().insert(dedup_key) {
            return;
        }

        let outcome = self.process_attestation(&parsed).await;
        self.in_flight.lock().unwrap().remove(&dedup_key);

        match outcome {
            Ok(()) | Err(RelayerError::NonRetriableOnChainAbort(_)) => {
                if let Err(error) = self.store.put_sequence(emitter_key, &raw.sequence).await {
                    warn!(%error, "failed to persist attestation sequence cursor");
                }
            }
            Err(error) => {
                warn!(%error, sequence = raw.sequence, "attestation processing failed transiently, not advancing sequence");
            }
        }
    }

    /// Looks up whether there's a session waiting on this deposit address;
    /// if none, the attestation isn't ours and the sequence still advances.
    /// If present, submits the attestation on-chain — success here is what
    /// eventually surfaces a `SignPending` event for the signing orchestrator
    /// to pick up via its own event poller.
    async fn process_attestation(&self, parsed: &ParsedAttestation) -> Result<(), RelayerError> {
        let deposit_hex = hex::encode(&parsed.deposit_address);
        let session = self.store.load_session_by_deposit_address(&deposit_hex)?;
        let Some(session) = session else {
            return Ok(());
        };

        self.sequencer
            .enqueue(CoordinationCall {
                label: format!("attestation.submit.{}", session.session_id),
                function: "submit_attestation".into(),
                arguments: vec![
                    serde_json::json!(parsed.source_chain_id),
                    serde_json::json!(deposit_hex),
                    serde_json::json!(parsed.sequence),
                ],
            })
            .await?;

        let _ = &self.chain;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::SourceChain;
    use crate::external::fakes::FakeCoordinationChain;
    use crate::model::Session;

    fn body_header(emitter_chain_id: u16, emitter_address: [u8; 32], sequence: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes()); // timestamp
        body.extend_from_slice(&0u32.to_be_bytes()); // nonce
        body.extend_from_slice(&emitter_chain_id.to_be_bytes());
        body.extend_from_slice(&emitter_address);
        body.extend_from_slice(&sequence.to_be_bytes());
        body.push(1); // consistency level
        body
    }

    fn build_vaa(source_chain_id: u16, deposit_address_32: [u8; 32], sequence: u64) -> Vec<u8> {
        let mut vaa = Vec::new();
        vaa.push(1); // version
        vaa.extend_from_slice(&0u32.to_be_bytes()); // guardian set index
        vaa.push(0); // zero signatures, for test simplicity

        vaa.extend(body_header(10002, [0xAB; 32], sequence));

        let mut payload = vec![0u8; 99];
        payload[0] = 1; // payload type tag
        payload[1..3].copy_from_slice(&source_chain_id.to_be_bytes());
        payload[67..99].copy_from_slice(&deposit_address_32);
        vaa.extend(payload);
        vaa
    }

    #[test]
    fn parses_envelope_and_strips_evm_left_pad() {
        let mut deposit = [0u8; 32];
        deposit[12..].copy_from_slice(&[0x11; 20]);
        let vaa = build_vaa(10002, deposit, 7);

        let parsed = parse_vaa(&vaa).unwrap();
        assert_eq!(parsed.source_chain_id, 10002);
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.deposit_address, vec![0x11; 20]);
        assert_eq!(parsed.emitter_address, [0xAB; 32]);
    }

    #[test]
    fn keeps_full_32_bytes_for_non_evm_chains() {
        let deposit = [0x22; 32];
        let vaa = build_vaa(21, deposit, 1); // Sui
        let parsed = parse_vaa(&vaa).unwrap();
        assert_eq!(parsed.deposit_address, vec![0x22; 32]);
    }

    #[test]
    fn rejects_truncated_vaa() {
        assert!(parse_vaa(&[1, 0, 0, 0, 0]).is_err());
    }

    struct FakeIndexer {
        batches: Mutex<Vec<RawAttestation>>,
    }

    #[async_trait]
    impl AttestationIndexer for FakeIndexer {
        async fn fetch_after(
            &self,
            _chain_id: u16,
            _emitter_address: &str,
            after_sequence: Option<&str>,
            _page_size: u32,
        ) -> Result<Vec<RawAttestation>, RelayerError> {
            let after: u64 = after_sequence.and_then(|s| s.parse().ok()).unwrap_or(0);
            Ok(self
                .batches
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.sequence.parse::<u64>().unwrap() > after)
                .cloned()
                .collect())
        }
    }

    fn emitter() -> EmitterConfig {
        EmitterConfig { chain_id: 10002, emitter_address: "0xabc".into(), label: "eth-sepolia".into() }
    }

    #[tokio::test]
    async fn advances_sequence_even_when_no_matching_session_exists() {
        let (store, _dir) = Store::open_temp();
        let chain = Arc::new(FakeCoordinationChain::default());
        let shutdown = CancellationToken::new();
        let sequencer = TxSequencer::spawn(chain.clone(), shutdown);

        let mut deposit = [0u8; 32];
        deposit[12..].copy_from_slice(&[0x33; 20]);
        let vaa = build_vaa(10002, deposit, 5);
        let indexer = Arc::new(FakeIndexer {
            batches: Mutex::new(vec![RawAttestation { sequence: "5".into(), vaa_bytes: vaa }]),
        });

        let ingester = AttestationIngester::new(
            store.clone(),
            indexer,
            chain,
            sequencer,
            AttestationIngesterConfig { emitters: vec![emitter()], poll_interval: Duration::from_millis(10), enabled: true },
        );

        ingester.poll_emitter(&emitter()).await.unwrap();
        assert_eq!(store.get_sequence("10002:0xabc").unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn submits_attestation_when_a_session_is_waiting_on_the_deposit_address() {
        let (store, _dir) = Store::open_temp();
        let chain = Arc::new(FakeCoordinationChain::default());
        let shutdown = CancellationToken::new();
        let sequencer = TxSequencer::spawn(chain.clone(), shutdown);

        let deposit_bytes = vec![0x44u8; 20];
        let mut session = Session::new("s1".into(), "receiver".into(), SourceChain::EthereumSepolia);
        session.deposit_address = Some(deposit_bytes.clone());
        store.create_session(session).await.unwrap();
        store.update_session(store.load_session("s1").unwrap().unwrap()).await.unwrap();

        let mut deposit = [0u8; 32];
        deposit[12..].copy_from_slice(&deposit_bytes);
        let vaa = build_vaa(10002, deposit, 1);
        let indexer = Arc::new(FakeIndexer {
            batches: Mutex::new(vec![RawAttestation { sequence: "1".into(), vaa_bytes: vaa }]),
        });

        let ingester = AttestationIngester::new(
            store.clone(),
            indexer,
            chain.clone(),
            sequencer,
            AttestationIngesterConfig { emitters: vec![emitter()], poll_interval: Duration::from_millis(10), enabled: true },
        );

        ingester.poll_emitter(&emitter()).await.unwrap();

        let submissions = chain.submissions.lock().unwrap();
        assert!(submissions.iter().any(|c| c.function == "submit_attestation"));
    }
}
