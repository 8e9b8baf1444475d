//! Narrow traits over the three external collaborators this daemon treats as
//! black boxes (coordination chain, MPC network, target-chain submitter),
//! per spec §6. Production implementations of these are out of scope; the
//! traits exist so every component that depends on them can be driven by an
//! in-memory fake in tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::RelayerError;

/// One call queued through the sequencer to the coordination chain.
#[derive(Debug, Clone)]
pub struct CoordinationCall {
    pub label: String,
    pub function: String,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_id: u64,
    /// Raw effect data the caller inspects to extract e.g. a freshly created
    /// object id or a `signatureId`.
    pub effects: Value,
}

#[derive(Debug, Clone)]
pub struct CoordinationEvent {
    pub tx_id: u64,
    pub event_seq: u64,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<CoordinationEvent>,
    pub has_next_page: bool,
}

/// The coordination chain's smart-contract surface: submit a mutating call,
/// page through events of a given type after a cursor, or read the
/// authoritative fee-pool balances.
#[async_trait]
pub trait CoordinationChain: Send + Sync {
    async fn submit(&self, call: CoordinationCall) -> Result<TxOutcome, RelayerError>;

    async fn events_after(
        &self,
        fully_qualified_event_type: &str,
        after: Option<(u64, u64)>,
        page_size: u32,
    ) -> Result<EventPage, RelayerError>;

    /// `(feeTokenAmount, gasTokenAmount)`. Read-only — does not go through
    /// the sequencer, since it does not mutate shared state.
    async fn read_treasury_balances(&self) -> Result<(u64, u64), RelayerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyStatus {
    Pending,
    Completed,
    Failed,
}

/// The MPC network's prepare/sign/poll surface.
#[async_trait]
pub trait MpcService: Send + Sync {
    async fn request_presign(&self) -> Result<String, RelayerError>;
    async fn poll_presign(&self, object_id: &str) -> Result<CeremonyStatus, RelayerError>;
    async fn fetch_presign_blob(&self, object_id: &str) -> Result<Vec<u8>, RelayerError>;

    async fn request_sign(&self, partial_signature: Vec<u8>) -> Result<String, RelayerError>;
    async fn poll_signature(&self, signature_id: &str) -> Result<CeremonyStatus, RelayerError>;
    async fn fetch_signature(&self, signature_id: &str) -> Result<[u8; 64], RelayerError>;
}

#[derive(Debug, Clone)]
pub struct MintOutcome {
    pub mint_address: String,
    pub tx_signature: String,
}

/// The target-chain (Solana) mint submitter.
#[async_trait]
pub trait TargetChainSubmitter: Send + Sync {
    async fn submit_mint(
        &self,
        seal: crate::mint_submitter::ProcessedSeal,
    ) -> Result<MintOutcome, RelayerError>;

    /// Looks up a confirmed payment transaction by id, for payment
    /// verification during `confirm-payment`.
    async fn find_payment(&self, payment_tx_id: &str) -> Result<Option<PaymentTransfer>, RelayerError>;
}

#[derive(Debug, Clone)]
pub struct PaymentTransfer {
    pub source: String,
    pub destination: String,
    pub amount: u64,
    pub succeeded: bool,
}

/// The content-addressed blob store the metadata pipeline uploads images and
/// normalized JSON documents to, when an upload secret is configured.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, RelayerError>;
}

#[cfg(test)]
pub mod fakes {
    use std::sync::Mutex;

    use sha2::Digest;

    use super::*;
    use crate::mint_submitter::ProcessedSeal;

    pub struct FakeCoordinationChain {
        pub events: Mutex<Vec<CoordinationEvent>>,
        pub submissions: Mutex<Vec<CoordinationCall>>,
        pub next_tx_id: Mutex<u64>,
        pub fee_balance: Mutex<u64>,
        pub gas_balance: Mutex<u64>,
    }

    impl Default for FakeCoordinationChain {
        fn default() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                submissions: Mutex::new(Vec::new()),
                next_tx_id: Mutex::new(0),
                fee_balance: Mutex::new(0),
                gas_balance: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CoordinationChain for FakeCoordinationChain {
        async fn submit(&self, call: CoordinationCall) -> Result<TxOutcome, RelayerError> {
            let mut next = self.next_tx_id.lock().unwrap();
            *next += 1;
            let tx_id = *next;
            drop(next);

            let mut effects = serde_json::json!({});
            match call.function.as_str() {
                "top_up_fee" => {
                    if let Some(amount) = call.arguments.first().and_then(|v| v.as_u64()) {
                        *self.fee_balance.lock().unwrap() += amount;
                    }
                }
                "top_up_gas" => {
                    if let Some(amount) = call.arguments.first().and_then(|v| v.as_u64()) {
                        *self.gas_balance.lock().unwrap() += amount;
                    }
                }
                "create_deposit_wallet" => {
                    effects = serde_json::json!({
                        "walletId": format!("wallet-{tx_id}"),
                        "depositAddress": format!("0x{}", hex::encode([tx_id as u8; 20])),
                    });
                }
                _ => {}
            }
            self.submissions.lock().unwrap().push(call);
            Ok(TxOutcome { tx_id, effects })
        }

        async fn read_treasury_balances(&self) -> Result<(u64, u64), RelayerError> {
            Ok((*self.fee_balance.lock().unwrap(), *self.gas_balance.lock().unwrap()))
        }

        async fn events_after(
            &self,
            _fully_qualified_event_type: &str,
            after: Option<(u64, u64)>,
            page_size: u32,
        ) -> Result<EventPage, RelayerError> {
            let events = self.events.lock().unwrap();
            let filtered: Vec<_> = events
                .iter()
                .filter(|e| match after {
                    Some((tx_id, seq)) => (e.tx_id, e.event_seq) > (tx_id, seq),
                    None => true,
                })
                .take(page_size as usize)
                .cloned()
                .collect();
            Ok(EventPage { has_next_page: false, events: filtered })
        }
    }

    pub struct FakeMpcService;

    #[async_trait]
    impl MpcService for FakeMpcService {
        async fn request_presign(&self) -> Result<String, RelayerError> {
            Ok("object-1".to_string())
        }
        async fn poll_presign(&self, _object_id: &str) -> Result<CeremonyStatus, RelayerError> {
            Ok(CeremonyStatus::Completed)
        }
        async fn fetch_presign_blob(&self, _object_id: &str) -> Result<Vec<u8>, RelayerError> {
            Ok(vec![1, 2, 3, 4])
        }
        async fn request_sign(&self, _partial_signature: Vec<u8>) -> Result<String, RelayerError> {
            Ok("sig-1".to_string())
        }
        async fn poll_signature(&self, _signature_id: &str) -> Result<CeremonyStatus, RelayerError> {
            Ok(CeremonyStatus::Completed)
        }
        async fn fetch_signature(&self, _signature_id: &str) -> Result<[u8; 64], RelayerError> {
            Ok([9u8; 64])
        }
    }

    #[derive(Default)]
    pub struct FakeTargetChainSubmitter {
        pub payments: Mutex<std::collections::HashMap<String, PaymentTransfer>>,
    }

    impl FakeTargetChainSubmitter {
        pub fn insert_payment(&self, payment_tx_id: &str, transfer: PaymentTransfer) {
            self.payments.lock().unwrap().insert(payment_tx_id.to_string(), transfer);
        }
    }

    #[async_trait]
    impl TargetChainSubmitter for FakeTargetChainSubmitter {
        async fn submit_mint(&self, seal: ProcessedSeal) -> Result<MintOutcome, RelayerError> {
            Ok(MintOutcome {
                mint_address: hex::encode(seal.message_hash),
                tx_signature: "fake-tx-signature".to_string(),
            })
        }

        async fn find_payment(
            &self,
            payment_tx_id: &str,
        ) -> Result<Option<PaymentTransfer>, RelayerError> {
            Ok(self.payments.lock().unwrap().get(payment_tx_id).cloned())
        }
    }

    #[derive(Default)]
    pub struct FakeContentStore {
        pub uploads: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl ContentStore for FakeContentStore {
        async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, RelayerError> {
            let digest = sha2::Sha256::digest(&bytes);
            self.uploads.lock().unwrap().push(bytes);
            let ext = if content_type == "application/json" { "json" } else { "bin" };
            Ok(format!("https://fake-store.test/{}.{ext}", hex::encode(digest)))
        }
    }
}
