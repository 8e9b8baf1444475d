//! Drives sessions across statuses, coordinating C6 ([`AttestationIngester`]
//! indirectly, via the coordination chain), C7–C10 and owning every status
//! invariant (C11). Every transition goes exclusively through one of the
//! [`Store`]'s guarded transition methods; a guard returning `false` is
//! treated as a lost race and the caller aborts.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};

use crate::chains::{self, SourceChain};
use crate::deposit_verifier::DepositVerifier;
use crate::errors::RelayerError;
use crate::event_poller::EventHandler;
use crate::external::{CoordinationCall, CoordinationEvent, TargetChainSubmitter};
use crate::metadata_pipeline::MetadataPipeline;
use crate::mint_submitter::{MintSubmitter, ProcessedSeal};
use crate::model::{Session, SessionStatus};
use crate::sequencer::TxSequencer;
use crate::store::Store;

fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub struct StartResult {
    pub session_id: String,
    pub payment_address: String,
    pub fee_amount: u64,
}

pub struct ConfirmPaymentResult {
    pub deposit_wallet_id: String,
    pub deposit_address: Vec<u8>,
}

pub struct SessionFsm {
    store: Arc<Store>,
    sequencer: TxSequencer,
    target_chain: Arc<dyn TargetChainSubmitter>,
    deposit_verifier: Arc<dyn DepositVerifier>,
    metadata_pipeline: Arc<MetadataPipeline>,
    fee_payment_address: String,
    fee_amount: u64,
}

impl SessionFsm {
    pub fn new(
        store: Arc<Store>,
        sequencer: TxSequencer,
        target_chain: Arc<dyn TargetChainSubmitter>,
        deposit_verifier: Arc<dyn DepositVerifier>,
        metadata_pipeline: Arc<MetadataPipeline>,
        fee_payment_address: String,
        fee_amount: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sequencer,
            target_chain,
            deposit_verifier,
            metadata_pipeline,
            fee_payment_address,
            fee_amount,
        })
    }

    pub async fn start(&self, receiver_address: &str, source_chain: SourceChain) -> Result<StartResult, RelayerError> {
        let session_id = generate_session_id();
        let session = Session::new(session_id.clone(), receiver_address.to_string(), source_chain);
        self.store.create_session(session).await?;

        Ok(StartResult {
            session_id,
            payment_address: self.fee_payment_address.clone(),
            fee_amount: self.fee_amount,
        })
    }

    /// Verifies the payment, atomically guards against replay, then
    /// synchronously walks `payment_confirmed → creating_wallet →
    /// waiting_deposit` — per §4.11 these three steps are not separately
    /// user-observable, so there is no value in returning control between
    /// them.
    pub async fn confirm_payment(
        &self,
        session_id: &str,
        payment_tx_id: &str,
    ) -> Result<ConfirmPaymentResult, RelayerError> {
        self.store
            .load_session(session_id)?
            .ok_or_else(|| RelayerError::NotFound(format!("session {session_id} not found")))?;

        let transfer = self.target_chain.find_payment(payment_tx_id).await?.ok_or_else(|| {
            RelayerError::PaymentUnverified(format!("no payment transaction found for {payment_tx_id}"))
        })?;
        if !transfer.succeeded
            || transfer.destination != self.fee_payment_address
            || transfer.amount < self.fee_amount
        {
            return Err(RelayerError::PaymentUnverified(format!(
                "payment {payment_tx_id} does not match the expected transfer"
            )));
        }

        let ok = self
            .store
            .transition_with_payment(
                session_id,
                SessionStatus::AwaitingPayment,
                SessionStatus::PaymentConfirmed,
                payment_tx_id,
                |_| {},
            )
            .await?;
        if !ok {
            return Err(RelayerError::WrongStatus(format!(
                "session {session_id} is not awaiting payment"
            )));
        }

        self.store
            .transition(session_id, SessionStatus::PaymentConfirmed, SessionStatus::CreatingWallet, |_| {})
            .await?;

        let outcome = self
            .sequencer
            .enqueue(CoordinationCall {
                label: format!("fsm.create_deposit_wallet.{session_id}"),
                function: "create_deposit_wallet".into(),
                arguments: vec![json!(session_id)],
            })
            .await?;

        let wallet_id = outcome
            .effects
            .get("walletId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayerError::Fatal("create_deposit_wallet effects missing walletId".into()))?
            .to_string();
        let deposit_address = chains::to_bytes(
            outcome
                .effects
                .get("depositAddress")
                .ok_or_else(|| RelayerError::Fatal("create_deposit_wallet effects missing depositAddress".into()))?,
        )
        .map_err(|e| RelayerError::Fatal(format!("malformed depositAddress: {e}")))?;

        let deposit_address_for_closure = deposit_address.clone();
        let wallet_id_for_closure = wallet_id.clone();
        self.store
            .transition(session_id, SessionStatus::CreatingWallet, SessionStatus::WaitingDeposit, move |session| {
                session.deposit_wallet_id = Some(wallet_id_for_closure);
                session.deposit_address = Some(deposit_address_for_closure);
            })
            .await?;

        Ok(ConfirmPaymentResult { deposit_wallet_id: wallet_id, deposit_address })
    }

    /// Moves the session to `verifying_deposit` immediately, then spawns the
    /// C7→C8→C9 pipeline asynchronously. Returns once the synchronous guard
    /// has been checked, per §4.12's "responds immediately" requirement.
    pub async fn confirm_deposit(
        self: &Arc<Self>,
        session_id: String,
        nft_contract: String,
        token_id: String,
    ) -> Result<(), RelayerError> {
        let session = self
            .store
            .load_session(&session_id)?
            .ok_or_else(|| RelayerError::NotFound(format!("session {session_id} not found")))?;

        let ok = self
            .store
            .transition_with_source_nft_guard(
                &session_id,
                SessionStatus::WaitingDeposit,
                SessionStatus::VerifyingDeposit,
                session.source_chain,
                &nft_contract,
                &token_id,
                |_| {},
            )
            .await?;
        if !ok {
            return Err(RelayerError::WrongStatus(format!(
                "session {session_id} is not waiting for a deposit"
            )));
        }

        let fsm = self.clone();
        tokio::spawn(async move {
            if let Err(error) = fsm.run_deposit_pipeline(&session_id, &nft_contract, &token_id).await {
                warn!(session_id, %error, "deposit pipeline failed");
            }
        });
        Ok(())
    }

    async fn fail(&self, session_id: &str, from: SessionStatus, message: String) {
        error!(session_id, message, "session moving to error");
        let _ = self
            .store
            .transition(session_id, from, SessionStatus::Error, |session| {
                session.error_message = Some(message);
            })
            .await;
    }

    async fn run_deposit_pipeline(
        &self,
        session_id: &str,
        nft_contract: &str,
        token_id: &str,
    ) -> Result<(), RelayerError> {
        let session = self
            .store
            .load_session(session_id)?
            .ok_or_else(|| RelayerError::NotFound(format!("session {session_id} not found")))?;
        let deposit_address = session
            .deposit_address
            .clone()
            .ok_or_else(|| RelayerError::Fatal("session has no deposit address".into()))?;

        let verification = self
            .deposit_verifier
            .verify_deposit(session.source_chain, nft_contract, token_id, &deposit_address)
            .await?;
        if !verification.verified {
            let message = verification.error.unwrap_or_else(|| "deposit not observed on source chain".into());
            self.fail(session_id, SessionStatus::VerifyingDeposit, message).await;
            return Ok(());
        }

        self.store
            .transition(session_id, SessionStatus::VerifyingDeposit, SessionStatus::UploadingMetadata, |_| {})
            .await?;

        let token_uri = match self
            .metadata_pipeline
            .run(&verification, session.source_chain, nft_contract, token_id, &deposit_address, &session.receiver_address)
            .await
        {
            Ok(uri) => uri,
            Err(error) => {
                self.fail(session_id, SessionStatus::UploadingMetadata, error.to_string()).await;
                return Ok(());
            }
        };

        let collection_name = verification.collection_name.clone().unwrap_or_default();
        let receiver_pubkey = Pubkey::from_str(&session.receiver_address)
            .map_err(|e| RelayerError::ValidationFailure(format!("bad receiver address: {e}")))?;
        let receiver_bytes = receiver_pubkey.to_bytes();
        let token_id_bytes = token_id.as_bytes().to_vec();
        let message_hash = ProcessedSeal::expected_message_hash(&token_uri, &token_id_bytes, &receiver_bytes);

        let token_uri_for_closure = token_uri.clone();
        let collection_name_for_closure = collection_name.clone();
        self.store
            .transition(session_id, SessionStatus::UploadingMetadata, SessionStatus::CreatingSeal, move |session| {
                session.token_uri = Some(token_uri_for_closure);
                session.collection_name = Some(collection_name_for_closure);
                session.nft_name = verification.name.clone();
            })
            .await?;

        let nft_contract_bytes = chains::to_bytes(&json!(nft_contract))
            .map_err(|e| RelayerError::ValidationFailure(format!("bad nftContract: {e}")))?;

        let submission = self
            .sequencer
            .enqueue(CoordinationCall {
                label: format!("fsm.create_seal.{session_id}"),
                function: "create_seal".into(),
                arguments: vec![
                    json!(session_id),
                    json!(session.source_chain.info().wormhole_chain_id),
                    json!(hex::encode(&nft_contract_bytes)),
                    json!(hex::encode(&token_id_bytes)),
                    json!(token_uri),
                    json!(hex::encode(receiver_bytes)),
                    json!(collection_name),
                    json!(hex::encode(message_hash)),
                ],
            })
            .await;

        match submission {
            Ok(_) => {
                self.store
                    .transition(session_id, SessionStatus::CreatingSeal, SessionStatus::Signing, |_| {})
                    .await?;
                Ok(())
            }
            Err(error) => {
                self.fail(session_id, SessionStatus::CreatingSeal, error.to_string()).await;
                Ok(())
            }
        }
    }

    pub fn status(&self, session_id: &str) -> Result<Option<Session>, RelayerError> {
        self.store.load_session(session_id)
    }
}

/// Handles the `SealSigned` stream: decodes the signed seal, runs the mint
/// transaction, and transitions `minting → complete` (or `error`).
pub struct SealSignedHandler {
    store: Arc<Store>,
    mint_submitter: Arc<MintSubmitter>,
}

impl SealSignedHandler {
    pub fn new(store: Arc<Store>, mint_submitter: Arc<MintSubmitter>) -> Self {
        Self { store, mint_submitter }
    }

    fn decode(event: &CoordinationEvent) -> Result<(String, ProcessedSeal), RelayerError> {
        let payload = &event.payload;
        let field_bytes = |name: &str| -> Result<Vec<u8>, RelayerError> {
            chains::to_bytes(
                payload
                    .get(name)
                    .ok_or_else(|| RelayerError::ValidationFailure(format!("SealSigned missing {name}")))?,
            )
            .map_err(|e| RelayerError::ValidationFailure(format!("bad {name}: {e}")))
        };

        let session_id = payload
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayerError::ValidationFailure("SealSigned missing sessionId".into()))?
            .to_string();

        let signature: [u8; 64] = field_bytes("signature")?
            .try_into()
            .map_err(|_| RelayerError::ValidationFailure("signature must be 64 bytes".into()))?;
        let signer_pubkey: [u8; 32] = field_bytes("signerPubkey")?
            .try_into()
            .map_err(|_| RelayerError::ValidationFailure("signerPubkey must be 32 bytes".into()))?;
        let receiver: [u8; 32] = field_bytes("receiver")?
            .try_into()
            .map_err(|_| RelayerError::ValidationFailure("receiver must be 32 bytes".into()))?;
        let message_hash: [u8; 32] = field_bytes("messageHash")?
            .try_into()
            .map_err(|_| RelayerError::ValidationFailure("messageHash must be 32 bytes".into()))?;
        let source_chain_id = payload
            .get("sourceChainId")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RelayerError::ValidationFailure("SealSigned missing sourceChainId".into()))?
            as u16;
        let token_uri = payload
            .get("tokenUri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayerError::ValidationFailure("SealSigned missing tokenUri".into()))?
            .to_string();
        let collection_name = payload
            .get("collectionName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let seal = ProcessedSeal {
            signature,
            signer_pubkey,
            source_chain_id,
            nft_contract_bytes: field_bytes("nftContractBytes")?,
            token_id_bytes: field_bytes("tokenIdBytes")?,
            token_uri,
            receiver,
            collection_name,
            message_hash,
        };
        Ok((session_id, seal))
    }
}

#[async_trait::async_trait]
impl EventHandler for SealSignedHandler {
    async fn handle(&self, event: &CoordinationEvent) -> Result<(), RelayerError> {
        let (session_id, seal) = Self::decode(event)?;

        let expected = ProcessedSeal::expected_message_hash(&seal.token_uri, &seal.token_id_bytes, &seal.receiver);
        if expected != seal.message_hash {
            warn!(session_id, "SealSigned event failed the messageHash stability check, discarding");
            return Err(RelayerError::NonRetriableOnChainAbort("messageHash mismatch".into()));
        }

        let ok = self
            .store
            .transition(&session_id, SessionStatus::Signing, SessionStatus::Minting, |_| {})
            .await?;
        if !ok {
            info!(session_id, "SealSigned event observed for a session not in signing, ignoring");
            return Ok(());
        }

        match self.mint_submitter.submit(seal).await {
            Ok(outcome) => {
                self.store
                    .transition(&session_id, SessionStatus::Minting, SessionStatus::Complete, move |session| {
                        session.minted_asset_address = Some(outcome.mint_address);
                    })
                    .await?;
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                self.store
                    .transition(&session_id, SessionStatus::Minting, SessionStatus::Error, move |session| {
                        session.error_message = Some(message);
                    })
                    .await?;
                Err(error)
            }
        }
    }
}
