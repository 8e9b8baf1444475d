//! Builds and submits the target-chain mint transaction for a signed seal
//! (C10), with bounded exponential-backoff retries. Per spec §4.10 the
//! transaction itself — signature verification against the on-chain signer
//! key, PDA initialization, the actual asset mint — runs on the target
//! chain's program; this module's job is producing the canonical PDA
//! addresses and the length-prefixed call encoding, and handing both to the
//! [`crate::external::TargetChainSubmitter`] black box with retries.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::errors::RelayerError;
use crate::external::{MintOutcome, TargetChainSubmitter};
use crate::retry::backoff_delay;

/// A `SealSigned` event decoded into the fields the mint transaction needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSeal {
    pub signature: [u8; 64],
    pub signer_pubkey: [u8; 32],
    pub source_chain_id: u16,
    pub nft_contract_bytes: Vec<u8>,
    pub token_id_bytes: Vec<u8>,
    pub token_uri: String,
    pub receiver: [u8; 32],
    pub collection_name: String,
    pub message_hash: [u8; 32],
}

impl ProcessedSeal {
    /// `messageHash = SHA256(tokenUri || tokenIdBytes || receiverBytes)`, the
    /// stability law every seal must satisfy before it's accepted for
    /// minting.
    pub fn expected_message_hash(token_uri: &str, token_id_bytes: &[u8], receiver: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(token_uri.as_bytes());
        hasher.update(token_id_bytes);
        hasher.update(receiver);
        hasher.finalize().into()
    }
}

/// The canonical set of program-derived addresses for one seal, per the
/// fixed seed list in §4.10. Two calls with identical
/// `(programId, sourceChainId, nftContract, tokenId, signature)` always
/// derive the same addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealPdas {
    pub sig_used: Pubkey,
    pub provenance: Pubkey,
    pub reborn_collection: Pubkey,
    pub mint_authority: Pubkey,
    pub mint_config: Pubkey,
}

pub fn derive_pdas(program_id: &Pubkey, seal: &ProcessedSeal) -> SealPdas {
    let source_chain_id_be = seal.source_chain_id.to_be_bytes();
    let signature_digest = Sha256::digest(seal.signature);

    let (sig_used, _) = Pubkey::find_program_address(&[b"sig_used", &signature_digest], program_id);
    let (provenance, _) = Pubkey::find_program_address(
        &[b"provenance", &source_chain_id_be, &seal.nft_contract_bytes, &seal.token_id_bytes],
        program_id,
    );
    let (reborn_collection, _) = Pubkey::find_program_address(
        &[b"reborn_collection", &source_chain_id_be, &seal.nft_contract_bytes],
        program_id,
    );
    let (mint_authority, _) = Pubkey::find_program_address(
        &[b"mint_authority", &source_chain_id_be, &seal.nft_contract_bytes],
        program_id,
    );
    let (mint_config, _) = Pubkey::find_program_address(&[b"mint_config"], program_id);

    SealPdas { sig_used, provenance, reborn_collection, mint_authority, mint_config }
}

/// Encodes the mint call as a length-prefixed binary ABI: a struct selector
/// byte, then the PDA-seed-derivable fields (placed first for cheap
/// deserialization on-chain), then the variable-length fields, then the
/// signature blob last.
pub fn encode_mint_call(program_id: &Pubkey, seal: &ProcessedSeal) -> Vec<u8> {
    const MINT_SEAL_SELECTOR: u8 = 0x01;

    let pdas = derive_pdas(program_id, seal);
    let mut out = Vec::new();
    out.push(MINT_SEAL_SELECTOR);
    out.extend_from_slice(&seal.source_chain_id.to_be_bytes());
    out.extend_from_slice(pdas.provenance.as_ref());
    out.extend_from_slice(pdas.reborn_collection.as_ref());
    out.extend_from_slice(pdas.mint_authority.as_ref());
    out.extend_from_slice(pdas.mint_config.as_ref());

    write_length_prefixed(&mut out, &seal.nft_contract_bytes);
    write_length_prefixed(&mut out, &seal.token_id_bytes);
    write_length_prefixed(&mut out, seal.token_uri.as_bytes());
    out.extend_from_slice(&seal.receiver);
    write_length_prefixed(&mut out, seal.collection_name.as_bytes());
    out.extend_from_slice(&seal.message_hash);
    out.extend_from_slice(&seal.signer_pubkey);

    write_length_prefixed(&mut out, &seal.signature);
    out
}

fn write_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

pub struct MintSubmitter {
    submitter: Arc<dyn TargetChainSubmitter>,
    program_id: Pubkey,
    max_retries: u32,
    base_delay: Duration,
}

impl MintSubmitter {
    pub fn new(
        submitter: Arc<dyn TargetChainSubmitter>,
        program_id: Pubkey,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self { submitter, program_id, max_retries, base_delay }
    }

    /// Retries submission up to `max_retries` times, generating a fresh
    /// asset keypair on every attempt (the target chain requires the asset
    /// account to be a freshly-uninitialised key that co-signs the mint).
    /// Reports success or the final exhaustion error.
    pub async fn submit(&self, seal: ProcessedSeal) -> Result<MintOutcome, RelayerError> {
        let pdas = derive_pdas(&self.program_id, &seal);
        info!(provenance = %pdas.provenance, "submitting mint transaction");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.submitter.submit_mint(seal.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_retriable() && attempt <= self.max_retries => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    warn!(attempt, ?delay, %error, "mint submission failed, retrying with a fresh asset keypair");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
