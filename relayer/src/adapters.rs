//! Concrete, network-talking implementations of the external-collaborator
//! traits in [`crate::external`] and [`crate::deposit_verifier`]. Per §1
//! these collaborators (the coordination chain, the MPC network, the
//! target-chain submitter, per-source-chain RPC, the content-addressed
//! store) are specified only by the interface the core consumes; what lives
//! here is one reasonably thin adapter per interface, built the way this
//! daemon family always wraps a JSON-RPC peer: a plain `reqwest::Client`,
//! a `call_rpc` envelope helper, and a handful of narrow methods.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Bytes as EthBytes, TransactionRequest, U256 as EthU256};
use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signer::{
        keypair::{read_keypair_file, Keypair},
        Signer,
    },
    transaction::Transaction,
};
use tracing::warn;

use crate::deposit_verifier::{AptosViewRpc, EvmNftRpc, NearViewRpc, SuiObjectRpc};
use crate::errors::RelayerError;
use crate::external::{
    CeremonyStatus, ContentStore, CoordinationCall, CoordinationChain, CoordinationEvent, EventPage,
    MintOutcome, MpcService, PaymentTransfer, TargetChainSubmitter, TxOutcome,
};
use crate::mint_submitter::{derive_pdas, ProcessedSeal};

/// A JSON-RPC 2.0 envelope call, the shape every adapter in this module
/// speaks to its peer.
async fn call_rpc(client: &Client, url: &str, method: &str, params: Value) -> Result<Value, RelayerError> {
    let body = json!({"jsonrpc": "2.0", "id": 0, "method": method, "params": params});
    let response = client.post(url).json(&body).send().await?;
    let mut payload: Value = response.json().await?;
    if let Some(error) = payload.get("error") {
        return Err(RelayerError::TransientNetwork(format!("rpc error from {url} calling {method}: {error}")));
    }
    Ok(payload["result"].take())
}

/// Talks to the coordination chain's RPC gateway: mutating calls are
/// forwarded as `(function, arguments)` pairs, events are paged by type and
/// cursor, balances are a read-only query. The gateway's own wallet holds
/// the admin capability and co-signs every submitted call.
pub struct HttpCoordinationChain {
    client: Client,
    rpc_url: String,
    registry_object_id: String,
    admin_capability_object_id: String,
}

impl HttpCoordinationChain {
    pub fn new(rpc_url: String, registry_object_id: String, admin_capability_object_id: String) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build().expect("client builds"),
            rpc_url,
            registry_object_id,
            admin_capability_object_id,
        }
    }
}

#[async_trait]
impl CoordinationChain for HttpCoordinationChain {
    async fn submit(&self, call: CoordinationCall) -> Result<TxOutcome, RelayerError> {
        let result = call_rpc(
            &self.client,
            &self.rpc_url,
            &call.function,
            json!({
                "registryObjectId": self.registry_object_id,
                "adminCapabilityObjectId": self.admin_capability_object_id,
                "arguments": call.arguments,
            }),
        )
        .await?;

        let tx_id = result
            .get("txId")
            .and_then(Value::as_u64)
            .ok_or_else(|| RelayerError::Fatal(format!("{} response missing txId", call.label)))?;
        let effects = result.get("effects").cloned().unwrap_or_else(|| json!({}));
        Ok(TxOutcome { tx_id, effects })
    }

    async fn events_after(
        &self,
        fully_qualified_event_type: &str,
        after: Option<(u64, u64)>,
        page_size: u32,
    ) -> Result<EventPage, RelayerError> {
        let result = call_rpc(
            &self.client,
            &self.rpc_url,
            "query_events",
            json!({
                "eventType": fully_qualified_event_type,
                "after": after.map(|(tx_id, seq)| json!({"txId": tx_id, "eventSeq": seq})),
                "pageSize": page_size,
            }),
        )
        .await?;

        let events = result
            .get("events")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(CoordinationEvent {
                            tx_id: item.get("txId")?.as_u64()?,
                            event_seq: item.get("eventSeq")?.as_u64()?,
                            payload: item.get("payload")?.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let has_next_page = result.get("hasNextPage").and_then(Value::as_bool).unwrap_or(false);
        Ok(EventPage { events, has_next_page })
    }

    async fn read_treasury_balances(&self) -> Result<(u64, u64), RelayerError> {
        let result =
            call_rpc(&self.client, &self.rpc_url, "read_balances", json!({"registryObjectId": self.registry_object_id}))
                .await?;
        let fee = result.get("feeTokenAmount").and_then(Value::as_u64).unwrap_or(0);
        let gas = result.get("gasTokenAmount").and_then(Value::as_u64).unwrap_or(0);
        Ok((fee, gas))
    }
}

/// Talks to the MPC network's prepare/sign/poll surface, per §6 "treated as
/// an oracle exposing prepare/sign/poll calls".
pub struct HttpMpcService {
    client: Client,
    service_url: String,
}

impl HttpMpcService {
    pub fn new(service_url: String) -> Self {
        Self { client: Client::builder().timeout(Duration::from_secs(30)).build().expect("client builds"), service_url }
    }

    fn parse_status(value: &Value) -> CeremonyStatus {
        match value.get("status").and_then(Value::as_str) {
            Some("completed") => CeremonyStatus::Completed,
            Some("failed") => CeremonyStatus::Failed,
            _ => CeremonyStatus::Pending,
        }
    }
}

#[async_trait]
impl MpcService for HttpMpcService {
    async fn request_presign(&self) -> Result<String, RelayerError> {
        let result = call_rpc(&self.client, &self.service_url, "request_presign", json!({})).await?;
        result
            .get("objectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::Fatal("request_presign response missing objectId".into()))
    }

    async fn poll_presign(&self, object_id: &str) -> Result<CeremonyStatus, RelayerError> {
        let result = call_rpc(&self.client, &self.service_url, "poll_presign", json!({"objectId": object_id})).await?;
        Ok(Self::parse_status(&result))
    }

    async fn fetch_presign_blob(&self, object_id: &str) -> Result<Vec<u8>, RelayerError> {
        let result =
            call_rpc(&self.client, &self.service_url, "fetch_presign_blob", json!({"objectId": object_id})).await?;
        let hex_blob = result
            .get("blob")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayerError::Fatal("fetch_presign_blob response missing blob".into()))?;
        hex::decode(hex_blob).map_err(|e| RelayerError::Fatal(format!("malformed presign blob: {e}")))
    }

    async fn request_sign(&self, partial_signature: Vec<u8>) -> Result<String, RelayerError> {
        let result = call_rpc(
            &self.client,
            &self.service_url,
            "request_sign",
            json!({"partialSignature": hex::encode(partial_signature)}),
        )
        .await?;
        result
            .get("signatureId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::Fatal("request_sign response missing signatureId".into()))
    }

    async fn poll_signature(&self, signature_id: &str) -> Result<CeremonyStatus, RelayerError> {
        let result =
            call_rpc(&self.client, &self.service_url, "poll_signature", json!({"signatureId": signature_id})).await?;
        Ok(Self::parse_status(&result))
    }

    async fn fetch_signature(&self, signature_id: &str) -> Result<[u8; 64], RelayerError> {
        let result =
            call_rpc(&self.client, &self.service_url, "fetch_signature", json!({"signatureId": signature_id})).await?;
        let hex_sig = result
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayerError::Fatal("fetch_signature response missing signature".into()))?;
        let bytes = hex::decode(hex_sig).map_err(|e| RelayerError::Fatal(format!("malformed signature: {e}")))?;
        bytes.try_into().map_err(|_| RelayerError::Fatal("signature must be 64 bytes".into()))
    }
}

const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONFIRMATION_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Submits the mint transaction and looks up payment transactions directly
/// against a Solana RPC node. The fee payer's keypair also co-signs every
/// mint (the target chain's program requires the fresh asset key to
/// co-sign; the fee payer key is read once at startup and kept resident).
pub struct SolanaTargetChainSubmitter {
    client: Client,
    rpc_url: String,
    program_id: Pubkey,
    fee_payer: Keypair,
}

impl SolanaTargetChainSubmitter {
    pub fn new(rpc_url: String, program_id: Pubkey, signer_key_file: &str) -> Result<Self, RelayerError> {
        let fee_payer = read_keypair_file(signer_key_file)
            .map_err(|e| RelayerError::Fatal(format!("could not read signer key file {signer_key_file}: {e}")))?;
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build().expect("client builds"),
            rpc_url,
            program_id,
            fee_payer,
        })
    }

    async fn latest_blockhash(&self) -> Result<solana_sdk::hash::Hash, RelayerError> {
        let result = call_rpc(&self.client, &self.rpc_url, "getLatestBlockhash", json!([{"commitment": "confirmed"}])).await?;
        let blockhash = result
            .pointer("/value/blockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayerError::TransientNetwork("getLatestBlockhash missing blockhash".into()))?;
        solana_sdk::hash::Hash::from_str(blockhash)
            .map_err(|e| RelayerError::TransientNetwork(format!("malformed blockhash: {e}")))
    }

    async fn wait_for_confirmation(&self, signature: &str) -> Result<(), RelayerError> {
        tokio::time::timeout(CONFIRMATION_POLL_TIMEOUT, async {
            loop {
                let result =
                    call_rpc(&self.client, &self.rpc_url, "getSignatureStatuses", json!([[signature]])).await?;
                let status = result.pointer("/value/0");
                match status {
                    Some(Value::Null) | None => tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await,
                    Some(status) => {
                        if let Some(error) = status.get("err") {
                            if !error.is_null() {
                                return Err(RelayerError::NonRetriableOnChainAbort(format!(
                                    "transaction {signature} failed: {error}"
                                )));
                            }
                        }
                        return Ok(());
                    }
                }
            }
        })
        .await
        .map_err(|_| RelayerError::TransientNetwork(format!("transaction {signature} did not confirm in time")))?
    }
}

#[async_trait]
impl TargetChainSubmitter for SolanaTargetChainSubmitter {
    async fn submit_mint(&self, seal: ProcessedSeal) -> Result<MintOutcome, RelayerError> {
        let asset_keypair = Keypair::new();
        let pdas = derive_pdas(&self.program_id, &seal);
        let data = crate::mint_submitter::encode_mint_call(&self.program_id, &seal);

        let instruction = Instruction::new_with_bytes(
            self.program_id,
            &data,
            vec![
                AccountMeta::new(self.fee_payer.pubkey(), true),
                AccountMeta::new(asset_keypair.pubkey(), true),
                AccountMeta::new(pdas.sig_used, false),
                AccountMeta::new(pdas.provenance, false),
                AccountMeta::new(pdas.reborn_collection, false),
                AccountMeta::new(pdas.mint_authority, false),
                AccountMeta::new(pdas.mint_config, false),
            ],
        );

        let blockhash = self.latest_blockhash().await?;
        let message = Message::new(&[instruction], Some(&self.fee_payer.pubkey()));
        let transaction = Transaction::new(&[&self.fee_payer, &asset_keypair], message, blockhash);

        use base64::Engine;
        let raw = bincode::serialize(&transaction).map_err(|e| RelayerError::Fatal(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);

        let result = call_rpc(
            &self.client,
            &self.rpc_url,
            "sendTransaction",
            json!([encoded, {"encoding": "base64", "preflightCommitment": "confirmed"}]),
        )
        .await?;
        let signature = result
            .as_str()
            .ok_or_else(|| RelayerError::TransientNetwork("sendTransaction did not return a signature".into()))?
            .to_string();

        self.wait_for_confirmation(&signature).await?;

        Ok(MintOutcome { mint_address: asset_keypair.pubkey().to_string(), tx_signature: signature })
    }

    async fn find_payment(&self, payment_tx_id: &str) -> Result<Option<PaymentTransfer>, RelayerError> {
        let result = call_rpc(
            &self.client,
            &self.rpc_url,
            "getTransaction",
            json!([payment_tx_id, {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}]),
        )
        .await?;
        if result.is_null() {
            return Ok(None);
        }

        let succeeded = result.pointer("/meta/err").map(Value::is_null).unwrap_or(false);
        let instructions = result
            .pointer("/transaction/message/instructions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let transfer = instructions.iter().find_map(|instruction| {
            let parsed = instruction.get("parsed")?;
            if parsed.get("type")?.as_str()? != "transfer" {
                return None;
            }
            let info = parsed.get("info")?;
            Some(PaymentTransfer {
                source: info.get("source")?.as_str()?.to_string(),
                destination: info.get("destination")?.as_str()?.to_string(),
                amount: info.get("lamports")?.as_u64()?,
                succeeded,
            })
        });
        Ok(transfer)
    }
}

/// Uploads images and normalized metadata documents to a content-addressed
/// gateway that accepts a bearer-authenticated multipart upload and returns
/// the resulting URL, the shape most pinning services (web3.storage,
/// Pinata, nft.storage) share.
pub struct HttpContentStore {
    client: Client,
    upload_url: String,
    bearer_token: String,
}

impl HttpContentStore {
    pub fn new(upload_url: String, bearer_token: String) -> Self {
        Self { client: Client::builder().timeout(Duration::from_secs(60)).build().expect("client builds"), upload_url, bearer_token }
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, RelayerError> {
        let part = reqwest::multipart::Part::bytes(bytes).mime_str(content_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self.client.post(&self.upload_url).bearer_auth(&self.bearer_token).multipart(form).send().await?;
        let payload: Value = response.json().await?;
        payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::TransientNetwork("upload response missing url".into()))
    }
}

fn evm_selector(signature: &str) -> [u8; 4] {
    let digest = ethers::utils::keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn encode_token_id_call(selector: [u8; 4], token_id: &str) -> Result<EthBytes, RelayerError> {
    let id = EthU256::from_dec_str(token_id)
        .map_err(|e| RelayerError::ValidationFailure(format!("tokenId {token_id} is not a valid uint256: {e}")))?;
    let mut data = selector.to_vec();
    let mut encoded = [0u8; 32];
    id.to_big_endian(&mut encoded);
    data.extend_from_slice(&encoded);
    Ok(EthBytes::from(data))
}

fn decode_address_return(bytes: &[u8]) -> Result<String, RelayerError> {
    if bytes.len() < 32 {
        return Err(RelayerError::TransientNetwork("eth_call return too short for an address".into()));
    }
    Ok(format!("0x{}", hex::encode(&bytes[12..32])))
}

/// Decodes a single ABI-encoded `string` return value: a 32-byte offset
/// (always 0x20 for a lone dynamic return), a 32-byte length, then the
/// UTF-8 bytes padded to a 32-byte boundary.
fn decode_string_return(bytes: &[u8]) -> Result<String, RelayerError> {
    if bytes.len() < 64 {
        return Err(RelayerError::TransientNetwork("eth_call return too short for a string".into()));
    }
    let length = EthU256::from_big_endian(&bytes[32..64]).as_usize();
    let data = bytes.get(64..64 + length).ok_or_else(|| RelayerError::TransientNetwork("truncated string return".into()))?;
    String::from_utf8(data.to_vec()).map_err(|e| RelayerError::TransientNetwork(format!("non-utf8 string return: {e}")))
}

/// EVM-family RPC client over `eth_call`, used by [`crate::deposit_verifier::ChainDepositVerifier`].
pub struct EvmHttpNftRpc {
    client: Client,
}

impl Default for EvmHttpNftRpc {
    fn default() -> Self {
        Self { client: Client::builder().timeout(Duration::from_secs(15)).build().expect("client builds") }
    }
}

impl EvmHttpNftRpc {
    async fn eth_call(&self, rpc_url: &str, contract: &str, data: EthBytes) -> Result<Vec<u8>, RelayerError> {
        let tx = TransactionRequest::new().to(contract.parse::<ethers::types::Address>().map_err(|e| {
            RelayerError::ValidationFailure(format!("malformed contract address {contract}: {e}"))
        })?)
        .data(data);
        let result = call_rpc(&self.client, rpc_url, "eth_call", json!([tx_to_json(&tx), "latest"])).await?;
        let hex_return = result.as_str().unwrap_or("0x");
        hex::decode(hex_return.trim_start_matches("0x")).map_err(|e| RelayerError::TransientNetwork(e.to_string()))
    }
}

fn tx_to_json(tx: &TransactionRequest) -> Value {
    let to = tx.to.as_ref().and_then(|to| match to {
        ethers::types::NameOrAddress::Address(address) => Some(format!("{address:#x}")),
        ethers::types::NameOrAddress::Name(_) => None,
    });
    json!({
        "to": to,
        "data": tx.data.as_ref().map(|d| format!("0x{}", hex::encode(d.as_ref()))),
    })
}

#[async_trait]
impl EvmNftRpc for EvmHttpNftRpc {
    async fn owner_of(&self, rpc_url: &str, contract: &str, token_id: &str) -> Result<String, RelayerError> {
        let data = encode_token_id_call(evm_selector("ownerOf(uint256)"), token_id)?;
        let bytes = self.eth_call(rpc_url, contract, data).await?;
        decode_address_return(&bytes)
    }

    async fn token_uri(&self, rpc_url: &str, contract: &str, token_id: &str) -> Result<String, RelayerError> {
        let data = encode_token_id_call(evm_selector("tokenURI(uint256)"), token_id)?;
        let bytes = self.eth_call(rpc_url, contract, data).await?;
        decode_string_return(&bytes)
    }
}

/// Sui-family RPC client over the standard `sui_getObject` JSON-RPC method.
#[derive(Default)]
pub struct SuiHttpObjectRpc {
    client: Client,
}

#[async_trait]
impl SuiObjectRpc for SuiHttpObjectRpc {
    async fn get_object_with_display(&self, rpc_url: &str, object_id: &str) -> Result<Value, RelayerError> {
        call_rpc(
            &self.client,
            rpc_url,
            "sui_getObject",
            json!([object_id, {"showOwner": true, "showDisplay": true, "showContent": true}]),
        )
        .await
    }
}

/// NEAR-family RPC client over the standard `query`/`call_function` RPC method.
#[derive(Default)]
pub struct NearHttpViewRpc {
    client: Client,
}

#[async_trait]
impl NearViewRpc for NearHttpViewRpc {
    async fn nft_tokens_for_owner(&self, rpc_url: &str, contract: &str, owner: &str) -> Result<Value, RelayerError> {
        use base64::Engine;
        let args = base64::engine::general_purpose::STANDARD.encode(json!({"account_id": owner}).to_string());
        let result = call_rpc(
            &self.client,
            rpc_url,
            "query",
            json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract,
                "method_name": "nft_tokens_for_owner",
                "args_base64": args,
            }),
        )
        .await?;

        let bytes: Vec<u8> = result
            .get("result")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|b| b.as_u64().map(|n| n as u8)).collect())
            .unwrap_or_default();
        let text = String::from_utf8(bytes).map_err(|e| RelayerError::TransientNetwork(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| RelayerError::TransientNetwork(format!("malformed NEAR view response: {e}")))
    }
}

/// Aptos-family RPC client over the standard `/v1/view` endpoint.
#[derive(Default)]
pub struct AptosHttpViewRpc {
    client: Client,
}

#[async_trait]
impl AptosViewRpc for AptosHttpViewRpc {
    async fn view_token(&self, rpc_url: &str, contract: &str, token_id: &str) -> Result<Value, RelayerError> {
        let url = format!("{}/v1/view", rpc_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "function": format!("{contract}::reborn_token::view_token"),
                "type_arguments": [],
                "arguments": [token_id],
            }))
            .send()
            .await?;
        let payload: Value = response.json().await?;
        payload
            .as_array()
            .and_then(|items| items.first().cloned())
            .ok_or_else(|| {
                warn!(contract, token_id, "aptos view_token returned no results");
                RelayerError::DepositUnverified(format!("no resource for token {token_id}"))
            })
    }
}

/// Polls a Wormhole-style guardian network REST endpoint for VAAs emitted
/// by one `(chainId, emitterAddress)` pair, strictly after a given sequence.
pub struct HttpAttestationIndexer {
    client: Client,
    base_url: String,
}

impl HttpAttestationIndexer {
    pub fn new(base_url: String) -> Self {
        Self { client: Client::builder().timeout(Duration::from_secs(15)).build().expect("client builds"), base_url }
    }
}

#[async_trait]
impl crate::attestation_ingester::AttestationIndexer for HttpAttestationIndexer {
    async fn fetch_after(
        &self,
        chain_id: u16,
        emitter_address: &str,
        after_sequence: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<crate::attestation_ingester::RawAttestation>, RelayerError> {
        let url = format!(
            "{}/api/v1/vaas/{chain_id}/{emitter_address}",
            self.base_url.trim_end_matches('/')
        );
        let mut query = vec![("limit".to_string(), page_size.to_string())];
        if let Some(after) = after_sequence {
            query.push(("after".to_string(), after.to_string()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let payload: Value = response.json().await?;
        let entries = payload.get("data").and_then(Value::as_array).cloned().unwrap_or_default();

        entries
            .into_iter()
            .map(|entry| {
                use base64::Engine;
                let sequence = entry
                    .get("sequence")
                    .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())))
                    .ok_or_else(|| RelayerError::TransientNetwork("attestation entry missing sequence".into()))?;
                let vaa_base64 = entry
                    .get("vaa")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayerError::TransientNetwork("attestation entry missing vaa".into()))?;
                let vaa_bytes = base64::engine::general_purpose::STANDARD
                    .decode(vaa_base64)
                    .map_err(|e| RelayerError::TransientNetwork(format!("malformed vaa base64: {e}")))?;
                Ok(crate::attestation_ingester::RawAttestation { sequence, vaa_bytes })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_selectors_match_the_well_known_four_byte_hashes() {
        assert_eq!(hex::encode(evm_selector("ownerOf(uint256)")), "6352211e");
        assert_eq!(hex::encode(evm_selector("tokenURI(uint256)")), "c87b56dd");
    }

    #[test]
    fn decodes_an_address_return() {
        let mut bytes = vec![0u8; 32];
        bytes[12..].copy_from_slice(&[0xAB; 20]);
        assert_eq!(decode_address_return(&bytes).unwrap(), format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn decodes_a_string_return() {
        let mut bytes = vec![0u8; 32];
        bytes[31] = 0x20;
        let mut length = vec![0u8; 32];
        length[31] = 5;
        bytes.extend_from_slice(&length);
        let mut data = b"hello".to_vec();
        data.resize(32, 0);
        bytes.extend_from_slice(&data);
        assert_eq!(decode_string_return(&bytes).unwrap(), "hello");
    }
}
