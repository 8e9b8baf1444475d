//! The explicit source-chain table. Per the design notes: source-chain maps
//! (name -> numeric id, name -> address-encoding rule) are a table, not
//! string matching spread through the code.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceChain {
    EthereumSepolia,
    Sui,
    Near,
    Aptos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEncoding {
    /// 20-byte EVM address.
    Evm20,
    /// 32-byte object/account id.
    Bytes32,
    /// 32-byte Ed25519 public key.
    Ed25519PublicKey32,
}

pub struct ChainInfo {
    pub chain: SourceChain,
    /// The numeric chain id used in the Wormhole-style attestation envelope.
    pub wormhole_chain_id: u16,
    pub encoding: AddressEncoding,
}

const TABLE: &[ChainInfo] = &[
    ChainInfo {
        chain: SourceChain::EthereumSepolia,
        wormhole_chain_id: 10002,
        encoding: AddressEncoding::Evm20,
    },
    ChainInfo { chain: SourceChain::Sui, wormhole_chain_id: 21, encoding: AddressEncoding::Bytes32 },
    ChainInfo {
        chain: SourceChain::Near,
        wormhole_chain_id: 15,
        encoding: AddressEncoding::Ed25519PublicKey32,
    },
    ChainInfo { chain: SourceChain::Aptos, wormhole_chain_id: 22, encoding: AddressEncoding::Bytes32 },
];

impl SourceChain {
    pub fn info(self) -> &'static ChainInfo {
        TABLE.iter().find(|entry| entry.chain == self).expect("every SourceChain variant is tabulated")
    }

    pub fn from_wormhole_chain_id(id: u16) -> Option<SourceChain> {
        TABLE.iter().find(|entry| entry.wormhole_chain_id == id).map(|entry| entry.chain)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceChain::EthereumSepolia => "ethereum-sepolia",
            SourceChain::Sui => "sui",
            SourceChain::Near => "near",
            SourceChain::Aptos => "aptos",
        }
    }

    pub fn parse(name: &str) -> Option<SourceChain> {
        match name {
            "ethereum-sepolia" => Some(SourceChain::EthereumSepolia),
            "sui" => Some(SourceChain::Sui),
            "near" => Some(SourceChain::Near),
            "aptos" => Some(SourceChain::Aptos),
            _ => None,
        }
    }

    /// The expected raw byte length of a deposit address on this chain, per
    /// the encoding round-trip law.
    pub fn address_len(self) -> usize {
        match self.info().encoding {
            AddressEncoding::Evm20 => 20,
            AddressEncoding::Bytes32 | AddressEncoding::Ed25519PublicKey32 => 32,
        }
    }
}

/// Normalizes a dynamically-typed event field to raw bytes: bytes pass
/// through; `0x`-prefixed strings parse as hex; anything else is tried as
/// base64 then hex.
pub fn to_bytes(value: &serde_json::Value) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;

    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| anyhow::anyhow!("array element is not a byte"))
            })
            .collect(),
        serde_json::Value::String(s) => {
            if let Some(stripped) = s.strip_prefix("0x") {
                Ok(hex::decode(stripped)?)
            } else if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(s) {
                Ok(decoded)
            } else {
                Ok(hex::decode(s)?)
            }
        }
        other => anyhow::bail!("cannot normalize {other:?} to bytes"),
    }
}
