//! The data model: `Session`, `PresignEntry`, `EventCursor`, `SequenceMark`.
//! These are plain records; ownership and mutation rules live in
//! [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chains::SourceChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingPayment,
    PaymentConfirmed,
    CreatingWallet,
    WaitingDeposit,
    VerifyingDeposit,
    UploadingMetadata,
    CreatingSeal,
    Signing,
    Minting,
    Complete,
    Error,
}

impl SessionStatus {
    /// The legal next statuses for this status, per the FSM transition
    /// table. `Error` is reachable from every non-terminal status but is
    /// listed separately by callers rather than folded in here, to keep the
    /// "happy path" table readable.
    pub fn happy_path_next(self) -> Option<SessionStatus> {
        use SessionStatus::*;
        match self {
            AwaitingPayment => Some(PaymentConfirmed),
            PaymentConfirmed => Some(CreatingWallet),
            CreatingWallet => Some(WaitingDeposit),
            WaitingDeposit => Some(VerifyingDeposit),
            VerifyingDeposit => Some(UploadingMetadata),
            UploadingMetadata => Some(CreatingSeal),
            CreatingSeal => Some(Signing),
            Signing => Some(Minting),
            Minting => Some(Complete),
            Complete | Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Error)
    }

    /// Statuses `expireStaleSessions` is allowed to sweep: non-terminal,
    /// intermediate statuses. `AwaitingPayment` is included since a session
    /// stuck there with no payment is exactly what expiry exists to reclaim.
    pub fn is_expirable(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebornNft {
    pub mint: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub receiver_address: String,
    pub source_chain: SourceChain,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_tx_id: Option<String>,
    pub deposit_address: Option<Vec<u8>>,
    pub deposit_pubkey: Option<[u8; 32]>,
    pub deposit_wallet_id: Option<String>,
    pub nft_contract: Option<String>,
    pub token_id: Option<String>,
    pub token_uri: Option<String>,
    pub nft_name: Option<String>,
    pub collection_name: Option<String>,
    pub minted_asset_address: Option<String>,
    pub error_message: Option<String>,
}

impl Session {
    pub fn new(session_id: String, receiver_address: String, source_chain: SourceChain) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            receiver_address,
            source_chain,
            status: SessionStatus::AwaitingPayment,
            created_at: now,
            updated_at: now,
            payment_tx_id: None,
            deposit_address: None,
            deposit_pubkey: None,
            deposit_wallet_id: None,
            nft_contract: None,
            token_id: None,
            token_uri: None,
            nft_name: None,
            collection_name: None,
            minted_asset_address: None,
            error_message: None,
        }
    }

    pub fn reborn_nft(&self) -> Option<RebornNft> {
        self.minted_asset_address.clone().map(|mint| RebornNft {
            mint,
            name: self.nft_name.clone(),
            image: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresignStatus {
    Available,
    Leased,
    Consumed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignEntry {
    pub object_id: String,
    pub presign_id: String,
    pub presign_blob: Vec<u8>,
    pub status: PresignStatus,
    pub leased_at: Option<DateTime<Utc>>,
    pub leased_for: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PresignEntry {
    pub fn new(object_id: String, presign_id: String, presign_blob: Vec<u8>) -> Self {
        Self {
            object_id,
            presign_id,
            presign_blob,
            status: PresignStatus::Available,
            leased_at: None,
            leased_for: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventCursor {
    pub tx_id: u64,
    pub event_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceMark {
    pub emitter_key: String,
    pub sequence: String,
}

impl SequenceMark {
    /// Sequence numbers may exceed 64 bits, so they are compared as decimal
    /// strings padded to a common width rather than parsed into a single
    /// numeric type.
    pub fn is_at_least(&self, other: &str) -> bool {
        compare_decimal_strings(&self.sequence, other) != std::cmp::Ordering::Less
    }
}

fn compare_decimal_strings(a: &str, b: &str) -> std::cmp::Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    if a.len() != b.len() {
        a.len().cmp(&b.len())
    } else {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_acyclic_and_terminates() {
        let mut status = SessionStatus::AwaitingPayment;
        let mut seen = 0;
        while let Some(next) = status.happy_path_next() {
            status = next;
            seen += 1;
            assert!(seen <= 10, "happy path should terminate quickly");
        }
        assert_eq!(status, SessionStatus::Complete);
    }

    #[test]
    fn sequence_mark_compares_big_decimals() {
        assert_eq!(compare_decimal_strings("99", "100"), std::cmp::Ordering::Less);
        assert_eq!(
            compare_decimal_strings("18446744073709551616", "18446744073709551615"),
            std::cmp::Ordering::Greater
        );
    }
}
