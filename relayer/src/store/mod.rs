//! Durable session, presign, cursor and sequence records, backed by
//! `rocksdb`. All writes persist synchronously. The `transition` and `lease`
//! operations are the only two call sites that mutate a record conditionally
//! on its current value, and both hold `guard` for the duration of their
//! read-modify-write so two concurrent callers can never both win the same
//! race — the same property the column-family/prefix/bincode-serialized
//! key-value layout here is borrowed from, just without that codebase's
//! multi-scheme keygen data.

mod migrations;

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    errors::RelayerError,
    model::{EventCursor, PresignEntry, PresignStatus, Session, SessionStatus},
};

const DATA_COLUMN: &str = "data";
const METADATA_COLUMN: &str = "metadata";
const DB_SCHEMA_VERSION_KEY: &[u8] = b"db_schema_version";
const BACKUPS_DIRECTORY: &str = "backups";

// Every prefix that gets passed to `prefix_iterator_cf` (as opposed to a
// single fully-qualified key via `get`/`put`) must be at least as long as
// the `data` column family's fixed-prefix(8) extractor, or the extractor's
// `Transform` is called out of its domain and the iterator silently matches
// nothing. `SESSION_PREFIX` and `PRESIGN_PREFIX` are the two iterated via
// `prefix_values`, so both are exactly 8 bytes.
const SESSION_PREFIX: &[u8] = b"session:";
const SESSION_BY_PAYMENT_PREFIX: &[u8] = b"sess_pay:";
const SESSION_BY_DEPOSIT_PREFIX: &[u8] = b"sess_dep:";
const SESSION_BY_SOURCE_NFT_PREFIX: &[u8] = b"sess_nft:";
const PRESIGN_PREFIX: &[u8] = b"presign:";
const CURSOR_PREFIX: &[u8] = b"cursor:";
const SEQUENCE_PREFIX: &[u8] = b"seq:";

const _: () = assert!(SESSION_PREFIX.len() == 8);
const _: () = assert!(PRESIGN_PREFIX.len() == 8);

pub use migrations::LATEST_SCHEMA_VERSION;

#[derive(Debug, Default, Clone)]
pub struct PresignStats {
    pub available: u64,
    pub leased: u64,
    pub consumed: u64,
    pub total: u64,
}

/// Durable store for session, presign, cursor and sequence records.
///
/// `guard` serializes `transition` and `lease`: RocksDB's safe bindings give
/// no single-key compare-and-swap without the transaction-db build, so the
/// atomic "check current value, then write" the design calls for is done as
/// a read-then-write under this lock instead. That is sufficient because the
/// daemon is single-instance (no HA clustering, per scope) — there is never
/// a second process that could race the lock.
pub struct Store {
    db: DB,
    guard: Mutex<()>,
}

fn data_handle(db: &DB) -> &ColumnFamily {
    db.cf_handle(DATA_COLUMN).expect("data column family exists")
}

fn metadata_handle(db: &DB) -> &ColumnFamily {
    db.cf_handle(METADATA_COLUMN).expect("metadata column family exists")
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Arc<Self>, RelayerError> {
        let db_path = db_path.as_ref();
        let is_existing = db_path.exists();

        let mut prefix_opts = Options::default();
        prefix_opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(8));

        let cfs = vec![
            ColumnFamilyDescriptor::new(METADATA_COLUMN, Options::default()),
            ColumnFamilyDescriptor::new(DATA_COLUMN, prefix_opts),
        ];

        let mut open_opts = Options::default();
        open_opts.create_missing_column_families(true);
        open_opts.create_if_missing(true);

        let db = DB::open_cf_descriptors(&open_opts, db_path, cfs)
            .map_err(|e| RelayerError::Fatal(format!("failed to open store at {db_path:?}: {e}")))?;

        if !is_existing {
            db.put_cf(metadata_handle(&db), DB_SCHEMA_VERSION_KEY, 0u32.to_be_bytes())
                .map_err(RelayerError::from)?;
        }

        migrations::migrate_to_latest(&db, db_path)?;

        info!(path = ?db_path, "store opened");
        Ok(Arc::new(Self { db, guard: Mutex::new(()) }))
    }

    #[cfg(test)]
    pub fn open_temp() -> (Arc<Self>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Self::open(dir.path()).unwrap();
        (store, dir)
    }

    fn put<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), RelayerError> {
        let bytes = bincode::serialize(value)?;
        self.db.put_cf(data_handle(&self.db), key, bytes).map_err(RelayerError::from)
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, RelayerError> {
        match self.db.get_cf(data_handle(&self.db), key).map_err(RelayerError::from)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<(), RelayerError> {
        self.db.delete_cf(data_handle(&self.db), key).map_err(RelayerError::from)
    }

    fn prefix_values<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>, RelayerError> {
        self.db
            .prefix_iterator_cf(data_handle(&self.db), prefix)
            .map(|item| {
                let (_key, value) = item.map_err(RelayerError::from)?;
                bincode::deserialize(&value).map_err(RelayerError::from)
            })
            .collect()
    }

    // ---- Session ops ----

    fn session_key(session_id: &str) -> Vec<u8> {
        [SESSION_PREFIX, session_id.as_bytes()].concat()
    }

    fn payment_index_key(payment_tx_id: &str) -> Vec<u8> {
        [SESSION_BY_PAYMENT_PREFIX, payment_tx_id.as_bytes()].concat()
    }

    fn deposit_index_key(deposit_address: &[u8]) -> Vec<u8> {
        [SESSION_BY_DEPOSIT_PREFIX, hex::encode(deposit_address).as_bytes()].concat()
    }

    pub async fn create_session(&self, session: Session) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;

        if self.get::<Session>(&Self::session_key(&session.session_id))?.is_some() {
            return Err(RelayerError::ValidationFailure(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        if let Some(payment_tx_id) = &session.payment_tx_id {
            if self.get::<String>(&Self::payment_index_key(payment_tx_id))?.is_some() {
                return Err(RelayerError::PaymentUnverified(format!(
                    "paymentTxId {payment_tx_id} already used"
                )));
            }
            self.put(&Self::payment_index_key(payment_tx_id), &session.session_id)?;
        }

        self.put(&Self::session_key(&session.session_id), &session)
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<Session>, RelayerError> {
        self.get(&Self::session_key(session_id))
    }

    /// Tolerates the deposit address being looked up with or without a
    /// leading `0x` hex prefix — both normalize to the same raw bytes.
    pub fn load_session_by_deposit_address(
        &self,
        deposit_address: &str,
    ) -> Result<Option<Session>, RelayerError> {
        let stripped = deposit_address.strip_prefix("0x").unwrap_or(deposit_address);
        let bytes = hex::decode(stripped)
            .map_err(|e| RelayerError::ValidationFailure(format!("bad deposit address: {e}")))?;
        let session_id: Option<String> = self.get(&Self::deposit_index_key(&bytes))?;
        match session_id {
            Some(id) => self.load_session(&id),
            None => Ok(None),
        }
    }

    /// Unconditional patch: replaces the stored session with `session`,
    /// refreshing `updatedAt` and the deposit-address index if needed. Not
    /// used to change `status` — see [`Self::transition`].
    pub async fn update_session(&self, mut session: Session) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        session.updated_at = Utc::now();
        if let Some(deposit_address) = session.deposit_address.clone() {
            self.put(&Self::deposit_index_key(&deposit_address), &session.session_id)?;
        }
        self.put(&Self::session_key(&session.session_id), &session)
    }

    /// The only way to advance `status`. Executes the equivalent of
    /// `UPDATE sessions SET status=next WHERE id=? AND status=expected`
    /// atomically under `guard` and returns whether the guard matched.
    pub async fn transition(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
        apply_extra_fields: impl FnOnce(&mut Session),
    ) -> Result<bool, RelayerError> {
        let _lock = self.guard.lock().await;

        let Some(mut session) = self.get::<Session>(&Self::session_key(session_id))? else {
            return Ok(false);
        };
        if session.status != expected {
            return Ok(false);
        }

        session.status = next;
        session.updated_at = Utc::now();
        apply_extra_fields(&mut session);

        if let Some(deposit_address) = session.deposit_address.clone() {
            self.put(&Self::deposit_index_key(&deposit_address), &session.session_id)?;
        }
        self.put(&Self::session_key(session_id), &session)?;
        Ok(true)
    }

    /// Like [`Self::transition`], but additionally registers `payment_tx_id`
    /// in the payment-replay index atomically with the transition, so two
    /// sessions racing on the same `paymentTxId` cannot both win: the second
    /// one to reach this call observes the index entry and is rejected
    /// before its own guard is even checked.
    pub async fn transition_with_payment(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
        payment_tx_id: &str,
        apply_extra_fields: impl FnOnce(&mut Session),
    ) -> Result<bool, RelayerError> {
        let _lock = self.guard.lock().await;

        if self.get::<String>(&Self::payment_index_key(payment_tx_id))?.is_some() {
            return Err(RelayerError::PaymentUnverified(format!(
                "paymentTxId {payment_tx_id} already used"
            )));
        }

        let Some(mut session) = self.get::<Session>(&Self::session_key(session_id))? else {
            return Ok(false);
        };
        if session.status != expected {
            return Ok(false);
        }

        session.status = next;
        session.payment_tx_id = Some(payment_tx_id.to_string());
        session.updated_at = Utc::now();
        apply_extra_fields(&mut session);

        self.put(&Self::payment_index_key(payment_tx_id), &session.session_id)?;
        if let Some(deposit_address) = session.deposit_address.clone() {
            self.put(&Self::deposit_index_key(&deposit_address), &session.session_id)?;
        }
        self.put(&Self::session_key(session_id), &session)?;
        Ok(true)
    }

    fn source_nft_key(source_chain: crate::chains::SourceChain, nft_contract: &str, token_id: &str) -> Vec<u8> {
        [
            SESSION_BY_SOURCE_NFT_PREFIX,
            format!("{}:{nft_contract}:{token_id}", source_chain.as_str()).as_bytes(),
        ]
        .concat()
    }

    /// Like [`Self::transition`], but first asserts that no *other* session
    /// has already registered this `(sourceChain, nftContract, tokenId)`
    /// triple — per the "once per source NFT regardless of outcome" design
    /// resolution, a source NFT cannot be re-bridged even if the prior
    /// session ended in `error`.
    pub async fn transition_with_source_nft_guard(
        &self,
        session_id: &str,
        expected: SessionStatus,
        next: SessionStatus,
        source_chain: crate::chains::SourceChain,
        nft_contract: &str,
        token_id: &str,
        apply_extra_fields: impl FnOnce(&mut Session),
    ) -> Result<bool, RelayerError> {
        let _lock = self.guard.lock().await;

        let key = Self::source_nft_key(source_chain, nft_contract, token_id);
        if let Some(existing) = self.get::<String>(&key)? {
            if existing != session_id {
                return Err(RelayerError::ValidationFailure(format!(
                    "NFT {nft_contract}/{token_id} on {} was already bridged by session {existing}",
                    source_chain.as_str()
                )));
            }
        }

        let Some(mut session) = self.get::<Session>(&Self::session_key(session_id))? else {
            return Ok(false);
        };
        if session.status != expected {
            return Ok(false);
        }

        session.status = next;
        session.nft_contract = Some(nft_contract.to_string());
        session.token_id = Some(token_id.to_string());
        session.updated_at = Utc::now();
        apply_extra_fields(&mut session);

        self.put(&key, &session.session_id)?;
        self.put(&Self::session_key(session_id), &session)?;
        Ok(true)
    }

    /// Bulk-moves sessions older than `max_age_seconds` and still in a
    /// non-terminal status to `error`.
    pub async fn expire_stale_sessions(&self, max_age_seconds: i64) -> Result<u64, RelayerError> {
        let _lock = self.guard.lock().await;
        let cutoff = Utc::now() - ChronoDuration::seconds(max_age_seconds);

        let sessions: Vec<Session> = self.prefix_values(SESSION_PREFIX)?;
        let mut expired = 0u64;
        for mut session in sessions {
            if session.created_at < cutoff && session.status.is_expirable() {
                session.status = SessionStatus::Error;
                session.error_message = Some("Session expired".to_string());
                session.updated_at = Utc::now();
                self.put(&Self::session_key(&session.session_id), &session)?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    // ---- Presign ops ----

    fn presign_key(object_id: &str) -> Vec<u8> {
        [PRESIGN_PREFIX, object_id.as_bytes()].concat()
    }

    pub async fn add_presign(&self, entry: PresignEntry) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        self.put(&Self::presign_key(&entry.object_id), &entry)
    }

    /// Atomically picks the oldest `available` entry (reclaiming any lease
    /// older than `lease_ttl` first) and marks it `leased`.
    pub async fn lease_presign(
        &self,
        holder_key: &str,
        lease_ttl: ChronoDuration,
    ) -> Result<Option<PresignEntry>, RelayerError> {
        let _lock = self.guard.lock().await;

        let mut entries: Vec<PresignEntry> = self.prefix_values(PRESIGN_PREFIX)?;
        let now = Utc::now();

        for entry in entries.iter_mut() {
            if entry.status == PresignStatus::Leased {
                if let Some(leased_at) = entry.leased_at {
                    if now - leased_at > lease_ttl {
                        entry.status = PresignStatus::Available;
                        entry.leased_at = None;
                        entry.leased_for = None;
                        self.put(&Self::presign_key(&entry.object_id), entry)?;
                    }
                }
            }
        }

        let chosen = entries
            .into_iter()
            .filter(|e| e.status == PresignStatus::Available)
            .min_by_key(|e| e.created_at);

        match chosen {
            Some(mut entry) => {
                entry.status = PresignStatus::Leased;
                entry.leased_at = Some(now);
                entry.leased_for = Some(holder_key.to_string());
                self.put(&Self::presign_key(&entry.object_id), &entry)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Releases a leased entry back to `available` without consuming it —
    /// used on every signing-failure path before returning.
    pub async fn release_presign(&self, object_id: &str) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        let Some(mut entry) = self.get::<PresignEntry>(&Self::presign_key(object_id))? else {
            return Ok(());
        };
        if entry.status == PresignStatus::Leased {
            entry.status = PresignStatus::Available;
            entry.leased_at = None;
            entry.leased_for = None;
            self.put(&Self::presign_key(object_id), &entry)?;
        }
        Ok(())
    }

    pub async fn mark_presign_consumed(&self, object_id: &str) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        let Some(mut entry) = self.get::<PresignEntry>(&Self::presign_key(object_id))? else {
            return Ok(());
        };
        entry.status = PresignStatus::Consumed;
        entry.leased_at = None;
        self.put(&Self::presign_key(object_id), &entry)
    }

    pub fn presign_stats(&self) -> Result<PresignStats, RelayerError> {
        let entries: Vec<PresignEntry> = self.prefix_values(PRESIGN_PREFIX)?;
        let mut stats = PresignStats::default();
        for entry in &entries {
            stats.total += 1;
            match entry.status {
                PresignStatus::Available => stats.available += 1,
                PresignStatus::Leased => stats.leased += 1,
                PresignStatus::Consumed => stats.consumed += 1,
            }
        }
        Ok(stats)
    }

    pub fn count_available_presigns(&self) -> Result<u64, RelayerError> {
        Ok(self.presign_stats()?.available)
    }

    // ---- Cursor ops ----

    fn cursor_key(stream_name: &str) -> Vec<u8> {
        [CURSOR_PREFIX, stream_name.as_bytes()].concat()
    }

    pub fn get_cursor(&self, stream_name: &str) -> Result<Option<EventCursor>, RelayerError> {
        self.get(&Self::cursor_key(stream_name))
    }

    pub async fn put_cursor(&self, stream_name: &str, cursor: EventCursor) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        self.put(&Self::cursor_key(stream_name), &cursor)
    }

    // ---- Sequence ops ----

    fn sequence_key(emitter_key: &str) -> Vec<u8> {
        [SEQUENCE_PREFIX, emitter_key.as_bytes()].concat()
    }

    pub fn get_sequence(&self, emitter_key: &str) -> Result<Option<String>, RelayerError> {
        self.get(&Self::sequence_key(emitter_key))
    }

    pub async fn put_sequence(&self, emitter_key: &str, sequence: &str) -> Result<(), RelayerError> {
        let _lock = self.guard.lock().await;
        self.put(&Self::sequence_key(emitter_key), &sequence.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::SourceChain;

    fn new_session(id: &str, payment: Option<&str>) -> Session {
        let mut session = Session::new(id.to_string(), "receiver".into(), SourceChain::EthereumSepolia);
        session.payment_tx_id = payment.map(|s| s.to_string());
        session
    }

    #[tokio::test]
    async fn create_rejects_duplicate_payment_tx_id() {
        let (store, _dir) = Store::open_temp();
        store.create_session(new_session("s1", Some("tx1"))).await.unwrap();
        let err = store.create_session(new_session("s2", Some("tx1"))).await.unwrap_err();
        assert!(matches!(err, RelayerError::PaymentUnverified(_)));
    }

    #[tokio::test]
    async fn transition_is_single_use() {
        let (store, _dir) = Store::open_temp();
        store.create_session(new_session("s1", None)).await.unwrap();

        let ok = store
            .transition(
                "s1",
                SessionStatus::AwaitingPayment,
                SessionStatus::PaymentConfirmed,
                |_| {},
            )
            .await
            .unwrap();
        assert!(ok);

        let replay = store
            .transition(
                "s1",
                SessionStatus::AwaitingPayment,
                SessionStatus::PaymentConfirmed,
                |_| {},
            )
            .await
            .unwrap();
        assert!(!replay, "replaying the same transition must fail the guard");
    }

    #[tokio::test]
    async fn lease_never_hands_out_the_same_entry_twice() {
        let (store, _dir) = Store::open_temp();
        store.add_presign(PresignEntry::new("obj1".into(), "p1".into(), vec![1])).await.unwrap();

        let a = store.lease_presign("holder-a", ChronoDuration::seconds(120)).await.unwrap();
        let b = store.lease_presign("holder-b", ChronoDuration::seconds(120)).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let (store, _dir) = Store::open_temp();
        store.add_presign(PresignEntry::new("obj1".into(), "p1".into(), vec![1])).await.unwrap();
        store.lease_presign("holder-a", ChronoDuration::seconds(0)).await.unwrap();

        // TTL of zero means the lease is immediately reclaimable.
        let reclaimed = store.lease_presign("holder-b", ChronoDuration::seconds(0)).await.unwrap();
        assert!(reclaimed.is_some());
        assert_eq!(reclaimed.unwrap().leased_for.as_deref(), Some("holder-b"));
    }

    #[tokio::test]
    async fn cursor_only_advances_on_explicit_put() {
        let (store, _dir) = Store::open_temp();
        assert!(store.get_cursor("stream").unwrap().is_none());
        store.put_cursor("stream", EventCursor { tx_id: 1, event_seq: 1 }).await.unwrap();
        assert_eq!(store.get_cursor("stream").unwrap().unwrap(), EventCursor { tx_id: 1, event_seq: 1 });
    }

    #[tokio::test]
    async fn deposit_address_lookup_tolerates_0x_prefix() {
        let (store, _dir) = Store::open_temp();
        let mut session = new_session("s1", None);
        session.deposit_address = Some(vec![0xab, 0xcd]);
        store.create_session(session).await.unwrap();
        store.update_session(store.load_session("s1").unwrap().unwrap()).await.unwrap();

        assert!(store.load_session_by_deposit_address("abcd").unwrap().is_some());
        assert!(store.load_session_by_deposit_address("0xabcd").unwrap().is_some());
    }

    #[tokio::test]
    async fn transition_with_payment_rejects_replayed_payment_tx_id() {
        let (store, _dir) = Store::open_temp();
        store.create_session(new_session("s1", None)).await.unwrap();
        store.create_session(new_session("s2", None)).await.unwrap();

        let ok = store
            .transition_with_payment(
                "s1",
                SessionStatus::AwaitingPayment,
                SessionStatus::PaymentConfirmed,
                "tx1",
                |_| {},
            )
            .await
            .unwrap();
        assert!(ok);

        let err = store
            .transition_with_payment(
                "s2",
                SessionStatus::AwaitingPayment,
                SessionStatus::PaymentConfirmed,
                "tx1",
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::PaymentUnverified(_)));
        assert_eq!(store.load_session("s2").unwrap().unwrap().status, SessionStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn transition_with_source_nft_guard_forbids_rebridging_after_error() {
        let (store, _dir) = Store::open_temp();
        store.create_session(new_session("s1", None)).await.unwrap();
        store.create_session(new_session("s2", None)).await.unwrap();

        store
            .transition_with_source_nft_guard(
                "s1",
                SessionStatus::AwaitingPayment,
                SessionStatus::Error,
                SourceChain::EthereumSepolia,
                "0xContract",
                "7",
                |session| session.error_message = Some("boom".into()),
            )
            .await
            .unwrap();

        let err = store
            .transition_with_source_nft_guard(
                "s2",
                SessionStatus::AwaitingPayment,
                SessionStatus::VerifyingDeposit,
                SourceChain::EthereumSepolia,
                "0xContract",
                "7",
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn expire_stale_sessions_only_touches_old_intermediate_sessions() {
        let (store, _dir) = Store::open_temp();
        let mut old = new_session("old", None);
        old.created_at = Utc::now() - ChronoDuration::seconds(1000);
        store.create_session(old).await.unwrap();
        store.create_session(new_session("fresh", None)).await.unwrap();

        let expired = store.expire_stale_sessions(500).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(store.load_session("old").unwrap().unwrap().status, SessionStatus::Error);
        assert_eq!(store.load_session("fresh").unwrap().unwrap().status, SessionStatus::AwaitingPayment);
    }
}
