//! # Replay Ledger
//!
//! Persistent anti-replay state for issued tokens.
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | At most one ACTIVE token per client | `issue()` supersedes the previous pointer target in the same batch |
//! | At most one redemption per token string | `consume_with()` read-modify-write under `write_lock` |
//! | Supersession visible to concurrent scans | same `write_lock` for `issue()` and `consume_with()` |
//!
//! ## Key Layout
//!
//! ```text
//! ledger/token/<contentHash>  -> bincode(ReplayRecord)
//! ledger/client/<clientId>    -> contentHash of the client's current token
//! ```
//!
//! Every mutation goes through `write_lock`, the ledger's single
//! serialization point. Reads do not take it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    content_hash, ConsumeResult, ContentHash, LedgerError, QrToken, ReplayRecord, Timestamp,
    TokenState,
};
use crate::ports::outbound::{BatchOperation, KeyValueStore, TimeSource};

const TOKEN_PREFIX: &str = "ledger/token/";
const CLIENT_PREFIX: &str = "ledger/client/";

fn token_key(hash: &str) -> Vec<u8> {
    format!("{}{}", TOKEN_PREFIX, hash).into_bytes()
}

fn client_key(client_id: &str) -> Vec<u8> {
    format!("{}{}", CLIENT_PREFIX, client_id).into_bytes()
}

/// Operations committed together with a successful consumption.
pub type StagedWrite<T> = (T, Vec<BatchOperation>);

/// Replay ledger over a shared key-value store.
pub struct ReplayLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn TimeSource>,
    write_lock: Mutex<()>,
}

impl ReplayLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Issue a fresh token for `client_id`.
    ///
    /// The previous ACTIVE token of the client (if any) becomes SUPERSEDED in
    /// the same atomic batch that inserts the new record.
    pub fn issue(&self, client_id: &str, branch_id: &str) -> Result<QrToken, LedgerError> {
        let nonce = Uuid::new_v4().simple().to_string();
        let _guard = self.write_lock.lock();

        let now = self.clock.now_millis();
        let token = QrToken::new(
            client_id.to_string(),
            branch_id.to_string(),
            now / 1_000,
            nonce,
        )?;
        let hash = token.content_hash();

        let mut ops = Vec::with_capacity(3);
        if let Some(previous_hash) = self.current_hash(client_id)? {
            if let Some(mut previous) = self.load(&previous_hash)? {
                if previous.is_active() {
                    previous.state = TokenState::Superseded;
                    previous.updated_at = now;
                    ops.push(BatchOperation::put(token_key(&previous_hash), encode(&previous)?));
                    debug!(client_id, superseded = %previous_hash, "Superseding active token");
                }
            }
        }

        let record = ReplayRecord {
            content_hash: hash.clone(),
            state: TokenState::Active,
            owner_client_id: client_id.to_string(),
            branch_id: branch_id.to_string(),
            issued_at: token.issued_at,
            updated_at: now,
        };
        ops.push(BatchOperation::put(token_key(&hash), encode(&record)?));
        ops.push(BatchOperation::put(client_key(client_id), hash.as_bytes()));

        self.store.atomic_batch_write(ops)?;
        info!(client_id, branch_id, token = %hash, "Issued visit token");
        Ok(token)
    }

    /// Redeem `raw` if it is the ACTIVE token of its owner.
    pub fn try_consume(&self, raw: &str) -> Result<ConsumeResult, LedgerError> {
        self.consume_with(raw, |_| Ok(((), Vec::new())))
            .map(|(result, _)| result)
    }

    /// Redeem `raw` and commit `stage`'s operations in the same atomic batch.
    ///
    /// `stage` runs only when the record is ACTIVE, under the ledger lock.
    /// If it fails, or the batch write fails, nothing is applied.
    pub fn consume_with<T, F>(
        &self,
        raw: &str,
        stage: F,
    ) -> Result<(ConsumeResult, Option<T>), LedgerError>
    where
        F: FnOnce(&ReplayRecord) -> Result<StagedWrite<T>, LedgerError>,
    {
        let hash = content_hash(raw.trim());
        let _guard = self.write_lock.lock();

        let mut record = match self.load(&hash)? {
            Some(record) => record,
            None => return Ok((ConsumeResult::NotFound, None)),
        };
        match record.state {
            TokenState::Consumed => return Ok((ConsumeResult::AlreadyConsumed, None)),
            TokenState::Superseded => return Ok((ConsumeResult::Superseded, None)),
            TokenState::Active => {}
        }

        let (staged, mut extra_ops) = stage(&record)?;

        record.state = TokenState::Consumed;
        record.updated_at = self.clock.now_millis();

        let mut ops = Vec::with_capacity(2 + extra_ops.len());
        ops.push(BatchOperation::put(token_key(&hash), encode(&record)?));
        if self.current_hash(&record.owner_client_id)?.as_deref() == Some(hash.as_str()) {
            ops.push(BatchOperation::delete(client_key(&record.owner_client_id)));
        }
        ops.append(&mut extra_ops);

        self.store.atomic_batch_write(ops)?;
        debug!(client_id = %record.owner_client_id, token = %hash, "Consumed visit token");
        Ok((ConsumeResult::Consumed, Some(staged)))
    }

    /// Look up a record by content hash.
    pub fn record(&self, hash: &str) -> Result<Option<ReplayRecord>, LedgerError> {
        self.load(hash)
    }

    /// The client's ACTIVE token record, if any.
    pub fn active_record(&self, client_id: &str) -> Result<Option<ReplayRecord>, LedgerError> {
        match self.current_hash(client_id)? {
            Some(hash) => Ok(self.load(&hash)?.filter(ReplayRecord::is_active)),
            None => Ok(None),
        }
    }

    /// Delete records whose last change is older than `cutoff` (ms).
    ///
    /// The retention window must exceed the validity window: a purged token
    /// scanned again reads as unknown, which is only sound once it has
    /// expired anyway.
    pub fn purge_older_than(&self, cutoff: Timestamp) -> Result<usize, LedgerError> {
        let _guard = self.write_lock.lock();

        let mut ops = Vec::new();
        let mut purged = Vec::new();
        for (key, value) in self.store.prefix_scan(TOKEN_PREFIX.as_bytes())? {
            let record = match decode(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %e, "Skipping undecodable ledger record");
                    continue;
                }
            };
            if record.updated_at < cutoff {
                ops.push(BatchOperation::delete(key));
                purged.push(record);
            }
        }

        for record in &purged {
            if self.current_hash(&record.owner_client_id)?.as_deref()
                == Some(record.content_hash.as_str())
            {
                ops.push(BatchOperation::delete(client_key(&record.owner_client_id)));
            }
        }

        if ops.is_empty() {
            return Ok(0);
        }
        self.store.atomic_batch_write(ops)?;
        info!(purged = purged.len(), cutoff, "Purged replay records");
        Ok(purged.len())
    }

    fn current_hash(&self, client_id: &str) -> Result<Option<ContentHash>, LedgerError> {
        Ok(self
            .store
            .get(&client_key(client_id))?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn load(&self, hash: &str) -> Result<Option<ReplayRecord>, LedgerError> {
        self.store
            .get(&token_key(hash))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

fn encode(record: &ReplayRecord) -> Result<Vec<u8>, LedgerError> {
    bincode::serialize(record).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<ReplayRecord, LedgerError> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}
