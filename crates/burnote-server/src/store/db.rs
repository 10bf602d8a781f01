use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use redb::{
    backends::InMemoryBackend, Database, ReadableTable, ReadableTableMetadata, TableDefinition,
};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{Field, Result, StoreError};
use super::model::{expiry_instant, Delivery, NoteMeta, NoteRecord};

const NOTES: TableDefinition<u128, &[u8]> = TableDefinition::new("notes");

/// Leading byte of every stored record, ahead of the bincode payload.
const RECORD_FORMAT: u8 = 0x01;

/// Thread-safe handle to the redb store.
///
/// Every mutation runs inside a redb write transaction. redb admits one
/// writer at a time, so a consume's read-decide-write sequence is never
/// interleaved with another consume or a reap of the same note.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Create a store backed by memory only. Contents are lost on drop.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(NOTES)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Store a new note and return its freshly generated id.
    ///
    /// Fails with [`StoreError::InvalidInput`] on the first violated
    /// precondition: empty content, zero views, or an expiry date before today (UTC).
    pub fn create(&self, content: &str, max_views: u32, expire_on: NaiveDate) -> Result<Uuid> {
        let now = Utc::now();
        if content.is_empty() {
            return Err(StoreError::InvalidInput {
                field: Field::Content,
            });
        }
        if max_views == 0 {
            return Err(StoreError::InvalidInput {
                field: Field::MaxViews,
            });
        }
        if expire_on < now.date_naive() {
            return Err(StoreError::InvalidInput {
                field: Field::ExpireAt,
            });
        }

        let record = NoteRecord {
            content: content.to_owned(),
            remaining_views: max_views,
            created_at: now.timestamp(),
            expire_at: expiry_instant(expire_on),
        };
        let id = self.insert(&record)?;

        debug!(id = %id, max_views, %expire_on, "stored note");
        Ok(id)
    }

    /// Persist `record` under a new id, skipping any id already present.
    pub(crate) fn insert(&self, record: &NoteRecord) -> Result<Uuid> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(NOTES)?;
            let mut id = Uuid::new_v4();
            while table.get(id.as_u128())?.is_some() {
                id = Uuid::new_v4();
            }
            table.insert(id.as_u128(), bytes.as_slice())?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    /// Read a note once.
    ///
    /// Expired notes are deleted and reported as [`StoreError::NotFound`].
    /// Otherwise one view is taken: a note with views left is delivered and
    /// written back with one fewer, a note with none left is deleted and
    /// reported as `NotFound`. The counter is never persisted below zero.
    pub fn consume(&self, id: Uuid) -> Result<Delivery> {
        let key = id.as_u128();

        let write_txn = self.db.begin_write()?;
        // Read the clock only once the writer lock is held; a consume that
        // waited past the expiry instant must see the note as expired.
        let now = Self::now();
        let outcome = {
            let mut table = write_txn.open_table(NOTES)?;

            // Copy the bytes out so the guard's borrow of `table` ends before mutation.
            let raw_bytes: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());

            match raw_bytes {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;

                    if record.is_expired(now) {
                        table.remove(key)?;
                        debug!(id = %id, "lazy-evicted expired note");
                        Some(Err(StoreError::NotFound))
                    } else {
                        match record.remaining_views.checked_sub(1) {
                            None => {
                                table.remove(key)?;
                                debug!(id = %id, "burned note with no views left");
                                Some(Err(StoreError::NotFound))
                            }
                            Some(left) => {
                                record.remaining_views = left;
                                let updated = encode(&record)?;
                                table.insert(key, updated.as_slice())?;
                                Some(Ok(Delivery {
                                    content: record.content,
                                    remaining_views: left,
                                }))
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            None => {
                write_txn.abort()?;
                Err(StoreError::NotFound)
            }
            Some(result) => {
                write_txn.commit()?;
                result
            }
        }
    }

    /// Metadata of a live note without taking a view. Never deletes.
    pub fn describe(&self, id: Uuid) -> Result<NoteMeta> {
        let read_txn = self.db.begin_read()?;
        let now = Self::now();
        let table = read_txn.open_table(NOTES)?;

        let raw_bytes: Option<Vec<u8>> =
            table.get(id.as_u128())?.map(|guard| guard.value().to_vec());

        match raw_bytes {
            None => Err(StoreError::NotFound),
            Some(bytes) => {
                let record = decode(&bytes)?;
                if record.is_expired(now) {
                    return Err(StoreError::NotFound);
                }
                Ok(record.meta(id))
            }
        }
    }

    /// Delete every note past its expiry instant. Returns the removed ids.
    /// Rows that fail to decode are logged and left in place.
    ///
    /// The expiry check and the deletion share one write transaction, so a
    /// concurrent consume either ran entirely before (and may already have
    /// deleted the note) or runs entirely after (and finds nothing).
    pub fn reap_expired(&self) -> Result<Vec<Uuid>> {
        let write_txn = self.db.begin_write()?;
        let now = Self::now();
        let expired = {
            let mut table = write_txn.open_table(NOTES)?;
            let mut keys = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                match decode(v.value()) {
                    Ok(record) if record.is_expired(now) => keys.push(k.value()),
                    Ok(_) => {}
                    // One bad row must not keep every other expired note alive.
                    Err(e) => warn!(
                        id = %Uuid::from_u128(k.value()),
                        error = %e,
                        "skipping undecodable note during reap"
                    ),
                }
            }
            for key in &keys {
                table.remove(*key)?;
            }
            keys
        };

        if expired.is_empty() {
            write_txn.abort()?;
            return Ok(vec![]);
        }
        write_txn.commit()?;

        info!(removed = expired.len(), "reaped expired notes");
        Ok(expired.into_iter().map(Uuid::from_u128).collect())
    }

    /// Number of stored notes, including expired ones not yet reaped.
    pub fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NOTES)?;
        Ok(table.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Spawn a background Tokio task that calls `reap_expired()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                match self.reap_expired() {
                    Ok(ids) => {
                        for id in &ids {
                            debug!(id = %id, "swept expired note");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "background sweep error");
                    }
                }
            }
        });
    }
}

/// Encode a record as `[RECORD_FORMAT] + bincode(record)`.
fn encode(record: &NoteRecord) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(RECORD_FORMAT);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<NoteRecord> {
    match bytes.split_first() {
        Some((&RECORD_FORMAT, payload)) => {
            let (record, _) =
                bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
            Ok(record)
        }
        Some((marker, _)) => Err(StoreError::Corrupt(format!(
            "unknown record format {marker:#04x}"
        ))),
        None => Err(StoreError::Corrupt("empty record".into())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Barrier;

    use chrono::Days;
    use tempfile::tempdir;

    use super::*;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn tomorrow() -> NaiveDate {
        today().checked_add_days(Days::new(1)).unwrap()
    }

    fn yesterday() -> NaiveDate {
        today().checked_sub_days(Days::new(1)).unwrap()
    }

    /// Raw record lookup that bypasses expiry and view accounting.
    fn stored(s: &Store, id: Uuid) -> Option<NoteRecord> {
        let read_txn = s.db.begin_read().unwrap();
        let table = read_txn.open_table(NOTES).unwrap();
        let bytes = table.get(id.as_u128()).unwrap()?.value().to_vec();
        Some(decode(&bytes).unwrap())
    }

    fn seed(s: &Store, remaining_views: u32, expire_at: i64) -> Uuid {
        s.insert(&NoteRecord {
            content: "seeded".into(),
            remaining_views,
            created_at: Store::now(),
            expire_at,
        })
        .unwrap()
    }

    #[test]
    fn consume_counts_down_then_burns() {
        let s = Store::in_memory().unwrap();
        let id = s.create("top secret", 5, tomorrow()).unwrap();

        let first = s.consume(id).unwrap();
        assert_eq!(first.content, "top secret");
        assert_eq!(first.remaining_views, 4);
        assert_eq!(stored(&s, id).unwrap().remaining_views, 4);

        for expected in (0..4).rev() {
            assert_eq!(s.consume(id).unwrap().remaining_views, expected);
        }

        assert!(matches!(s.consume(id), Err(StoreError::NotFound)));
        assert!(stored(&s, id).is_none());
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn delivers_exactly_max_views() {
        let s = Store::in_memory().unwrap();
        for max_views in [1u32, 2, 7] {
            let id = s.create("n", max_views, tomorrow()).unwrap();
            let mut delivered = 0;
            while s.consume(id).is_ok() {
                delivered += 1;
            }
            assert_eq!(delivered, max_views);
        }
    }

    #[test]
    fn zero_views_is_already_exhausted() {
        let s = Store::in_memory().unwrap();
        let id = seed(&s, 0, expiry_instant(tomorrow()));
        assert!(matches!(s.consume(id), Err(StoreError::NotFound)));
        assert!(stored(&s, id).is_none());
    }

    #[test]
    fn expired_note_is_removed_on_consume() {
        let s = Store::in_memory().unwrap();
        let id = seed(&s, 5, expiry_instant(yesterday()));
        assert!(matches!(s.consume(id), Err(StoreError::NotFound)));
        assert!(stored(&s, id).is_none());
    }

    #[test]
    fn expiring_today_is_accepted_but_not_readable() {
        let s = Store::in_memory().unwrap();
        let id = s.create("today", 3, today()).unwrap();
        assert!(matches!(s.consume(id), Err(StoreError::NotFound)));
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn create_rejects_each_precondition() {
        let s = Store::in_memory().unwrap();
        let field = |r: Result<Uuid>| match r {
            Err(StoreError::InvalidInput { field }) => field,
            other => panic!("expected invalid input, got {other:?}"),
        };
        assert_eq!(field(s.create("", 1, tomorrow())), Field::Content);
        assert_eq!(field(s.create("x", 0, tomorrow())), Field::MaxViews);
        assert_eq!(field(s.create("x", 1, yesterday())), Field::ExpireAt);
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn ids_are_unique() {
        let s = Store::in_memory().unwrap();
        let ids: HashSet<Uuid> = (0..50)
            .map(|_| s.create("x", 1, tomorrow()).unwrap())
            .collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn missing_id_is_not_found_without_side_effects() {
        let s = Store::in_memory().unwrap();
        let kept = s.create("kept", 2, tomorrow()).unwrap();
        let ghost = Uuid::new_v4();
        for _ in 0..3 {
            assert!(matches!(s.consume(ghost), Err(StoreError::NotFound)));
        }
        assert_eq!(s.len().unwrap(), 1);
        assert_eq!(stored(&s, kept).unwrap().remaining_views, 2);
    }

    #[test]
    fn describe_does_not_take_a_view() {
        let s = Store::in_memory().unwrap();
        let id = s.create("peek", 2, tomorrow()).unwrap();
        let meta = s.describe(id).unwrap();
        assert_eq!(meta.id, id);
        assert_eq!(meta.remaining_views, 2);
        assert_eq!(meta.expire_at, expiry_instant(tomorrow()));
        assert_eq!(s.describe(id).unwrap().remaining_views, 2);
        assert_eq!(s.consume(id).unwrap().remaining_views, 1);
    }

    #[test]
    fn describe_hides_expired_without_deleting() {
        let s = Store::in_memory().unwrap();
        let id = seed(&s, 1, expiry_instant(yesterday()));
        assert!(matches!(s.describe(id), Err(StoreError::NotFound)));
        assert!(stored(&s, id).is_some());
    }

    #[test]
    fn reap_removes_only_expired() {
        let s = Store::in_memory().unwrap();
        let live = s.create("live", 9, tomorrow()).unwrap();
        let dead_a = seed(&s, 9, expiry_instant(yesterday()));
        let dead_b = seed(&s, 0, Store::now() - 1);

        let reaped: HashSet<Uuid> = s.reap_expired().unwrap().into_iter().collect();
        assert_eq!(reaped, HashSet::from([dead_a, dead_b]));
        assert_eq!(s.len().unwrap(), 1);
        assert!(stored(&s, live).is_some());

        assert!(s.reap_expired().unwrap().is_empty());
    }

    #[test]
    fn reap_after_consume_deleted_removes_nothing() {
        let s = Store::in_memory().unwrap();
        let id = seed(&s, 3, expiry_instant(yesterday()));
        assert!(matches!(s.consume(id), Err(StoreError::NotFound)));
        assert!(s.reap_expired().unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let id = {
            let s = Store::open(&path).unwrap();
            let id = s.create("durable", 3, tomorrow()).unwrap();
            s.consume(id).unwrap();
            id
        };

        let s = Store::open(&path).unwrap();
        assert_eq!(s.describe(id).unwrap().remaining_views, 2);
        assert_eq!(s.consume(id).unwrap().content, "durable");
    }

    /// Write raw bytes under a fresh id, bypassing the record encoder.
    fn seed_raw(s: &Store, bytes: &[u8]) -> Uuid {
        let id = Uuid::new_v4();
        let write_txn = s.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(NOTES).unwrap();
            table.insert(id.as_u128(), bytes).unwrap();
        }
        write_txn.commit().unwrap();
        id
    }

    fn wait_until(instant: i64) {
        while Store::now() < instant {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn corrupt_record_is_an_internal_error() {
        let s = Store::in_memory().unwrap();
        let id = seed_raw(&s, &[0x7f, 1, 2]);

        let err = s.consume(id).unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn reap_skips_corrupt_rows() {
        let s = Store::in_memory().unwrap();
        let expired = seed(&s, 4, expiry_instant(yesterday()));
        let corrupt = seed_raw(&s, &[0x7f, 1]);
        let live = s.create("live", 1, tomorrow()).unwrap();

        assert_eq!(s.reap_expired().unwrap(), vec![expired]);
        assert_eq!(s.len().unwrap(), 2);
        assert!(stored(&s, live).is_some());
        assert!(matches!(s.consume(corrupt), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn consume_blocked_past_expiry_sees_note_expired() {
        let s = Store::in_memory().unwrap();
        let expire_at = Store::now() + 1;
        let id = seed(&s, 5, expire_at);
        let s = &s;

        let blocker = s.db.begin_write().unwrap();
        let result = std::thread::scope(|scope| {
            let reader = scope.spawn(move || s.consume(id));
            wait_until(expire_at);
            blocker.abort().unwrap();
            reader.join().unwrap()
        });

        assert!(matches!(result, Err(StoreError::NotFound)));
        assert!(stored(s, id).is_none());
    }

    #[test]
    fn reap_blocked_past_expiry_removes_note() {
        let s = Store::in_memory().unwrap();
        let expire_at = Store::now() + 1;
        let id = seed(&s, 5, expire_at);
        let s = &s;

        let blocker = s.db.begin_write().unwrap();
        let reaped = std::thread::scope(|scope| {
            let reaper = scope.spawn(move || s.reap_expired());
            wait_until(expire_at);
            blocker.abort().unwrap();
            reaper.join().unwrap()
        });

        assert_eq!(reaped.unwrap(), vec![id]);
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn concurrent_consumers_never_over_deliver() {
        const READERS: usize = 64;
        const VIEWS: u32 = 10;

        let s = Store::in_memory().unwrap();
        let id = s.create("contended", VIEWS, tomorrow()).unwrap();
        let barrier = Barrier::new(READERS);
        let (s, barrier) = (&s, &barrier);

        let results: Vec<Result<Delivery>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..READERS)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        s.consume(id)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let slots: Vec<u32> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|d| d.remaining_views))
            .collect();
        let gone = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::NotFound)))
            .count();

        assert_eq!(slots.len(), VIEWS as usize);
        assert_eq!(gone, READERS - VIEWS as usize);
        let distinct: HashSet<u32> = slots.into_iter().collect();
        assert_eq!(distinct, (0..VIEWS).collect());
        assert!(stored(&s, id).is_none());
    }

    #[test]
    fn concurrent_consume_and_reap_agree_on_one_deletion() {
        let s = Store::in_memory().unwrap();
        let id = seed(&s, 5, expiry_instant(yesterday()));
        let barrier = Barrier::new(9);
        let (s, barrier) = (&s, &barrier);

        let (reaped, consumed) = std::thread::scope(|scope| {
            let reaper = scope.spawn(move || {
                barrier.wait();
                s.reap_expired().unwrap()
            });
            let readers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        s.consume(id)
                    })
                })
                .collect();
            let consumed: Vec<_> = readers.into_iter().map(|h| h.join().unwrap()).collect();
            (reaper.join().unwrap(), consumed)
        });

        assert!(consumed
            .iter()
            .all(|r| matches!(r, Err(StoreError::NotFound))));
        assert!(reaped.len() <= 1);
        assert!(s.is_empty().unwrap());
    }
}
