use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored in redb as bincode-encoded bytes, keyed by the note id as `u128`.
/// The id itself is the table key and is not repeated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub content: String,
    /// Views left before this read. A value of 0 means the next consume burns the note.
    pub remaining_views: u32,
    /// Unix timestamp (seconds) when the note was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) from which the note is expired.
    pub expire_at: i64,
}

impl NoteRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expire_at
    }

    pub fn meta(&self, id: Uuid) -> NoteMeta {
        NoteMeta {
            id,
            remaining_views: self.remaining_views,
            created_at: self.created_at,
            expire_at: self.expire_at,
        }
    }
}

/// Metadata snapshot of a live note. Never includes the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMeta {
    pub id: Uuid,
    pub remaining_views: u32,
    pub created_at: i64,
    pub expire_at: i64,
}

/// A successful consume: the content plus the views left after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub content: String,
    pub remaining_views: u32,
}

/// Expiry dates take effect at the start of the day, UTC.
pub fn expiry_instant(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_instant_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(expiry_instant(date), 1_709_251_200);
    }

    #[test]
    fn expired_from_the_instant_itself() {
        let record = NoteRecord {
            content: "x".into(),
            remaining_views: 1,
            created_at: 0,
            expire_at: 100,
        };
        assert!(!record.is_expired(99));
        assert!(record.is_expired(100));
        assert!(record.is_expired(101));
    }
}
