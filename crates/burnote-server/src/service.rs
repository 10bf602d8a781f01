//! Request-facing layer over [`Store`]: normalizes raw input, calls the
//! store, and maps its results to outcomes a front end can render.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{Field, NoteMeta, Store, StoreError};

pub const MSG_CONTENT_REQUIRED: &str = "Content is required.";
pub const MSG_MAX_VIEWS_REQUIRED: &str = "Max visits is required.";
pub const MSG_MAX_VIEWS_INVALID: &str = "Max visits must be a positive whole number.";
pub const MSG_EXPIRE_REQUIRED: &str = "Expire date is required.";
pub const MSG_EXPIRE_FORMAT: &str = "Expire date must use the YYYY-MM-DD format.";
pub const MSG_EXPIRE_PAST: &str = "Expire date cannot be in the past.";
pub const MSG_GONE: &str = "The note has expired or no longer exists. Please create a new one.";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// View budget as sent by a client: a JSON number or a form-style string.
/// Anything else lands in `Other` so it is reported as a validation message
/// rather than failing deserialization of the whole request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ViewsInput {
    Count(i64),
    Text(String),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    pub content: Option<String>,
    pub max_views: Option<ViewsInput>,
    pub expire_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { id: Uuid },
    /// Every applicable validation message, in field order.
    Rejected { reasons: Vec<&'static str> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Delivered {
        id: Uuid,
        content: String,
        remaining_views: u32,
    },
    Gone { message: &'static str },
}

/// Internal failure the caller cannot correct.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("internal storage error: {0}")]
    Internal(#[from] StoreError),
}

#[derive(Clone)]
pub struct NoteService {
    store: Store,
}

impl NoteService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create(&self, req: CreateRequest) -> Result<CreateOutcome, ServiceError> {
        let today = Utc::now().date_naive();
        let mut reasons = Vec::new();

        let content = req.content.filter(|c| !c.trim().is_empty());
        if content.is_none() {
            reasons.push(MSG_CONTENT_REQUIRED);
        }

        let max_views = match parse_views(req.max_views) {
            Ok(views) => Some(views),
            Err(msg) => {
                reasons.push(msg);
                None
            }
        };

        let expire_on = match parse_expire(req.expire_at.as_deref(), today) {
            Ok(date) => Some(date),
            Err(msg) => {
                reasons.push(msg);
                None
            }
        };

        let (Some(content), Some(max_views), Some(expire_on)) = (content, max_views, expire_on)
        else {
            return Ok(CreateOutcome::Rejected { reasons });
        };

        match self.store.create(&content, max_views, expire_on) {
            Ok(id) => Ok(CreateOutcome::Created { id }),
            // The UTC date can roll over between our check and the store's.
            Err(StoreError::InvalidInput { field }) => Ok(CreateOutcome::Rejected {
                reasons: vec![field_message(field)],
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read(&self, req: ReadRequest) -> Result<ReadOutcome, ServiceError> {
        let Ok(id) = Uuid::parse_str(req.id.trim()) else {
            return Ok(ReadOutcome::Gone { message: MSG_GONE });
        };

        match self.store.consume(id) {
            Ok(delivery) => Ok(ReadOutcome::Delivered {
                id,
                content: delivery.content,
                remaining_views: delivery.remaining_views,
            }),
            Err(StoreError::NotFound) => Ok(ReadOutcome::Gone { message: MSG_GONE }),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of a live note without consuming a view. `None` if gone.
    pub fn describe(&self, id: &str) -> Result<Option<NoteMeta>, ServiceError> {
        let Ok(id) = Uuid::parse_str(id.trim()) else {
            return Ok(None);
        };
        match self.store.describe(id) {
            Ok(meta) => Ok(Some(meta)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn reap_expired(&self) -> Result<usize, ServiceError> {
        Ok(self.store.reap_expired()?.len())
    }
}

fn parse_views(input: Option<ViewsInput>) -> Result<u32, &'static str> {
    match input {
        None => Err(MSG_MAX_VIEWS_REQUIRED),
        Some(ViewsInput::Count(n)) => u32::try_from(n)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(MSG_MAX_VIEWS_INVALID),
        Some(ViewsInput::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(MSG_MAX_VIEWS_REQUIRED);
            }
            s.parse::<u32>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or(MSG_MAX_VIEWS_INVALID)
        }
        Some(ViewsInput::Other(_)) => Err(MSG_MAX_VIEWS_INVALID),
    }
}

fn parse_expire(input: Option<&str>, today: NaiveDate) -> Result<NaiveDate, &'static str> {
    let raw = input.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(MSG_EXPIRE_REQUIRED);
    }
    let date = NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| MSG_EXPIRE_FORMAT)?;
    if date < today {
        return Err(MSG_EXPIRE_PAST);
    }
    Ok(date)
}

fn field_message(field: Field) -> &'static str {
    match field {
        Field::Content => MSG_CONTENT_REQUIRED,
        Field::MaxViews => MSG_MAX_VIEWS_INVALID,
        Field::ExpireAt => MSG_EXPIRE_PAST,
    }
}
