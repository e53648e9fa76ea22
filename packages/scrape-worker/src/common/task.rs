//! Tasks decoded from queue deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Wire shape of a task message on the `urls` subject.
///
/// Extra fields are ignored so producers can attach their own metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub url: String,
}

impl TaskPayload {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// One unit of work: a URL plus the delivery it arrived on.
///
/// The delivery is owned by the task, so a given delivery can only ever be
/// settled by the single task that holds it.
#[derive(Debug)]
pub struct Task<D> {
    pub url: String,
    pub delivery: D,
    pub received_at: DateTime<Utc>,
}

/// Decode a raw delivery payload into the task URL.
///
/// Only the shape is checked here. Whether the URL is fetchable is the fetch
/// client's call, which reports a malformed URL as a permanent failure.
pub fn decode_payload(payload: &[u8]) -> Result<String, DecodeError> {
    let payload: TaskPayload = serde_json::from_slice(payload)?;
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(DecodeError::MissingUrl);
    }
    Ok(url.to_string())
}
