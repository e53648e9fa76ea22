//! Typed errors for the ingestion pipeline.
//!
//! Every per-task error knows its [`FailureClass`], which is all the
//! dispatcher needs to decide between redelivery and discard.

use thiserror::Error;

/// Whether retrying a failed task can plausibly succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network hiccup, timeout, serialization conflict: redeliver.
    Transient,
    /// Bad input or content that will never parse: discard.
    Permanent,
}

/// Errors raised while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("unsupported URL scheme {scheme:?}: {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    #[error("connection failed for {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("too many redirects: {url}")]
    Redirect { url: String },

    #[error("response larger than {limit} bytes: {url}")]
    TooLarge { url: String, limit: usize },

    #[error("request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } | FetchError::Request { .. } => {
                FailureClass::Transient
            }
            FetchError::Status { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Transient
            }
            FetchError::InvalidUrl { .. }
            | FetchError::UnsupportedScheme { .. }
            | FetchError::Status { .. }
            | FetchError::Redirect { .. }
            | FetchError::TooLarge { .. } => FailureClass::Permanent,
        }
    }
}

/// Errors raised while turning markup into article fields.
///
/// Always permanent: the same bytes will not parse any better next time.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is empty")]
    Empty,

    #[error("document looks like binary data")]
    Binary,

    #[error("no article title or body text found")]
    NotAnArticle,

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

impl ExtractionError {
    pub fn class(&self) -> FailureClass {
        FailureClass::Permanent
    }
}

/// Errors raised by the persistence gateway.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Connection loss, pool exhaustion, serialization failure or deadlock.
    #[error("transient storage error: {0}")]
    Transient(#[source] sqlx::Error),

    /// A check/data constraint unrelated to the url idempotency key.
    #[error("constraint violation: {0}")]
    Constraint(#[source] sqlx::Error),

    #[error("storage error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PersistError {
    pub fn class(&self) -> FailureClass {
        match self {
            PersistError::Transient(_) => FailureClass::Transient,
            PersistError::Constraint(_) | PersistError::Other(_) => FailureClass::Permanent,
        }
    }
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };

        match (&err, code.as_deref()) {
            (sqlx::Error::Database(_), Some(code)) if is_transient_sqlstate(code) => {
                PersistError::Transient(err)
            }
            (sqlx::Error::Database(_), Some(code))
                if code.starts_with("23") || code.starts_with("22") =>
            {
                PersistError::Constraint(err)
            }
            (
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed,
                _,
            ) => PersistError::Transient(err),
            _ => PersistError::Other(Box::new(err)),
        }
    }
}

/// SQLSTATE codes worth retrying: connection exceptions (08), transaction
/// rollback such as serialization failure or deadlock (40), insufficient
/// resources such as too_many_connections (53), statement timeout (57014),
/// operator intervention (57P0x) and lock_not_available (55P03).
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "57014" | "57P01" | "57P02" | "57P03" | "55P03")
        || code.starts_with("08")
        || code.starts_with("40")
        || code.starts_with("53")
}

/// A delivery payload that can never become a valid task.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has an empty url")]
    MissingUrl,
}

/// Failure to ack/nack a delivery with the broker.
#[derive(Debug, Error)]
#[error("failed to {action} delivery: {source}")]
pub struct DeliveryError {
    pub action: &'static str,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// Failures while bringing the worker up. All of them are fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to connect to database: {0}")]
    Database(#[source] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migrations(#[from] sqlx::migrate::MigrateError),

    #[error("broker setup failed while {stage}: {source}")]
    Broker {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),
}

impl StartupError {
    pub(crate) fn broker(
        stage: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StartupError::Broker {
            stage,
            source: source.into(),
        }
    }
}
