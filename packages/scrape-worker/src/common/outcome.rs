//! Result of processing one task, and what it means for the delivery.

use uuid::Uuid;

use crate::error::FailureClass;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Persisted { id: Uuid },
    TransientFailure { reason: String },
    PermanentFailure { reason: String },
}

/// Terminal state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Redeliver,
    Discard,
}

impl Outcome {
    pub fn failure(class: FailureClass, reason: impl Into<String>) -> Self {
        match class {
            FailureClass::Transient => Outcome::TransientFailure {
                reason: reason.into(),
            },
            FailureClass::Permanent => Outcome::PermanentFailure {
                reason: reason.into(),
            },
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::Persisted { .. } => Disposition::Ack,
            Outcome::TransientFailure { .. } => Disposition::Redeliver,
            Outcome::PermanentFailure { .. } => Disposition::Discard,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Persisted { .. } => None,
            Outcome::TransientFailure { reason } | Outcome::PermanentFailure { reason } => {
                Some(reason)
            }
        }
    }
}
