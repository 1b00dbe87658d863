//! Domain errors raised by the ticket core.
//!
//! These travel inside `anyhow::Error`; callers that need to branch on the
//! kind recover them with `err.downcast_ref::<TicketError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("Ticket #{id} cannot be merged with itself")]
    SelfMerge { id: i64 },

    #[error("Ticket #{id} is already merged, no merge into a merged ticket possible")]
    AlreadyMerged { id: i64 },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl TicketError {
    pub fn validation(message: impl Into<String>) -> Self {
        TicketError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        TicketError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Returns the domain error carried by `err`, if any.
pub fn kind(err: &anyhow::Error) -> Option<&TicketError> {
    err.downcast_ref::<TicketError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            TicketError::SelfMerge { id: 4 }.to_string(),
            "Ticket #4 cannot be merged with itself"
        );
        assert!(TicketError::AlreadyMerged { id: 9 }
            .to_string()
            .contains("already merged"));
        assert_eq!(
            TicketError::not_found("Ticket", 12).to_string(),
            "Ticket #12 not found"
        );
    }

    #[test]
    fn test_kind_survives_context() {
        let err = anyhow::Error::new(TicketError::validation("state is required"))
            .context("Failed to save ticket");
        assert_eq!(
            kind(&err),
            Some(&TicketError::validation("state is required"))
        );
    }
}
