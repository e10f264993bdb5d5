use sqlx::error::ErrorKind;
use thiserror::Error;

/// Failures of repository calls.
///
/// Constraint violations keep the constraint name so callers can tell a duplicate order id from a
/// duplicate ledger source.
#[derive(Error, Debug)]
pub enum DbError {
    /// No row matched
    #[error("row not found")]
    NotFound,

    #[error("unique violation ({constraint:?}): {message}")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("foreign key violation ({constraint:?}): {message}")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error("check violation ({constraint:?}): {message}")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// True when this is a unique violation of the named constraint.
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation { constraint: Some(c), .. } if c == name)
    }
}

/// Classify by the driver's error kind; the constraint name is what callers match on.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let kind = db_err.kind();
                let constraint = db_err.constraint().map(str::to_string);
                let table = db_err.table().map(str::to_string);
                let message = db_err.message().to_string();
                match kind {
                    ErrorKind::UniqueViolation => DbError::UniqueViolation { constraint, table, message },
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { constraint, table, message },
                    ErrorKind::CheckViolation => DbError::CheckViolation { constraint, table, message },
                    _ => DbError::Other(anyhow::Error::from(err)),
                }
            }
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::NotFound));
    }

    #[test]
    fn test_is_unique_violation_of() {
        let err = DbError::UniqueViolation {
            constraint: Some("users_email_unique".to_string()),
            table: Some("users".to_string()),
            message: "duplicate key".to_string(),
        };
        assert!(err.is_unique_violation_of("users_email_unique"));
        assert!(!err.is_unique_violation_of("payments_order_id_unique"));
        assert!(!DbError::NotFound.is_unique_violation_of("users_email_unique"));
    }
}
