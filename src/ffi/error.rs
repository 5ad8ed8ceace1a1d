use std::fmt;
use serde::{Deserialize, Serialize};
use crate::errors::{DomainError, DbError, ServiceError, SyncError, ValidationError};

/// Error codes for FFI boundary
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Success (no error)
    Success = 0,

    // General errors (1-99)
    InvalidArgument = 2,
    NullPointer = 3,
    InvalidUtf8 = 4,
    InvalidUuid = 5,
    InternalError = 6,
    NotInitialized = 7,

    // Database errors (100-199)
    DatabaseGeneral = 100,
    DatabaseConnection = 104,
    DatabaseMigration = 106,
    DatabaseSerialization = 107,

    // Domain errors (200-299)
    EntityNotFound = 201,
    ValidationFailed = 204,
    FileError = 207,

    // Service errors (300-399)
    NetworkError = 308,
    ServiceUnavailable = 309,
    ExternalServiceError = 311,

    // Sync errors (400-499)
    SyncMissingHandler = 406,
    SyncRetriesExhausted = 407,
    SyncInterrupted = 410,
    SyncTimeout = 411,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

/// Error type for FFI boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FFIError {
    /// Error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (JSON string)
    pub details: Option<String>,
}

impl fmt::Display for FFIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(details) = &self.details {
            write!(f, "{}: {} ({})", self.code, self.message, details)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for FFIError {}

impl FFIError {
    pub fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: &str, details: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn invalid_argument(message: &str) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn internal(message: String) -> Self {
        Self::new(ErrorCode::InternalError, &message)
    }

    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::NotInitialized, "Offline sync core is not initialized")
    }
}

impl From<DbError> for FFIError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(sqlx_err) => {
                Self::new(ErrorCode::DatabaseGeneral, &sqlx_err.to_string())
            },
            DbError::ConnectionPool(msg) => Self::new(ErrorCode::DatabaseConnection, &msg),
            DbError::Migration(msg) => Self::new(ErrorCode::DatabaseMigration, &msg),
            DbError::Serialization(msg) => Self::new(ErrorCode::DatabaseSerialization, &msg),
            DbError::Other(msg) => Self::new(ErrorCode::DatabaseGeneral, &msg),
        }
    }
}

impl From<DomainError> for FFIError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Database(db_err) => db_err.into(),
            DomainError::EntityNotFound(entity, id) => {
                Self::with_details(
                    ErrorCode::EntityNotFound,
                    &format!("Entity not found: {} with ID {}", entity, id),
                    &serde_json::json!({ "entity": entity, "id": id.to_string() }).to_string()
                )
            },
            DomainError::Validation(val_err) => val_err.into(),
            DomainError::Sync(sync_err) => sync_err.into(),
            DomainError::File(msg) => Self::new(ErrorCode::FileError, &msg),
            DomainError::Internal(msg) => Self::new(ErrorCode::InternalError, &msg),
        }
    }
}

impl From<ServiceError> for FFIError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(domain_err) => domain_err.into(),
            ServiceError::Network(msg) => Self::new(ErrorCode::NetworkError, &msg),
            ServiceError::ServiceUnavailable(msg) => Self::new(ErrorCode::ServiceUnavailable, &msg),
            ServiceError::ExternalService(msg) => Self::new(ErrorCode::ExternalServiceError, &msg),
        }
    }
}

impl From<SyncError> for FFIError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::MissingHandler { entity, mutation_type } => {
                Self::with_details(
                    ErrorCode::SyncMissingHandler,
                    &format!("No replay handler registered for {}/{}", entity, mutation_type),
                    &serde_json::json!({ "entity": entity, "mutation_type": mutation_type }).to_string()
                )
            },
            SyncError::RetriesExhausted { attempts, last_error } => {
                Self::with_details(
                    ErrorCode::SyncRetriesExhausted,
                    &format!("Retries exhausted after {} attempts", attempts),
                    &serde_json::json!({ "attempts": attempts, "last_error": last_error }).to_string()
                )
            },
            SyncError::Interrupted => Self::new(ErrorCode::SyncInterrupted, "Sync interrupted"),
            SyncError::Timeout => Self::new(ErrorCode::SyncTimeout, "Sync timeout"),
        }
    }
}

impl From<ValidationError> for FFIError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        let details = match &err {
            ValidationError::Required { field } => {
                serde_json::json!({ "field": field, "type": "required" })
            },
            ValidationError::Max { field, max } => {
                serde_json::json!({ "field": field, "type": "max", "max": max })
            },
            ValidationError::Custom(msg) => {
                serde_json::json!({ "type": "custom", "message": msg })
            },
        };
        Self::with_details(ErrorCode::ValidationFailed, &message, &details.to_string())
    }
}

// Result type alias for FFI functions
pub type FFIResult<T> = Result<T, FFIError>;
