//! Defines all issuing engine errors.

use std::{error, fmt};

use crate::api::ca::{CaId, CaName, PublisherHandle};
use crate::server::publishers::RepositoryServiceError;


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // State issues: programming errors in the caller
    //-----------------------------------------------------------------
    IllegalState(String),

    //-----------------------------------------------------------------
    // Unknown entities
    //-----------------------------------------------------------------
    CaUnknown(CaId),
    CaNameUnknown(CaName),
    KeyUnknown(String),
    PublisherRepositoryUnknown(CaName, PublisherHandle),

    //-----------------------------------------------------------------
    // Client issues
    //-----------------------------------------------------------------
    CaDuplicate(CaName),
    CaNotManaged(CaName),
    CaNotNonHosted(CaName),
    CaNotAllResources(CaName),
    InvalidPublisherRequest(String),
    PublisherDuplicate(CaName, PublisherHandle),

    //-----------------------------------------------------------------
    // Limits
    //-----------------------------------------------------------------
    ResourceLimitExceeded { ca: CaName, limit: usize },

    //-----------------------------------------------------------------
    // External collaborators
    //-----------------------------------------------------------------
    RepositoryService(RepositoryServiceError),
    Signer(String),
    ResourceLookup(String),
    ResourceCacheEmpty,
    Unavailable(String),

    //-----------------------------------------------------------------
    // Anything else
    //-----------------------------------------------------------------
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IllegalState(s) => write!(f, "Illegal state: {}", s),

            Error::CaUnknown(id) => write!(f, "Unknown CA id '{}'", id),
            Error::CaNameUnknown(name) => {
                write!(f, "Unknown CA '{}'", name)
            }
            Error::KeyUnknown(ski) => write!(f, "Unknown key '{}'", ski),
            Error::PublisherRepositoryUnknown(ca, handle) => write!(
                f,
                "CA '{}' has no publisher repository '{}'",
                ca, handle
            ),

            Error::CaDuplicate(name) => {
                write!(f, "CA '{}' already exists", name)
            }
            Error::CaNotManaged(name) => {
                write!(f, "CA '{}' is not managed by this system", name)
            }
            Error::CaNotNonHosted(name) => {
                write!(f, "CA '{}' is not a non-hosted CA", name)
            }
            Error::CaNotAllResources(name) => {
                write!(f, "CA '{}' is not the all resources CA", name)
            }
            Error::InvalidPublisherRequest(s) => {
                write!(f, "Invalid publisher request: {}", s)
            }
            Error::PublisherDuplicate(ca, handle) => write!(
                f,
                "CA '{}' already has publisher repository '{}'",
                ca, handle
            ),

            Error::ResourceLimitExceeded { ca, limit } => write!(
                f,
                "CA '{}' has reached the limit of {} publisher repositories",
                ca, limit
            ),

            Error::RepositoryService(e) => {
                write!(f, "Repository service error: {}", e)
            }
            Error::Signer(s) => write!(f, "Signing issue: {}", s),
            Error::ResourceLookup(s) => {
                write!(f, "Resource lookup failed: {}", s)
            }
            Error::ResourceCacheEmpty => {
                f.write_str("Resource cache has not been populated")
            }
            Error::Unavailable(s) => {
                write!(f, "Temporarily unavailable: {}", s)
            }

            Error::Custom(s) => s.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<RepositoryServiceError> for Error {
    fn from(e: RepositoryServiceError) -> Self {
        Error::RepositoryService(e)
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Returns whether retrying the same command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_)
                | Error::RepositoryService(RepositoryServiceError::Unavailable(_))
        )
    }

    /// Returns the category presentation layers map to a response.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CaUnknown(_)
            | Error::CaNameUnknown(_)
            | Error::KeyUnknown(_)
            | Error::PublisherRepositoryUnknown(_, _) => {
                ErrorCategory::NotFound
            }

            Error::CaNotManaged(_)
            | Error::CaNotNonHosted(_)
            | Error::CaNotAllResources(_)
            | Error::InvalidPublisherRequest(_) => ErrorCategory::BadRequest,

            Error::CaDuplicate(_) | Error::PublisherDuplicate(_, _) => {
                ErrorCategory::Conflict
            }
            Error::RepositoryService(RepositoryServiceError::Duplicate(_)) => {
                ErrorCategory::Conflict
            }
            Error::RepositoryService(RepositoryServiceError::NotFound(_)) => {
                ErrorCategory::NotFound
            }

            Error::ResourceLimitExceeded { .. } => {
                ErrorCategory::LimitExceeded
            }

            Error::IllegalState(_)
            | Error::RepositoryService(_)
            | Error::Signer(_)
            | Error::ResourceLookup(_)
            | Error::ResourceCacheEmpty
            | Error::Unavailable(_)
            | Error::Custom(_) => ErrorCategory::Internal,
        }
    }
}


//------------ ErrorCategory -------------------------------------------------

/// The kind of response a presentation layer should give for an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Conflict,
    LimitExceeded,
    Forbidden,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::BadRequest => "bad-request",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::LimitExceeded => "limit-exceeded",
            ErrorCategory::Forbidden => "forbidden",
            ErrorCategory::Internal => "internal",
        })
    }
}


//============ Tests =========================================================
