//! Common types used by the various components of the issuing engine.
pub mod actor;
pub mod error;
pub mod metrics;
pub mod util;

//------------ Response Aliases ----------------------------------------------

pub type IssuerEmptyResult = std::result::Result<(), self::error::Error>;
pub type IssuerResult<T> = std::result::Result<T, self::error::Error>;
