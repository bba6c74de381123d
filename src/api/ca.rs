//! Identifiers and small value types for certificate authorities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;


//------------ CaId ----------------------------------------------------------

/// The stable handle of a CA inside the CA tree.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct CaId(u64);

impl CaId {
    pub const fn new(id: u64) -> Self {
        CaId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ CaName --------------------------------------------------------

/// The principal name of a CA, e.g. `CN=Production CA`.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct CaName(String);

impl CaName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CaName {
    fn from(s: &str) -> Self {
        CaName(s.to_string())
    }
}

impl From<String> for CaName {
    fn from(s: String) -> Self {
        CaName(s)
    }
}

impl AsRef<str> for CaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ CaIdentity ----------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct CaIdentity {
    pub id: CaId,
    pub name: CaName,
}

impl CaIdentity {
    pub fn new(id: CaId, name: CaName) -> Self {
        CaIdentity { id, name }
    }
}

impl fmt::Display for CaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}


//------------ CaType --------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaType {
    AllResources,
    Production,
    Hosted,
    NonHosted,
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CaType::AllResources => "all-resources",
            CaType::Production => "production",
            CaType::Hosted => "hosted",
            CaType::NonHosted => "non-hosted",
        })
    }
}


//------------ OutgoingStatus ------------------------------------------------

/// The status of a certificate issued by a CA.
///
/// Once a certificate leaves `Current` it never returns to it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingStatus {
    Current,
    Revoked,
    Expired,
}


//------------ PublisherHandle -----------------------------------------------

/// Identifies a publisher repository registration of a non-hosted CA.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct PublisherHandle(Uuid);

impl PublisherHandle {
    pub fn random() -> Self {
        PublisherHandle(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PublisherHandle {
    fn from(uuid: Uuid) -> Self {
        PublisherHandle(uuid)
    }
}

impl FromStr for PublisherHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(PublisherHandle)
    }
}

impl fmt::Display for PublisherHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}


//============ Tests =========================================================
