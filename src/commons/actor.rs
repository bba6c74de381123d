//! The originator of a command.

use std::borrow::Cow;
use std::fmt;


//------------ Actor ---------------------------------------------------------

/// Identifies who sent a command.
///
/// Commands initiated by the engine itself, e.g. by background jobs, use a
/// system actor with a fixed name. Commands coming in through an API use a
/// user actor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Actor {
    name: Cow<'static, str>,
    is_user: bool,
}

impl Actor {
    pub const fn system(name: &'static str) -> Actor {
        Actor {
            name: Cow::Borrowed(name),
            is_user: false,
        }
    }

    pub fn user(name: impl Into<String>) -> Actor {
        Actor {
            name: Cow::Owned(name.into()),
            is_user: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_user {
            write!(f, "user:{}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}
