//! Various engine-wide constants.

use crate::commons::actor::Actor;


//------------ Environment Variables ----------------------------------------

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const ISSUER_ENV_LOG_LEVEL: &str = "RPKI_ISSUER_LOG_LEVEL";

/// The environment variable with the log target.
///
/// The variable should contain the name of a
/// [`LogType`][crate::config::LogType]. It will be overwritten by the
/// config file. The default is “stderr.”
pub const ISSUER_ENV_LOG_TYPE: &str = "RPKI_ISSUER_LOG_TYPE";


//------------ Actors -------------------------------------------------------

/// The actor for commands sent by background jobs.
pub const ACTOR_DEF_BACKGROUND: Actor = Actor::system("background");

/// The actor for commands sent by the publisher repository API.
pub const ACTOR_DEF_PUBLISHERS: Actor = Actor::system("publishers");


//------------ Defaults ------------------------------------------------------

pub const ALL_RESOURCES_CA_NAME: &str = "CN=ALL Resources,O=Internet";
pub const PRODUCTION_CA_NAME: &str = "CN=Production CA";

/// The maximum number of CAs updated in one background run.
pub const UPDATE_COUNT_LIMIT: usize = 1000;

/// The maximum number of publisher repositories of a non-hosted CA.
pub const PUBLISHER_REPOSITORIES_LIMIT: usize = 10;
