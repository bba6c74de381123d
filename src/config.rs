//! Configuration of the issuing engine.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, fs, io};

use chrono::Duration;
use log::{error, LevelFilter};
use rpki::repository::x509::{Time, Validity};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use syslog::Facility;

use crate::commons::util::ext_serde;
use crate::constants::*;


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        env::var(ISSUER_ENV_LOG_LEVEL)
            .ok()
            .and_then(|level| LevelFilter::from_str(&level).ok())
            .unwrap_or(LevelFilter::Info)
    }

    fn log_type() -> LogType {
        env::var(ISSUER_ENV_LOG_TYPE)
            .ok()
            .and_then(|log_type| LogType::from_str(&log_type).ok())
            .unwrap_or(LogType::Stderr)
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./rpki-issuer.log")
    }

    fn syslog_facility() -> String {
        "daemon".to_string()
    }

    fn all_resources_ca_name() -> String {
        ALL_RESOURCES_CA_NAME.to_string()
    }

    fn production_ca_name() -> String {
        PRODUCTION_CA_NAME.to_string()
    }

    fn update_count_limit() -> usize {
        UPDATE_COUNT_LIMIT
    }

    fn publisher_repositories_limit() -> usize {
        PUBLISHER_REPOSITORIES_LIMIT
    }

    fn invariant_checking_enabled() -> bool {
        true
    }

    fn command_retries() -> usize {
        3
    }

    fn child_certificate_valid_weeks() -> i64 {
        52
    }

    fn child_certificate_reissue_weeks_before() -> i64 {
        4
    }
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter",
        serialize_with = "ext_serde::ser_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    #[serde(default = "ConfigDefaults::all_resources_ca_name")]
    pub all_resources_ca_name: String,

    #[serde(default = "ConfigDefaults::production_ca_name")]
    pub production_ca_name: String,

    /// The maximum number of CAs a background run updates.
    #[serde(default = "ConfigDefaults::update_count_limit")]
    pub update_count_limit: usize,

    /// The number of threads used to update CAs. Defaults to the available
    /// parallelism of the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_workers: Option<usize>,

    #[serde(default = "ConfigDefaults::publisher_repositories_limit")]
    pub publisher_repositories_limit: usize,

    /// Enables the managed CA invariant checks. The hosted CA checks always
    /// run.
    #[serde(default = "ConfigDefaults::invariant_checking_enabled")]
    pub invariant_checking_enabled: bool,

    /// How often a command is retried after a transient failure.
    #[serde(default = "ConfigDefaults::command_retries")]
    pub command_retries: usize,

    #[serde(default)]
    pub issuance_timing: IssuanceTimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            syslog_facility: ConfigDefaults::syslog_facility(),
            all_resources_ca_name: ConfigDefaults::all_resources_ca_name(),
            production_ca_name: ConfigDefaults::production_ca_name(),
            update_count_limit: ConfigDefaults::update_count_limit(),
            update_workers: None,
            publisher_repositories_limit:
                ConfigDefaults::publisher_repositories_limit(),
            invariant_checking_enabled:
                ConfigDefaults::invariant_checking_enabled(),
            command_retries: ConfigDefaults::command_retries(),
            issuance_timing: IssuanceTimingConfig::default(),
        }
    }
}

impl Config {
    pub fn read_config(file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(file)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Returns the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Other(e.to_string()))
    }

    /// The number of threads to use for updating CAs.
    pub fn update_workers(&self) -> usize {
        self.update_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.all_resources_ca_name.is_empty() {
            return Err(ConfigError::other("all_resources_ca_name must be set"));
        }

        if self.production_ca_name.is_empty() {
            return Err(ConfigError::other("production_ca_name must be set"));
        }

        if self.all_resources_ca_name == self.production_ca_name {
            return Err(ConfigError::other(
                "all_resources_ca_name and production_ca_name must differ",
            ));
        }

        if self.update_workers == Some(0) {
            return Err(ConfigError::other("update_workers must be at least 1"));
        }

        if self.publisher_repositories_limit == 0 {
            return Err(ConfigError::other(
                "publisher_repositories_limit must be at least 1",
            ));
        }

        self.issuance_timing.verify()
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(&self.syslog_facility)
                    .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
                self.syslog_logger(facility)
            }
            #[cfg(not(unix))]
            LogType::Syslog => {
                Err(ConfigError::other("syslog is only supported on Unix"))
            }
        }
    }

    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init stderr logging: {}", e))
            })
    }

    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(),
                    err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init file logging: {}", e))
            })
    }

    #[cfg(unix)]
    fn syslog_logger(&self, facility: Facility) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("rpki-issuer"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {}", e))
                }),
            Err(err) => {
                Err(ConfigError::Other(format!("Cannot connect to syslog: {}", err)))
            }
        }
    }

    /// Level overrides for targets that are too noisy at the global level.
    ///
    /// Dispatch, tree commits and invariant checks log once per command.
    /// These never go below debug.
    fn log_level_overrides(&self) -> Vec<(&'static str, LevelFilter)> {
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let engine_level = self.log_level.min(LevelFilter::Debug);
        vec![
            ("tokio", framework_level),
            ("mio", framework_level),
            ("rpki", framework_level),
            ("rpki_issuer::ca::tree", engine_level),
            ("rpki_issuer::server::dispatch", engine_level),
            ("rpki_issuer::server::invariants", engine_level),
        ]
    }

    fn fern_logger(&self) -> fern::Dispatch {
        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        let dispatch = fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level);
        self.log_level_overrides()
            .into_iter()
            .fold(dispatch, |dispatch, (target, level)| {
                dispatch.level_for(target, level)
            })
    }
}


//------------ IssuanceTimingConfig ------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IssuanceTimingConfig {
    #[serde(default = "ConfigDefaults::child_certificate_valid_weeks")]
    pub child_certificate_valid_weeks: i64,

    #[serde(default = "ConfigDefaults::child_certificate_reissue_weeks_before")]
    pub child_certificate_reissue_weeks_before: i64,
}

impl Default for IssuanceTimingConfig {
    fn default() -> Self {
        IssuanceTimingConfig {
            child_certificate_valid_weeks:
                ConfigDefaults::child_certificate_valid_weeks(),
            child_certificate_reissue_weeks_before:
                ConfigDefaults::child_certificate_reissue_weeks_before(),
        }
    }
}

impl IssuanceTimingConfig {
    /// The validity for a certificate issued to a child now.
    pub fn new_child_cert_validity(&self) -> Validity {
        Validity::new(
            Time::five_minutes_ago(),
            Time::now() + Duration::weeks(self.child_certificate_valid_weeks),
        )
    }

    /// Child certificates expiring before this time should be reissued.
    pub fn child_cert_reissue_threshold(&self) -> Time {
        Time::now() + Duration::weeks(self.child_certificate_reissue_weeks_before)
    }

    fn verify(&self) -> Result<(), ConfigError> {
        if self.child_certificate_valid_weeks < 2 {
            return Err(ConfigError::other(
                "child_certificate_valid_weeks must be at least 2",
            ));
        }

        if self.child_certificate_reissue_weeks_before < 1 {
            return Err(ConfigError::other(
                "child_certificate_reissue_weeks_before must be at least 1",
            ));
        }

        if self.child_certificate_reissue_weeks_before
            >= self.child_certificate_valid_weeks
        {
            return Err(ConfigError::other(
                "child_certificate_reissue_weeks_before must be smaller than \
                 child_certificate_valid_weeks",
            ));
        }

        Ok(())
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl FromStr for LogType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(ConfigError::Other(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found: \"{}\"",
                s
            ))),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//============ Tests =========================================================
