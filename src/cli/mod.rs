//! The command line interface of the `rpki-issuer` binary.

use std::path::{Path, PathBuf};
use std::{fmt, fs, io};

use log::info;

use crate::ca::tree::CaTree;
use crate::config::{Config, ConfigError};
use crate::server::invariants::{
    InvariantChecker, InvariantModel, InvariantViolation,
};


//------------ Options -------------------------------------------------------

/// The command line options.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Resource certificate issuing engine for an RPKI CA.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}


//------------ GeneralOptions ------------------------------------------------

#[derive(clap::Args)]
pub struct GeneralOptions {
    /// The config file to use, defaults are used if absent.
    #[arg(short, long, env = "RPKI_ISSUER_CONFIG")]
    pub config: Option<PathBuf>,
}

impl GeneralOptions {
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let config = match &self.config {
            Some(path) => Config::read_config(path)?,
            None => Config::default(),
        };
        config.verify()?;
        Ok(config)
    }
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Print the default configuration.
    Config,

    /// Check the invariants of all CAs in a saved tree.
    Audit {
        /// The JSON file with the saved CA tree.
        #[arg(long, value_name = "FILE")]
        state: PathBuf,
    },
}


//------------ Outcome -------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Done,
    Violations(Vec<String>),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Done => 0,
            Outcome::Violations(_) => 1,
        }
    }
}


//------------ run -----------------------------------------------------------

pub fn run(options: Options) -> Result<Outcome, CliError> {
    match options.command {
        Command::Config => {
            println!("{}", Config::default().to_toml()?);
            Ok(Outcome::Done)
        }
        Command::Audit { state } => {
            let config = options.general.load_config()?;
            config.init_logging()?;
            let violations = audit(&state)?;
            for violation in &violations {
                println!("{}", violation);
            }
            if violations.is_empty() {
                Ok(Outcome::Done)
            } else {
                Ok(Outcome::Violations(violations))
            }
        }
    }
}

/// Runs both invariant checkers over a saved tree.
pub fn audit(state: &Path) -> Result<Vec<String>, CliError> {
    let json = fs::read_to_string(state).map_err(|e| {
        CliError::Io(format!("cannot read '{}'", state.display()), e)
    })?;
    let tree: CaTree = serde_json::from_str(&json)?;
    info!("Auditing {} CAs from '{}'", tree.len(), state.display());

    let violations: Vec<InvariantViolation> =
        [InvariantModel::Hosted, InvariantModel::Managed]
            .into_iter()
            .flat_map(|model| InvariantChecker::new(model).check_tree(&tree))
            .collect();
    Ok(violations
        .into_iter()
        .map(|violation| violation.to_string())
        .collect())
}


//------------ CliError ------------------------------------------------------

#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    Io(String, io::Error),
    State(serde_json::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Io(ctx, e) => write!(f, "{}: {}", ctx, e),
            CliError::State(e) => write!(f, "Invalid CA tree: {}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::State(e)
    }
}


//============ Tests =========================================================
