//! Dispatching commands to their handlers.
//!
//! Every command is handled inside one [`UnitOfWork`]. Handlers run in the
//! order they declare, lowest first. Business handlers use the default
//! order, so that handlers with a high order, like the invariant checks,
//! see the final state produced by the command.

use std::sync::Arc;

use log::{debug, warn};

use crate::ca::commands::{CaCommand, CommandFilter, CommandStatus};
use crate::ca::tree::{CaRepository, UnitOfWork};
use crate::commons::{IssuerEmptyResult, IssuerResult};


/// The order at and above which handlers only check the outcome of a
/// command.
pub const INVARIANT_HANDLER_ORDER: i32 = 1000;


//------------ CommandService ------------------------------------------------

/// Executes commands.
///
/// Transient failures are retried. All commands can safely be executed
/// again.
pub trait CommandService: Send + Sync {
    fn execute(&self, command: CaCommand) -> IssuerResult<CommandStatus>;
}


//------------ CommandHandler ------------------------------------------------

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn order(&self) -> i32 {
        0
    }

    fn accepts(&self) -> CommandFilter;

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult;
}


//------------ CommandDispatcher ---------------------------------------------

pub struct CommandDispatcher {
    repository: Arc<CaRepository>,
    handlers: Vec<Box<dyn CommandHandler>>,
    retries: usize,
}

impl CommandDispatcher {
    /// Creates a dispatcher for the given handlers.
    ///
    /// Handlers with the same order run in the order they are given.
    pub fn new(
        repository: Arc<CaRepository>,
        mut handlers: Vec<Box<dyn CommandHandler>>,
        retries: usize,
    ) -> Self {
        handlers.sort_by_key(|handler| handler.order());
        CommandDispatcher {
            repository,
            handlers,
            retries,
        }
    }

    pub fn repository(&self) -> &Arc<CaRepository> {
        &self.repository
    }

    /// The names of all handlers in the order they run.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    fn execute_once(&self, command: &CaCommand) -> IssuerResult<CommandStatus> {
        let mut uow = self.repository.begin();
        let mut status = CommandStatus::default();
        let command_type = command.command_type();

        for handler in &self.handlers {
            if handler.accepts().matches(command_type) {
                handler.handle(command, &mut uow, &mut status)?;
            }
        }

        uow.commit();
        Ok(status)
    }
}

impl CommandService for CommandDispatcher {
    fn execute(&self, command: CaCommand) -> IssuerResult<CommandStatus> {
        debug!("Executing command {}", command);
        let mut attempt = 0;
        loop {
            match self.execute_once(&command) {
                Ok(status) => {
                    debug!(
                        "Command {} done, had effect: {}",
                        command,
                        status.had_effect()
                    );
                    return Ok(status);
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Retrying command {} after transient error (attempt {}): {}",
                        command, attempt, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::api::ca::CaId;
    use crate::ca::commands::CommandType;
    use crate::commons::actor::Actor;
    use crate::commons::error::Error;
    use crate::test::*;

    struct Recording {
        name: &'static str,
        order: i32,
        filter: CommandFilter,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CommandHandler for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn accepts(&self) -> CommandFilter {
            self.filter
        }

        fn handle(
            &self,
            _command: &CaCommand,
            _uow: &mut UnitOfWork,
            status: &mut CommandStatus,
        ) -> IssuerEmptyResult {
            self.log.lock().unwrap().push(self.name);
            status.set_had_effect();
            Ok(())
        }
    }

    /// Changes the CA and then fails a number of times.
    struct Failing {
        transient_failures: AtomicUsize,
    }

    impl CommandHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn accepts(&self) -> CommandFilter {
            CommandFilter::Any
        }

        fn handle(
            &self,
            command: &CaCommand,
            uow: &mut UnitOfWork,
            _status: &mut CommandStatus,
        ) -> IssuerEmptyResult {
            uow.get_mut(command.ca())?
                .require_managed_keys_mut()?
                .set_manifest_and_crl_check_needed(true);
            let left = self.transient_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.transient_failures.store(left - 1, Ordering::SeqCst);
                Err(Error::Unavailable("database".into()))
            } else {
                Err(Error::custom("permanent"))
            }
        }
    }

    fn recording(
        name: &'static str,
        order: i32,
        filter: CommandFilter,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn CommandHandler> {
        Box::new(Recording {
            name,
            order,
            filter,
            log: log.clone(),
        })
    }

    #[test]
    fn handlers_run_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CommandDispatcher::new(
            Arc::new(CaRepository::new(fixture_tree())),
            vec![
                recording("check", INVARIANT_HANDLER_ORDER, CommandFilter::Any, &log),
                recording("first", 0, CommandFilter::Any, &log),
                recording(
                    "expire-only",
                    0,
                    CommandFilter::Only(&[
                        CommandType::ExpireOutgoingResourceCertificates,
                    ]),
                    &log,
                ),
                recording("second", 0, CommandFilter::Any, &log),
            ],
            0,
        );
        assert_eq!(
            dispatcher.handler_names(),
            vec!["first", "expire-only", "second", "check"]
        );

        let status = dispatcher
            .execute(CaCommand::update_all_incoming(
                CaId::new(2),
                Actor::system("test"),
            ))
            .unwrap();
        assert!(status.had_effect());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "check"]);
    }

    #[test]
    fn failed_command_is_rolled_back_after_retries() {
        let repository = Arc::new(CaRepository::new(fixture_tree()));
        let before = repository.snapshot();
        let dispatcher = CommandDispatcher::new(
            repository.clone(),
            vec![Box::new(Failing {
                transient_failures: AtomicUsize::new(2),
            })],
            3,
        );

        let res = dispatcher.execute(CaCommand::update_all_incoming(
            CaId::new(2),
            Actor::system("test"),
        ));
        assert!(matches!(res, Err(Error::Custom(_))));
        assert_eq!(repository.snapshot(), before);
    }

    #[test]
    fn transient_errors_give_up_after_retries() {
        let dispatcher = CommandDispatcher::new(
            Arc::new(CaRepository::new(fixture_tree())),
            vec![Box::new(Failing {
                transient_failures: AtomicUsize::new(5),
            })],
            2,
        );
        let res = dispatcher.execute(CaCommand::update_all_incoming(
            CaId::new(2),
            Actor::system("test"),
        ));
        assert!(matches!(res, Err(Error::Unavailable(_))));
    }
}
