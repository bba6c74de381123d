//! Background jobs.
//!
//! The main job brings the certificates of all CAs in the tree in line with
//! the resource registry. The production CA is updated first, then all its
//! descendants are updated in parallel on a dedicated runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::runtime;

use crate::api::ca::{CaIdentity, CaName};
use crate::ca::commands::CaCommand;
use crate::ca::services::{CaViewService, StaticResourceRegistry};
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};
use crate::config::Config;
use crate::constants::ACTOR_DEF_BACKGROUND;
use crate::server::dispatch::CommandService;


//------------ ActiveNodeService ---------------------------------------------

/// Tells whether this node should run background jobs.
pub trait ActiveNodeService: Send + Sync {
    fn is_active_node(&self) -> bool;
}

/// A node that is always active, for single node set ups.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysActive;

impl ActiveNodeService for AlwaysActive {
    fn is_active_node(&self) -> bool {
        true
    }
}


//------------ ResourceCache -------------------------------------------------

pub trait ResourceCache: Send + Sync {
    /// Fails if the cache holds no resources at all.
    ///
    /// Updating certificates against an empty cache would revoke them all.
    fn verify_present(&self) -> IssuerEmptyResult;
}

impl ResourceCache for StaticResourceRegistry {
    fn verify_present(&self) -> IssuerEmptyResult {
        if self.is_empty() {
            Err(Error::ResourceCacheEmpty)
        } else {
            Ok(())
        }
    }
}


//------------ BackgroundService ---------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackgroundServiceExecutionResult {
    Success,
    Skipped,
    Failure,
}

impl fmt::Display for BackgroundServiceExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BackgroundServiceExecutionResult::Success => "success",
            BackgroundServiceExecutionResult::Skipped => "skipped",
            BackgroundServiceExecutionResult::Failure => "failure",
        })
    }
}

pub trait BackgroundService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the job to completion, blocking the calling thread.
    ///
    /// This must not be called from a task on an async runtime. Use
    /// [`execute_blocking`] there instead.
    fn execute(&self) -> BackgroundServiceExecutionResult;
}

/// Runs a background service on the blocking pool of the current runtime.
pub async fn execute_blocking(
    service: Arc<dyn BackgroundService>,
) -> BackgroundServiceExecutionResult {
    let name = service.name();
    match tokio::task::spawn_blocking(move || service.execute()).await {
        Ok(result) => result,
        Err(e) => {
            error!("Background service '{}' did not complete: {}", name, e);
            BackgroundServiceExecutionResult::Failure
        }
    }
}


//------------ UpdateReport --------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdateReport {
    /// The number of descendants whose certificates changed.
    pub updated: usize,

    /// The number of descendants of the production CA.
    pub considered: usize,

    pub failed: usize,

    /// The number of descendants whose certificates changed after the
    /// limit was reached. These are not included in `updated`.
    pub beyond_limit: usize,
}


//------------ RunningGuard --------------------------------------------------

/// Clears the running flag when a run ends, even if it panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}


//------------ UpdateCounter -------------------------------------------------

/// Counts updates up to a limit.
#[derive(Debug)]
struct UpdateCounter {
    count: AtomicUsize,
    limit: usize,
}

impl UpdateCounter {
    fn new(limit: usize) -> Self {
        UpdateCounter {
            count: AtomicUsize::new(0),
            limit,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.count.load(Ordering::Acquire) >= self.limit
    }

    /// Counts one more update unless the limit was reached.
    fn increment(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.limit).then_some(count + 1)
            })
            .is_ok()
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}


//------------ ChildOutcome --------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChildOutcome {
    Updated,
    UpdatedBeyondLimit,
    Unchanged,
    Skipped,
    Failed,
}

fn update_child(
    commands: &dyn CommandService,
    child: &CaIdentity,
    counter: &UpdateCounter,
) -> ChildOutcome {
    if counter.is_exhausted() {
        return ChildOutcome::Skipped;
    }
    match commands.execute(CaCommand::update_all_incoming(
        child.id,
        ACTOR_DEF_BACKGROUND,
    )) {
        Ok(status) if status.had_effect() => {
            if counter.increment() {
                ChildOutcome::Updated
            } else {
                debug!(
                    "Updated CA '{}' after the update limit was reached",
                    child.name
                );
                ChildOutcome::UpdatedBeyondLimit
            }
        }
        Ok(_) => ChildOutcome::Unchanged,
        Err(e) => {
            error!("Error for CA '{}': {}", child.name, e);
            ChildOutcome::Failed
        }
    }
}


//------------ AllCaCertificateUpdateService ---------------------------------

pub struct AllCaCertificateUpdateService {
    active_node: Arc<dyn ActiveNodeService>,
    resource_cache: Arc<dyn ResourceCache>,
    ca_view: Arc<dyn CaViewService>,
    commands: Arc<dyn CommandService>,

    all_resources_ca_name: CaName,
    production_ca_name: CaName,
    update_count_limit: usize,
    update_workers: usize,

    running: AtomicBool,
}

impl AllCaCertificateUpdateService {
    pub fn new(
        config: &Config,
        active_node: Arc<dyn ActiveNodeService>,
        resource_cache: Arc<dyn ResourceCache>,
        ca_view: Arc<dyn CaViewService>,
        commands: Arc<dyn CommandService>,
    ) -> Self {
        AllCaCertificateUpdateService {
            active_node,
            resource_cache,
            ca_view,
            commands,
            all_resources_ca_name: config.all_resources_ca_name.clone().into(),
            production_ca_name: config.production_ca_name.clone().into(),
            update_count_limit: config.update_count_limit,
            update_workers: config.update_workers(),
            running: AtomicBool::new(false),
        }
    }

    /// Looks up the production CA, if the tree is ready to be updated.
    fn verify_preconditions(&self) -> IssuerResult<Option<CaIdentity>> {
        self.resource_cache.verify_present()?;

        if self.ca_view.find_by_name(&self.all_resources_ca_name).is_none() {
            error!(
                "All resources CA '{}' was not found.",
                self.all_resources_ca_name
            );
            return Ok(None);
        }
        let production = self.ca_view.find_by_name(&self.production_ca_name);
        if production.is_none() {
            error!(
                "Production CA '{}' was not found.",
                self.production_ca_name
            );
        }
        Ok(production)
    }

    fn runtime(&self) -> IssuerResult<runtime::Runtime> {
        runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.update_workers.max(1))
            .thread_name("rpki-issuer-update")
            .build()
            .map_err(|e| {
                Error::custom(format!("cannot start update runtime: {}", e))
            })
    }

    /// Updates the production CA and all its descendants.
    ///
    /// The descendants are updated on a runtime owned by this call, so the
    /// calling thread must be allowed to block.
    pub fn run(&self) -> IssuerResult<UpdateReport> {
        let production = match self.verify_preconditions()? {
            Some(production) => production,
            None => return Ok(UpdateReport::default()),
        };

        // The descendants are all updated below, so there is no need to
        // look for over-claiming children here.
        self.commands.execute(CaCommand::update_all_incoming(
            production.id,
            ACTOR_DEF_BACKGROUND,
        ))?;

        let children = self.ca_view.find_all_children_ids(&production.name)?;
        let counter = Arc::new(UpdateCounter::new(self.update_count_limit));
        let runtime = self.runtime()?;

        let tasks: Vec<_> = children
            .iter()
            .cloned()
            .map(|child| {
                let commands = self.commands.clone();
                let counter = counter.clone();
                runtime.spawn_blocking(move || {
                    update_child(commands.as_ref(), &child, &counter)
                })
            })
            .collect();
        let outcomes = runtime.block_on(join_all(tasks));

        let mut report = UpdateReport {
            considered: children.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(ChildOutcome::Failed) => report.failed += 1,
                Ok(ChildOutcome::UpdatedBeyondLimit) => report.beyond_limit += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("Update task did not complete: {}", e);
                    report.failed += 1;
                }
            }
        }
        report.updated = counter.get();

        if report.updated >= self.update_count_limit {
            warn!(
                "Reached the limit of {} updates, remaining CAs are updated in the next run",
                self.update_count_limit
            );
        }
        if report.beyond_limit > 0 {
            info!(
                "Updated {} more CAs that were already running when the limit was reached",
                report.beyond_limit
            );
        }
        info!(
            "Updated {} incoming resource certificates of {} member CAs",
            report.updated, report.considered
        );
        Ok(report)
    }
}

impl BackgroundService for AllCaCertificateUpdateService {
    fn name(&self) -> &'static str {
        "all-ca-certificate-update"
    }

    fn execute(&self) -> BackgroundServiceExecutionResult {
        if !self.active_node.is_active_node() {
            debug!("Skipping '{}', this is not the active node", self.name());
            return BackgroundServiceExecutionResult::Skipped;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Skipping '{}', it is still running", self.name());
            return BackgroundServiceExecutionResult::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        match self.run() {
            Ok(_) => BackgroundServiceExecutionResult::Success,
            Err(e) => {
                error!("Background service '{}' failed: {}", self.name(), e);
                BackgroundServiceExecutionResult::Failure
            }
        }
    }
}


//============ Tests =========================================================
