//! The issuing engine: command handling, invariant checks and background
//! jobs.

pub mod background;
pub mod dispatch;
pub mod handlers;
pub mod invariants;
pub mod publishers;

use std::sync::Arc;

use log::info;

use crate::ca::services::{
    CertificateRequestCreationService, CertificateSigner, KeyPairService,
    ResourceLookupService,
};
use crate::ca::tree::{CaRepository, CaTree};
use crate::config::Config;

use self::background::{
    ActiveNodeService, AllCaCertificateUpdateService, ResourceCache,
};
use self::dispatch::{CommandDispatcher, CommandHandler};
use self::handlers::{
    ActivateHostedCaHandler, AllResourcesCommandHandler,
    ExpireOutgoingResourceCertificatesHandler,
    NonHostedPublisherCommandHandler,
    UpdateAllIncomingResourceCertificatesHandler,
};
use self::invariants::{InvariantHandler, InvariantMetrics, InvariantModel};
use self::publishers::{
    NonHostedPublisherRepositoryService, PublisherRepositories,
};


//------------ IssuerServices ------------------------------------------------

/// The collaborators the command handlers depend on.
#[derive(Clone)]
pub struct IssuerServices {
    pub resource_lookup: Arc<dyn ResourceLookupService>,
    pub key_pairs: Arc<dyn KeyPairService>,
    pub requests: Arc<dyn CertificateRequestCreationService>,
    pub signer: Arc<dyn CertificateSigner>,
}


//------------ IssuerMetrics -------------------------------------------------

#[derive(Clone, Debug)]
pub struct IssuerMetrics {
    pub hosted: Arc<InvariantMetrics>,
    pub managed: Arc<InvariantMetrics>,
}

impl Default for IssuerMetrics {
    fn default() -> Self {
        IssuerMetrics {
            hosted: Arc::new(InvariantMetrics::new(InvariantModel::Hosted)),
            managed: Arc::new(InvariantMetrics::new(InvariantModel::Managed)),
        }
    }
}


//------------ standard_handlers ---------------------------------------------

/// Returns the handlers for all commands.
///
/// The hosted invariant check always runs, the managed one only if enabled
/// in the config.
pub fn standard_handlers(
    config: &Config,
    services: &IssuerServices,
    metrics: &IssuerMetrics,
) -> Vec<Box<dyn CommandHandler>> {
    let timing = config.issuance_timing;
    let mut handlers: Vec<Box<dyn CommandHandler>> = vec![
        Box::new(ActivateHostedCaHandler::new(
            services.key_pairs.clone(),
            services.resource_lookup.clone(),
            services.signer.clone(),
            timing,
        )),
        Box::new(UpdateAllIncomingResourceCertificatesHandler::new(
            services.resource_lookup.clone(),
            services.signer.clone(),
            timing,
        )),
        Box::new(AllResourcesCommandHandler::new(
            services.key_pairs.clone(),
            services.requests.clone(),
        )),
        Box::new(ExpireOutgoingResourceCertificatesHandler),
        Box::new(NonHostedPublisherCommandHandler::new(
            config.publisher_repositories_limit,
        )),
        Box::new(InvariantHandler::new(
            InvariantModel::Hosted,
            metrics.hosted.clone(),
        )),
    ];
    if config.invariant_checking_enabled {
        handlers.push(Box::new(InvariantHandler::new(
            InvariantModel::Managed,
            metrics.managed.clone(),
        )));
    }
    handlers
}


//------------ IssuerServer --------------------------------------------------

/// Wires the CA tree, the command dispatcher and the services on top.
pub struct IssuerServer {
    repository: Arc<CaRepository>,
    dispatcher: Arc<CommandDispatcher>,
    publishers: PublisherRepositories,
    metrics: IssuerMetrics,
}

impl IssuerServer {
    pub fn build(
        config: &Config,
        tree: CaTree,
        services: IssuerServices,
        repository_service: Arc<dyn NonHostedPublisherRepositoryService>,
    ) -> Self {
        let repository = Arc::new(CaRepository::new(tree));
        let metrics = IssuerMetrics::default();
        let dispatcher = Arc::new(CommandDispatcher::new(
            repository.clone(),
            standard_handlers(config, &services, &metrics),
            config.command_retries,
        ));
        info!(
            "Command handlers: {}",
            dispatcher.handler_names().join(", ")
        );
        let publishers = PublisherRepositories::new(
            repository.clone(),
            dispatcher.clone(),
            repository_service,
            config.publisher_repositories_limit,
        );
        IssuerServer {
            repository,
            dispatcher,
            publishers,
            metrics,
        }
    }

    pub fn repository(&self) -> &Arc<CaRepository> {
        &self.repository
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn publishers(&self) -> &PublisherRepositories {
        &self.publishers
    }

    pub fn metrics(&self) -> &IssuerMetrics {
        &self.metrics
    }

    /// Creates the job that updates all certificates in the tree.
    pub fn update_service(
        &self,
        config: &Config,
        active_node: Arc<dyn ActiveNodeService>,
        resource_cache: Arc<dyn ResourceCache>,
    ) -> AllCaCertificateUpdateService {
        AllCaCertificateUpdateService::new(
            config,
            active_node,
            resource_cache,
            self.repository.clone(),
            self.dispatcher.clone(),
        )
    }
}


//============ Tests =========================================================
