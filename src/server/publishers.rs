//! Publisher repositories of non-hosted CAs.
//!
//! A non-hosted CA publishes its objects in repositories provisioned in an
//! external repository service. Provisioning touches two systems: the
//! external service and the local CA tree. The external side is created
//! first, and deleted again if the local side cannot be updated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::api::ca::{CaName, PublisherHandle};
use crate::api::publishers::{
    parse_publisher_request, validate_publisher_request, PublisherRequest,
    RepositoryResponse,
};
use crate::ca::authority::CertificateAuthority;
use crate::ca::commands::{CaCommand, CaCommandDetails};
use crate::ca::tree::CaRepository;
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};
use crate::constants::ACTOR_DEF_PUBLISHERS;
use crate::server::dispatch::CommandService;


//------------ RepositoryServiceError ----------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepositoryServiceError {
    Duplicate(PublisherHandle),
    NotFound(PublisherHandle),
    Unavailable(String),
}

impl fmt::Display for RepositoryServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RepositoryServiceError::Duplicate(handle) => {
                write!(f, "Publisher '{}' already exists", handle)
            }
            RepositoryServiceError::NotFound(handle) => {
                write!(f, "Publisher '{}' is unknown", handle)
            }
            RepositoryServiceError::Unavailable(msg) => {
                write!(f, "Repository service unavailable: {}", msg)
            }
        }
    }
}

impl std::error::Error for RepositoryServiceError {}


//------------ NonHostedPublisherRepositoryService ---------------------------

/// The external service hosting the repositories.
pub trait NonHostedPublisherRepositoryService: Send + Sync {
    fn provision_publisher(
        &self,
        handle: PublisherHandle,
        request: &PublisherRequest,
    ) -> Result<RepositoryResponse, RepositoryServiceError>;

    fn delete_publisher(
        &self,
        handle: PublisherHandle,
    ) -> Result<(), RepositoryServiceError>;
}


//------------ cleanup_on_error ----------------------------------------------

/// Runs `op` and, if it fails, `cleanup`.
///
/// The error of `op` is returned in any case. A failing cleanup is only
/// logged.
pub fn cleanup_on_error<T, F, C>(op: F, cleanup: C) -> IssuerResult<T>
where
    F: FnOnce() -> IssuerResult<T>,
    C: FnOnce() -> Result<(), RepositoryServiceError>,
{
    op().inspect_err(|e| {
        if let Err(cleanup_err) = cleanup() {
            error!(
                "Cleanup after error '{}' failed as well: {}",
                e, cleanup_err
            );
        }
    })
}


//------------ PublisherRepositories -----------------------------------------

pub struct PublisherRepositories {
    repository: Arc<CaRepository>,
    commands: Arc<dyn CommandService>,
    repository_service: Arc<dyn NonHostedPublisherRepositoryService>,
    limit: usize,
}

impl PublisherRepositories {
    pub fn new(
        repository: Arc<CaRepository>,
        commands: Arc<dyn CommandService>,
        repository_service: Arc<dyn NonHostedPublisherRepositoryService>,
        limit: usize,
    ) -> Self {
        PublisherRepositories {
            repository,
            commands,
            repository_service,
            limit,
        }
    }

    /// Runs `op` on the non-hosted CA with the given name.
    fn with_non_hosted<F, T>(&self, ca_name: &CaName, op: F) -> IssuerResult<T>
    where
        F: FnOnce(&CertificateAuthority) -> IssuerResult<T>,
    {
        self.repository.read(|tree| {
            let ca = tree
                .find_by_name(ca_name)
                .ok_or_else(|| Error::CaNameUnknown(ca_name.clone()))?;
            if ca.non_hosted().is_none() {
                return Err(Error::CaNotNonHosted(ca_name.clone()));
            }
            op(ca)
        })
    }

    pub fn list(
        &self,
        ca_name: &CaName,
    ) -> IssuerResult<BTreeMap<PublisherHandle, RepositoryResponse>> {
        self.with_non_hosted(ca_name, |ca| {
            Ok(ca
                .non_hosted()
                .map(|non_hosted| {
                    non_hosted
                        .publisher_repositories()
                        .iter()
                        .map(|(handle, repo)| (*handle, repo.response.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    /// Provisions a new publisher repository for a non-hosted CA.
    ///
    /// Returns the handle under which the repository can be found.
    pub fn provision(
        &self,
        ca_name: &CaName,
        request: PublisherRequest,
    ) -> IssuerResult<PublisherHandle> {
        let ca = self.with_non_hosted(ca_name, |ca| {
            let count = ca
                .non_hosted()
                .map(|non_hosted| non_hosted.publisher_repositories().len())
                .unwrap_or(0);
            if count >= self.limit {
                Err(Error::ResourceLimitExceeded {
                    ca: ca_name.clone(),
                    limit: self.limit,
                })
            } else {
                Ok(ca.id())
            }
        })?;
        validate_publisher_request(&request)?;

        let handle = PublisherHandle::random();
        let response = self
            .repository_service
            .provision_publisher(handle, &request)?;

        cleanup_on_error(
            || {
                self.commands.execute(CaCommand::new(
                    ca,
                    ACTOR_DEF_PUBLISHERS,
                    CaCommandDetails::ProvisionNonHostedPublisher {
                        handle,
                        request,
                        response,
                    },
                ))
            },
            || self.repository_service.delete_publisher(handle),
        )?;

        info!(
            "Provisioned publisher repository '{}' for CA '{}'",
            handle, ca_name
        );
        Ok(handle)
    }

    /// Provisions a repository for an uploaded `<publisher_request/>`.
    pub fn provision_xml(
        &self,
        ca_name: &CaName,
        xml: &[u8],
    ) -> IssuerResult<PublisherHandle> {
        info!("Publisher request for non-hosted CA '{}'", ca_name);
        let request = parse_publisher_request(xml)?;
        self.provision(ca_name, request)
    }

    pub fn repository_response(
        &self,
        ca_name: &CaName,
        handle: PublisherHandle,
    ) -> IssuerResult<RepositoryResponse> {
        self.with_non_hosted(ca_name, |ca| {
            ca.non_hosted()
                .and_then(|non_hosted| non_hosted.publisher_repositories().get(&handle))
                .map(|repo| repo.response.clone())
                .ok_or_else(|| {
                    Error::PublisherRepositoryUnknown(ca_name.clone(), handle)
                })
        })
    }

    /// Returns the `<repository_response/>` document for a repository.
    pub fn repository_response_xml(
        &self,
        ca_name: &CaName,
        handle: PublisherHandle,
    ) -> IssuerResult<String> {
        self.repository_response(ca_name, handle)
            .map(|response| response.to_xml_string())
    }

    /// Removes a publisher repository, locally first.
    pub fn delete(
        &self,
        ca_name: &CaName,
        handle: PublisherHandle,
    ) -> IssuerEmptyResult {
        let ca = self.with_non_hosted(ca_name, |ca| Ok(ca.id()))?;
        self.commands.execute(CaCommand::new(
            ca,
            ACTOR_DEF_PUBLISHERS,
            CaCommandDetails::DeleteNonHostedPublisher { handle },
        ))?;

        match self.repository_service.delete_publisher(handle) {
            Ok(()) => {}
            Err(RepositoryServiceError::NotFound(_)) => {
                warn!(
                    "Publisher '{}' of CA '{}' was already removed from the repository service",
                    handle, ca_name
                );
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            "Deleted publisher repository '{}' of CA '{}'",
            handle, ca_name
        );
        Ok(())
    }
}


//============ Tests =========================================================
