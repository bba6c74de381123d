//! The business handlers for CA commands.

use std::sync::Arc;

use log::{debug, info};

use crate::api::ca::{CaId, CaName};
use crate::ca::authority::{
    CaKind, CertificateAuthority, ManagedKeys, NonHostedPublisherRepository,
};
use crate::ca::commands::{
    CaCommand, CaCommandDetails, CommandFilter, CommandStatus, CommandType,
};
use crate::ca::equivalent_resources;
use crate::ca::services::{
    CertificateRequestCreationService, CertificateSigner, KeyPairService,
    ResourceLookupService,
};
use crate::ca::tree::UnitOfWork;
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};
use crate::config::IssuanceTimingConfig;
use crate::server::dispatch::CommandHandler;


//------------ Certifying children -------------------------------------------

/// Brings the certificates a CA's parent issued to it in line with the
/// resources the CA holds.
///
/// The CA is certified for the intersection of what the registry says it
/// holds and what its parent is certified for. Returns whether anything
/// changed.
fn update_incoming_certificates(
    uow: &mut UnitOfWork,
    ca_id: CaId,
    lookup: &dyn ResourceLookupService,
    signer: &dyn CertificateSigner,
    timing: &IssuanceTimingConfig,
) -> IssuerResult<bool> {
    let ca = uow.require(ca_id)?;
    let name = ca.name().clone();
    let identity = ca.identity();

    let parent_id = match ca.parent() {
        Some(parent_id) => parent_id,
        None => {
            debug!("CA '{}' has no parent, nothing to update", name);
            return Ok(false);
        }
    };
    let parent_resources = match uow.require(parent_id)?.certified_resources() {
        Some(resources) => resources,
        None => {
            debug!("Parent of CA '{}' is not certified, skipping", name);
            return Ok(false);
        }
    };
    let requested = match ca.lookup_certifiable_resources(lookup) {
        Some(resources) => resources,
        None => {
            debug!("No certifiable resources for CA '{}', skipping", name);
            return Ok(false);
        }
    };
    let resources = requested.intersection(&parent_resources);

    let subject_keys: Vec<String> = match ca.kind() {
        CaKind::NonHosted(non_hosted) => non_hosted.public_keys().to_vec(),
        _ => ca
            .managed_keys()
            .map(|keys| {
                keys.key_pairs()
                    .iter()
                    .filter(|kp| !kp.is_revoked())
                    .map(|kp| kp.encoded_ski().to_string())
                    .collect()
            })
            .unwrap_or_default(),
    };

    let (parent, ca) = uow.get_pair_mut(parent_id, ca_id)?;
    let parent_keys = parent.require_managed_keys_mut()?;

    if resources.is_empty() {
        return Ok(revoke_all(parent_keys, ca));
    }

    let reissue_threshold = timing.child_cert_reissue_threshold();
    let mut changed = false;
    for ski in subject_keys {
        let needs_certificate = match parent_keys.valid_child_certificate(ca_id, &ski) {
            Some(cert) => {
                !equivalent_resources(cert.resources(), &resources)
                    || cert.not_after() < reissue_threshold
            }
            None => true,
        } || lacks_incoming(ca, &ski);

        if !needs_certificate {
            continue;
        }

        let response = parent_keys.issue_child_certificate(
            &identity,
            &ski,
            resources.clone(),
            timing.new_child_cert_validity(),
            signer,
        )?;
        info!(
            "Issued certificate for key '{}' of CA '{}' with resources {}",
            ski, name, resources
        );
        if let Some(key_pair) = ca
            .managed_keys_mut()
            .and_then(|keys| keys.find_key_pair_mut(&ski))
        {
            key_pair.update_incoming_certificate(response);
        }
        changed = true;
    }
    Ok(changed)
}

/// Whether a managed key pair has not received a certificate yet.
fn lacks_incoming(ca: &CertificateAuthority, ski: &str) -> bool {
    ca.managed_keys()
        .and_then(|keys| keys.find_key_pair(ski))
        .map(|kp| kp.incoming().is_none())
        .unwrap_or(false)
}

/// Revokes everything issued to a CA that lost all its resources.
fn revoke_all(
    parent_keys: &mut ManagedKeys,
    ca: &mut CertificateAuthority,
) -> bool {
    let revoked = parent_keys.revoke_child_certificates(ca.id(), None);
    let mut cleared = false;
    if let Some(keys) = ca.managed_keys_mut() {
        for key_pair in keys.key_pairs_mut() {
            if key_pair.incoming().is_some() {
                key_pair.clear_incoming_certificate();
                cleared = true;
            }
        }
    }
    if revoked > 0 || cleared {
        info!(
            "CA '{}' holds no resources anymore, revoked {} certificates",
            ca.name(),
            revoked
        );
    }
    revoked > 0 || cleared
}


//------------ ActivateHostedCaHandler ---------------------------------------

pub struct ActivateHostedCaHandler {
    key_pairs: Arc<dyn KeyPairService>,
    resource_lookup: Arc<dyn ResourceLookupService>,
    signer: Arc<dyn CertificateSigner>,
    timing: IssuanceTimingConfig,
}

impl ActivateHostedCaHandler {
    pub fn new(
        key_pairs: Arc<dyn KeyPairService>,
        resource_lookup: Arc<dyn ResourceLookupService>,
        signer: Arc<dyn CertificateSigner>,
        timing: IssuanceTimingConfig,
    ) -> Self {
        ActivateHostedCaHandler {
            key_pairs,
            resource_lookup,
            signer,
            timing,
        }
    }

    fn activate(
        &self,
        ca_id: CaId,
        name: &CaName,
        parent_id: CaId,
        uow: &mut UnitOfWork,
    ) -> IssuerResult<bool> {
        if let Some(existing) = uow.get(ca_id) {
            return if existing.name() == name
                && existing.parent() == Some(parent_id)
            {
                Ok(false)
            } else {
                Err(Error::CaDuplicate(name.clone()))
            };
        }

        let parent = uow.require(parent_id)?;
        let parent_dir = parent
            .managed_keys()
            .ok_or_else(|| Error::CaNotManaged(parent.name().clone()))?
            .publication_directory();
        let directory = parent_dir
            .join(format!("{}/", ca_id).as_bytes())
            .map_err(|e| {
                Error::IllegalState(format!(
                    "cannot derive publication directory for '{}': {}",
                    name, e
                ))
            })?;

        let mut key_pair = self.key_pairs.create_key_pair()?;
        key_pair.request_certificate();
        let mut keys = ManagedKeys::new(directory);
        keys.add_key_pair(key_pair);

        uow.insert(CertificateAuthority::new(
            ca_id,
            name.clone(),
            Some(parent_id),
            CaKind::Hosted(keys),
        ))?;
        info!("Activated hosted CA '{}' with id {}", name, ca_id);

        update_incoming_certificates(
            uow,
            ca_id,
            self.resource_lookup.as_ref(),
            self.signer.as_ref(),
            &self.timing,
        )?;
        Ok(true)
    }
}

impl CommandHandler for ActivateHostedCaHandler {
    fn name(&self) -> &'static str {
        "activate-hosted-ca"
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Only(&[CommandType::ActivateHostedCa])
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        if let CaCommandDetails::ActivateHostedCa { name, parent } =
            command.details()
        {
            if self.activate(command.ca(), name, *parent, uow)? {
                status.set_had_effect();
            }
        }
        Ok(())
    }
}


//------------ UpdateAllIncomingResourceCertificatesHandler ------------------

pub struct UpdateAllIncomingResourceCertificatesHandler {
    resource_lookup: Arc<dyn ResourceLookupService>,
    signer: Arc<dyn CertificateSigner>,
    timing: IssuanceTimingConfig,
}

impl UpdateAllIncomingResourceCertificatesHandler {
    pub fn new(
        resource_lookup: Arc<dyn ResourceLookupService>,
        signer: Arc<dyn CertificateSigner>,
        timing: IssuanceTimingConfig,
    ) -> Self {
        UpdateAllIncomingResourceCertificatesHandler {
            resource_lookup,
            signer,
            timing,
        }
    }
}

impl CommandHandler for UpdateAllIncomingResourceCertificatesHandler {
    fn name(&self) -> &'static str {
        "update-all-incoming-resource-certificates"
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Only(&[CommandType::UpdateAllIncomingResourceCertificates])
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        let changed = update_incoming_certificates(
            uow,
            command.ca(),
            self.resource_lookup.as_ref(),
            self.signer.as_ref(),
            &self.timing,
        )?;
        if changed {
            status.set_had_effect();
        }
        Ok(())
    }
}


//------------ AllResourcesCommandHandler ------------------------------------

/// Handles the trust anchor workflow of the all resources CA.
pub struct AllResourcesCommandHandler {
    key_pairs: Arc<dyn KeyPairService>,
    requests: Arc<dyn CertificateRequestCreationService>,
}

impl AllResourcesCommandHandler {
    pub fn new(
        key_pairs: Arc<dyn KeyPairService>,
        requests: Arc<dyn CertificateRequestCreationService>,
    ) -> Self {
        AllResourcesCommandHandler {
            key_pairs,
            requests,
        }
    }
}

impl CommandHandler for AllResourcesCommandHandler {
    fn name(&self) -> &'static str {
        "all-resources-ca"
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Only(&[
            CommandType::GenerateTrustAnchorRequest,
            CommandType::ProcessRevokedKey,
        ])
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        match command.details() {
            CaCommandDetails::GenerateTrustAnchorRequest => {
                let children: Vec<_> = uow
                    .require(command.ca())?
                    .children()
                    .iter()
                    .filter_map(|id| uow.get(*id).map(|ca| ca.identity()))
                    .collect();
                uow.get_mut(command.ca())?.process_certifiable_resources(
                    self.key_pairs.as_ref(),
                    self.requests.as_ref(),
                    &children,
                )?;
                status.set_had_effect();
            }
            CaCommandDetails::ProcessRevokedKey { encoded_ski } => {
                uow.get_mut(command.ca())?.process_revoked_key(encoded_ski)?;
                status.set_had_effect();
            }
            _ => {}
        }
        Ok(())
    }
}


//------------ ExpireOutgoingResourceCertificatesHandler ---------------------

#[derive(Default)]
pub struct ExpireOutgoingResourceCertificatesHandler;

impl CommandHandler for ExpireOutgoingResourceCertificatesHandler {
    fn name(&self) -> &'static str {
        "expire-outgoing-resource-certificates"
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Only(&[CommandType::ExpireOutgoingResourceCertificates])
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        if let CaCommandDetails::ExpireOutgoingResourceCertificates { now } =
            command.details()
        {
            if !uow.require(command.ca())?.is_managed() {
                return Ok(());
            }
            let ca = uow.get_mut(command.ca())?;
            let expired = ca
                .require_managed_keys_mut()?
                .expire_outgoing_certificates(*now)?;
            if expired > 0 {
                info!(
                    "Expired {} certificates issued by CA '{}'",
                    expired,
                    ca.name()
                );
                status.set_had_effect();
            }
        }
        Ok(())
    }
}


//------------ NonHostedPublisherCommandHandler ------------------------------

pub struct NonHostedPublisherCommandHandler {
    limit: usize,
}

impl NonHostedPublisherCommandHandler {
    pub fn new(limit: usize) -> Self {
        NonHostedPublisherCommandHandler { limit }
    }
}

impl CommandHandler for NonHostedPublisherCommandHandler {
    fn name(&self) -> &'static str {
        "non-hosted-publisher"
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Only(&[
            CommandType::ProvisionNonHostedPublisher,
            CommandType::DeleteNonHostedPublisher,
        ])
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        match command.details() {
            CaCommandDetails::ProvisionNonHostedPublisher {
                handle,
                request,
                response,
            } => {
                let repository = NonHostedPublisherRepository {
                    request: request.clone(),
                    response: response.clone(),
                };
                let ca = uow.require(command.ca())?;
                let known = ca
                    .non_hosted()
                    .and_then(|ca| ca.publisher_repositories().get(handle));
                if known == Some(&repository) {
                    return Ok(());
                }
                uow.get_mut(command.ca())?.add_publisher_repository(
                    *handle,
                    repository,
                    self.limit,
                )?;
                status.set_had_effect();
            }
            CaCommandDetails::DeleteNonHostedPublisher { handle } => {
                uow.get_mut(command.ca())?.remove_publisher_repository(*handle)?;
                status.set_had_effect();
            }
            _ => {}
        }
        Ok(())
    }
}


//============ Tests =========================================================
