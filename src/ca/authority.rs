//! The certificate authorities in the tree.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rpki::repository::resources::ResourceSet;
use rpki::repository::x509::{Time, Validity};
use rpki::uri;
use serde::{Deserialize, Serialize};

use crate::api::ca::{CaId, CaIdentity, CaName, CaType, PublisherHandle};
use crate::api::publishers::{PublisherRequest, RepositoryResponse};
use crate::ca::certificates::{
    CertificateIssuanceResponse, CertificateTemplate,
    OutgoingResourceCertificate, OutgoingSubject, SignedCertificate,
};
use crate::ca::keys::KeyPairEntity;
use crate::ca::services::{
    CertificateRequestCreationService, CertificateSigner, KeyPairService,
    ResourceLookupService, TrustAnchorRequest,
};
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};


//------------ ManagedKeys ---------------------------------------------------

/// The key pairs of a CA whose keys are managed by this system.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ManagedKeys {
    #[serde(default)]
    key_pairs: Vec<KeyPairEntity>,
    publication_directory: uri::Rsync,

    /// Set while a key roll or resource change is waiting for a new
    /// manifest and CRL to be published.
    #[serde(default)]
    manifest_and_crl_check_needed: bool,

    next_serial: u64,
}

impl ManagedKeys {
    pub fn new(publication_directory: uri::Rsync) -> Self {
        ManagedKeys {
            key_pairs: Vec::new(),
            publication_directory,
            manifest_and_crl_check_needed: false,
            next_serial: 1,
        }
    }

    pub fn publication_directory(&self) -> &uri::Rsync {
        &self.publication_directory
    }

    pub fn key_pairs(&self) -> &[KeyPairEntity] {
        &self.key_pairs
    }

    pub fn key_pairs_mut(&mut self) -> &mut [KeyPairEntity] {
        &mut self.key_pairs
    }

    pub fn add_key_pair(&mut self, key_pair: KeyPairEntity) {
        self.key_pairs.push(key_pair);
    }

    pub fn find_key_pair(&self, encoded_ski: &str) -> Option<&KeyPairEntity> {
        self.key_pairs
            .iter()
            .find(|kp| kp.encoded_ski() == encoded_ski)
    }

    pub fn find_key_pair_mut(
        &mut self,
        encoded_ski: &str,
    ) -> Option<&mut KeyPairEntity> {
        self.key_pairs
            .iter_mut()
            .find(|kp| kp.encoded_ski() == encoded_ski)
    }

    pub fn current_key_pair(&self) -> Option<&KeyPairEntity> {
        self.key_pairs.iter().find(|kp| kp.is_current())
    }

    pub fn publishable_key_pairs(
        &self,
    ) -> impl Iterator<Item = &KeyPairEntity> {
        self.key_pairs.iter().filter(|kp| kp.is_publishable())
    }

    /// Key pairs that should hold a certificate from the parent.
    pub fn active_key_pairs_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut KeyPairEntity> {
        self.key_pairs.iter_mut().filter(|kp| !kp.is_revoked())
    }

    pub fn manifest_and_crl_check_needed(&self) -> bool {
        self.manifest_and_crl_check_needed
    }

    pub fn set_manifest_and_crl_check_needed(&mut self, needed: bool) {
        self.manifest_and_crl_check_needed = needed;
    }

    /// The resources certified to the current key.
    pub fn certified_resources(&self) -> Option<ResourceSet> {
        self.current_key_pair().and_then(KeyPairEntity::certified_resources)
    }

    pub fn valid_outgoing(
        &self,
    ) -> impl Iterator<Item = &OutgoingResourceCertificate> {
        self.key_pairs.iter().flat_map(KeyPairEntity::valid_outgoing)
    }

    /// Returns the valid certificate issued to a child for its key.
    pub fn valid_child_certificate(
        &self,
        child: CaId,
        subject_key: &str,
    ) -> Option<&OutgoingResourceCertificate> {
        self.key_pairs.iter().find_map(|kp| {
            kp.valid_outgoing_for(OutgoingSubject::ChildCa(child), subject_key)
        })
    }

    fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Issues a certificate to a child CA using the current key.
    ///
    /// Any valid certificate previously issued to the same child key is
    /// revoked.
    pub fn issue_child_certificate(
        &mut self,
        child: &CaIdentity,
        subject_key: &str,
        resources: ResourceSet,
        validity: Validity,
        signer: &dyn CertificateSigner,
    ) -> IssuerResult<CertificateIssuanceResponse> {
        let signing_key = match self.current_key_pair() {
            Some(kp) if kp.incoming().is_some() => kp.encoded_ski().to_string(),
            _ => {
                return Err(Error::IllegalState(format!(
                    "no certified current key to issue a certificate for '{}'",
                    child.name
                )))
            }
        };

        let template = CertificateTemplate {
            serial: self.next_serial(),
            subject_name: child.name.to_string(),
            subject_key: subject_key.to_string(),
            resources,
            validity,
        };
        let der = signer.sign(&signing_key, &template)?;
        let certificate = SignedCertificate::new(template, der);

        let filename = format!("{}.cer", subject_key);
        let outgoing = OutgoingResourceCertificate::new(
            certificate.clone(),
            OutgoingSubject::ChildCa(child.id),
            false,
            Some(&filename),
            Some(&self.publication_directory),
        )?;
        let publication_uri = outgoing
            .publication_uri()
            .cloned()
            .ok_or_else(|| Error::IllegalState("no publication uri".into()))?;

        self.revoke_child_certificates(child.id, Some(subject_key));

        let key_pair = self
            .key_pairs
            .iter_mut()
            .find(|kp| kp.encoded_ski() == signing_key)
            .ok_or_else(|| Error::KeyUnknown(signing_key.clone()))?;
        key_pair.add_outgoing(outgoing);

        Ok(CertificateIssuanceResponse {
            certificate,
            publication_uri,
            inherited_resources: ResourceSet::default(),
        })
    }

    /// Revokes valid certificates issued to a child, optionally only those
    /// for a single key of the child.
    pub fn revoke_child_certificates(
        &mut self,
        child: CaId,
        subject_key: Option<&str>,
    ) -> usize {
        self.key_pairs
            .iter_mut()
            .map(|kp| {
                kp.revoke_outgoing_for(OutgoingSubject::ChildCa(child), subject_key)
            })
            .sum()
    }

    /// Expires outgoing certificates that are past their validity.
    pub fn expire_outgoing_certificates(
        &mut self,
        now: Time,
    ) -> IssuerResult<usize> {
        let mut expired = 0;
        for kp in self.key_pairs.iter_mut() {
            expired += kp.expire_outgoing(now)?;
        }
        Ok(expired)
    }
}


//------------ AllResourcesCa ------------------------------------------------

/// The root of the tree, holding all resources.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AllResourcesCa {
    keys: ManagedKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    upstream_request: Option<TrustAnchorRequest>,
}

impl AllResourcesCa {
    pub fn new(keys: ManagedKeys) -> Self {
        AllResourcesCa {
            keys,
            upstream_request: None,
        }
    }

    pub fn upstream_request(&self) -> Option<&TrustAnchorRequest> {
        self.upstream_request.as_ref()
    }
}


//------------ NonHostedPublisherRepository ----------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NonHostedPublisherRepository {
    pub request: PublisherRequest,
    pub response: RepositoryResponse,
}


//------------ NonHostedCa ---------------------------------------------------

/// A CA that manages its own keys and signs its own objects.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NonHostedCa {
    /// The encoded key identifiers of the keys we certify for this CA.
    #[serde(default)]
    public_keys: Vec<String>,

    #[serde(default)]
    publisher_repositories: BTreeMap<PublisherHandle, NonHostedPublisherRepository>,
}

impl NonHostedCa {
    pub fn new(public_keys: Vec<String>) -> Self {
        NonHostedCa {
            public_keys,
            publisher_repositories: BTreeMap::new(),
        }
    }

    pub fn public_keys(&self) -> &[String] {
        &self.public_keys
    }

    pub fn publisher_repositories(
        &self,
    ) -> &BTreeMap<PublisherHandle, NonHostedPublisherRepository> {
        &self.publisher_repositories
    }
}


//------------ CaKind --------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CaKind {
    AllResources(AllResourcesCa),
    Production(ManagedKeys),
    Hosted(ManagedKeys),
    NonHosted(NonHostedCa),
}


//------------ CertificateAuthority ------------------------------------------

/// A node in the CA tree.
///
/// Children are kept as ids. The parent is a back reference that can only
/// be resolved through the tree.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateAuthority {
    id: CaId,
    name: CaName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<CaId>,
    #[serde(default)]
    children: BTreeSet<CaId>,
    kind: CaKind,
}

impl CertificateAuthority {
    pub fn new(
        id: CaId,
        name: CaName,
        parent: Option<CaId>,
        kind: CaKind,
    ) -> Self {
        CertificateAuthority {
            id,
            name,
            parent,
            children: BTreeSet::new(),
            kind,
        }
    }

    pub fn id(&self) -> CaId {
        self.id
    }

    pub fn name(&self) -> &CaName {
        &self.name
    }

    pub fn identity(&self) -> CaIdentity {
        CaIdentity::new(self.id, self.name.clone())
    }

    pub fn parent(&self) -> Option<CaId> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<CaId> {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: CaId) {
        self.children.insert(child);
    }

    pub fn kind(&self) -> &CaKind {
        &self.kind
    }

    pub fn ca_type(&self) -> CaType {
        match self.kind {
            CaKind::AllResources(_) => CaType::AllResources,
            CaKind::Production(_) => CaType::Production,
            CaKind::Hosted(_) => CaType::Hosted,
            CaKind::NonHosted(_) => CaType::NonHosted,
        }
    }

    /// Whether the keys of this CA are managed by this system.
    pub fn is_managed(&self) -> bool {
        self.managed_keys().is_some()
    }

    pub fn managed_keys(&self) -> Option<&ManagedKeys> {
        match &self.kind {
            CaKind::AllResources(ca) => Some(&ca.keys),
            CaKind::Production(keys) | CaKind::Hosted(keys) => Some(keys),
            CaKind::NonHosted(_) => None,
        }
    }

    pub fn managed_keys_mut(&mut self) -> Option<&mut ManagedKeys> {
        match &mut self.kind {
            CaKind::AllResources(ca) => Some(&mut ca.keys),
            CaKind::Production(keys) | CaKind::Hosted(keys) => Some(keys),
            CaKind::NonHosted(_) => None,
        }
    }

    /// Like `managed_keys_mut` but fails for non-hosted CAs.
    pub fn require_managed_keys_mut(&mut self) -> IssuerResult<&mut ManagedKeys> {
        let name = self.name.clone();
        self.managed_keys_mut().ok_or(Error::CaNotManaged(name))
    }

    pub fn non_hosted(&self) -> Option<&NonHostedCa> {
        match &self.kind {
            CaKind::NonHosted(ca) => Some(ca),
            _ => None,
        }
    }

    pub fn publishable_key_pairs(
        &self,
    ) -> impl Iterator<Item = &KeyPairEntity> {
        self.managed_keys()
            .into_iter()
            .flat_map(ManagedKeys::publishable_key_pairs)
    }

    pub fn valid_outgoing_certificates(
        &self,
    ) -> impl Iterator<Item = &OutgoingResourceCertificate> {
        self.managed_keys()
            .into_iter()
            .flat_map(ManagedKeys::valid_outgoing)
    }

    /// The resources certified to this CA by its parent.
    pub fn certified_resources(&self) -> Option<ResourceSet> {
        self.managed_keys().and_then(ManagedKeys::certified_resources)
    }

    /// Returns the resources this CA may be certified for.
    ///
    /// `None` means the CA should not be certified this round, either
    /// because it holds no resources or because the lookup failed.
    pub fn lookup_certifiable_resources(
        &self,
        registry: &dyn ResourceLookupService,
    ) -> Option<ResourceSet> {
        match self.kind {
            CaKind::AllResources(_) => Some(ResourceSet::all()),
            _ => match registry.lookup_resources(&self.identity()) {
                Ok(resources) => resources,
                Err(e) => {
                    warn!(
                        "Could not look up resources for CA '{}': {}",
                        self.name, e
                    );
                    None
                }
            },
        }
    }

    /// Prepares the request to the trust anchor.
    ///
    /// Only applies to the all resources CA. Creates the single key pair of
    /// the CA if needed.
    pub fn process_certifiable_resources(
        &mut self,
        key_service: &dyn KeyPairService,
        request_service: &dyn CertificateRequestCreationService,
        children: &[CaIdentity],
    ) -> IssuerEmptyResult {
        let identity = self.identity();
        let root = match &mut self.kind {
            CaKind::AllResources(root) => root,
            _ => return Err(Error::CaNotAllResources(identity.name)),
        };

        if root.keys.key_pairs.is_empty() {
            let mut key_pair = key_service.create_key_pair()?;
            key_pair.request_certificate();
            info!(
                "Created key '{}' for CA '{}'",
                key_pair.encoded_ski(),
                identity.name
            );
            root.keys.add_key_pair(key_pair);
        }

        let signing_key = root
            .keys
            .key_pairs
            .iter()
            .find(|kp| !kp.is_revoked())
            .map(|kp| kp.encoded_ski().to_string())
            .ok_or_else(|| {
                Error::IllegalState(format!(
                    "CA '{}' has no usable key",
                    identity.name
                ))
            })?;

        let requests = request_service.request_production_certificates(
            &ResourceSet::all(),
            &identity,
            &signing_key,
            children,
        );
        debug!(
            "Created {} signing requests for CA '{}'",
            requests.len(),
            identity.name
        );
        root.upstream_request =
            Some(request_service.create_trust_anchor_request(requests));
        Ok(())
    }

    /// Marks the key revoked by the trust anchor as revoked and withdraws
    /// everything it published.
    pub fn process_revoked_key(&mut self, encoded_ski: &str) -> IssuerEmptyResult {
        let identity = self.identity();
        let root = match &mut self.kind {
            CaKind::AllResources(root) => root,
            _ => return Err(Error::CaNotAllResources(identity.name)),
        };
        let key_pair = root
            .keys
            .find_key_pair_mut(encoded_ski)
            .ok_or_else(|| Error::KeyUnknown(encoded_ski.to_string()))?;
        key_pair.revoke();
        info!("Revoked key '{}' of CA '{}'", encoded_ski, identity.name);
        Ok(())
    }

    pub fn add_publisher_repository(
        &mut self,
        handle: PublisherHandle,
        repository: NonHostedPublisherRepository,
        limit: usize,
    ) -> IssuerEmptyResult {
        let name = self.name.clone();
        let ca = match &mut self.kind {
            CaKind::NonHosted(ca) => ca,
            _ => return Err(Error::CaNotNonHosted(name)),
        };
        if ca.publisher_repositories.contains_key(&handle) {
            return Err(Error::PublisherDuplicate(name, handle));
        }
        if ca.publisher_repositories.len() >= limit {
            return Err(Error::ResourceLimitExceeded { ca: name, limit });
        }
        ca.publisher_repositories.insert(handle, repository);
        Ok(())
    }

    pub fn remove_publisher_repository(
        &mut self,
        handle: PublisherHandle,
    ) -> IssuerEmptyResult {
        let name = self.name.clone();
        let ca = match &mut self.kind {
            CaKind::NonHosted(ca) => ca,
            _ => return Err(Error::CaNotNonHosted(name)),
        };
        match ca.publisher_repositories.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(Error::PublisherRepositoryUnknown(name, handle)),
        }
    }
}


//============ Tests =========================================================
