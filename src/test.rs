//! Helper functions for testing the issuing engine.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Duration;
use rpki::ca::idexchange::ServiceUri;
use rpki::ca::publication::Base64;
use rpki::repository::resources::ResourceSet;
use rpki::repository::x509::{Time, Validity};
use rpki::uri;

use crate::api::ca::{CaId, CaName, PublisherHandle};
use crate::api::publishers::{
    repository_publisher_handle, PublisherRequest, RepositoryResponse,
};
use crate::ca::authority::{
    AllResourcesCa, CaKind, CertificateAuthority, ManagedKeys, NonHostedCa,
    NonHostedPublisherRepository,
};
use crate::ca::certificates::{
    CertificateIssuanceResponse, CertificateTemplate,
    OutgoingResourceCertificate, OutgoingSubject, PublishedObject,
    SignedCertificate,
};
use crate::ca::commands::{CaCommand, CommandStatus};
use crate::ca::keys::KeyPairEntity;
use crate::ca::services::{CertificateSigner, StaticResourceRegistry};
use crate::ca::tree::{CaRepository, CaTree};
use crate::commons::error::Error;
use crate::commons::IssuerResult;
use crate::config::IssuanceTimingConfig;
use crate::constants::{ALL_RESOURCES_CA_NAME, PRODUCTION_CA_NAME};
use crate::server::background::ActiveNodeService;
use crate::server::dispatch::CommandService;
use crate::server::publishers::{
    NonHostedPublisherRepositoryService, RepositoryServiceError,
};

pub use crate::ca::equivalent_resources;


//------------ Resources and URIs --------------------------------------------

pub fn resources(asn: &str, v4: &str, v6: &str) -> ResourceSet {
    ResourceSet::from_strs(asn, v4, v6).unwrap()
}

pub fn ipv4_resources(v4: &str) -> ResourceSet {
    resources("", v4, "")
}

pub fn rsync(s: &str) -> uri::Rsync {
    uri::Rsync::from_str(s).unwrap()
}

pub fn https(s: &str) -> uri::Https {
    uri::Https::from_str(s).unwrap()
}

pub fn current_validity() -> Validity {
    Validity::new(Time::five_minutes_ago(), Time::now() + Duration::weeks(52))
}

pub fn expired_validity() -> Validity {
    Validity::new(
        Time::now() - Duration::weeks(52),
        Time::now() - Duration::weeks(1),
    )
}


//------------ Certificates --------------------------------------------------

pub fn signed_certificate(
    resources: ResourceSet,
    validity: Validity,
) -> SignedCertificate {
    let template = CertificateTemplate {
        serial: 1,
        subject_name: "CN=test".to_string(),
        subject_key: "SUBJECTKEY".to_string(),
        resources,
        validity,
    };
    SignedCertificate::new(template, Bytes::from_static(b"certificate"))
}

pub fn issuance_response(resources: ResourceSet) -> CertificateIssuanceResponse {
    issuance_response_inheriting(resources, ResourceSet::default())
}

fn issuance_response_inheriting(
    own: ResourceSet,
    inherited: ResourceSet,
) -> CertificateIssuanceResponse {
    CertificateIssuanceResponse {
        certificate: signed_certificate(own, current_validity()),
        publication_uri: rsync("rsync://localhost/repo/parent/key.cer"),
        inherited_resources: inherited,
    }
}

/// A current key pair certified for the given resources.
pub fn certified_key(ski: &str, resources: ResourceSet) -> KeyPairEntity {
    certified_key_inheriting(ski, resources, ResourceSet::default())
}

pub fn certified_key_inheriting(
    ski: &str,
    own: ResourceSet,
    inherited: ResourceSet,
) -> KeyPairEntity {
    let mut key = KeyPairEntity::new(ski);
    key.request_certificate();
    key.update_incoming_certificate(issuance_response_inheriting(own, inherited));
    key
}

pub fn child_certificate(
    child: CaId,
    resources: ResourceSet,
) -> OutgoingResourceCertificate {
    OutgoingResourceCertificate::new(
        signed_certificate(resources, current_validity()),
        OutgoingSubject::ChildCa(child),
        false,
        Some(&format!("{}.cer", child)),
        Some(&rsync("rsync://localhost/repo/ta/")),
    )
    .unwrap()
}

pub fn published_object(filename: &str) -> PublishedObject {
    PublishedObject::new(
        filename,
        rsync("rsync://localhost/repo/ta/"),
        Bytes::from_static(b"object"),
        current_validity(),
    )
}


//------------ DummySigner ---------------------------------------------------

/// Produces a fake encoding naming the signing key and serial.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummySigner;

impl CertificateSigner for DummySigner {
    fn sign(
        &self,
        signing_key: &str,
        template: &CertificateTemplate,
    ) -> IssuerResult<Bytes> {
        Ok(Bytes::from(format!("{}:{}", signing_key, template.serial)))
    }
}


//------------ Certificate Authorities ---------------------------------------

pub fn all_resources_ca(id: CaId) -> CertificateAuthority {
    let mut keys = ManagedKeys::new(rsync("rsync://localhost/repo/ta/"));
    keys.add_key_pair(certified_key("TAKEY", ResourceSet::all()));
    CertificateAuthority::new(
        id,
        CaName::from(ALL_RESOURCES_CA_NAME),
        None,
        CaKind::AllResources(AllResourcesCa::new(keys)),
    )
}

pub fn production_ca(id: CaId, parent: CaId) -> CertificateAuthority {
    production_ca_with(id, parent, ResourceSet::all())
}

pub fn production_ca_with(
    id: CaId,
    parent: CaId,
    resources: ResourceSet,
) -> CertificateAuthority {
    let mut keys = ManagedKeys::new(rsync("rsync://localhost/repo/prod/"));
    keys.add_key_pair(certified_key("PRODKEY", resources));
    CertificateAuthority::new(
        id,
        CaName::from(PRODUCTION_CA_NAME),
        Some(parent),
        CaKind::Production(keys),
    )
}

/// A hosted CA with a single key that waits for its certificate.
pub fn hosted_ca(id: CaId, name: &str, parent: CaId) -> CertificateAuthority {
    let mut keys = ManagedKeys::new(rsync(&format!(
        "rsync://localhost/repo/hosted/{}/",
        id
    )));
    let mut key = KeyPairEntity::new(format!("KEY-{}", id));
    key.request_certificate();
    keys.add_key_pair(key);
    CertificateAuthority::new(id, name.into(), Some(parent), CaKind::Hosted(keys))
}

pub fn non_hosted_ca(id: CaId, name: &str, parent: CaId) -> CertificateAuthority {
    CertificateAuthority::new(
        id,
        name.into(),
        Some(parent),
        CaKind::NonHosted(NonHostedCa::new(vec![
            "NONHOSTED-1".to_string(),
            "NONHOSTED-2".to_string(),
        ])),
    )
}

/// A valid publisher request using the given informational handle.
pub fn publisher_request(handle: &str) -> PublisherRequest {
    let mut request = PublisherRequest::parse(
        include_str!("../test/remote/publisher-request.xml").as_bytes(),
    )
    .unwrap();
    request.set_publisher_handle(handle.parse().unwrap());
    request
}

/// A request whose identity is not a certificate at all.
pub fn invalid_publisher_request() -> PublisherRequest {
    PublisherRequest::new(
        Base64::from_content(b"id certificate"),
        "nonhosted".parse().unwrap(),
        None,
    )
}

/// A response as the repository service gives it for a new publisher.
pub fn repository_response(handle: PublisherHandle) -> RepositoryResponse {
    let template = RepositoryResponse::parse(
        include_str!("../test/remote/repository-response.xml").as_bytes(),
    )
    .unwrap();
    RepositoryResponse::new(
        template.id_cert().clone(),
        repository_publisher_handle(handle),
        ServiceUri::from_str(&format!(
            "https://repo.example.net/rfc8181/{}/",
            handle
        ))
        .unwrap(),
        rsync(&format!("rsync://repo.example.net/repo/{}/", handle)),
        Some(https("https://repo.example.net/rrdp/notification.xml")),
        None,
    )
}

pub fn publisher_repository(handle: PublisherHandle) -> NonHostedPublisherRepository {
    NonHostedPublisherRepository {
        request: publisher_request("nonhosted"),
        response: repository_response(handle),
    }
}


//------------ Fixture Tree --------------------------------------------------

/// Issues certificates for all keys of the child as its parent would.
fn certify(
    repository: &CaRepository,
    parent: CaId,
    child: CaId,
    resources: &ResourceSet,
) {
    let mut uow = repository.begin();
    let (parent_ca, child_ca) = uow.get_pair_mut(parent, child).unwrap();
    let identity = child_ca.identity();
    let subject_keys: Vec<String> = match child_ca.non_hosted() {
        Some(ca) => ca.public_keys().to_vec(),
        None => child_ca
            .managed_keys()
            .unwrap()
            .key_pairs()
            .iter()
            .map(|kp| kp.encoded_ski().to_string())
            .collect(),
    };

    for ski in subject_keys {
        let response = parent_ca
            .managed_keys_mut()
            .unwrap()
            .issue_child_certificate(
                &identity,
                &ski,
                resources.clone(),
                IssuanceTimingConfig::default().new_child_cert_validity(),
                &DummySigner,
            )
            .unwrap();
        if let Some(keys) = child_ca.managed_keys_mut() {
            keys.find_key_pair_mut(&ski)
                .unwrap()
                .update_incoming_certificate(response);
        }
    }
    uow.commit();
}

/// A small tree with every kind of CA, in line with [`fixture_registry`].
///
/// ```text
/// 1 ALL Resources            all resources
/// └ 2 Production CA          all resources
///   ├ 3 member-a (hosted)    10.0.0.0/16
///   │ └ 4 member-b (hosted)  10.0.0.0/24
///   └ 5 nonhosted            10.4.0.0/16, two keys
/// ```
pub fn fixture_tree() -> CaTree {
    let (all, production) = (CaId::new(1), CaId::new(2));
    let (member_a, member_b, nonhosted) = (CaId::new(3), CaId::new(4), CaId::new(5));

    let mut production_keys = ManagedKeys::new(rsync("rsync://localhost/repo/prod/"));
    let mut production_key = KeyPairEntity::new("PRODKEY");
    production_key.request_certificate();
    production_keys.add_key_pair(production_key);

    let mut tree = CaTree::default();
    tree.insert(all_resources_ca(all)).unwrap();
    tree.insert(CertificateAuthority::new(
        production,
        CaName::from(PRODUCTION_CA_NAME),
        Some(all),
        CaKind::Production(production_keys),
    ))
    .unwrap();
    tree.insert(hosted_ca(member_a, "CN=member-a", production)).unwrap();
    tree.insert(hosted_ca(member_b, "CN=member-b", member_a)).unwrap();
    tree.insert(non_hosted_ca(nonhosted, "CN=nonhosted", production))
        .unwrap();

    let repository = CaRepository::new(tree);
    certify(&repository, all, production, &ResourceSet::all());
    certify(&repository, production, member_a, &ipv4_resources("10.0.0.0/16"));
    certify(&repository, member_a, member_b, &ipv4_resources("10.0.0.0/24"));
    certify(&repository, production, nonhosted, &ipv4_resources("10.4.0.0/16"));
    repository.snapshot()
}

/// The registry holding exactly what the CAs in [`fixture_tree`] hold.
pub fn fixture_registry() -> Arc<StaticResourceRegistry> {
    let registry = StaticResourceRegistry::default();
    registry.set(CaName::from(PRODUCTION_CA_NAME), ResourceSet::all());
    registry.set("CN=member-a".into(), ipv4_resources("10.0.0.0/16"));
    registry.set("CN=member-b".into(), ipv4_resources("10.0.0.0/24"));
    registry.set("CN=nonhosted".into(), ipv4_resources("10.4.0.0/16"));
    Arc::new(registry)
}


//------------ Mock Collaborators --------------------------------------------

/// Records the publishers provisioned and deleted.
#[derive(Debug, Default)]
pub struct RecordingRepositoryService {
    provisioned: Mutex<Vec<PublisherHandle>>,
    deleted: Mutex<Vec<PublisherHandle>>,
    provision_failure: Mutex<Option<RepositoryServiceError>>,
    delete_failure: Mutex<Option<RepositoryServiceError>>,
}

impl RecordingRepositoryService {
    pub fn provisioned(&self) -> Vec<PublisherHandle> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<PublisherHandle> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fail_provision(&self, err: RepositoryServiceError) {
        *self.provision_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_delete(&self, err: RepositoryServiceError) {
        *self.delete_failure.lock().unwrap() = Some(err);
    }
}

impl NonHostedPublisherRepositoryService for RecordingRepositoryService {
    fn provision_publisher(
        &self,
        handle: PublisherHandle,
        _request: &PublisherRequest,
    ) -> Result<RepositoryResponse, RepositoryServiceError> {
        if let Some(err) = self.provision_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.provisioned.lock().unwrap().push(handle);
        Ok(repository_response(handle))
    }

    fn delete_publisher(
        &self,
        handle: PublisherHandle,
    ) -> Result<(), RepositoryServiceError> {
        if let Some(err) = self.delete_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.deleted.lock().unwrap().push(handle);
        Ok(())
    }
}

/// Records executed commands without touching any tree.
#[derive(Debug, Default)]
pub struct RecordingCommandService {
    executed: Mutex<Vec<CaId>>,
    failing: HashSet<CaId>,
    had_effect: bool,
}

impl RecordingCommandService {
    pub fn with_effect() -> Self {
        RecordingCommandService {
            had_effect: true,
            ..Default::default()
        }
    }

    /// Fails every command for the given CAs.
    pub fn failing_for(ids: &[CaId]) -> Self {
        RecordingCommandService {
            failing: ids.iter().copied().collect(),
            had_effect: true,
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<CaId> {
        self.executed.lock().unwrap().clone()
    }
}

impl CommandService for RecordingCommandService {
    fn execute(&self, command: CaCommand) -> IssuerResult<CommandStatus> {
        self.executed.lock().unwrap().push(command.ca());
        if self.failing.contains(&command.ca()) {
            return Err(Error::custom(format!("command for {} failed", command.ca())));
        }
        let mut status = CommandStatus::default();
        if self.had_effect {
            status.set_had_effect();
        }
        Ok(status)
    }
}

/// Fails every command.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingCommandService;

impl CommandService for FailingCommandService {
    fn execute(&self, command: CaCommand) -> IssuerResult<CommandStatus> {
        Err(Error::custom(format!("cannot execute {}", command)))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InactiveNode;

impl ActiveNodeService for InactiveNode {
    fn is_active_node(&self) -> bool {
        false
    }
}
