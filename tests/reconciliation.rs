//! Tests the reconciliation of the CA tree against the resource registry.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rpki::ca::idexchange::ServiceUri;
use rpki::repository::resources::ResourceSet;
use rpki::uri;

use rpki_issuer::api::ca::{CaId, CaName, PublisherHandle};
use rpki_issuer::api::publishers::{
    repository_publisher_handle, PublisherRequest, RepositoryResponse,
};
use rpki_issuer::ca::authority::{
    AllResourcesCa, CaKind, CertificateAuthority, ManagedKeys, NonHostedCa,
};
use rpki_issuer::ca::certificates::{
    CertificateIssuanceResponse, CertificateTemplate, SignedCertificate,
};
use rpki_issuer::ca::commands::CaCommand;
use rpki_issuer::ca::equivalent_resources;
use rpki_issuer::ca::keys::KeyPairEntity;
use rpki_issuer::ca::services::{
    CertificateSigner, RandomKeyPairService, SigningRequestFactory,
    StaticResourceRegistry,
};
use rpki_issuer::ca::tree::CaTree;
use rpki_issuer::commons::actor::Actor;
use rpki_issuer::commons::error::Error;
use rpki_issuer::commons::IssuerResult;
use rpki_issuer::config::{Config, IssuanceTimingConfig};
use rpki_issuer::constants::{ALL_RESOURCES_CA_NAME, PRODUCTION_CA_NAME};
use rpki_issuer::server::background::{
    AlwaysActive, BackgroundService, BackgroundServiceExecutionResult,
    UpdateReport,
};
use rpki_issuer::server::dispatch::CommandService;
use rpki_issuer::server::invariants::{InvariantChecker, InvariantModel};
use rpki_issuer::server::publishers::{
    NonHostedPublisherRepositoryService, RepositoryServiceError,
};
use rpki_issuer::server::{IssuerServer, IssuerServices};


//------------ Test Environment ----------------------------------------------

const PUBLISHER_REQUEST: &[u8] =
    include_bytes!("../test/remote/publisher-request.xml");
const REPOSITORY_RESPONSE: &[u8] =
    include_bytes!("../test/remote/repository-response.xml");

/// Signs everything, except certificates for refused subjects.
#[derive(Default)]
struct TestSigner {
    refused: Mutex<HashSet<String>>,
}

impl TestSigner {
    fn refuse(&self, subject_name: &str) {
        self.refused.lock().unwrap().insert(subject_name.to_string());
    }
}

impl CertificateSigner for TestSigner {
    fn sign(
        &self,
        signing_key: &str,
        template: &CertificateTemplate,
    ) -> IssuerResult<Bytes> {
        if self.refused.lock().unwrap().contains(&template.subject_name) {
            return Err(Error::Signer("signer refuses".into()));
        }
        Ok(Bytes::from(format!("{}:{}", signing_key, template.serial)))
    }
}

#[derive(Default)]
struct CountingRepositoryService {
    calls: Mutex<usize>,
}

impl NonHostedPublisherRepositoryService for CountingRepositoryService {
    fn provision_publisher(
        &self,
        handle: PublisherHandle,
        _request: &PublisherRequest,
    ) -> Result<RepositoryResponse, RepositoryServiceError> {
        *self.calls.lock().unwrap() += 1;
        let template = RepositoryResponse::parse(REPOSITORY_RESPONSE).unwrap();
        Ok(RepositoryResponse::new(
            template.id_cert().clone(),
            repository_publisher_handle(handle),
            ServiceUri::from_str("https://repo.example.net/rfc8181/").unwrap(),
            rsync("rsync://repo.example.net/repo/"),
            None,
            None,
        ))
    }

    fn delete_publisher(
        &self,
        _handle: PublisherHandle,
    ) -> Result<(), RepositoryServiceError> {
        *self.calls.lock().unwrap() += 1;
        Ok(())
    }
}

fn ipv4(s: &str) -> ResourceSet {
    ResourceSet::from_strs("", s, "").unwrap()
}

fn rsync(s: &str) -> uri::Rsync {
    uri::Rsync::from_str(s).unwrap()
}

/// The all resources CA as certified by the trust anchor, an uncertified
/// production CA and a non-hosted CA.
fn initial_tree() -> CaTree {
    let template = CertificateTemplate {
        serial: 1,
        subject_name: ALL_RESOURCES_CA_NAME.to_string(),
        subject_key: "TAKEY".to_string(),
        resources: ResourceSet::all(),
        validity: IssuanceTimingConfig::default().new_child_cert_validity(),
    };
    let mut ta_key = KeyPairEntity::new("TAKEY");
    ta_key.request_certificate();
    ta_key.update_incoming_certificate(CertificateIssuanceResponse {
        certificate: SignedCertificate::new(template, Bytes::from_static(b"ta")),
        publication_uri: rsync("rsync://localhost/repo/ta.cer"),
        inherited_resources: ResourceSet::default(),
    });
    let mut all_keys = ManagedKeys::new(rsync("rsync://localhost/repo/ta/"));
    all_keys.add_key_pair(ta_key);

    let mut production_key = KeyPairEntity::new("PRODKEY");
    production_key.request_certificate();
    let mut production_keys =
        ManagedKeys::new(rsync("rsync://localhost/repo/prod/"));
    production_keys.add_key_pair(production_key);

    let mut tree = CaTree::default();
    tree.insert(CertificateAuthority::new(
        CaId::new(1),
        ALL_RESOURCES_CA_NAME.into(),
        None,
        CaKind::AllResources(AllResourcesCa::new(all_keys)),
    ))
    .unwrap();
    tree.insert(CertificateAuthority::new(
        CaId::new(2),
        PRODUCTION_CA_NAME.into(),
        Some(CaId::new(1)),
        CaKind::Production(production_keys),
    ))
    .unwrap();
    tree.insert(CertificateAuthority::new(
        CaId::new(3),
        "CN=nonhosted".into(),
        Some(CaId::new(2)),
        CaKind::NonHosted(NonHostedCa::new(vec!["NONHOSTED".into()])),
    ))
    .unwrap();
    tree
}

struct Env {
    config: Config,
    registry: Arc<StaticResourceRegistry>,
    repository_service: Arc<CountingRepositoryService>,
    signer: Arc<TestSigner>,
    server: IssuerServer,
}

impl Env {
    fn new(update_count_limit: usize) -> Self {
        let config = Config {
            update_count_limit,
            update_workers: Some(2),
            publisher_repositories_limit: 1,
            ..Default::default()
        };
        let registry = Arc::new(StaticResourceRegistry::default());
        registry.set(PRODUCTION_CA_NAME.into(), ResourceSet::all());
        registry.set("CN=nonhosted".into(), ipv4("10.9.0.0/16"));

        let repository_service = Arc::new(CountingRepositoryService::default());
        let signer = Arc::new(TestSigner::default());
        let services = IssuerServices {
            resource_lookup: registry.clone(),
            key_pairs: Arc::new(RandomKeyPairService),
            requests: Arc::new(SigningRequestFactory),
            signer: signer.clone(),
        };
        let server = IssuerServer::build(
            &config,
            initial_tree(),
            services,
            repository_service.clone(),
        );
        Env {
            config,
            registry,
            repository_service,
            signer,
            server,
        }
    }

    /// Activates a hosted CA under the production CA.
    fn add_member(&self, name: &str, resources: &str) -> CaId {
        self.registry.set(name.into(), ipv4(resources));
        let id = self.server.repository().allocate_id();
        let status = self
            .server
            .dispatcher()
            .execute(CaCommand::activate_hosted_ca(
                id,
                name.into(),
                CaId::new(2),
                Actor::user("admin"),
            ))
            .unwrap();
        assert!(status.had_effect());
        id
    }

    fn reconcile(&self) -> UpdateReport {
        self.server
            .update_service(
                &self.config,
                Arc::new(AlwaysActive),
                self.registry.clone(),
            )
            .run()
            .unwrap()
    }

    fn certified(&self, id: CaId) -> Option<ResourceSet> {
        self.server
            .repository()
            .read(|tree| tree.get(id).and_then(|ca| ca.certified_resources()))
    }

    fn assert_consistent(&self) {
        let tree = self.server.repository().snapshot();
        for model in [InvariantModel::Hosted, InvariantModel::Managed] {
            let violations = InvariantChecker::new(model).check_tree(&tree);
            assert!(violations.is_empty(), "{:?}", violations);
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[test]
fn reconciliation_follows_registry() {
    let env = Env::new(1000);

    // The first run certifies the production and the non-hosted CA.
    let report = env.reconcile();
    assert_eq!(report.considered, 1);
    assert_eq!(report.updated, 1);
    assert!(equivalent_resources(
        &env.certified(CaId::new(2)).unwrap(),
        &ResourceSet::all()
    ));

    let a = env.add_member("CN=member-a", "10.0.0.0/16");
    let b = env.add_member("CN=member-b", "10.1.0.0/16");
    let c = env.add_member("CN=member-c", "10.2.0.0/16");
    assert!(equivalent_resources(&env.certified(a).unwrap(), &ipv4("10.0.0.0/16")));

    // Nothing changed in the registry.
    let report = env.reconcile();
    assert_eq!(report, UpdateReport { considered: 4, ..Default::default() });

    env.registry.set("CN=member-a".into(), ipv4("10.0.0.0/15"));
    env.registry.set("CN=member-b".into(), ipv4("192.168.0.0/16"));
    env.registry.remove(&"CN=member-c".into());
    let report = env.reconcile();
    assert_eq!(
        report,
        UpdateReport { updated: 2, considered: 4, ..Default::default() }
    );

    assert!(equivalent_resources(&env.certified(a).unwrap(), &ipv4("10.0.0.0/15")));
    assert!(equivalent_resources(&env.certified(b).unwrap(), &ipv4("192.168.0.0/16")));
    // CAs missing from the registry are left alone.
    assert!(equivalent_resources(&env.certified(c).unwrap(), &ipv4("10.2.0.0/16")));
    env.assert_consistent();
}

#[test]
fn update_budget_is_never_exceeded() {
    let env = Env::new(2);
    env.reconcile();

    let members: Vec<CaId> = (0..5)
        .map(|i| env.add_member(&format!("CN=member-{}", i), &format!("10.{}.0.0/16", i)))
        .collect();
    for i in 0..5 {
        env.registry
            .set(format!("CN=member-{}", i).into(), ipv4(&format!("10.{}.0.0/24", i)));
    }

    let report = env.reconcile();
    assert_eq!(report.updated, 2);
    assert_eq!(report.considered, 6);

    // Later runs pick up what is left.
    for _ in 0..3 {
        assert!(env.reconcile().updated <= 2);
    }
    for (i, id) in members.iter().enumerate() {
        assert!(equivalent_resources(
            &env.certified(*id).unwrap(),
            &ipv4(&format!("10.{}.0.0/24", i))
        ));
    }
    env.assert_consistent();
}

#[test]
fn failing_child_does_not_affect_siblings() {
    let env = Env::new(1000);
    env.reconcile();

    let good = env.add_member("CN=good", "10.0.0.0/16");
    let faulty = env.add_member("CN=faulty", "10.1.0.0/16");
    let other = env.add_member("CN=other", "10.2.0.0/16");
    env.signer.refuse("CN=faulty");

    env.registry.set("CN=good".into(), ipv4("10.0.0.0/15"));
    env.registry.set("CN=faulty".into(), ipv4("10.1.0.0/24"));
    env.registry.set("CN=other".into(), ipv4("10.2.0.0/24"));
    let report = env.reconcile();
    assert_eq!(
        report,
        UpdateReport { updated: 2, considered: 4, failed: 1, beyond_limit: 0 }
    );

    assert!(equivalent_resources(&env.certified(good).unwrap(), &ipv4("10.0.0.0/15")));
    assert!(equivalent_resources(&env.certified(other).unwrap(), &ipv4("10.2.0.0/24")));
    // The failed update was rolled back.
    assert!(equivalent_resources(&env.certified(faulty).unwrap(), &ipv4("10.1.0.0/16")));
    env.assert_consistent();

    // A failing child does not fail the job as a whole.
    let service = env.server.update_service(
        &env.config,
        Arc::new(AlwaysActive),
        env.registry.clone(),
    );
    assert_eq!(service.execute(), BackgroundServiceExecutionResult::Success);
}

#[test]
fn refused_activation_leaves_no_ca_behind() {
    let env = Env::new(1000);
    env.reconcile();
    env.signer.refuse("CN=faulty");

    env.registry.set("CN=faulty".into(), ipv4("10.1.0.0/16"));
    let faulty = env.server.repository().allocate_id();
    let res = env.server.dispatcher().execute(CaCommand::activate_hosted_ca(
        faulty,
        CaName::from("CN=faulty"),
        CaId::new(2),
        Actor::user("admin"),
    ));
    assert!(matches!(res, Err(Error::Signer(_))));
    assert!(env.server.repository().read(|tree| tree.get(faulty).is_none()));
    env.assert_consistent();
}

#[test]
fn publisher_limit_needs_no_external_call() {
    let env = Env::new(1000);
    let nonhosted = CaName::from("CN=nonhosted");

    let handle = env
        .server
        .publishers()
        .provision_xml(&nonhosted, PUBLISHER_REQUEST)
        .unwrap();
    assert_eq!(*env.repository_service.calls.lock().unwrap(), 1);

    let request = PublisherRequest::parse(PUBLISHER_REQUEST).unwrap();
    let res = env.server.publishers().provision(&nonhosted, request);
    assert!(matches!(res, Err(Error::ResourceLimitExceeded { limit: 1, .. })));
    assert_eq!(*env.repository_service.calls.lock().unwrap(), 1);

    let response = env
        .server
        .publishers()
        .repository_response_xml(&nonhosted, handle)
        .unwrap();
    let response = RepositoryResponse::parse(response.as_bytes()).unwrap();
    assert_eq!(response.publisher_handle(), &repository_publisher_handle(handle));

    env.server.publishers().delete(&nonhosted, handle).unwrap();
    assert_eq!(*env.repository_service.calls.lock().unwrap(), 2);
    assert!(env.server.publishers().list(&nonhosted).unwrap().is_empty());
}
