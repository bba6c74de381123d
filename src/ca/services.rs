//! Collaborators used by the CA model, and simple implementations of them.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use rand::Rng;
use rpki::repository::resources::ResourceSet;
use rpki::repository::x509::Time;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ca::{CaIdentity, CaName};
use crate::ca::certificates::CertificateTemplate;
use crate::ca::keys::KeyPairEntity;
use crate::commons::IssuerResult;


//------------ ResourceLookupService -----------------------------------------

/// Looks up the resources a CA holds according to the resource registry.
pub trait ResourceLookupService: Send + Sync {
    /// Returns `None` if the CA holds no resources.
    fn lookup_resources(
        &self,
        ca: &CaIdentity,
    ) -> IssuerResult<Option<ResourceSet>>;
}


//------------ KeyPairService ------------------------------------------------

pub trait KeyPairService: Send + Sync {
    fn create_key_pair(&self) -> IssuerResult<KeyPairEntity>;
}


//------------ CertificateRequestCreationService -----------------------------

/// Creates requests for certificates to be signed by the offline trust
/// anchor.
pub trait CertificateRequestCreationService: Send + Sync {
    /// Creates one signing request for each of the given children of `ca`,
    /// signed with the given key.
    fn request_production_certificates(
        &self,
        resources: &ResourceSet,
        ca: &CaIdentity,
        signing_key: &str,
        children: &[CaIdentity],
    ) -> Vec<SigningRequest>;

    fn create_trust_anchor_request(
        &self,
        requests: Vec<SigningRequest>,
    ) -> TrustAnchorRequest;
}


//------------ CertificateSigner ---------------------------------------------

/// Signs resource certificates.
pub trait CertificateSigner: Send + Sync {
    /// Returns the DER encoded certificate.
    fn sign(
        &self,
        signing_key: &str,
        template: &CertificateTemplate,
    ) -> IssuerResult<Bytes>;
}


//------------ CaViewService -------------------------------------------------

/// Read access to the CA tree.
pub trait CaViewService: Send + Sync {
    fn find_by_name(&self, name: &CaName) -> Option<CaIdentity>;

    /// Returns all direct and transitive children of the named CA.
    fn find_all_children_ids(
        &self,
        parent: &CaName,
    ) -> IssuerResult<Vec<CaIdentity>>;
}


//------------ SigningRequest ------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SigningRequest {
    pub requesting_ca: CaName,
    pub subject: CaIdentity,
    pub signing_key: String,
    pub resources: ResourceSet,
}


//------------ TrustAnchorRequest --------------------------------------------

/// A bundle of signing requests pending submission to the trust anchor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrustAnchorRequest {
    pub request_id: Uuid,
    pub created: Time,
    pub requests: Vec<SigningRequest>,
}


//------------ SigningRequestFactory -----------------------------------------

#[derive(Clone, Debug, Default)]
pub struct SigningRequestFactory;

impl CertificateRequestCreationService for SigningRequestFactory {
    fn request_production_certificates(
        &self,
        resources: &ResourceSet,
        ca: &CaIdentity,
        signing_key: &str,
        children: &[CaIdentity],
    ) -> Vec<SigningRequest> {
        children
            .iter()
            .map(|child| SigningRequest {
                requesting_ca: ca.name.clone(),
                subject: child.clone(),
                signing_key: signing_key.to_string(),
                resources: resources.clone(),
            })
            .collect()
    }

    fn create_trust_anchor_request(
        &self,
        requests: Vec<SigningRequest>,
    ) -> TrustAnchorRequest {
        TrustAnchorRequest {
            request_id: Uuid::new_v4(),
            created: Time::now(),
            requests,
        }
    }
}


//------------ RandomKeyPairService ------------------------------------------

/// Creates key pairs with random key identifiers.
///
/// The private keys themselves live in the signer, which is keyed by the
/// identifier.
#[derive(Clone, Debug, Default)]
pub struct RandomKeyPairService;

impl KeyPairService for RandomKeyPairService {
    fn create_key_pair(&self) -> IssuerResult<KeyPairEntity> {
        let mut ski = [0u8; 20];
        rand::rng().fill(&mut ski);
        Ok(KeyPairEntity::new(hex::encode_upper(ski)))
    }
}


//------------ StaticResourceRegistry ----------------------------------------

/// An in-memory resource registry.
#[derive(Debug, Default)]
pub struct StaticResourceRegistry {
    resources: RwLock<HashMap<CaName, ResourceSet>>,
}

impl StaticResourceRegistry {
    pub fn set(&self, ca: CaName, resources: ResourceSet) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ca, resources);
    }

    pub fn remove(&self, ca: &CaName) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ca);
    }

    pub fn is_empty(&self) -> bool {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl ResourceLookupService for StaticResourceRegistry {
    fn lookup_resources(
        &self,
        ca: &CaIdentity,
    ) -> IssuerResult<Option<ResourceSet>> {
        let resources = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(resources
            .get(&ca.name)
            .filter(|set| !set.is_empty())
            .cloned())
    }
}


//============ Tests =========================================================
