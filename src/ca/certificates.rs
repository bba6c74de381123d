//! Resource certificates as received and issued by a CA.
//!
//! Encoding and signing are done elsewhere. The types here only track the
//! resulting artifacts together with their lifecycle.

use std::fmt;

use bytes::Bytes;
use rpki::repository::resources::ResourceSet;
use rpki::repository::x509::{Time, Validity};
use rpki::uri;
use serde::{Deserialize, Serialize};

use crate::api::ca::{CaId, OutgoingStatus};
use crate::commons::error::Error;
use crate::commons::util::ext_serde;
use crate::commons::IssuerResult;


//------------ CertificateTemplate -------------------------------------------

/// Everything needed to sign a new resource certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateTemplate {
    pub serial: u64,
    pub subject_name: String,
    pub subject_key: String,
    pub resources: ResourceSet,
    pub validity: Validity,
}


//------------ SignedCertificate ---------------------------------------------

/// A signed X.509 resource certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedCertificate {
    serial: u64,
    subject_name: String,
    subject_key: String,
    resources: ResourceSet,
    validity: Validity,
    #[serde(deserialize_with = "ext_serde::de_bytes", serialize_with = "ext_serde::ser_bytes")]
    der: Bytes,
}

impl SignedCertificate {
    pub fn new(template: CertificateTemplate, der: Bytes) -> Self {
        SignedCertificate {
            serial: template.serial,
            subject_name: template.subject_name,
            subject_key: template.subject_key,
            resources: template.resources,
            validity: template.validity,
            der,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    /// The hex encoded subject key identifier.
    pub fn subject_key(&self) -> &str {
        &self.subject_key
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }
}


//------------ PublicationStatus ---------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    ToBePublished,
    Published,
    ToBeWithdrawn,
    Withdrawn,
}


//------------ PublishedObject -----------------------------------------------

/// An object handed to the repository for publication.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PublishedObject {
    filename: String,
    directory: uri::Rsync,
    #[serde(deserialize_with = "ext_serde::de_bytes", serialize_with = "ext_serde::ser_bytes")]
    content: Bytes,
    validity: Validity,
    status: PublicationStatus,
}

impl PublishedObject {
    pub fn new(
        filename: impl Into<String>,
        directory: uri::Rsync,
        content: Bytes,
        validity: Validity,
    ) -> Self {
        PublishedObject {
            filename: filename.into(),
            directory,
            content,
            validity,
            status: PublicationStatus::ToBePublished,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn status(&self) -> PublicationStatus {
        self.status
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn uri(&self) -> IssuerResult<uri::Rsync> {
        self.directory.join(self.filename.as_bytes()).map_err(|e| {
            Error::IllegalState(format!(
                "cannot join '{}' to '{}': {}",
                self.filename, self.directory, e
            ))
        })
    }

    pub fn is_published(&self) -> bool {
        matches!(
            self.status,
            PublicationStatus::ToBePublished | PublicationStatus::Published
        )
    }

    /// Requests withdrawal. Objects that never reached the repository are
    /// withdrawn immediately.
    pub fn withdraw(&mut self) {
        match self.status {
            PublicationStatus::ToBePublished => {
                self.status = PublicationStatus::Withdrawn
            }
            PublicationStatus::Published => {
                self.status = PublicationStatus::ToBeWithdrawn
            }
            PublicationStatus::ToBeWithdrawn
            | PublicationStatus::Withdrawn => {}
        }
    }

    /// Called when the repository confirmed the pending change.
    pub fn mark_published(&mut self) {
        match self.status {
            PublicationStatus::ToBePublished => {
                self.status = PublicationStatus::Published
            }
            PublicationStatus::ToBeWithdrawn => {
                self.status = PublicationStatus::Withdrawn
            }
            PublicationStatus::Published | PublicationStatus::Withdrawn => {}
        }
    }
}


//------------ CertificateIssuanceResponse -----------------------------------

/// What a parent hands to a child after signing a certificate for it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CertificateIssuanceResponse {
    pub certificate: SignedCertificate,
    pub publication_uri: uri::Rsync,

    /// Resources the child holds through the issuing chain without them
    /// being listed on the certificate itself.
    pub inherited_resources: ResourceSet,
}


//------------ IncomingResourceCertificate -----------------------------------

/// The certificate a key pair of a CA received from its parent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IncomingResourceCertificate {
    certificate: SignedCertificate,
    publication_uri: uri::Rsync,
    inherited_resources: ResourceSet,
}

impl IncomingResourceCertificate {
    pub fn new(response: CertificateIssuanceResponse) -> Self {
        IncomingResourceCertificate {
            certificate: response.certificate,
            publication_uri: response.publication_uri,
            inherited_resources: response.inherited_resources,
        }
    }

    /// Replaces the certificate with a newly issued one.
    pub fn update(&mut self, response: CertificateIssuanceResponse) {
        *self = IncomingResourceCertificate::new(response);
    }

    pub fn certificate(&self) -> &SignedCertificate {
        &self.certificate
    }

    pub fn publication_uri(&self) -> &uri::Rsync {
        &self.publication_uri
    }

    pub fn inherited_resources(&self) -> &ResourceSet {
        &self.inherited_resources
    }

    /// The resources listed on the certificate itself.
    pub fn own_resources(&self) -> &ResourceSet {
        self.certificate.resources()
    }

    pub fn certified_resources(&self) -> ResourceSet {
        self.inherited_resources.union(self.certificate.resources())
    }

    pub fn not_after(&self) -> Time {
        self.certificate.validity().not_after()
    }
}


//------------ RpkiObjectKind ------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RpkiObjectKind {
    Manifest,
    Roa,
    Aspa,
}


//------------ OutgoingSubject -----------------------------------------------

/// Whom an outgoing certificate was issued to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingSubject {
    ChildCa(CaId),
    RpkiObject(RpkiObjectKind),
}

impl OutgoingSubject {
    pub fn is_child(&self) -> bool {
        matches!(self, OutgoingSubject::ChildCa(_))
    }
}

impl fmt::Display for OutgoingSubject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutgoingSubject::ChildCa(id) => write!(f, "child CA {}", id),
            OutgoingSubject::RpkiObject(kind) => write!(f, "{:?} EE", kind),
        }
    }
}


//------------ OutgoingResourceCertificate -----------------------------------

/// A certificate issued by one of the key pairs of a CA.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OutgoingResourceCertificate {
    certificate: SignedCertificate,
    subject: OutgoingSubject,
    status: OutgoingStatus,

    /// Whether the certificate is published inside another object, e.g.
    /// as the EE certificate of a ROA, rather than on its own.
    embedded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    revocation_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    published_object: Option<PublishedObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    publication_uri: Option<uri::Rsync>,
}

impl OutgoingResourceCertificate {
    /// Creates a current certificate.
    ///
    /// Unless the certificate is embedded, both a filename and the directory
    /// to publish in must be given.
    pub fn new(
        certificate: SignedCertificate,
        subject: OutgoingSubject,
        embedded: bool,
        filename: Option<&str>,
        directory: Option<&uri::Rsync>,
    ) -> IssuerResult<Self> {
        let (published_object, publication_uri) = if embedded {
            (None, None)
        } else {
            let (filename, directory) = match (filename, directory) {
                (Some(filename), Some(directory)) => (filename, directory),
                _ => {
                    return Err(Error::IllegalState(
                        "a certificate that is not embedded needs a filename \
                         and a publication directory"
                            .to_string(),
                    ))
                }
            };
            let object = PublishedObject::new(
                filename,
                directory.clone(),
                certificate.der().clone(),
                certificate.validity(),
            );
            let uri = object.uri()?;
            (Some(object), Some(uri))
        };

        Ok(OutgoingResourceCertificate {
            certificate,
            subject,
            status: OutgoingStatus::Current,
            embedded,
            revocation_time: None,
            published_object,
            publication_uri,
        })
    }

    pub fn certificate(&self) -> &SignedCertificate {
        &self.certificate
    }

    pub fn resources(&self) -> &ResourceSet {
        self.certificate.resources()
    }

    pub fn subject(&self) -> OutgoingSubject {
        self.subject
    }

    pub fn status(&self) -> OutgoingStatus {
        self.status
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn revocation_time(&self) -> Option<Time> {
        self.revocation_time
    }

    pub fn published_object(&self) -> Option<&PublishedObject> {
        self.published_object.as_ref()
    }

    pub fn publication_uri(&self) -> Option<&uri::Rsync> {
        self.publication_uri.as_ref()
    }

    pub fn not_after(&self) -> Time {
        self.certificate.validity().not_after()
    }

    pub fn is_current(&self) -> bool {
        self.status == OutgoingStatus::Current
    }

    pub fn is_revoked(&self) -> bool {
        self.status == OutgoingStatus::Revoked
    }

    pub fn is_expired(&self) -> bool {
        self.status == OutgoingStatus::Expired
    }

    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }

    /// Whether the certificate should be in the repository.
    pub fn is_publishable(&self) -> bool {
        self.published_object
            .as_ref()
            .map(PublishedObject::is_published)
            .unwrap_or(false)
    }

    pub fn withdraw(&mut self) {
        if let Some(object) = self.published_object.as_mut() {
            object.withdraw();
        }
    }

    pub fn mark_published(&mut self) {
        if let Some(object) = self.published_object.as_mut() {
            object.mark_published();
        }
    }

    /// Revokes a valid certificate. Does nothing otherwise.
    pub fn revoke(&mut self) {
        if self.is_valid() {
            self.withdraw();
            self.status = OutgoingStatus::Revoked;
            self.revocation_time = Some(Time::now());
        }
    }

    /// Marks the certificate as expired.
    ///
    /// Fails if `now` is not past the end of the validity period.
    pub fn expire(&mut self, now: Time) -> IssuerResult<()> {
        let not_after = self.not_after();
        if now <= not_after {
            return Err(Error::IllegalState(format!(
                "certificate with serial {} is valid until {}",
                self.certificate.serial(),
                not_after.to_rfc3339()
            )));
        }
        if !self.is_expired() {
            self.withdraw();
            self.status = OutgoingStatus::Expired;
        }
        Ok(())
    }
}


//============ Tests =========================================================
