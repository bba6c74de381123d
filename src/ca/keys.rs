//! Key pairs of managed CAs.

use std::fmt;

use rpki::repository::resources::ResourceSet;
use rpki::repository::x509::Time;
use serde::{Deserialize, Serialize};

use crate::ca::certificates::{
    CertificateIssuanceResponse, IncomingResourceCertificate,
    OutgoingResourceCertificate, OutgoingSubject, PublishedObject,
};
use crate::commons::IssuerResult;


//------------ KeyPairStatus -------------------------------------------------

/// The life cycle of a key pair.
///
/// A key starts out `New`, is `Pending` while a certificate was requested
/// from the parent, `Current` once certified, `Old` after a newer key took
/// over, and `Revoked` at the end.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPairStatus {
    New,
    Pending,
    Current,
    Old,
    Revoked,
}

impl fmt::Display for KeyPairStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            KeyPairStatus::New => "new",
            KeyPairStatus::Pending => "pending",
            KeyPairStatus::Current => "current",
            KeyPairStatus::Old => "old",
            KeyPairStatus::Revoked => "revoked",
        })
    }
}


//------------ KeyPairEntity -------------------------------------------------

/// A key pair of a CA with the certificates it holds and has issued.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyPairEntity {
    encoded_ski: String,
    status: KeyPairStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    incoming: Option<IncomingResourceCertificate>,
    #[serde(default)]
    outgoing: Vec<OutgoingResourceCertificate>,

    /// Objects signed by this key other than certificates, e.g. the
    /// manifest and CRL.
    #[serde(default)]
    published: Vec<PublishedObject>,
}

impl KeyPairEntity {
    pub fn new(encoded_ski: impl Into<String>) -> Self {
        KeyPairEntity {
            encoded_ski: encoded_ski.into(),
            status: KeyPairStatus::New,
            incoming: None,
            outgoing: Vec::new(),
            published: Vec::new(),
        }
    }

    pub fn encoded_ski(&self) -> &str {
        &self.encoded_ski
    }

    pub fn status(&self) -> KeyPairStatus {
        self.status
    }

    pub fn is_current(&self) -> bool {
        self.status == KeyPairStatus::Current
    }

    pub fn is_revoked(&self) -> bool {
        self.status == KeyPairStatus::Revoked
    }

    /// Whether objects signed by this key belong in the repository.
    pub fn is_publishable(&self) -> bool {
        matches!(
            self.status,
            KeyPairStatus::Pending | KeyPairStatus::Current | KeyPairStatus::Old
        ) && self.incoming.is_some()
    }

    pub fn request_certificate(&mut self) {
        if self.status == KeyPairStatus::New {
            self.status = KeyPairStatus::Pending
        }
    }

    pub fn activate(&mut self) {
        if matches!(self.status, KeyPairStatus::New | KeyPairStatus::Pending) {
            self.status = KeyPairStatus::Current
        }
    }

    pub fn deactivate(&mut self) {
        if self.status == KeyPairStatus::Current {
            self.status = KeyPairStatus::Old
        }
    }

    pub fn incoming(&self) -> Option<&IncomingResourceCertificate> {
        self.incoming.as_ref()
    }

    pub fn certified_resources(&self) -> Option<ResourceSet> {
        self.incoming.as_ref().map(|cert| cert.certified_resources())
    }

    /// Stores a certificate received from the parent.
    ///
    /// A key that was not yet active becomes current.
    pub fn update_incoming_certificate(
        &mut self,
        response: CertificateIssuanceResponse,
    ) {
        match self.incoming.as_mut() {
            Some(incoming) => incoming.update(response),
            None => {
                self.incoming = Some(IncomingResourceCertificate::new(response))
            }
        }
        self.activate();
    }

    pub fn clear_incoming_certificate(&mut self) {
        self.incoming = None;
    }

    pub fn outgoing(&self) -> &[OutgoingResourceCertificate] {
        &self.outgoing
    }

    pub fn valid_outgoing(
        &self,
    ) -> impl Iterator<Item = &OutgoingResourceCertificate> {
        self.outgoing.iter().filter(|cert| cert.is_valid())
    }

    pub fn add_outgoing(&mut self, cert: OutgoingResourceCertificate) {
        self.outgoing.push(cert);
    }

    pub fn published(&self) -> &[PublishedObject] {
        &self.published
    }

    pub fn add_published(&mut self, object: PublishedObject) {
        self.published.push(object);
    }

    /// Revokes all valid certificates issued to the given subject.
    ///
    /// If a subject key is given, only certificates for that key are
    /// revoked. Returns the number of certificates that were revoked.
    pub fn revoke_outgoing_for(
        &mut self,
        subject: OutgoingSubject,
        subject_key: Option<&str>,
    ) -> usize {
        let mut revoked = 0;
        for cert in self.outgoing.iter_mut() {
            let key_matches = subject_key
                .map(|ski| cert.certificate().subject_key() == ski)
                .unwrap_or(true);
            if cert.subject() == subject && key_matches && cert.is_valid() {
                cert.revoke();
                revoked += 1;
            }
        }
        revoked
    }

    /// Returns the valid certificate issued to the subject for the key.
    pub fn valid_outgoing_for(
        &self,
        subject: OutgoingSubject,
        subject_key: &str,
    ) -> Option<&OutgoingResourceCertificate> {
        self.valid_outgoing().find(|cert| {
            cert.subject() == subject
                && cert.certificate().subject_key() == subject_key
        })
    }

    /// Expires all valid certificates whose validity ended before `now`.
    pub fn expire_outgoing(&mut self, now: Time) -> IssuerResult<usize> {
        let mut expired = 0;
        for cert in self.outgoing.iter_mut() {
            if cert.is_valid() && cert.not_after() < now {
                cert.expire(now)?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Marks the key as revoked and withdraws everything it signed.
    pub fn revoke(&mut self) {
        self.status = KeyPairStatus::Revoked;
        for cert in self.outgoing.iter_mut() {
            cert.withdraw();
        }
        for object in self.published.iter_mut() {
            object.withdraw();
        }
    }
}


//============ Tests =========================================================
