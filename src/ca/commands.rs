//! Commands sent to certificate authorities.

use std::fmt;

use rpki::repository::x509::Time;

use crate::api::ca::{CaId, CaName, PublisherHandle};
use crate::api::publishers::{PublisherRequest, RepositoryResponse};
use crate::commons::actor::Actor;


//------------ CaCommand -----------------------------------------------------

/// An intent to change a CA.
#[derive(Clone, Debug)]
pub struct CaCommand {
    ca: CaId,
    actor: Actor,
    details: CaCommandDetails,
}

impl CaCommand {
    pub fn new(ca: CaId, actor: Actor, details: CaCommandDetails) -> Self {
        CaCommand { ca, actor, details }
    }

    pub fn ca(&self) -> CaId {
        self.ca
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn details(&self) -> &CaCommandDetails {
        &self.details
    }

    pub fn command_type(&self) -> CommandType {
        self.details.command_type()
    }

    pub fn activate_hosted_ca(
        ca: CaId,
        name: CaName,
        parent: CaId,
        actor: Actor,
    ) -> Self {
        CaCommand::new(
            ca,
            actor,
            CaCommandDetails::ActivateHostedCa { name, parent },
        )
    }

    pub fn update_all_incoming(ca: CaId, actor: Actor) -> Self {
        CaCommand::new(
            ca,
            actor,
            CaCommandDetails::UpdateAllIncomingResourceCertificates,
        )
    }
}

impl fmt::Display for CaCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ca '{}' actor '{}' details '{}'",
            self.ca, self.actor, self.details
        )
    }
}


//------------ CaCommandDetails ----------------------------------------------

#[derive(Clone, Debug)]
pub enum CaCommandDetails {
    /// Creates a hosted CA under the given parent and certifies it.
    ActivateHostedCa { name: CaName, parent: CaId },

    /// Brings the certificates issued to the CA by its parent in line with
    /// the resources it holds.
    UpdateAllIncomingResourceCertificates,

    /// Prepares the request for the trust anchor.
    GenerateTrustAnchorRequest,

    /// Processes the revocation of a key by the trust anchor.
    ProcessRevokedKey { encoded_ski: String },

    ExpireOutgoingResourceCertificates { now: Time },

    ProvisionNonHostedPublisher {
        handle: PublisherHandle,
        request: PublisherRequest,
        response: RepositoryResponse,
    },

    DeleteNonHostedPublisher { handle: PublisherHandle },
}

impl CaCommandDetails {
    pub fn command_type(&self) -> CommandType {
        match self {
            CaCommandDetails::ActivateHostedCa { .. } => {
                CommandType::ActivateHostedCa
            }
            CaCommandDetails::UpdateAllIncomingResourceCertificates => {
                CommandType::UpdateAllIncomingResourceCertificates
            }
            CaCommandDetails::GenerateTrustAnchorRequest => {
                CommandType::GenerateTrustAnchorRequest
            }
            CaCommandDetails::ProcessRevokedKey { .. } => {
                CommandType::ProcessRevokedKey
            }
            CaCommandDetails::ExpireOutgoingResourceCertificates { .. } => {
                CommandType::ExpireOutgoingResourceCertificates
            }
            CaCommandDetails::ProvisionNonHostedPublisher { .. } => {
                CommandType::ProvisionNonHostedPublisher
            }
            CaCommandDetails::DeleteNonHostedPublisher { .. } => {
                CommandType::DeleteNonHostedPublisher
            }
        }
    }
}

impl fmt::Display for CaCommandDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaCommandDetails::ActivateHostedCa { name, parent } => {
                write!(f, "activate hosted CA '{}' under {}", name, parent)
            }
            CaCommandDetails::ProcessRevokedKey { encoded_ski } => {
                write!(f, "process revoked key '{}'", encoded_ski)
            }
            CaCommandDetails::ExpireOutgoingResourceCertificates { now } => {
                write!(
                    f,
                    "expire outgoing certificates before {}",
                    now.to_rfc3339()
                )
            }
            CaCommandDetails::ProvisionNonHostedPublisher {
                handle, ..
            } => write!(f, "provision publisher repository '{}'", handle),
            CaCommandDetails::DeleteNonHostedPublisher { handle } => {
                write!(f, "delete publisher repository '{}'", handle)
            }
            _ => self.command_type().fmt(f),
        }
    }
}


//------------ CommandType ---------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandType {
    ActivateHostedCa,
    UpdateAllIncomingResourceCertificates,
    GenerateTrustAnchorRequest,
    ProcessRevokedKey,
    ExpireOutgoingResourceCertificates,
    ProvisionNonHostedPublisher,
    DeleteNonHostedPublisher,
}

impl CommandType {
    /// Whether the command can change what the parent of the target CA
    /// has issued.
    pub fn affects_parent(self) -> bool {
        matches!(
            self,
            CommandType::ActivateHostedCa
                | CommandType::UpdateAllIncomingResourceCertificates
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CommandType::ActivateHostedCa => "activate hosted CA",
            CommandType::UpdateAllIncomingResourceCertificates => {
                "update all incoming resource certificates"
            }
            CommandType::GenerateTrustAnchorRequest => {
                "generate trust anchor request"
            }
            CommandType::ProcessRevokedKey => "process revoked key",
            CommandType::ExpireOutgoingResourceCertificates => {
                "expire outgoing resource certificates"
            }
            CommandType::ProvisionNonHostedPublisher => {
                "provision non-hosted publisher"
            }
            CommandType::DeleteNonHostedPublisher => {
                "delete non-hosted publisher"
            }
        })
    }
}


//------------ CommandFilter -------------------------------------------------

/// The commands a handler wants to see.
#[derive(Clone, Copy, Debug)]
pub enum CommandFilter {
    /// Every CA command.
    Any,
    Only(&'static [CommandType]),
}

impl CommandFilter {
    pub fn matches(&self, command_type: CommandType) -> bool {
        match self {
            CommandFilter::Any => true,
            CommandFilter::Only(types) => types.contains(&command_type),
        }
    }
}


//------------ CommandStatus -------------------------------------------------

/// What happened while handling a command.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CommandStatus {
    had_effect: bool,
}

impl CommandStatus {
    pub fn had_effect(&self) -> bool {
        self.had_effect
    }

    pub fn set_had_effect(&mut self) {
        self.had_effect = true;
    }
}
