//! Checks that CAs never issue more than they hold.
//!
//! After every command the resources on the valid certificates a CA issued
//! must be contained in the resources certified to the CA by its parent.
//! Violations are reported but never fail the command that caused them.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use rpki::repository::resources::ResourceSet;

use crate::api::ca::CaName;
use crate::ca::authority::CertificateAuthority;
use crate::ca::commands::{CaCommand, CommandFilter, CommandStatus};
use crate::ca::{equivalent_resources, excess_resources};
use crate::ca::tree::{CaTree, UnitOfWork};
use crate::commons::metrics::{Counter, Timer};
use crate::commons::IssuerEmptyResult;
use crate::server::dispatch::{CommandHandler, INVARIANT_HANDLER_ORDER};


//------------ InvariantModel ------------------------------------------------

/// Which view of incoming resources a checker uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvariantModel {
    /// Uses only the resources listed on incoming certificates and checks
    /// child certificates separately from RPKI object certificates.
    Hosted,

    /// Uses the certified resources, including inherited ones, and checks
    /// all outgoing certificates together.
    Managed,
}

impl fmt::Display for InvariantModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            InvariantModel::Hosted => "hosted",
            InvariantModel::Managed => "managed",
        })
    }
}


//------------ ViolationScope ------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViolationScope {
    Child,
    NonChild,
    All,
}


//------------ InvariantViolation --------------------------------------------

#[derive(Clone, Debug)]
pub enum InvariantViolation {
    /// Publishable key pairs were certified for different resources.
    IncomingMismatch {
        ca: CaName,
        distinct: Vec<ResourceSet>,
    },

    /// Issued resources are not contained in the incoming resources.
    NotContained {
        ca: CaName,
        scope: ViolationScope,
        incoming: ResourceSet,
        missing: ResourceSet,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvariantViolation::IncomingMismatch { ca, distinct } => {
                write!(
                    f,
                    "CA {}: not all incoming certificates have the same resources: [",
                    ca
                )?;
                for (i, resources) in distinct.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", resources)?;
                }
                f.write_str("]")
            }
            InvariantViolation::NotContained {
                ca,
                scope,
                incoming,
                missing,
            } => {
                let issued = match scope {
                    ViolationScope::Child => "issued child resources",
                    ViolationScope::NonChild => "issued non-child resources",
                    ViolationScope::All => "issued resources",
                };
                write!(
                    f,
                    "CA {}: with current resources {} does not contain {} {}",
                    ca, incoming, issued, missing
                )
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}


//------------ InvariantChecker ----------------------------------------------

/// Read-only audit of a single CA.
#[derive(Clone, Copy, Debug)]
pub struct InvariantChecker {
    model: InvariantModel,
}

impl InvariantChecker {
    pub fn new(model: InvariantModel) -> Self {
        InvariantChecker { model }
    }

    pub fn model(&self) -> InvariantModel {
        self.model
    }

    /// Checks a CA. Non-hosted CAs have nothing to check.
    pub fn check(
        &self,
        ca: &CertificateAuthority,
    ) -> Result<(), InvariantViolation> {
        let keys = match ca.managed_keys() {
            Some(keys) => keys,
            None => return Ok(()),
        };
        let incoming = self.incoming_resources(ca)?;

        match self.model {
            InvariantModel::Hosted => {
                let child = union(
                    ca.valid_outgoing_certificates()
                        .filter(|cert| cert.subject().is_child())
                        .map(|cert| cert.resources()),
                );
                Self::check_contained(ca, ViolationScope::Child, &incoming, &child)?;

                // While a new manifest and CRL are pending, the certificates
                // of RPKI objects may still reflect the previous resources.
                if !keys.manifest_and_crl_check_needed() {
                    let non_child = union(
                        ca.valid_outgoing_certificates()
                            .filter(|cert| !cert.subject().is_child())
                            .map(|cert| cert.resources()),
                    );
                    Self::check_contained(
                        ca,
                        ViolationScope::NonChild,
                        &incoming,
                        &non_child,
                    )?;
                }
                Ok(())
            }
            InvariantModel::Managed => {
                let all = union(
                    ca.valid_outgoing_certificates().map(|cert| cert.resources()),
                );
                Self::check_contained(ca, ViolationScope::All, &incoming, &all)
            }
        }
    }

    /// Checks every managed CA in the tree.
    pub fn check_tree(&self, tree: &CaTree) -> Vec<InvariantViolation> {
        tree.iter()
            .filter_map(|ca| self.check(ca).err())
            .collect()
    }

    fn incoming_resources(
        &self,
        ca: &CertificateAuthority,
    ) -> Result<ResourceSet, InvariantViolation> {
        let mut distinct: Vec<ResourceSet> = Vec::new();
        for key_pair in ca.publishable_key_pairs() {
            let resources = match (self.model, key_pair.incoming()) {
                (InvariantModel::Hosted, Some(cert)) => {
                    cert.own_resources().clone()
                }
                (InvariantModel::Managed, Some(cert)) => {
                    cert.certified_resources()
                }
                (_, None) => continue,
            };
            if !distinct
                .iter()
                .any(|known| equivalent_resources(known, &resources))
            {
                distinct.push(resources);
            }
        }

        match distinct.len() {
            0 => Ok(ResourceSet::default()),
            1 => Ok(distinct.remove(0)),
            _ => Err(InvariantViolation::IncomingMismatch {
                ca: ca.name().clone(),
                distinct,
            }),
        }
    }

    fn check_contained(
        ca: &CertificateAuthority,
        scope: ViolationScope,
        incoming: &ResourceSet,
        issued: &ResourceSet,
    ) -> Result<(), InvariantViolation> {
        if incoming.contains(issued) {
            Ok(())
        } else {
            Err(InvariantViolation::NotContained {
                ca: ca.name().clone(),
                scope,
                incoming: incoming.clone(),
                missing: excess_resources(issued, incoming),
            })
        }
    }
}

fn union<'a>(sets: impl Iterator<Item = &'a ResourceSet>) -> ResourceSet {
    sets.fold(ResourceSet::default(), |acc, set| acc.union(set))
}


//------------ InvariantMetrics ----------------------------------------------

#[derive(Debug)]
pub struct InvariantMetrics {
    pub check: Timer,
    pub violations: Counter,
}

impl InvariantMetrics {
    pub fn new(model: InvariantModel) -> Self {
        match model {
            InvariantModel::Hosted => InvariantMetrics {
                check: Timer::new(
                    "rpki_issuer_hosted_invariant_check",
                    "time to check hosted certificate authority invariants",
                ),
                violations: Counter::new(
                    "rpki_issuer_hosted_invariant_violations",
                    "count of hosted certificate authority invariant violations",
                ),
            },
            InvariantModel::Managed => InvariantMetrics {
                check: Timer::new(
                    "rpki_issuer_managed_invariant_check",
                    "time to check managed certificate authority invariants",
                ),
                violations: Counter::new(
                    "rpki_issuer_managed_invariant_violations",
                    "count of managed certificate authority invariant violations",
                ),
            },
        }
    }
}


//------------ InvariantHandler ----------------------------------------------

/// Runs an invariant checker after every command.
pub struct InvariantHandler {
    checker: InvariantChecker,
    metrics: Arc<InvariantMetrics>,
}

impl InvariantHandler {
    pub fn new(model: InvariantModel, metrics: Arc<InvariantMetrics>) -> Self {
        InvariantHandler {
            checker: InvariantChecker::new(model),
            metrics,
        }
    }

    /// Checks the target of the command, and its parent if the command may
    /// have changed what the parent issued.
    pub fn check_command(
        &self,
        command: &CaCommand,
        tree: &CaTree,
    ) -> Result<(), InvariantViolation> {
        let ca = match tree.get(command.ca()) {
            Some(ca) => ca,
            None => return Ok(()),
        };
        self.checker.check(ca)?;

        if command.command_type().affects_parent() {
            if let Some(parent) = ca.parent().and_then(|id| tree.get(id)) {
                self.checker.check(parent)?;
            }
        }
        Ok(())
    }
}

impl CommandHandler for InvariantHandler {
    fn name(&self) -> &'static str {
        match self.checker.model() {
            InvariantModel::Hosted => "hosted-ca-invariants",
            InvariantModel::Managed => "managed-ca-invariants",
        }
    }

    fn order(&self) -> i32 {
        INVARIANT_HANDLER_ORDER
    }

    fn accepts(&self) -> CommandFilter {
        CommandFilter::Any
    }

    fn handle(
        &self,
        command: &CaCommand,
        uow: &mut UnitOfWork,
        _status: &mut CommandStatus,
    ) -> IssuerEmptyResult {
        let res = self
            .metrics
            .check
            .record(|| self.check_command(command, uow.tree()));
        match res {
            Ok(()) => debug!(
                "{} invariants hold after {}",
                self.checker.model(),
                command
            ),
            Err(violation) => {
                self.metrics.violations.increment();
                warn!("invariant check failed after {}: {}", command, violation);
            }
        }
        Ok(())
    }
}


//============ Tests =========================================================
