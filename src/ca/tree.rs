//! The CA tree and transactional access to it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::api::ca::{CaId, CaIdentity, CaName};
use crate::ca::authority::CertificateAuthority;
use crate::ca::services::CaViewService;
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};


//------------ CaTree --------------------------------------------------------

/// All CAs, keyed by their id.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CaTree {
    cas: BTreeMap<CaId, CertificateAuthority>,
    next_id: u64,
}

impl CaTree {
    pub fn get(&self, id: CaId) -> Option<&CertificateAuthority> {
        self.cas.get(&id)
    }

    pub fn find_by_name(&self, name: &CaName) -> Option<&CertificateAuthority> {
        self.cas.values().find(|ca| ca.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateAuthority> {
        self.cas.values()
    }

    pub fn len(&self) -> usize {
        self.cas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cas.is_empty()
    }

    pub fn allocate_id(&mut self) -> CaId {
        let first_free = self
            .cas
            .keys()
            .next_back()
            .map(|id| id.as_u64() + 1)
            .unwrap_or(1);
        self.next_id = self.next_id.max(first_free);
        let id = CaId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a CA and links it to its parent.
    pub fn insert(&mut self, ca: CertificateAuthority) -> IssuerEmptyResult {
        if self.cas.contains_key(&ca.id()) || self.find_by_name(ca.name()).is_some() {
            return Err(Error::CaDuplicate(ca.name().clone()));
        }
        if let Some(parent_id) = ca.parent() {
            let parent = self
                .cas
                .get_mut(&parent_id)
                .ok_or(Error::CaUnknown(parent_id))?;
            parent.add_child(ca.id());
        }
        self.next_id = self.next_id.max(ca.id().as_u64() + 1);
        self.cas.insert(ca.id(), ca);
        Ok(())
    }

    /// Returns all direct and transitive children, breadth first.
    pub fn descendants(&self, id: CaId) -> Vec<CaId> {
        let mut res = Vec::new();
        let mut queue: VecDeque<CaId> = VecDeque::new();
        if let Some(ca) = self.cas.get(&id) {
            queue.extend(ca.children().iter().copied());
        }
        while let Some(next) = queue.pop_front() {
            if let Some(ca) = self.cas.get(&next) {
                res.push(next);
                queue.extend(ca.children().iter().copied());
            }
        }
        res
    }
}


//------------ CaRepository --------------------------------------------------

/// Guards the CA tree.
///
/// All changes go through a [`UnitOfWork`]. Only one unit of work can be
/// active at a time, so commands are serialized.
#[derive(Debug, Default)]
pub struct CaRepository {
    tree: Mutex<CaTree>,
}

impl CaRepository {
    pub fn new(tree: CaTree) -> Self {
        CaRepository {
            tree: Mutex::new(tree),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaTree> {
        // A panicking command has been rolled back by the unit of work,
        // so the tree is consistent.
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self.lock())
    }

    pub fn read<F, T>(&self, op: F) -> T
    where
        F: FnOnce(&CaTree) -> T,
    {
        op(&self.lock())
    }

    pub fn snapshot(&self) -> CaTree {
        self.lock().clone()
    }

    pub fn allocate_id(&self) -> CaId {
        self.lock().allocate_id()
    }
}

impl CaViewService for CaRepository {
    fn find_by_name(&self, name: &CaName) -> Option<CaIdentity> {
        self.read(|tree| tree.find_by_name(name).map(|ca| ca.identity()))
    }

    fn find_all_children_ids(
        &self,
        parent: &CaName,
    ) -> IssuerResult<Vec<CaIdentity>> {
        self.read(|tree| {
            let parent = tree
                .find_by_name(parent)
                .ok_or_else(|| Error::CaNameUnknown(parent.clone()))?;
            Ok(tree
                .descendants(parent.id())
                .into_iter()
                .filter_map(|id| tree.get(id).map(|ca| ca.identity()))
                .collect())
        })
    }
}


//------------ UnitOfWork ----------------------------------------------------

/// Exclusive access to the tree for the duration of one command.
///
/// Every CA is copied before it is first changed. Unless [`commit`] is
/// called, dropping the unit of work restores those copies.
///
/// [`commit`]: UnitOfWork::commit
pub struct UnitOfWork<'a> {
    tree: MutexGuard<'a, CaTree>,
    undo: BTreeMap<CaId, Option<CertificateAuthority>>,
    next_id: u64,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    fn new(tree: MutexGuard<'a, CaTree>) -> Self {
        let next_id = tree.next_id;
        UnitOfWork {
            tree,
            undo: BTreeMap::new(),
            next_id,
            committed: false,
        }
    }

    pub fn tree(&self) -> &CaTree {
        &self.tree
    }

    pub fn get(&self, id: CaId) -> Option<&CertificateAuthority> {
        self.tree.get(id)
    }

    pub fn require(&self, id: CaId) -> IssuerResult<&CertificateAuthority> {
        self.tree.get(id).ok_or(Error::CaUnknown(id))
    }

    pub fn find_by_name(&self, name: &CaName) -> Option<&CertificateAuthority> {
        self.tree.find_by_name(name)
    }

    fn remember(&mut self, id: CaId) {
        if !self.undo.contains_key(&id) {
            let before = self.tree.cas.get(&id).cloned();
            self.undo.insert(id, before);
        }
    }

    pub fn get_mut(
        &mut self,
        id: CaId,
    ) -> IssuerResult<&mut CertificateAuthority> {
        if !self.tree.cas.contains_key(&id) {
            return Err(Error::CaUnknown(id));
        }
        self.remember(id);
        self.tree.cas.get_mut(&id).ok_or(Error::CaUnknown(id))
    }

    /// Returns mutable access to a CA and its parent at the same time.
    pub fn get_pair_mut(
        &mut self,
        parent: CaId,
        child: CaId,
    ) -> IssuerResult<(&mut CertificateAuthority, &mut CertificateAuthority)>
    {
        if parent == child {
            return Err(Error::IllegalState(format!(
                "CA {} cannot be its own parent",
                parent
            )));
        }
        for id in [parent, child] {
            if !self.tree.cas.contains_key(&id) {
                return Err(Error::CaUnknown(id));
            }
            self.remember(id);
        }
        let mut parent_ca = None;
        let mut child_ca = None;
        for (id, ca) in self.tree.cas.iter_mut() {
            if *id == parent {
                parent_ca = Some(ca)
            } else if *id == child {
                child_ca = Some(ca)
            }
        }
        match (parent_ca, child_ca) {
            (Some(parent), Some(child)) => Ok((parent, child)),
            _ => Err(Error::IllegalState("CA disappeared".to_string())),
        }
    }

    pub fn insert(&mut self, ca: CertificateAuthority) -> IssuerEmptyResult {
        if let Some(parent) = ca.parent() {
            if self.tree.cas.contains_key(&parent) {
                self.remember(parent);
            }
        }
        let id = ca.id();
        let was_known = self.tree.cas.contains_key(&id);
        self.tree.insert(ca)?;
        if !was_known {
            self.undo.entry(id).or_insert(None);
        }
        Ok(())
    }

    pub fn descendants(&self, id: CaId) -> Vec<CaId> {
        self.tree.descendants(id)
    }

    pub fn commit(mut self) {
        trace!("committing changes to {} CAs", self.undo.len());
        self.committed = true;
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        debug!("rolling back changes to {} CAs", self.undo.len());
        let undo = std::mem::take(&mut self.undo);
        for (id, before) in undo {
            match before {
                Some(ca) => {
                    self.tree.cas.insert(id, ca);
                }
                None => {
                    self.tree.cas.remove(&id);
                }
            }
        }
        self.tree.next_id = self.next_id;
    }
}


//============ Tests =========================================================
