//! Versioned cluster map
//!
//! - `Smap` represents the cluster in terms of its member nodes and
//!   their properties
//! - an `Smap` instance is obtained via `SmapOwner::get()` and is
//!   immutable once published
//! - versioning is monotonic and incremental
//! - the map uniquely and solely defines the current primary
//!
//! Typical update transaction:
//! lock -- clone() -- modify the clone -- publish(clone) -- unlock
//!
//! For merges and conflict resolution, the version check must be
//! protected by the same critical section as the publish.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cluster::node::{Snode, SnodeFlags};
use crate::common::{Error, Result, Revs};

/// Suggested information-council size cap
pub const DEFAULT_IC_SIZE: usize = 3;

pub type NodeMap = HashMap<String, Snode>;

/// Immutable, versioned snapshot of cluster membership
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Smap {
    pub version: i64,
    pub uuid: String,
    pub creation_time: String,
    pub pmap: NodeMap,
    pub tmap: NodeMap,
    pub primary_id: String,
}

impl Revs for Smap {
    const TAG: &'static str = "smap";

    fn version(&self) -> i64 {
        self.version
    }
}

impl Smap {
    pub fn new() -> Self {
        Self::default()
    }

    // === lookups ===

    pub fn get_proxy(&self, id: &str) -> Option<&Snode> {
        self.pmap.get(id)
    }

    pub fn get_target(&self, id: &str) -> Option<&Snode> {
        self.tmap.get(id)
    }

    pub fn get_node(&self, id: &str) -> Option<&Snode> {
        self.pmap.get(id).or_else(|| self.tmap.get(id))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.pmap.contains_key(id) || self.tmap.contains_key(id)
    }

    pub fn count_proxies(&self) -> usize {
        self.pmap.len()
    }

    pub fn count_targets(&self) -> usize {
        self.tmap.len()
    }

    pub fn primary(&self) -> Option<&Snode> {
        self.pmap.get(&self.primary_id)
    }

    pub fn is_primary(&self, id: &str) -> bool {
        self.is_valid() && self.primary_id == id
    }

    /// A valid map has at least one proxy and its primary is one of them
    pub fn is_valid(&self) -> bool {
        !self.primary_id.is_empty() && self.pmap.contains_key(&self.primary_id)
    }

    // === membership ===

    fn add_proxy(&mut self, psi: Snode) -> Result<()> {
        if self.contains_id(&psi.id) {
            return Err(Error::DuplicateId(psi.id));
        }
        self.pmap.insert(psi.id.clone(), psi);
        self.version += 1;
        Ok(())
    }

    fn add_target(&mut self, tsi: Snode) -> Result<()> {
        if self.contains_id(&tsi.id) {
            return Err(Error::DuplicateId(tsi.id));
        }
        self.tmap.insert(tsi.id.clone(), tsi);
        self.version += 1;
        Ok(())
    }

    fn del_proxy(&mut self, pid: &str) -> Result<()> {
        self.pmap
            .remove(pid)
            .ok_or_else(|| Error::NodeNotFound(pid.to_string()))?;
        self.version += 1;
        Ok(())
    }

    fn del_target(&mut self, tid: &str) -> Result<()> {
        self.tmap
            .remove(tid)
            .ok_or_else(|| Error::NodeNotFound(tid.to_string()))?;
        self.version += 1;
        Ok(())
    }

    /// Add or replace a node. Returns true when a node with the same ID
    /// was replaced. Fails with `duplicate-id` when the ID belongs to
    /// the other role.
    pub fn put_node(&mut self, mut nsi: Snode, flags: SnodeFlags) -> Result<bool> {
        let mut replaced = false;
        nsi.flags = flags;
        if nsi.is_proxy() {
            if self.pmap.contains_key(&nsi.id) {
                self.del_proxy(&nsi.id.clone())?;
                replaced = true;
            }
            if nsi.non_electable() {
                tracing::warn!("{} won't be electable", nsi);
            }
            self.add_proxy(nsi)?;
        } else {
            if self.tmap.contains_key(&nsi.id) {
                self.del_target(&nsi.id.clone())?;
                replaced = true;
            }
            self.add_target(nsi)?;
        }
        Ok(replaced)
    }

    pub fn remove_node(&mut self, id: &str) -> Result<()> {
        if self.pmap.contains_key(id) {
            self.del_proxy(id)
        } else {
            self.del_target(id)
        }
    }

    // === flags ===

    fn apply_flags(&mut self, id: &str, new_flags: SnodeFlags) -> Result<()> {
        let si = self
            .pmap
            .get_mut(id)
            .or_else(|| self.tmap.get_mut(id))
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        si.flags = new_flags;
        self.version += 1;
        Ok(())
    }

    /// Must be called on a clone, under the owner's lock. Setting any
    /// maintenance-mask bit also clears `IC`.
    pub fn set_node_flags(&mut self, id: &str, flags: SnodeFlags) -> Result<()> {
        let si = self
            .get_node(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        let mut new_flags = si.flags | flags;
        if flags.intersects(SnodeFlags::MAINTENANCE_MASK) {
            new_flags.remove(SnodeFlags::IC);
        }
        self.apply_flags(id, new_flags)
    }

    /// Must be called on a clone, under the owner's lock.
    pub fn clear_node_flags(&mut self, id: &str, flags: SnodeFlags) -> Result<()> {
        let si = self
            .get_node(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        self.apply_flags(id, si.flags - flags)
    }

    // === information council ===

    pub fn ic_count(&self) -> usize {
        self.pmap.values().filter(|si| si.is_ic()).count()
    }

    pub fn ic_members(&self) -> Vec<&Snode> {
        self.pmap.values().filter(|si| si.is_ic()).collect()
    }

    pub fn is_ic(&self, id: &str) -> bool {
        self.get_proxy(id).map(|si| si.is_ic()).unwrap_or(false)
    }

    fn add_ic(&mut self, id: &str) -> Result<()> {
        if !self.is_ic(id) {
            self.set_node_flags(id, SnodeFlags::IC)?;
        }
        Ok(())
    }

    fn fill_ic(&mut self, ic_size: usize) -> Result<()> {
        if self.ic_count() >= ic_size {
            return Ok(());
        }
        let candidates: Vec<String> = self
            .pmap
            .values()
            .filter(|si| !si.non_electable() && !si.in_maintenance() && !si.is_ic())
            .map(|si| si.id.clone())
            .collect();
        for id in candidates {
            self.add_ic(&id)?;
            if self.ic_count() >= ic_size {
                break;
            }
        }
        Ok(())
    }

    /// Evict one non-primary IC member when over budget. The choice
    /// among non-primary members is not externally observable.
    fn evict_ic(&mut self, ic_size: usize) -> Result<()> {
        if self.ic_count() <= ic_size {
            return Ok(());
        }
        let victim = self
            .pmap
            .values()
            .find(|si| si.id != self.primary_id && si.is_ic())
            .map(|si| si.id.clone());
        if let Some(id) = victim {
            self.clear_node_flags(&id, SnodeFlags::IC)?;
        }
        Ok(())
    }

    /// Ensure the primary is in the IC, fill the IC up to `ic_size`
    /// from electable proxies, then evict over-budget members. Only the
    /// primary calls this, on a clone.
    pub fn staff_ic(&mut self, ic_size: usize) -> Result<()> {
        let primary_id = self.primary_id.clone();
        self.add_ic(&primary_id)?;
        self.fill_ic(ic_size)?;
        self.evict_ic(ic_size)
    }

    // === merge & validation ===

    /// Union the nodes of `src` into `self`. On endpoint-URL collision,
    /// fail unless `override_dup` is set, in which case the older
    /// conflicting descriptor is dropped from `self` (bumping the
    /// version). Adopts `src`'s uuid and creation time when `self` has
    /// none. Returns the number of nodes added.
    pub fn merge(&mut self, src: &Smap, override_dup: bool) -> Result<usize> {
        let mut added = 0;
        for si in src.tmap.values() {
            self.handle_duplicate_url(si, override_dup)?;
            if !self.contains_id(&si.id) {
                self.tmap.insert(si.id.clone(), si.clone());
                added += 1;
            }
        }
        for si in src.pmap.values() {
            self.handle_duplicate_url(si, override_dup)?;
            if !self.contains_id(&si.id) {
                self.pmap.insert(si.id.clone(), si.clone());
                added += 1;
            }
        }
        if added > 0 {
            self.version += 1;
        }
        if self.version < src.version {
            self.version = src.version + 1;
        }
        if !src.uuid.is_empty() && self.uuid.is_empty() {
            self.uuid = src.uuid.clone();
            self.creation_time = src.creation_time.clone();
        }
        Ok(added)
    }

    /// Another node (different ID) already holding one of `nsi`'s URLs
    fn find_duplicate_url(&self, nsi: &Snode) -> Option<(String, String)> {
        for osi in self.pmap.values().chain(self.tmap.values()) {
            if osi.id == nsi.id {
                continue;
            }
            if let Some(url) = osi.shares_url(nsi) {
                return Some((osi.id.clone(), url.to_string()));
            }
        }
        None
    }

    /// Detect a duplicate URL and delete the old node if required
    fn handle_duplicate_url(&mut self, nsi: &Snode, del: bool) -> Result<()> {
        let Some((old_id, url)) = self.find_duplicate_url(nsi) else {
            return Ok(());
        };
        if !del {
            return Err(Error::DuplicateUrl {
                url,
                id: nsi.id.clone(),
                other: old_id,
            });
        }
        tracing::error!(
            "removing old/obsolete node {} from future cluster maps (URL {} now at {})",
            old_id,
            url,
            nsi.id
        );
        self.remove_node(&old_id)
    }

    /// Returns a cluster-integrity error when both maps carry non-empty,
    /// unequal uuids.
    pub fn validate_uuid(&self, other: &Smap, caller: &str) -> Result<()> {
        if other.version == 0 {
            return Ok(());
        }
        if self.uuid.is_empty() || other.uuid.is_empty() || self.uuid == other.uuid {
            return Ok(());
        }
        Err(Error::ClusterIntegrity {
            local: self.uuid.clone(),
            remote: other.uuid.clone(),
            caller: caller.to_string(),
        })
    }

    /// Structural invariants; checked on publish when `AIS_DEBUG` is
    /// set, and by the test suite on every transition.
    pub fn check_invariants(&self, ic_size: usize) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::InvalidSmap(format!(
                "primary {:?} not in pmap",
                self.primary_id
            )));
        }
        for id in self.pmap.keys() {
            if self.tmap.contains_key(id) {
                return Err(Error::DuplicateId(id.clone()));
            }
        }
        let all: Vec<&Snode> = self.pmap.values().chain(self.tmap.values()).collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if let Some(url) = a.shares_url(b) {
                    return Err(Error::DuplicateUrl {
                        url: url.to_string(),
                        id: a.id.clone(),
                        other: b.id.clone(),
                    });
                }
            }
        }
        if self.ic_count() > ic_size {
            return Err(Error::InvalidSmap(format!(
                "IC over budget: {} > {}",
                self.ic_count(),
                ic_size
            )));
        }
        if !self.pmap.is_empty() && !self.is_ic(&self.primary_id) {
            return Err(Error::InvalidSmap("primary not in IC".into()));
        }
        for si in all {
            if si.in_maintenance() && si.is_ic() {
                return Err(Error::InvalidSmap(format!(
                    "{} in maintenance but carries the IC flag",
                    si
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Smap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Smap v{}[{}, p={}, t={}]",
            self.version,
            if self.uuid.is_empty() { "-" } else { &self.uuid },
            self.count_proxies(),
            self.count_targets()
        )
    }
}
