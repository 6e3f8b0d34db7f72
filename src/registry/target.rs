/*!
 * Target Registry
 * Cluster/core topology and registered cgroups for the running target
 *
 * Scope flattening for the coordinator table depends on this: cluster
 * resources get one slot per cluster, core resources one per logical core,
 * cgroup resources one per registered cgroup.
 */

use ahash::RandomState;
use log::debug;
use std::collections::HashMap;

/// One CPU cluster as described by the target config
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub logical_id: u32,
    pub physical_id: u32,
    pub core_count: u32,
}

/// One registered cgroup
#[derive(Debug, Clone)]
pub struct CgroupInfo {
    pub name: String,
    pub id: u32,
}

/// Immutable description of the hardware/cgroup layout, read once at startup
#[derive(Debug, Default)]
pub struct TargetRegistry {
    target_name: String,
    clusters: Vec<ClusterInfo>,
    cgroups: Vec<CgroupInfo>,
    cluster_slots: HashMap<u32, usize, RandomState>,
    cgroup_slots: HashMap<u32, usize, RandomState>,
    total_cores: u32,
}

impl TargetRegistry {
    pub fn new(target_name: String, clusters: Vec<ClusterInfo>, cgroups: Vec<CgroupInfo>) -> Self {
        let mut cluster_slots = HashMap::with_hasher(RandomState::new());
        let mut total_cores = 0u32;
        for (slot, cluster) in clusters.iter().enumerate() {
            cluster_slots.insert(cluster.logical_id, slot);
            total_cores += cluster.core_count;
        }

        let mut cgroup_slots = HashMap::with_hasher(RandomState::new());
        for (slot, cgroup) in cgroups.iter().enumerate() {
            cgroup_slots.insert(cgroup.id, slot);
        }

        debug!(
            "target '{}': {} clusters, {} cores, {} cgroups",
            target_name,
            clusters.len(),
            total_cores,
            cgroups.len()
        );

        Self {
            target_name,
            clusters,
            cgroups,
            cluster_slots,
            cgroup_slots,
            total_cores,
        }
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cgroup_count(&self) -> usize {
        self.cgroups.len()
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    /// Slot offset for a cluster-scoped resource, by logical cluster id
    pub fn cluster_slot(&self, logical_id: u32) -> Option<usize> {
        self.cluster_slots.get(&logical_id).copied()
    }

    /// Slot offset for a core-scoped resource, by global logical core index
    pub fn core_slot(&self, core: u32) -> Option<usize> {
        (core < self.total_cores).then_some(core as usize)
    }

    /// Slot offset for a cgroup-scoped resource, by cgroup id
    pub fn cgroup_slot(&self, cgroup_id: u32) -> Option<usize> {
        self.cgroup_slots.get(&cgroup_id).copied()
    }

    pub fn cgroup_name(&self, cgroup_id: u32) -> Option<&str> {
        self.cgroup_slots
            .get(&cgroup_id)
            .map(|&slot| self.cgroups[slot].name.as_str())
    }

    pub fn clusters(&self) -> &[ClusterInfo] {
        &self.clusters
    }

    pub fn cgroups(&self) -> &[CgroupInfo] {
        &self.cgroups
    }
}
