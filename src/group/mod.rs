//! Group tracker: pure in-memory set of dynamic synchronized-playback
//! groups. Holds no backend handles and performs no I/O.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::zone::PlayerId;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSource {
    Manual,
    Backend,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub external_id: String,
    pub leader: PlayerId,
    pub members: Vec<PlayerId>,
    pub backend: String,
    pub source: GroupSource,
}

impl Group {
    fn member_set_eq(&self, other: &[PlayerId]) -> bool {
        if self.members.len() != other.len() {
            return false;
        }
        let mut a = self.members.clone();
        let mut b = other.to_vec();
        a.sort();
        b.sort();
        a == b
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertResult {
    pub changed: bool,
}

/// Pure, in-memory. A PlayerId belongs to at most one group at a time;
/// removing the leader removes the whole group.
pub struct GroupTracker {
    by_leader: HashMap<PlayerId, Group>,
}

impl GroupTracker {
    pub fn new() -> Self {
        Self {
            by_leader: HashMap::new(),
        }
    }

    /// Creates or replaces the group led by `leader`. Any prior group
    /// owning any of the new members under a different leader is removed
    /// first, so a PlayerId never ends up in two groups at once.
    pub fn upsert_group(
        &mut self,
        leader: PlayerId,
        mut members: Vec<PlayerId>,
        backend: String,
        external_id: Option<String>,
        source: GroupSource,
    ) -> UpsertResult {
        if !members.contains(&leader) {
            members.push(leader);
        }

        let stale_leaders: Vec<PlayerId> = self
            .by_leader
            .iter()
            .filter(|(other_leader, group)| {
                **other_leader != leader && group.members.iter().any(|m| members.contains(m))
            })
            .map(|(l, _)| *l)
            .collect();
        for stale in stale_leaders {
            self.by_leader.remove(&stale);
        }

        let external_id = external_id.unwrap_or_else(|| format!("grp-{}-{}", leader.0, now_unix()));

        let changed = match self.by_leader.get(&leader) {
            Some(existing) => {
                existing.external_id != external_id
                    || existing.backend != backend
                    || !existing.member_set_eq(&members)
            }
            None => true,
        };

        self.by_leader.insert(
            leader,
            Group {
                external_id,
                leader,
                members,
                backend,
                source,
            },
        );

        UpsertResult { changed }
    }

    pub fn remove_group_by_leader(&mut self, leader: PlayerId) -> Option<Group> {
        self.by_leader.remove(&leader)
    }

    pub fn get_group_by_external_id(&self, external_id: &str) -> Option<&Group> {
        self.by_leader.values().find(|g| g.external_id == external_id)
    }

    pub fn get_group_by_leader(&self, leader: PlayerId) -> Option<&Group> {
        self.by_leader.get(&leader)
    }

    pub fn get_group_by_zone(&self, zone: PlayerId) -> Option<&Group> {
        self.by_leader.values().find(|g| g.members.contains(&zone))
    }

    pub fn all_groups(&self) -> impl Iterator<Item = &Group> {
        self.by_leader.values()
    }
}

impl Default for GroupTracker {
    fn default() -> Self {
        Self::new()
    }
}
