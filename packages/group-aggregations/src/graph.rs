//! Aggregation graph: explicit adjacency over group settings.
//!
//! Forward edges come straight from settings (`sources`, `excluded`). The
//! reverse edges (`parents`, `excluders`) are indexed when the graph is
//! built, so lookups never scan or pattern-match stored id lists.
//!
//! ```text
//!   source ──► parent        (parent lists source in source_groups)
//!   excluded ──► excluder    (excluder lists excluded in excluded_groups)
//! ```
//!
//! Both edge kinds are dependencies: when the tail changes, the head must
//! be recomputed. The union of both must stay acyclic.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{AggregationError, Result};
use crate::types::{AggregationSettings, Group, GroupId, EVERYONE_GROUP_ID};

#[derive(Debug, Clone, Default)]
pub struct GroupGraph {
    configured: BTreeSet<GroupId>,
    sources: BTreeMap<GroupId, BTreeSet<GroupId>>,
    excluded: BTreeMap<GroupId, BTreeSet<GroupId>>,
    parents: BTreeMap<GroupId, BTreeSet<GroupId>>,
    excluders: BTreeMap<GroupId, BTreeSet<GroupId>>,
}

impl GroupGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Self {
        let mut graph = Self::new();
        for group in groups {
            graph.insert(group.id, group.aggregation.as_ref());
        }
        graph
    }

    /// Replace the edges declared by `group_id`.
    pub fn insert(&mut self, group_id: GroupId, settings: Option<&AggregationSettings>) {
        self.remove(group_id);

        let Some(settings) = settings else {
            return;
        };

        self.configured.insert(group_id);
        for source in &settings.source_groups {
            self.parents.entry(*source).or_default().insert(group_id);
        }
        for excluded in &settings.excluded_groups {
            self.excluders.entry(*excluded).or_default().insert(group_id);
        }
        if !settings.source_groups.is_empty() {
            self.sources.insert(group_id, settings.source_groups.clone());
        }
        if !settings.excluded_groups.is_empty() {
            self.excluded
                .insert(group_id, settings.excluded_groups.clone());
        }
    }

    /// Drop every edge declared by `group_id`.
    pub fn remove(&mut self, group_id: GroupId) {
        self.configured.remove(&group_id);
        if let Some(sources) = self.sources.remove(&group_id) {
            for source in sources {
                detach(&mut self.parents, source, group_id);
            }
        }
        if let Some(excluded) = self.excluded.remove(&group_id) {
            for target in excluded {
                detach(&mut self.excluders, target, group_id);
            }
        }
    }

    pub fn is_configured(&self, group_id: GroupId) -> bool {
        self.configured.contains(&group_id)
    }

    /// Groups whose members feed `group_id`.
    pub fn source_groups(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        self.sources.get(&group_id).cloned().unwrap_or_default()
    }

    /// Aggregating groups listing `group_id` as a source.
    pub fn parent_groups(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        self.parents.get(&group_id).cloned().unwrap_or_default()
    }

    /// Groups `group_id` excludes members of.
    pub fn excluded_groups(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        self.excluded.get(&group_id).cloned().unwrap_or_default()
    }

    /// Groups listing `group_id` in their exclusions.
    pub fn excluding_groups(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        self.excluders.get(&group_id).cloned().unwrap_or_default()
    }

    pub fn has_parents(&self, group_id: GroupId) -> bool {
        self.parents.get(&group_id).is_some_and(|p| !p.is_empty())
    }

    /// True when membership changes in `group_id` matter to the graph:
    /// it has sources, has parents, or is excluded by another group.
    pub fn participates(&self, group_id: GroupId) -> bool {
        self.sources.contains_key(&group_id)
            || self.has_parents(group_id)
            || self.excluders.get(&group_id).is_some_and(|e| !e.is_empty())
    }

    /// Every configured group, in id order.
    pub fn configured_groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.configured.iter().copied()
    }

    /// Transitive parents of `group_id`.
    pub fn ancestors(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<GroupId> = self.parent_groups(group_id).into_iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.parent_groups(next));
            }
        }
        seen
    }

    /// Number of cascaded invocations needed before a change in `group_id`
    /// reaches its furthest ancestor. Zero for a group without parents.
    pub fn cascade_depth(&self, group_id: GroupId) -> usize {
        let mut visiting = HashSet::new();
        self.depth_from(group_id, &mut visiting)
    }

    fn depth_from(&self, group_id: GroupId, visiting: &mut HashSet<GroupId>) -> usize {
        if !visiting.insert(group_id) {
            return 0;
        }
        let depth = self
            .parent_groups(group_id)
            .into_iter()
            .map(|parent| 1 + self.depth_from(parent, visiting))
            .max()
            .unwrap_or(0);
        visiting.remove(&group_id);
        depth
    }

    /// Fail with the first dependency cycle found.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut done = HashSet::new();
        let nodes: BTreeSet<GroupId> = self
            .parents
            .keys()
            .chain(self.excluders.keys())
            .copied()
            .collect();

        for node in nodes {
            let mut path = Vec::new();
            if let Some(cycle) = self.find_cycle(node, &mut path, &mut done) {
                return Err(AggregationError::CycleDetected { path: cycle });
            }
        }
        Ok(())
    }

    fn find_cycle(
        &self,
        node: GroupId,
        path: &mut Vec<GroupId>,
        done: &mut HashSet<GroupId>,
    ) -> Option<Vec<GroupId>> {
        if node == EVERYONE_GROUP_ID || done.contains(&node) {
            return None;
        }
        if let Some(start) = path.iter().position(|id| *id == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }

        path.push(node);
        for next in self.dependents(node) {
            if let Some(cycle) = self.find_cycle(next, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    fn dependents(&self, group_id: GroupId) -> BTreeSet<GroupId> {
        let mut out = self.parent_groups(group_id);
        out.extend(self.excluding_groups(group_id));
        out
    }

    /// Validate a settings write for `group_id` against the whole graph.
    pub fn validate_update(
        &self,
        group_id: GroupId,
        settings: Option<&AggregationSettings>,
    ) -> Result<()> {
        if let Some(settings) = settings {
            settings.validate(group_id)?;
        }
        let mut candidate = self.clone();
        candidate.insert(group_id, settings);
        candidate.check_acyclic()
    }
}

fn detach(index: &mut BTreeMap<GroupId, BTreeSet<GroupId>>, key: GroupId, value: GroupId) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}
