//! Duplicate grouping over candidate pairs.
//!
//! Every passing pair becomes an edge and groups are the connected
//! components of those edges. The pairwise verdict is not transitive, so a
//! component can hold two entries that would fail `are_duplicates` against
//! each other (A~B and B~C puts A, B and C in one group even when A≁C).
//! That looser grouping is intentional: it surfaces more candidates for a
//! human to review.

use rayon::prelude::*;
use std::time::Instant;

use crate::blocking::{CandidateIndex, ScanMode};
use crate::compare::{evaluate_prepared, track_number_veto};
use crate::config::MatchConfig;
use crate::error::Result;
use crate::models::{validate_entries, CatalogEntry, DuplicateGroup, ScanStats};
use crate::normalize::NormalizedFields;

// ============================================================================
// Union-Find
// ============================================================================

/// Disjoint sets over catalog indices, tracking members of each root.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            members: (0..n).map(|i| vec![i]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        // Path halving
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Join the sets of `a` and `b`, returning the surviving root.
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }

        // Merge the smaller member list into the larger one
        let (big, small) = if self.members[ra].len() >= self.members[rb].len() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        let moved = std::mem::take(&mut self.members[small]);
        self.members[big].extend(moved);
        big
    }

    /// Members of the set rooted at `root`, in insertion order.
    pub fn members(&self, root: usize) -> &[usize] {
        &self.members[root]
    }

    /// Every component of size >= 2, each sorted, ordered by smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut out: Vec<Vec<usize>> = Vec::new();
        for i in 0..self.parent.len() {
            if self.find(i) == i && self.members[i].len() >= 2 {
                let mut component = self.members[i].clone();
                component.sort_unstable();
                out.push(component);
            }
        }
        out.sort_unstable_by_key(|c| c[0]);
        out
    }
}

/// Build the public group for a sorted or unsorted component.
pub fn group_from_component(component: &[usize], entries: &[CatalogEntry]) -> DuplicateGroup {
    let mut indices = component.to_vec();
    indices.sort_unstable();
    DuplicateGroup {
        id: indices.first().copied().unwrap_or(0),
        members: indices.iter().map(|&i| entries[i].key.clone()).collect(),
    }
}

// ============================================================================
// Prepared Catalog
// ============================================================================

/// Entries plus their normalized fields and blocking index, built once per scan.
pub struct PreparedCatalog<'a> {
    pub entries: &'a [CatalogEntry],
    pub normalized: Vec<NormalizedFields>,
    pub index: CandidateIndex,
}

impl<'a> PreparedCatalog<'a> {
    /// Validates entries; config is assumed validated by the caller.
    pub fn new(entries: &'a [CatalogEntry], config: &MatchConfig, mode: ScanMode) -> Result<Self> {
        validate_entries(entries)?;
        Ok(Self::prepare(entries, config, mode))
    }

    /// Build without validating; `entries` must already pass `validate_entries`.
    pub fn prepare(entries: &'a [CatalogEntry], config: &MatchConfig, mode: ScanMode) -> Self {
        let normalized: Vec<NormalizedFields> = entries
            .par_iter()
            .map(|e| NormalizedFields::of(e, config))
            .collect();
        let index = CandidateIndex::build(entries, &normalized, config, mode);
        Self {
            entries,
            normalized,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compare `anchor` with each of its candidates.
    pub fn scan_anchor(&self, anchor: usize, config: &MatchConfig) -> AnchorResult {
        let mut result = AnchorResult::default();
        let a = &self.entries[anchor];
        let na = &self.normalized[anchor];

        for j in self.index.candidates_for(anchor) {
            result.stats.candidate_pairs += 1;
            let b = &self.entries[j];
            if track_number_veto(a, b, config) {
                result.stats.pairs_vetoed += 1;
                continue;
            }
            result.stats.pairs_compared += 1;
            if evaluate_prepared(a, na, b, &self.normalized[j], config).is_duplicate {
                result.stats.matching_pairs += 1;
                result.edges.push((anchor, j));
            }
        }
        result
    }
}

/// Matching edges and counters from one or more anchors.
#[derive(Debug, Default)]
pub struct AnchorResult {
    pub edges: Vec<(usize, usize)>,
    pub stats: ScanStats,
}

impl AnchorResult {
    pub fn merge(mut self, other: AnchorResult) -> AnchorResult {
        self.edges.extend(other.edges);
        self.stats.absorb(&other.stats);
        self
    }
}

// ============================================================================
// Grouping Engine
// ============================================================================

/// Groups plus the statistics of the run that produced them.
#[derive(Debug, Clone)]
pub struct GroupingReport {
    pub groups: Vec<DuplicateGroup>,
    pub stats: ScanStats,
}

/// Group duplicates with an explicit candidate mode.
pub fn group_duplicates_with(
    entries: &[CatalogEntry],
    config: &MatchConfig,
    mode: ScanMode,
) -> Result<GroupingReport> {
    config.validate()?;
    let start = Instant::now();
    let catalog = PreparedCatalog::new(entries, config, mode)?;

    let result = (0..catalog.len())
        .into_par_iter()
        .map(|anchor| catalog.scan_anchor(anchor, config))
        .reduce(AnchorResult::default, AnchorResult::merge);

    let mut uf = UnionFind::new(entries.len());
    for &(a, b) in &result.edges {
        uf.union(a, b);
    }
    let groups: Vec<DuplicateGroup> = uf
        .components()
        .iter()
        .map(|c| group_from_component(c, entries))
        .collect();

    let mut stats = result.stats;
    stats.entries = entries.len();
    stats.exhaustive = mode == ScanMode::Exhaustive;
    stats.groups = groups.len();
    stats.grouped_entries = groups.iter().map(DuplicateGroup::len).sum();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    stats.log_phase("grouping");

    tracing::info!(
        entries = stats.entries,
        candidate_pairs = stats.candidate_pairs,
        groups = stats.groups,
        "duplicate grouping finished"
    );

    Ok(GroupingReport { groups, stats })
}

/// Duplicate groups over the blocked candidate set.
pub fn group_duplicates(entries: &[CatalogEntry], config: &MatchConfig) -> Result<Vec<DuplicateGroup>> {
    Ok(group_duplicates_with(entries, config, ScanMode::Blocked)?.groups)
}

/// Every entry that belongs to some group, in catalog order.
pub fn find_fuzzy_duplicates(entries: &[CatalogEntry], config: &MatchConfig) -> Result<Vec<CatalogEntry>> {
    let groups = group_duplicates(entries, config)?;
    let mut grouped = vec![false; entries.len()];
    let positions: rustc_hash::FxHashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.key.as_str(), i))
        .collect();
    for group in &groups {
        for key in &group.members {
            if let Some(&i) = positions.get(key.as_str()) {
                grouped[i] = true;
            }
        }
    }
    Ok(entries
        .iter()
        .zip(grouped)
        .filter(|(_, g)| *g)
        .map(|(e, _)| e.clone())
        .collect())
}
