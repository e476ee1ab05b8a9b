use anyhow::bail;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::board::Board;
use crate::predicate::RegionType;
use crate::xy::{Coord, XYSet};

/// Display tier of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Shown,
    Hidden,
    Discarded,
}

impl Visibility {
    pub fn level(self) -> u8 {
        match self {
            Visibility::Shown => 0,
            Visibility::Hidden => 1,
            Visibility::Discarded => 2,
        }
    }

    pub fn from_level(level: u8) -> anyhow::Result<Self> {
        Ok(match level {
            0 => Visibility::Shown,
            1 => Visibility::Hidden,
            2 => Visibility::Discarded,
            _ => bail!("unknown visibility level {level}"),
        })
    }
}

pub type RuleId = usize;

/// Stable reference to an arena slot. The generation makes "has this parent
/// been discarded since" an O(1) check instead of a dangling pointer chase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionHandle {
    pub index: u32,
    pub generation: u32,
}

/// Where a region came from: the rule that derived it and the regions bound
/// to that rule's slots. Clue-sourced regions carry neither.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub rule: Option<RuleId>,
    pub parents: Vec<RegionHandle>,
}

/// A hypothesis: the hidden cells in `elements` satisfy `kind` on their mine
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub elements: XYSet,
    pub kind: RegionType,
    pub visibility: Visibility,
    /// Set when the user chose the tier by hand; visibility rules then leave
    /// the region alone.
    pub pinned: bool,
    pub provenance: Provenance,
    /// The rule that last changed this region's tier, for display.
    pub visibility_set_by: Option<RuleId>,
    /// Already tried against every rule since the region set last changed.
    pub stale: bool,
}

impl Region {
    pub fn sourced(elements: XYSet, kind: RegionType) -> Self {
        Self {
            elements,
            kind,
            visibility: Visibility::Shown,
            pinned: false,
            provenance: Provenance::default(),
            visibility_set_by: None,
            stale: false,
        }
    }

    pub fn derived(elements: XYSet, kind: RegionType, rule: RuleId, parents: Vec<RegionHandle>) -> Self {
        Self {
            provenance: Provenance {
                rule: Some(rule),
                parents,
            },
            ..Self::sourced(elements, kind)
        }
    }

    pub fn same_fact(&self, elements: &XYSet, kind: RegionType) -> bool {
        self.elements == *elements && self.kind == kind
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    region: Option<Region>,
}

/// The active region arena plus the staging queue for regions that have been
/// derived but not yet admitted.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    slots: Vec<Slot>,
    staged: VecDeque<Region>,
    live: usize,
}

impl RegionSet {
    /// Staged candidates sharing one provenance rule are capped here; a
    /// runaway derivation cycle hits the cap instead of growing forever.
    pub const STAGING_PER_RULE_CAP: usize = 100;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.live
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    pub fn is_live(&self, h: RegionHandle) -> bool {
        self.slots
            .get(h.index as usize)
            .is_some_and(|s| s.generation == h.generation && s.region.is_some())
    }

    pub fn get(&self, h: RegionHandle) -> Option<&Region> {
        let slot = self.slots.get(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.region.as_ref()
    }

    pub fn get_mut(&mut self, h: RegionHandle) -> Option<&mut Region> {
        let slot = self.slots.get_mut(h.index as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        slot.region.as_mut()
    }

    /// Active regions in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (RegionHandle, &Region)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.region.as_ref().map(|r| {
                (
                    RegionHandle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    r,
                )
            })
        })
    }

    fn insert(&mut self, region: Region) -> RegionHandle {
        self.live += 1;
        if let Some(i) = self.slots.iter().position(|s| s.region.is_none()) {
            self.slots[i].region = Some(region);
            return RegionHandle {
                index: i as u32,
                generation: self.slots[i].generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            region: Some(region),
        });
        RegionHandle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn remove(&mut self, h: RegionHandle) -> Option<Region> {
        if !self.is_live(h) {
            return None;
        }
        let slot = &mut self.slots[h.index as usize];
        slot.generation += 1;
        self.live -= 1;
        slot.region.take()
    }

    /// Deletes an active region outright (explicit clear).
    pub fn discard(&mut self, h: RegionHandle) -> bool {
        self.remove(h).is_some()
    }

    fn contains_fact(&self, elements: &XYSet, kind: RegionType) -> bool {
        self.iter().any(|(_, r)| r.same_fact(elements, kind))
    }

    fn staged_contains_fact(&self, elements: &XYSet, kind: RegionType) -> bool {
        self.staged.iter().any(|r| r.same_fact(elements, kind))
    }

    /// True when the fact is already active or waiting in staging.
    pub fn knows(&self, elements: &XYSet, kind: RegionType) -> bool {
        self.contains_fact(elements, kind) || self.staged_contains_fact(elements, kind)
    }

    /// Enqueues a candidate region. Clue-sourced regions go to the front so
    /// they are admitted before speculative derived ones.
    ///
    /// Returns false if the candidate was rejected: the fact is already
    /// known, a staged candidate has identical provenance, or the candidate's
    /// rule already has [`Self::STAGING_PER_RULE_CAP`] candidates staged.
    pub fn stage(&mut self, region: Region, front: bool) -> bool {
        debug_assert!(!region.elements.is_empty());
        if self.knows(&region.elements, region.kind) {
            return false;
        }
        if let Some(rule) = region.provenance.rule {
            if self
                .staged
                .iter()
                .any(|s| s.provenance == region.provenance)
            {
                return false;
            }
            let from_rule = self
                .staged
                .iter()
                .filter(|s| s.provenance.rule == Some(rule))
                .count();
            if from_rule >= Self::STAGING_PER_RULE_CAP {
                debug!("staging cap hit for rule {rule}");
                return false;
            }
        }
        trace!("staged {} over {:?}", region.kind, region.elements);
        if front {
            self.staged.push_front(region);
        } else {
            self.staged.push_back(region);
        }
        true
    }

    /// Moves every staged region into the active set.
    pub fn admit_all(&mut self) -> Vec<RegionHandle> {
        let mut admitted = Vec::with_capacity(self.staged.len());
        while let Some(region) = self.staged.pop_front() {
            admitted.push(self.insert(region));
        }
        admitted
    }

    /// Moves exactly one staged region into the active set.
    ///
    /// Candidates whose recorded parents have since been discarded are
    /// dropped. With `scope`, only candidates whose provenance chain reaches
    /// that region are considered, falling back to any candidate once none
    /// remain.
    pub fn admit_one(&mut self, scope: Option<RegionHandle>) -> Option<RegionHandle> {
        let slots = &self.slots;
        let live = |h: RegionHandle| {
            slots
                .get(h.index as usize)
                .is_some_and(|s| s.generation == h.generation && s.region.is_some())
        };
        self.staged
            .retain(|r| r.provenance.parents.iter().all(|&p| live(p)));

        let mut pick = None;
        if let Some(scope) = scope {
            pick = self
                .staged
                .iter()
                .position(|r| self.provenance_reaches(&r.provenance, scope));
        }
        let pick = pick.or(if self.staged.is_empty() { None } else { Some(0) })?;
        let region = self.staged.remove(pick)?;
        Some(self.insert(region))
    }

    fn provenance_reaches(&self, prov: &Provenance, scope: RegionHandle) -> bool {
        prov.parents.iter().any(|&p| {
            p == scope
                || self
                    .get(p)
                    .is_some_and(|r| self.provenance_reaches(&r.provenance, scope))
        })
    }

    /// Cascading invalidation after a cell is resolved: every active region
    /// containing it dies and every staged candidate containing it is
    /// discarded, so region elements stay hidden cells.
    pub fn resolve_cell(&mut self, c: Coord) -> usize {
        let mut removed = 0;
        let handles: Vec<RegionHandle> = self
            .iter()
            .filter(|(_, r)| r.elements.contains(c))
            .map(|(h, _)| h)
            .collect();
        for h in handles {
            self.remove(h);
            removed += 1;
        }
        self.staged.retain(|r| !r.elements.contains(c));
        if removed > 0 {
            trace!("resolved {c}: {removed} regions invalidated");
        }
        removed
    }

    pub fn mark_all_stale(&mut self) {
        for slot in &mut self.slots {
            if let Some(region) = slot.region.as_mut() {
                region.stale = true;
            }
        }
    }

    /// Materializes at most one new region from the board's revealed clues.
    ///
    /// Cell clues constrain their hidden neighbors, edge clues the hidden
    /// cells of their line; either way the value is reduced by the flagged
    /// mines the clue already accounts for. Returns true when a region not
    /// yet known was staged (at the front); callers loop until it returns
    /// false.
    pub fn generate_from_clues(&mut self, board: &Board) -> bool {
        let hidden = board.hidden_cells();
        let flags = board.flags();
        for (c, kind) in board.clue_cells() {
            let scope = board.clue_scope(c);
            let elements = scope.intersect(&hidden);
            if elements.is_empty() {
                continue;
            }
            let reduced = kind.reduce(scope.intersect(&flags).len() as u32);
            if self.stage(Region::sourced(elements, reduced), true) {
                debug!("clue at {c} produced {} over {:?}", reduced, elements);
                return true;
            }
        }
        for clue in board.edge_clues() {
            let line = board.line(clue.axis, clue.index);
            let elements = line.intersect(&hidden);
            if elements.is_empty() {
                continue;
            }
            let reduced = clue.kind.reduce(line.intersect(&flags).len() as u32);
            if self.stage(Region::sourced(elements, reduced), true) {
                debug!(
                    "edge clue {:?}/{} produced {} over {:?}",
                    clue.axis, clue.index, reduced, elements
                );
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Axis;

    fn c(x: u8, y: u8) -> Coord {
        Coord::new(x, y)
    }

    fn set(cells: &[(u8, u8)]) -> XYSet {
        cells.iter().map(|&(x, y)| c(x, y)).collect()
    }

    #[test]
    fn stage_rejects_known_facts() {
        let mut rs = RegionSet::new();
        let r = Region::sourced(set(&[(0, 0), (1, 0)]), RegionType::Equal(1));
        assert!(rs.stage(r.clone(), true));
        assert!(!rs.stage(r.clone(), true));
        rs.admit_all();
        assert!(!rs.stage(r, true));
        assert_eq!(rs.active_count(), 1);
    }

    #[test]
    fn stage_rejects_duplicate_derived_provenance() {
        let mut rs = RegionSet::new();
        let parent = rs.insert(Region::sourced(set(&[(0, 0)]), RegionType::Equal(1)));
        let a = Region::derived(set(&[(1, 0)]), RegionType::Equal(0), 3, vec![parent]);
        let b = Region::derived(set(&[(2, 0)]), RegionType::Equal(0), 3, vec![parent]);
        assert!(rs.stage(a, false));
        // different fact, same rule and parents
        assert!(!rs.stage(b, false));
    }

    #[test]
    fn staging_cap_breaks_runaway_cycles() {
        let mut rs = RegionSet::new();
        let mut parents = Vec::new();
        for i in 0..110usize {
            let p = set(&[((i % 8) as u8, (i / 8) as u8)]);
            parents.push(rs.insert(Region::sourced(p, RegionType::Equal(1))));
        }
        let mut staged = 0;
        for (i, &parent) in parents.iter().enumerate() {
            let elements = set(&[(8 + (i % 8) as u8, (i / 8) as u8)]);
            let region = Region::derived(elements, RegionType::Equal(0), 7, vec![parent]);
            if rs.stage(region, false) {
                staged += 1;
            }
        }
        assert_eq!(staged, RegionSet::STAGING_PER_RULE_CAP);
    }

    #[test]
    fn admit_one_skips_dead_parents_and_honors_scope() {
        let mut rs = RegionSet::new();
        let alive = rs.insert(Region::sourced(set(&[(0, 0)]), RegionType::Equal(1)));
        let doomed = rs.insert(Region::sourced(set(&[(1, 0)]), RegionType::Equal(1)));
        rs.stage(
            Region::derived(set(&[(2, 0)]), RegionType::Equal(0), 0, vec![doomed]),
            false,
        );
        rs.stage(
            Region::derived(set(&[(3, 0)]), RegionType::Equal(0), 1, vec![alive]),
            false,
        );
        rs.stage(
            Region::derived(set(&[(4, 0)]), RegionType::Equal(1), 2, vec![alive]),
            false,
        );
        assert!(rs.discard(doomed));

        // scoped admission: first candidate reachable from `alive`
        let admitted = rs.admit_one(Some(alive)).unwrap();
        assert_eq!(
            rs.get(admitted).unwrap().elements,
            set(&[(3, 0)]),
            "dead-parent candidate must be dropped, scoped one admitted"
        );
        // scope with no remaining scoped candidate falls back to any
        let admitted = rs.admit_one(Some(admitted)).unwrap();
        assert_eq!(rs.get(admitted).unwrap().elements, set(&[(4, 0)]));
        assert!(rs.admit_one(None).is_none());
    }

    #[test]
    fn resolve_cell_cascades() {
        let mut rs = RegionSet::new();
        let a = rs.insert(Region::sourced(set(&[(0, 0), (1, 0)]), RegionType::Equal(1)));
        let b = rs.insert(Region::sourced(set(&[(1, 0), (2, 0)]), RegionType::Equal(1)));
        let keep = rs.insert(Region::sourced(set(&[(3, 0)]), RegionType::Equal(0)));
        rs.stage(
            Region::sourced(set(&[(1, 0), (3, 0)]), RegionType::AtMost(1)),
            false,
        );
        assert_eq!(rs.resolve_cell(c(1, 0)), 2);
        assert!(!rs.is_live(a));
        assert!(!rs.is_live(b));
        assert!(rs.is_live(keep));
        assert_eq!(rs.staged_count(), 0);
    }

    #[test_log::test]
    fn generation_reduces_by_flags_and_dedups() {
        let mut board = Board::with_mines(3, 1, &[c(0, 0), c(2, 0)]).unwrap();
        board.reveal(c(1, 0)); // clue Equal(2) over both neighbors
        let mut rs = RegionSet::new();
        assert!(rs.generate_from_clues(&board));
        assert!(!rs.generate_from_clues(&board), "same fact staged once");
        rs.admit_all();
        let (_, region) = rs.iter().next().unwrap();
        assert_eq!(region.kind, RegionType::Equal(2));
        assert_eq!(region.elements, set(&[(0, 0), (2, 0)]));

        board.flag(c(0, 0));
        rs.resolve_cell(c(0, 0));
        assert!(rs.generate_from_clues(&board));
        rs.admit_all();
        let reduced = rs
            .iter()
            .find(|(_, r)| r.elements == set(&[(2, 0)]))
            .unwrap()
            .1;
        assert_eq!(reduced.kind, RegionType::Equal(1));
    }

    #[test]
    fn edge_clue_generation() {
        let mut board = Board::with_mines(3, 2, &[c(0, 0)]).unwrap();
        board
            .add_edge_clue(Axis::Row, 0, RegionType::Equal(1))
            .unwrap();
        board.reveal(c(2, 1));
        let mut rs = RegionSet::new();
        // the revealed corner clue fires first, then the edge clue
        while rs.generate_from_clues(&board) {}
        rs.admit_all();
        assert!(
            rs.iter()
                .any(|(_, r)| r.elements == set(&[(0, 0), (1, 0), (2, 0)])
                    && r.kind == RegionType::Equal(1))
        );
    }
}
