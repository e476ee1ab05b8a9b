//! Determinability: is a hidden cell's status forced by the active regions?
//!
//! Cells are grouped into classes by identical region membership, so every
//! region is a disjoint union of whole classes and one counter per class
//! captures everything the constraints can see. The negation of "the target
//! class is pinned to its true count" is then handed to the solver: UNSAT
//! means the cell is forced.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use log::debug;
use varisat::{Lit, Solver};

use crate::board::Board;
use crate::cardinality::{assert_kind, at_least, at_most, fresh};
use crate::region::RegionSet;
use crate::xy::Coord;

/// Process-wide memo of solver verdicts, keyed by a canonical signature of
/// everything the verdict depends on. Append-only: a changed board produces a
/// changed signature, never a stale hit.
///
/// Deliberately an explicit component rather than a hidden singleton, so
/// tests get a fresh cache and the sharing discipline is visible at call
/// sites. The single mutex is coarse; solver calls dominate the cost.
#[derive(Debug, Default)]
pub struct SolutionCache {
    entries: Mutex<HashMap<String, bool>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, signature: &str) -> Option<bool> {
        let entries = self.entries.lock().expect("solution cache poisoned");
        let found = entries.get(signature).copied();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn store(&self, signature: String, forced: bool) {
        let mut entries = self.entries.lock().expect("solution cache poisoned");
        entries.insert(signature, forced);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("solution cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Decides whether `target`'s true status is forced by the region set.
///
/// With `shown_only`, only regions on the `Shown` tier participate. A target
/// mentioned by no region is reported as not determinable, the same answer a
/// genuinely unconstrained cell gets; a debug line marks the case.
pub fn is_forced(
    board: &Board,
    regions: &RegionSet,
    target: Coord,
    shown_only: bool,
    cache: &SolutionCache,
) -> anyhow::Result<bool> {
    let eligible: Vec<_> = regions
        .iter()
        .filter(|(_, r)| !shown_only || r.visibility == crate::region::Visibility::Shown)
        .map(|(_, r)| r)
        .collect();

    // classes: cells sharing an identical set of mentioning regions
    let mut membership: HashMap<Coord, Vec<usize>> = HashMap::new();
    for (i, region) in eligible.iter().enumerate() {
        for c in region.elements.iter() {
            membership.entry(c).or_default().push(i);
        }
    }
    let mut classes: Vec<(Vec<usize>, Vec<Coord>)> = Vec::new();
    let mut cells: Vec<Coord> = membership.keys().copied().collect();
    cells.sort();
    for c in cells {
        let sig = &membership[&c];
        match classes.iter_mut().find(|(s, _)| *s == *sig) {
            Some((_, members)) => members.push(c),
            None => classes.push((sig.clone(), vec![c])),
        }
    }

    let Some(target_class) = classes.iter().position(|(_, m)| m.contains(&target)) else {
        debug!("{target} is mentioned by no region; not determinable");
        return Ok(false);
    };
    let members = &classes[target_class].1;
    let mined = board.is_mined(target);
    let truth_count = members.iter().filter(|&&c| board.is_mined(c)).count();
    if truth_count != 0 && truth_count != members.len() {
        // a class mixing mined and clear cells can never be pinned
        debug!("{target}'s class mixes mined and clear cells");
        return Ok(false);
    }

    // canonical signature over every solver input
    let mut signature = String::new();
    for (_, members) in &classes {
        let _ = write!(signature, "{},", members.len());
    }
    signature.push('|');
    let mut rows: Vec<(i32, Vec<usize>)> = eligible
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let touched: Vec<usize> = classes
                .iter()
                .enumerate()
                .filter(|(_, (sig, _))| sig.contains(&i))
                .map(|(k, _)| k)
                .collect();
            (r.kind.pack(), touched)
        })
        .collect();
    rows.sort();
    for (kind, touched) in &rows {
        let _ = write!(signature, "{kind}:{touched:?};");
    }
    let _ = write!(signature, "|{target_class}:{mined}");

    if let Some(cached) = cache.lookup(&signature) {
        return Ok(cached);
    }

    let mut solver = Solver::new();
    let blocks: Vec<Vec<Lit>> = classes
        .iter()
        .map(|(_, members)| (0..members.len()).map(|_| fresh(&mut solver)).collect())
        .collect();
    for (i, region) in eligible.iter().enumerate() {
        let lits: Vec<Lit> = classes
            .iter()
            .enumerate()
            .filter(|(_, (sig, _))| sig.contains(&i))
            .flat_map(|(k, _)| blocks[k].iter().copied())
            .collect();
        assert_kind(&mut solver, &lits, region.kind);
    }
    // negation of determinability
    let block = &blocks[target_class];
    if mined {
        at_most(&mut solver, block, truth_count - 1);
    } else {
        at_least(&mut solver, block, 1);
    }
    let deviates = solver
        .solve()
        .map_err(|e| anyhow!("determinability query failed: {e}"))?;
    let forced = !deviates;
    cache.store(signature, forced);
    Ok(forced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::RegionType;
    use crate::region::{Region, Visibility};
    use crate::xy::XYSet;

    fn c(x: u8, y: u8) -> Coord {
        Coord::new(x, y)
    }

    fn set(cells: &[(u8, u8)]) -> XYSet {
        cells.iter().map(|&(x, y)| c(x, y)).collect()
    }

    /// Brute force over every assignment consistent with the regions.
    fn brute_forced(board: &Board, regions: &RegionSet, target: Coord) -> bool {
        let hidden: Vec<Coord> = board.hidden_cells().iter().collect();
        let facts: Vec<(XYSet, RegionType)> =
            regions.iter().map(|(_, r)| (r.elements, r.kind)).collect();
        if !facts.iter().any(|(e, _)| e.contains(target)) {
            return false;
        }
        let truth = board.is_mined(target);
        for mask in 0u32..(1 << hidden.len()) {
            let mined: XYSet = hidden
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, &c)| c)
                .collect();
            let consistent = facts
                .iter()
                .all(|(e, kind)| kind.apply(e.intersect(&mined).len() as u32));
            if consistent && mined.contains(target) != truth {
                return false;
            }
        }
        true
    }

    fn regions_from(board: &Board) -> RegionSet {
        let mut rs = RegionSet::new();
        while rs.generate_from_clues(board) {}
        rs.admit_all();
        rs
    }

    #[test]
    fn ambiguous_pair_is_not_forced() {
        let mut board = Board::with_mines(3, 1, &[c(0, 0)]).unwrap();
        board.reveal(c(1, 0)); // Equal(1) over the two ends
        let rs = regions_from(&board);
        let cache = SolutionCache::new();
        assert!(!is_forced(&board, &rs, c(0, 0), false, &cache).unwrap());
        assert!(!is_forced(&board, &rs, c(2, 0), false, &cache).unwrap());
    }

    #[test]
    fn saturated_clue_forces_its_neighbors() {
        let mut board = Board::with_mines(2, 1, &[c(1, 0)]).unwrap();
        board.reveal(c(0, 0)); // Equal(1) over the single neighbor
        let rs = regions_from(&board);
        let cache = SolutionCache::new();
        assert!(is_forced(&board, &rs, c(1, 0), false, &cache).unwrap());
    }

    #[test]
    fn unmentioned_cell_is_not_determinable() {
        let board = Board::with_mines(3, 3, &[c(0, 0)]).unwrap();
        let rs = RegionSet::new();
        let cache = SolutionCache::new();
        assert!(!is_forced(&board, &rs, c(2, 2), false, &cache).unwrap());
    }

    #[test]
    fn agrees_with_enumeration_on_small_boards() {
        let layouts: &[(u8, u8, &[(u8, u8)])] = &[
            (3, 3, &[(0, 0), (2, 2)]),
            (4, 2, &[(1, 0), (3, 1)]),
            (3, 3, &[(1, 1)]),
        ];
        for &(w, h, mines) in layouts {
            let mine_coords: Vec<Coord> = mines.iter().map(|&(x, y)| c(x, y)).collect();
            let mut board = Board::with_mines(w, h, &mine_coords).unwrap();
            // reveal every clear cell in the top row to seed clues
            for x in 0..w {
                if !board.is_mined(c(x, 0)) {
                    board.reveal(c(x, 0));
                }
            }
            let rs = regions_from(&board);
            let cache = SolutionCache::new();
            for cell in board.hidden_cells().iter() {
                assert_eq!(
                    is_forced(&board, &rs, cell, false, &cache).unwrap(),
                    brute_forced(&board, &rs, cell),
                    "{w}x{h} {mines:?} target {cell}"
                );
            }
        }
    }

    #[test]
    fn shown_only_filters_hidden_regions() {
        let mut board = Board::with_mines(2, 1, &[c(1, 0)]).unwrap();
        board.reveal(c(0, 0));
        let mut rs = regions_from(&board);
        let handles: Vec<_> = rs.iter().map(|(h, _)| h).collect();
        for h in handles {
            rs.get_mut(h).unwrap().visibility = Visibility::Hidden;
        }
        let cache = SolutionCache::new();
        assert!(is_forced(&board, &rs, c(1, 0), false, &cache).unwrap());
        assert!(!is_forced(&board, &rs, c(1, 0), true, &cache).unwrap());
    }

    #[test]
    fn cache_transparency() {
        let mut board = Board::with_mines(3, 1, &[c(0, 0), c(2, 0)]).unwrap();
        board.reveal(c(1, 0)); // Equal(2) over both ends
        let rs = regions_from(&board);
        let cache = SolutionCache::new();

        let first = is_forced(&board, &rs, c(0, 0), false, &cache).unwrap();
        assert!(first, "Equal(2) over two cells pins both");
        assert_eq!(cache.hits(), 0);
        let second = is_forced(&board, &rs, c(0, 0), false, &cache).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hits(), 1);

        // a genuinely different region set gets a different signature and a
        // fresh verdict, even though the cache is never cleared
        let mut rs2 = RegionSet::new();
        rs2.stage(
            Region::sourced(set(&[(0, 0), (2, 0)]), RegionType::AtLeast(1)),
            true,
        );
        rs2.admit_all();
        let relaxed = is_forced(&board, &rs2, c(0, 0), false, &cache).unwrap();
        assert!(!relaxed, "at-least-one does not pin either cell");
        assert_ne!(relaxed, first, "the old verdict must not be replayed");
    }
}
