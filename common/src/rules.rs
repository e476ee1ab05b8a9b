use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

use crate::predicate::RegionType;
use crate::region::{RegionHandle, RegionSet, Visibility};
use crate::xy::XYSet;

pub const MAX_SLOTS: usize = 4;

/// Application counters, tracked per puzzle attempt and over the rule's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleCounters {
    pub attempt_applied: u64,
    pub attempt_cleared: u64,
    pub lifetime_applied: u64,
    pub lifetime_cleared: u64,
}

impl RuleCounters {
    pub fn record_applied(&mut self) {
        self.attempt_applied += 1;
        self.lifetime_applied += 1;
    }

    pub fn record_cleared(&mut self, cells: u64) {
        self.attempt_cleared += cells;
        self.lifetime_cleared += cells;
    }

    pub fn reset_attempt(&mut self) {
        self.attempt_applied = 0;
        self.attempt_cleared = 0;
    }
}

/// An inference pattern over 1..=4 region slots plus an action.
///
/// `partition_counts[i]` constrains the *size* of partition atom `i` (the
/// cells inside exactly the slots named by the bits of `i`); index 0 is the
/// always-empty outside atom and stays unconstrained. For reveal and derive
/// actions `action_bitmap` selects atoms by partition index; for visibility
/// actions it selects slots.
///
/// A rule is immutable once built, apart from its counters, `enabled`, and
/// the matcher's `stale` bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    slots: Vec<RegionType>,
    partition_counts: Vec<RegionType>,
    action: RegionType,
    action_bitmap: u16,
    pub enabled: bool,
    /// Tried against the current region set with no matches.
    pub stale: bool,
    pub counters: RuleCounters,
}

impl Rule {
    pub fn new(
        slots: Vec<RegionType>,
        partition_counts: Vec<RegionType>,
        action: RegionType,
        action_bitmap: u16,
    ) -> anyhow::Result<Self> {
        let n = slots.len();
        ensure!((1..=MAX_SLOTS).contains(&n), "rule needs 1..=4 slots");
        ensure!(
            slots.iter().all(|s| s.is_count()),
            "slot predicates must be count constraints"
        );
        ensure!(
            partition_counts.len() == 1 << n,
            "expected {} partition constraints",
            1 << n
        );
        ensure!(
            partition_counts[0] == RegionType::None,
            "the outside atom is always empty and cannot be constrained"
        );
        ensure!(
            partition_counts.iter().all(|p| p.is_count()),
            "partition constraints must be count constraints"
        );
        match action {
            RegionType::Visibility(_) => {
                ensure!(
                    u32::from(action_bitmap) < (1 << n),
                    "visibility bitmap selects slots 0..{n}"
                );
            }
            RegionType::None => bail!("deriving an unconstrained region is pointless"),
            _ => {
                ensure!(
                    action_bitmap & 1 == 0,
                    "the outside atom cannot be selected"
                );
                ensure!(
                    u64::from(action_bitmap) < (1u64 << (1 << n)),
                    "action bitmap selects atoms 1..{}",
                    1 << n
                );
            }
        }
        Ok(Self {
            slots,
            partition_counts,
            action,
            action_bitmap,
            enabled: true,
            stale: false,
            counters: RuleCounters::default(),
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, j: usize) -> RegionType {
        self.slots[j]
    }

    pub fn slots(&self) -> &[RegionType] {
        &self.slots
    }

    pub fn partition_count(&self, i: usize) -> RegionType {
        self.partition_counts[i]
    }

    pub fn partition_counts(&self) -> &[RegionType] {
        &self.partition_counts
    }

    pub fn action(&self) -> RegionType {
        self.action
    }

    pub fn action_bitmap(&self) -> u16 {
        self.action_bitmap
    }

    pub fn is_visibility(&self) -> bool {
        matches!(self.action, RegionType::Visibility(_))
    }

    /// Every predicate the rule mentions.
    pub fn predicates(&self) -> impl Iterator<Item = RegionType> + '_ {
        self.slots
            .iter()
            .chain(self.partition_counts.iter())
            .copied()
            .chain(std::iter::once(self.action))
    }

    /// Atom indices selected by the action bitmap.
    pub fn selected_atoms(&self) -> Vec<usize> {
        (1..1usize << self.slot_count())
            .filter(|i| self.action_bitmap & (1 << i) != 0)
            .collect()
    }
}

/// A concrete match: the regions bound to each slot and the induced atoms.
#[derive(Debug, Clone)]
pub struct Binding {
    pub regions: Vec<RegionHandle>,
    pub atoms: Vec<XYSet>,
}

/// The 2^n partition atoms of a slot binding, restricted to the union of all
/// slot elements. Atom 0 (outside every slot) is empty by construction.
pub fn compute_atoms(elements: &[XYSet]) -> Vec<XYSet> {
    let n = elements.len();
    let union = elements
        .iter()
        .fold(XYSet::EMPTY, |acc, e| acc.union(e));
    let mut atoms = vec![XYSet::EMPTY; 1 << n];
    for (i, atom) in atoms.iter_mut().enumerate().skip(1) {
        let mut a = union;
        for (j, e) in elements.iter().enumerate() {
            a = if i & (1 << j) != 0 {
                a.intersect(e)
            } else {
                a.difference(e)
            };
        }
        *atom = a;
    }
    atoms
}

/// A tuple is connected when it cannot be split into two groups with no
/// element overlap across the split. Checked by growing the overlap-reachable
/// set from the first slot.
fn connected(elements: &[XYSet]) -> bool {
    let n = elements.len();
    if n <= 1 {
        return true;
    }
    let mut reached = 1usize;
    loop {
        let mut grew = false;
        for j in 0..n {
            if reached & (1 << j) != 0 {
                continue;
            }
            let touches = (0..n).any(|k| {
                reached & (1 << k) != 0 && elements[j].overlaps(&elements[k])
            });
            if touches {
                reached |= 1 << j;
                grew = true;
            }
        }
        if reached == (1 << n) - 1 {
            return true;
        }
        if !grew {
            return false;
        }
    }
}

/// Finds every binding of `rule` against the active regions, in a fixed
/// deterministic order.
///
/// With `anchor`, only tuples containing that region are produced (the hot
/// pass over a just-changed region); results are the same tuples the cold
/// pass would find around it. With `skip_stale`, tuples made entirely of
/// stale regions are skipped, since they were all tried before the set last
/// changed.
pub fn find_matches(
    rule: &Rule,
    regions: &RegionSet,
    anchor: Option<RegionHandle>,
    skip_stale: bool,
) -> Vec<Binding> {
    let n = rule.slot_count();
    let per_slot: Vec<Vec<RegionHandle>> = (0..n)
        .map(|j| {
            regions
                .iter()
                .filter(|(_, r)| r.kind == rule.slot(j))
                .map(|(h, _)| h)
                .collect()
        })
        .collect();
    let mut out = Vec::new();
    let mut tuple = Vec::with_capacity(n);
    bind_slot(rule, regions, &per_slot, anchor, skip_stale, &mut tuple, &mut out);
    out
}

fn bind_slot(
    rule: &Rule,
    regions: &RegionSet,
    per_slot: &[Vec<RegionHandle>],
    anchor: Option<RegionHandle>,
    skip_stale: bool,
    tuple: &mut Vec<RegionHandle>,
    out: &mut Vec<Binding>,
) {
    let j = tuple.len();
    if j == rule.slot_count() {
        if let Some(a) = anchor {
            if !tuple.contains(&a) {
                return;
            }
        }
        let bound: Vec<&crate::region::Region> =
            tuple.iter().filter_map(|&h| regions.get(h)).collect();
        if bound.len() != tuple.len() {
            return;
        }
        if skip_stale && bound.iter().all(|r| r.stale) {
            return;
        }
        let elements: Vec<XYSet> = bound.iter().map(|r| r.elements).collect();
        if !connected(&elements) {
            return;
        }
        let atoms = compute_atoms(&elements);
        for (i, atom) in atoms.iter().enumerate().skip(1) {
            let pc = rule.partition_count(i);
            if pc != RegionType::None && !pc.apply(atom.len() as u32) {
                return;
            }
        }
        out.push(Binding {
            regions: tuple.clone(),
            atoms,
        });
        return;
    }
    for &h in &per_slot[j] {
        if tuple.contains(&h) {
            continue;
        }
        tuple.push(h);
        bind_slot(rule, regions, per_slot, anchor, skip_stale, tuple, out);
        tuple.pop();
    }
}

fn none_partition(n: usize) -> Vec<RegionType> {
    vec![RegionType::None; 1 << n]
}

/// The fixed built-in rule set the solve loop runs with.
///
/// Every rule here passes the soundness checker (covered by a test).
pub fn builtin_rules() -> Vec<Rule> {
    let rule = |slots: Vec<RegionType>,
                pcs: Vec<(usize, RegionType)>,
                action: RegionType,
                bitmap: u16| {
        let mut partition = none_partition(slots.len());
        for (i, pc) in pcs {
            partition[i] = pc;
        }
        Rule::new(slots, partition, action, bitmap).expect("built-in rule shape")
    };

    let mut rules = Vec::new();
    // a spent clue: zero mines among its cells, so all of them are clear
    rules.push(rule(
        vec![RegionType::Equal(0)],
        vec![],
        RegionType::Reveal(false),
        0b10,
    ));
    // saturated clues: v mines in exactly v cells
    for v in 1..=4u8 {
        rules.push(rule(
            vec![RegionType::Equal(v)],
            vec![(1, RegionType::Equal(v))],
            RegionType::Reveal(true),
            0b10,
        ));
    }
    // subset: A inside B with the same count, so B's extra cells are clear
    rules.push(rule(
        vec![RegionType::Equal(1), RegionType::Equal(1)],
        vec![(1, RegionType::Equal(0))],
        RegionType::Reveal(false),
        1 << 2,
    ));
    // 1-2 difference with a single cell outside the overlap: that cell is a
    // mine, and the 1-clue's private cells are clear
    rules.push(rule(
        vec![RegionType::Equal(1), RegionType::Equal(2)],
        vec![(2, RegionType::Equal(1))],
        RegionType::Reveal(true),
        1 << 2,
    ));
    rules.push(rule(
        vec![RegionType::Equal(1), RegionType::Equal(2)],
        vec![(2, RegionType::Equal(1))],
        RegionType::Reveal(false),
        1 << 1,
    ));
    // subset with a bigger count: the difference carries the remainder
    rules.push(rule(
        vec![RegionType::Equal(1), RegionType::Equal(2)],
        vec![(1, RegionType::Equal(0))],
        RegionType::Equal(1),
        1 << 2,
    ));
    // spent clues clutter the display; tuck them away
    rules.push(rule(
        vec![RegionType::Equal(0)],
        vec![],
        RegionType::Visibility(Visibility::Hidden),
        0b1,
    ));
    rules
}
