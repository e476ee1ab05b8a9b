use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, ensure};
use log::{debug, info};

use crate::board::Board;
use crate::codec;
use crate::oracle::{self, SolutionCache};
use crate::predicate::RegionType;
use crate::region::{Region, RegionHandle, RegionSet, RuleId, Visibility};
use crate::rules::{self, Binding, Rule};
use crate::soundness::{Soundness, check_rule};
use crate::xy::{Coord, XYSet};

/// How a fixpoint run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Neither generation nor rule application can make progress.
    Settled,
    /// The active region count blew past the ceiling; the puzzle is treated
    /// as too complex to finish rather than as an error.
    RegionOverflow,
}

/// The deduction engine: a board, its active and staged regions, the rule
/// set, and a handle to the shared solution cache.
///
/// There is no internal locking. Concurrent callers clone the engine and
/// work on their own copy; the clone deliberately shares the cache, which
/// synchronizes internally.
#[derive(Debug, Clone)]
pub struct Engine {
    board: Board,
    regions: RegionSet,
    rules: Vec<Rule>,
    cache: Arc<SolutionCache>,
}

impl Engine {
    /// Active regions beyond this are a runaway derivation, not a puzzle.
    pub const REGION_CEILING: usize = 400;

    pub fn new(board: Board) -> Self {
        Self::with_parts(board, rules::builtin_rules(), Arc::new(SolutionCache::new()))
    }

    pub fn with_parts(board: Board, rules: Vec<Rule>, cache: Arc<SolutionCache>) -> Self {
        Self {
            board,
            regions: RegionSet::new(),
            rules,
            cache,
        }
    }

    pub fn from_code(code: &str) -> anyhow::Result<Self> {
        Ok(Self::new(codec::decode_board(code)?))
    }

    pub fn encode(&self) -> String {
        codec::encode_board(&self.board)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn cache(&self) -> &Arc<SolutionCache> {
        &self.cache
    }

    /// Active regions with their handles, for display.
    pub fn list_regions(&self) -> Vec<(RegionHandle, &Region)> {
        self.regions.iter().collect()
    }

    /// Admits a candidate rule after proving it sound.
    pub fn add_rule(&mut self, rule: Rule) -> anyhow::Result<RuleId> {
        let verdict = check_rule(&rule)?;
        ensure!(verdict.is_sound(), "rule rejected: {}", verdict.label());
        self.rules.push(rule);
        Ok(self.rules.len() - 1)
    }

    /// Checks a candidate rule without admitting it.
    pub fn check_candidate(&self, rule: &Rule) -> anyhow::Result<Soundness> {
        check_rule(rule)
    }

    pub fn set_rule_enabled(&mut self, id: RuleId, enabled: bool) -> anyhow::Result<()> {
        ensure!(id < self.rules.len(), "unknown rule {id}");
        self.rules[id].enabled = enabled;
        self.rules[id].stale = false;
        Ok(())
    }

    /// Starts a fresh puzzle attempt: per-attempt rule counters reset,
    /// lifetime totals stay.
    pub fn begin_attempt(&mut self) {
        for rule in &mut self.rules {
            rule.counters.reset_attempt();
        }
    }

    /// Uncovers a cell. Returns false (without mutating) when the cell is
    /// mined; what a misstep means is the caller's business.
    pub fn reveal(&mut self, c: Coord) -> anyhow::Result<bool> {
        ensure!(self.board.contains(c), "{c} is outside the board");
        if !self.board.is_hidden(c) {
            return Ok(true);
        }
        if self.board.is_mined(c) {
            return Ok(false);
        }
        self.board.reveal(c);
        self.regions.resolve_cell(c);
        self.mark_rules_fresh();
        Ok(true)
    }

    /// Marks a mined cell as resolved.
    pub fn flag(&mut self, c: Coord) -> anyhow::Result<()> {
        ensure!(self.board.contains(c), "{c} is outside the board");
        ensure!(self.board.is_mined(c), "flagging a clear cell at {c}");
        if self.board.is_hidden(c) {
            self.board.flag(c);
            self.regions.resolve_cell(c);
            self.mark_rules_fresh();
        }
        Ok(())
    }

    /// User override of a region's display tier. Visibility rules leave the
    /// region alone afterwards.
    pub fn pin_region(&mut self, h: RegionHandle, tier: Visibility) -> anyhow::Result<()> {
        let Some(region) = self.regions.get_mut(h) else {
            bail!("region is gone");
        };
        region.visibility = tier;
        region.pinned = true;
        Ok(())
    }

    /// Admits one staged region, for callers pacing derived facts one at a
    /// time.
    pub fn admit_one(&mut self, scope: Option<RegionHandle>) -> Option<RegionHandle> {
        let admitted = self.regions.admit_one(scope);
        if admitted.is_some() {
            self.mark_rules_fresh();
        }
        admitted
    }

    /// Applies one rule across its current matches. With `anchor`, only
    /// matches involving that region are tried (the hot pass); the result is
    /// the same set of applications the cold pass would perform there.
    pub fn apply_rule(&mut self, id: RuleId, anchor: Option<RegionHandle>) -> anyhow::Result<bool> {
        ensure!(id < self.rules.len(), "unknown rule {id}");
        if !self.rules[id].enabled {
            return Ok(false);
        }
        let matches = rules::find_matches(&self.rules[id], &self.regions, anchor, false);
        let mut changed = false;
        for binding in matches {
            changed |= self.execute(id, &binding)?;
        }
        Ok(changed)
    }

    /// Runs generation and rule application until nothing changes.
    ///
    /// Each pass: generation to fixpoint, admit everything staged, one round
    /// of visibility rules (order independent, no fixpoint needed), then
    /// count rules until a full sweep produces no hit.
    pub fn generate_and_apply_to_fixpoint(&mut self) -> anyhow::Result<Outcome> {
        loop {
            let mut changed = false;
            while self.regions.generate_from_clues(&self.board) {
                changed = true;
            }
            let admitted = self.regions.admit_all();
            if !admitted.is_empty() {
                changed = true;
                self.mark_rules_fresh();
            }
            if self.regions.active_count() > Self::REGION_CEILING {
                info!(
                    "region ceiling exceeded at {} active regions",
                    self.regions.active_count()
                );
                return Ok(Outcome::RegionOverflow);
            }
            for id in 0..self.rules.len() {
                if self.rules[id].enabled && self.rules[id].is_visibility() {
                    changed |= self.apply_rule(id, None)?;
                }
            }
            loop {
                let mut hit = false;
                for id in 0..self.rules.len() {
                    let rule = &self.rules[id];
                    if !rule.enabled || rule.is_visibility() || rule.stale {
                        continue;
                    }
                    let matches = rules::find_matches(rule, &self.regions, None, true);
                    if matches.is_empty() {
                        self.rules[id].stale = true;
                        continue;
                    }
                    for binding in matches {
                        if self.execute(id, &binding)? {
                            hit = true;
                        }
                    }
                }
                if !hit {
                    break;
                }
                changed = true;
                if self.regions.active_count() > Self::REGION_CEILING {
                    return Ok(Outcome::RegionOverflow);
                }
            }
            self.regions.mark_all_stale();
            if !changed {
                return Ok(Outcome::Settled);
            }
        }
    }

    /// Hidden cells whose status the oracle can pin against the current
    /// region set. Callers normally run the fixpoint first.
    pub fn forced_cells(&self) -> anyhow::Result<XYSet> {
        let mut out = XYSet::EMPTY;
        for c in self.board.hidden_cells().iter() {
            if oracle::is_forced(&self.board, &self.regions, c, false, &self.cache)? {
                out.insert(c);
            }
        }
        Ok(out)
    }

    /// Whether the puzzle can be finished by deduction alone. Works on a
    /// private copy; the caller's state is untouched.
    pub fn is_solvable(&self) -> anyhow::Result<bool> {
        let mut work = self.clone();
        loop {
            if work.generate_and_apply_to_fixpoint()? == Outcome::RegionOverflow {
                return Ok(false);
            }
            if work.board.hidden_cells().is_empty() {
                return Ok(true);
            }
            let forced = work.forced_cells()?;
            if forced.is_empty() {
                debug!(
                    "stuck with {} hidden cells",
                    work.board.hidden_cells().len()
                );
                return Ok(false);
            }
            for c in forced.iter() {
                if work.board.is_mined(c) {
                    work.board.flag(c);
                } else {
                    work.board.reveal(c);
                }
                work.regions.resolve_cell(c);
            }
            work.mark_rules_fresh();
        }
    }

    /// Whether one cell's status is forced by what is currently known.
    /// Works on a private copy.
    pub fn is_determinable(&self, c: Coord) -> anyhow::Result<bool> {
        ensure!(self.board.contains(c), "{c} is outside the board");
        let mut work = self.clone();
        if work.generate_and_apply_to_fixpoint()? == Outcome::RegionOverflow {
            return Ok(false);
        }
        if !work.board.is_hidden(c) {
            // the fixpoint only resolves proven cells, so it was forced
            return Ok(true);
        }
        oracle::is_forced(&work.board, &work.regions, c, false, &work.cache)
    }

    fn mark_rules_fresh(&mut self) {
        for rule in &mut self.rules {
            rule.stale = false;
        }
    }

    /// Rules in the provenance ancestry of the bound regions, excluding the
    /// applying rule itself.
    fn ancestor_rules(&self, bound: &[RegionHandle], applying: RuleId) -> Vec<RuleId> {
        let mut seen = HashSet::new();
        let mut found = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<RegionHandle> = bound.to_vec();
        while let Some(h) = stack.pop() {
            if !seen.insert(h) {
                continue;
            }
            if let Some(region) = self.regions.get(h) {
                if let Some(rule) = region.provenance.rule {
                    if rule != applying && found.insert(rule) {
                        out.push(rule);
                    }
                }
                stack.extend(region.provenance.parents.iter().copied());
            }
        }
        out
    }

    /// Executes one binding of one rule. Returns whether anything changed.
    fn execute(&mut self, id: RuleId, binding: &Binding) -> anyhow::Result<bool> {
        // an earlier application in the same sweep may have consumed a bound
        // region; the binding is then obsolete
        if binding.regions.iter().any(|&h| !self.regions.is_live(h)) {
            return Ok(false);
        }
        let action = self.rules[id].action();
        let bitmap = self.rules[id].action_bitmap();
        match action {
            RegionType::Visibility(tier) => {
                let mut changed = false;
                for (j, &h) in binding.regions.iter().enumerate() {
                    if bitmap & (1 << j) == 0 {
                        continue;
                    }
                    let Some(region) = self.regions.get_mut(h) else {
                        continue;
                    };
                    if region.pinned || region.visibility == tier {
                        continue;
                    }
                    region.visibility = tier;
                    region.visibility_set_by = Some(id);
                    region.stale = false;
                    changed = true;
                }
                if changed {
                    self.rules[id].counters.record_applied();
                }
                Ok(changed)
            }
            RegionType::Reveal(flag) => {
                let target = self.selected_target(id, binding);
                if target.is_empty() {
                    return Ok(false);
                }
                for c in target.iter() {
                    // a rule only reaches this point after passing the
                    // soundness check, so disagreeing with ground truth means
                    // that check is broken; corrupting the board would be
                    // worse than dying here
                    assert!(
                        self.board.is_mined(c) == flag,
                        "rule {id} contradicts ground truth at {c}"
                    );
                }
                let ancestors = self.ancestor_rules(&binding.regions, id);
                for c in target.iter() {
                    if flag {
                        self.board.flag(c);
                    } else {
                        self.board.reveal(c);
                    }
                    self.regions.resolve_cell(c);
                }
                let cleared = target.len() as u64;
                self.rules[id].counters.record_applied();
                self.rules[id].counters.record_cleared(cleared);
                for a in ancestors {
                    if let Some(rule) = self.rules.get_mut(a) {
                        rule.counters.record_cleared(cleared);
                    }
                }
                self.mark_rules_fresh();
                debug!("rule {id} resolved {cleared} cells (mined: {flag})");
                Ok(true)
            }
            derived => {
                let target = self.selected_target(id, binding);
                if target.is_empty() {
                    return Ok(false);
                }
                let region = Region::derived(target, derived, id, binding.regions.clone());
                if self.regions.stage(region, false) {
                    self.rules[id].counters.record_applied();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn selected_target(&self, id: RuleId, binding: &Binding) -> XYSet {
        self.rules[id]
            .selected_atoms()
            .into_iter()
            .fold(XYSet::EMPTY, |acc, i| acc.union(&binding.atoms[i]))
    }
}
