//! Rule legality: is the action a necessary consequence of the premises?
//!
//! One unary counter per partition atom stands for its mine count, the slot
//! predicates constrain sums of those counters, and the *negation* of the
//! action's guarantee is asserted on top. A satisfying assignment is then a
//! counterexample; unsatisfiability proves the rule sound.

use std::collections::HashSet;

use anyhow::anyhow;
use log::debug;
use varisat::{ExtendFormula, Lit, Solver, Var};

use crate::cardinality::{assert_kind, assert_not_kind, at_least, at_most, fresh};
use crate::predicate::RegionType;
use crate::rules::Rule;

/// Verdict of the soundness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Soundness {
    Sound,
    /// A premise-satisfying assignment that breaks the guarantee; the atom
    /// mine counts (indexed by partition index) are kept for explanation.
    Unsound { witness: Vec<u32> },
    /// A reveal-mine action over an atom with no finite size bound: "all of
    /// them are mines" can never be forced.
    UnsoundUnbounded,
    /// No action bits set.
    ActionMissing,
}

impl Soundness {
    pub fn is_sound(&self) -> bool {
        matches!(self, Soundness::Sound)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Soundness::Sound => "sound",
            Soundness::Unsound { .. } => "unsound",
            Soundness::UnsoundUnbounded => "unsound-unbounded",
            Soundness::ActionMissing => "action-missing",
        }
    }
}

/// Proves or refutes a candidate rule.
pub fn check_rule(rule: &Rule) -> anyhow::Result<Soundness> {
    if rule.action_bitmap() == 0 {
        return Ok(Soundness::ActionMissing);
    }
    // visibility actions assert nothing about mine placement
    if matches!(rule.action(), RegionType::Visibility(_)) {
        return Ok(Soundness::Sound);
    }

    let n = rule.slot_count();
    let atom_count = 1usize << n;
    // Atoms without a finite partition bound still need a finite counter.
    // Every predicate in the closed set is constant above its horizon, so a
    // counterexample, if one exists, also exists with each atom at or below
    // this cap.
    let cap = rule.predicates().map(|p| p.horizon()).max().unwrap_or(0) as usize + 1;

    let mut solver = Solver::new();
    let mut blocks: Vec<Vec<Lit>> = Vec::with_capacity(atom_count);
    blocks.push(Vec::new()); // atom 0 is outside every slot, always empty
    for i in 1..atom_count {
        let bound = rule
            .partition_count(i)
            .upper_bound()
            .map(|b| b as usize)
            .unwrap_or(cap);
        blocks.push((0..bound).map(|_| fresh(&mut solver)).collect());
    }

    for j in 0..n {
        let lits: Vec<Lit> = (1..atom_count)
            .filter(|i| i & (1 << j) != 0)
            .flat_map(|i| blocks[i].iter().copied())
            .collect();
        assert_kind(&mut solver, &lits, rule.slot(j));
    }

    let selected = rule.selected_atoms();
    let sel_lits: Vec<Lit> = selected
        .iter()
        .flat_map(|&i| blocks[i].iter().copied())
        .collect();
    match rule.action() {
        RegionType::Reveal(true) => {
            if selected
                .iter()
                .any(|&i| rule.partition_count(i).upper_bound().is_none())
            {
                return Ok(Soundness::UnsoundUnbounded);
            }
            // counterexample: some selected cell is not a mine
            if sel_lits.is_empty() {
                solver.add_clause(&[]);
            } else {
                at_most(&mut solver, &sel_lits, sel_lits.len() - 1);
            }
        }
        // counterexample: some selected cell is a mine
        RegionType::Reveal(false) => at_least(&mut solver, &sel_lits, 1),
        // counterexample: the selected cells' count escapes the predicate
        derived => assert_not_kind(&mut solver, &sel_lits, derived),
    }

    if solver.solve()? {
        let model = solver
            .model()
            .ok_or_else(|| anyhow!("satisfiable soundness query without a model"))?;
        let truthy: HashSet<Var> = model
            .iter()
            .filter(|l| l.is_positive())
            .map(|l| l.var())
            .collect();
        let witness: Vec<u32> = blocks
            .iter()
            .map(|b| b.iter().filter(|l| truthy.contains(&l.var())).count() as u32)
            .collect();
        debug!("unsound rule, witness atom counts {witness:?}");
        Ok(Soundness::Unsound { witness })
    } else {
        Ok(Soundness::Sound)
    }
}
