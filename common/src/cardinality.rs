//! CNF cardinality encodings over blocks of mine literals.
//!
//! Small constraints use the naive combination encoding, larger ones a
//! one-directional sequential counter. Constraints can be weakened with an
//! escape literal, which is how the finite-set predicates (`Xor*`, and the
//! complements of `Equal`) become disjunctions of cardinality constraints
//! behind fresh selector variables.

use itertools::Itertools;
use varisat::{ExtendFormula, Lit};

use crate::predicate::RegionType;

/// Below this many literals the naive encoding is cheaper than the counter.
const NAIVE_LIMIT: usize = 10;

pub fn fresh<F: ExtendFormula>(f: &mut F) -> Lit {
    Lit::from_var(f.new_var(), true)
}

fn emit<F: ExtendFormula>(f: &mut F, clause: &[Lit], escape: Option<Lit>) {
    match escape {
        Some(e) => {
            let mut c = clause.to_vec();
            c.push(e);
            f.add_clause(&c);
        }
        None => f.add_clause(clause),
    }
}

/// At most `k` of `lits` are true.
pub fn at_most<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize) {
    at_most_impl(f, lits, k, None);
}

/// At least `k` of `lits` are true.
pub fn at_least<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize) {
    at_least_impl(f, lits, k, None);
}

/// Exactly `k` of `lits` are true.
pub fn exactly<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize) {
    at_most_impl(f, lits, k, None);
    at_least_impl(f, lits, k, None);
}

fn at_most_impl<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize, escape: Option<Lit>) {
    let n = lits.len();
    if k >= n {
        return;
    }
    if k == 0 {
        for &lit in lits {
            emit(f, &[!lit], escape);
        }
        return;
    }
    if n <= NAIVE_LIMIT {
        for combo in lits.iter().copied().combinations(k + 1) {
            let clause: Vec<Lit> = combo.into_iter().map(|l| !l).collect();
            emit(f, &clause, escape);
        }
    } else {
        sequential_at_most(f, lits, k, escape);
    }
}

fn at_least_impl<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize, escape: Option<Lit>) {
    let n = lits.len();
    if k == 0 {
        return;
    }
    if k > n {
        emit(f, &[], escape);
        return;
    }
    if n <= NAIVE_LIMIT {
        for combo in lits.iter().copied().combinations(n - k + 1) {
            emit(f, &combo, escape);
        }
    } else {
        let negated: Vec<Lit> = lits.iter().map(|&l| !l).collect();
        at_most_impl(f, &negated, n - k, escape);
    }
}

/// Sequential counter: `row[j]` is forced true once at least `j + 1` of the
/// first literals are true, so forbidding the `k + 1` register bounds the
/// count. Only the final assertion needs the escape literal; the register
/// clauses are one-directional and never conflict on their own.
fn sequential_at_most<F: ExtendFormula>(f: &mut F, lits: &[Lit], k: usize, escape: Option<Lit>) {
    let m = k + 1;
    let mut prev: Vec<Lit> = (0..m).map(|_| fresh(f)).collect();
    f.add_clause(&[!lits[0], prev[0]]);
    for &lit in &lits[1..] {
        let row: Vec<Lit> = (0..m).map(|_| fresh(f)).collect();
        for j in 0..m {
            f.add_clause(&[!prev[j], row[j]]);
            if j == 0 {
                f.add_clause(&[!lit, row[0]]);
            } else {
                f.add_clause(&[!lit, !prev[j - 1], row[j]]);
            }
        }
        prev = row;
    }
    emit(f, &[!prev[m - 1]], escape);
}

/// The count of `lits` lands in `values`.
pub fn sum_in<F: ExtendFormula>(f: &mut F, lits: &[Lit], values: &[usize]) {
    let n = lits.len();
    let feasible: Vec<usize> = values.iter().copied().filter(|&v| v <= n).collect();
    match feasible.len() {
        0 => f.add_clause(&[]),
        1 => exactly(f, lits, feasible[0]),
        _ => {
            let selectors: Vec<Lit> = feasible.iter().map(|_| fresh(f)).collect();
            f.add_clause(&selectors);
            for (&v, &s) in feasible.iter().zip(&selectors) {
                at_most_impl(f, lits, v, Some(!s));
                at_least_impl(f, lits, v, Some(!s));
            }
        }
    }
}

/// The count of `lits` avoids every value in `values`.
pub fn sum_not_in<F: ExtendFormula>(f: &mut F, lits: &[Lit], values: &[usize]) {
    let n = lits.len();
    for &v in values {
        if v > n {
            continue;
        }
        if v == 0 {
            at_least_impl(f, lits, 1, None);
        } else if v == n {
            at_most_impl(f, lits, n - 1, None);
        } else {
            // (count <= v-1) or (count >= v+1)
            let s = fresh(f);
            at_most_impl(f, lits, v - 1, Some(!s));
            at_least_impl(f, lits, v + 1, Some(s));
        }
    }
}

/// Asserts a count constraint over a literal block.
pub fn assert_kind<F: ExtendFormula>(f: &mut F, lits: &[Lit], kind: RegionType) {
    debug_assert!(kind.is_count());
    match kind {
        RegionType::None => {}
        RegionType::Equal(v) => exactly(f, lits, v as usize),
        RegionType::NotEqual(v) => sum_not_in(f, lits, &[v as usize]),
        RegionType::AtMost(v) => at_most(f, lits, v as usize),
        RegionType::AtLeast(v) => at_least(f, lits, v as usize),
        _ => {
            if let Some(values) = kind.finite_values() {
                let values: Vec<usize> = values.into_iter().map(|v| v as usize).collect();
                sum_in(f, lits, &values);
            }
        }
    }
}

/// Asserts the complement of a count constraint over a literal block.
pub fn assert_not_kind<F: ExtendFormula>(f: &mut F, lits: &[Lit], kind: RegionType) {
    debug_assert!(kind.is_count());
    match kind {
        RegionType::None => f.add_clause(&[]),
        RegionType::Equal(v) => sum_not_in(f, lits, &[v as usize]),
        RegionType::NotEqual(v) => exactly(f, lits, v as usize),
        RegionType::AtMost(v) => at_least(f, lits, v as usize + 1),
        RegionType::AtLeast(v) => {
            if v == 0 {
                f.add_clause(&[]);
            } else {
                at_most(f, lits, v as usize - 1);
            }
        }
        _ => {
            if let Some(values) = kind.finite_values() {
                let values: Vec<usize> = values.into_iter().map(|v| v as usize).collect();
                sum_not_in(f, lits, &values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varisat::Solver;

    fn block(solver: &mut Solver<'_>, n: usize) -> Vec<Lit> {
        (0..n).map(|_| fresh(solver)).collect()
    }

    fn solve(solver: &mut Solver<'_>) -> bool {
        solver.solve().unwrap()
    }

    fn count_true(solver: &mut Solver<'_>, lits: &[Lit]) -> usize {
        let model = solver.model().unwrap();
        lits.iter().filter(|&&l| model.contains(&l)).count()
    }

    #[test]
    fn exactly_pins_the_count() {
        let mut solver = Solver::new();
        let lits = block(&mut solver, 6);
        exactly(&mut solver, &lits, 3);
        assert!(solve(&mut solver));
        assert_eq!(count_true(&mut solver, &lits), 3);
        at_most(&mut solver, &lits, 2);
        assert!(!solve(&mut solver));
    }

    #[test]
    fn at_least_conflicts_with_at_most() {
        let mut solver = Solver::new();
        let lits = block(&mut solver, 5);
        at_least(&mut solver, &lits, 4);
        at_most(&mut solver, &lits, 3);
        assert!(!solve(&mut solver));
    }

    #[test]
    fn impossible_at_least_is_unsat() {
        let mut solver = Solver::new();
        let lits = block(&mut solver, 3);
        at_least(&mut solver, &lits, 4);
        assert!(!solve(&mut solver));
    }

    #[test]
    fn sequential_counter_path() {
        // big enough to take the counter path on both sides
        let mut solver = Solver::new();
        let lits = block(&mut solver, 14);
        at_most(&mut solver, &lits, 5);
        at_least(&mut solver, &lits, 5);
        assert!(solve(&mut solver));
        assert_eq!(count_true(&mut solver, &lits), 5);
        at_most(&mut solver, &lits, 4);
        assert!(!solve(&mut solver));
    }

    #[test]
    fn sum_in_takes_only_listed_counts() {
        let mut solver = Solver::new();
        let lits = block(&mut solver, 6);
        sum_in(&mut solver, &lits, &[1, 3]);
        exactly(&mut solver, &lits, 2);
        assert!(!solve(&mut solver));

        let mut solver = Solver::new();
        let lits = block(&mut solver, 6);
        sum_in(&mut solver, &lits, &[1, 3]);
        exactly(&mut solver, &lits, 3);
        assert!(solve(&mut solver));
    }

    #[test]
    fn sum_not_in_rejects_listed_counts() {
        let mut solver = Solver::new();
        let lits = block(&mut solver, 4);
        sum_not_in(&mut solver, &lits, &[0, 1, 3, 4]);
        assert!(solve(&mut solver));
        assert_eq!(count_true(&mut solver, &lits), 2);
    }

    #[test]
    fn kind_assertions_agree_with_apply() {
        use crate::predicate::RegionType as RT;
        let kinds = [
            RT::Equal(2),
            RT::NotEqual(2),
            RT::AtMost(1),
            RT::AtLeast(3),
            RT::Xor2(1),
            RT::Xor3(0),
            RT::Xor22(0),
            RT::Xor222(1),
        ];
        for kind in kinds {
            for n in 0..=5usize {
                // positive assertion plus a pinned count
                let mut solver = Solver::new();
                let lits = block(&mut solver, 5);
                assert_kind(&mut solver, &lits, kind);
                exactly(&mut solver, &lits, n);
                assert_eq!(
                    solve(&mut solver),
                    kind.apply(n as u32),
                    "{kind:?} with count {n}"
                );
                // complement assertion
                let mut solver = Solver::new();
                let lits = block(&mut solver, 5);
                assert_not_kind(&mut solver, &lits, kind);
                exactly(&mut solver, &lits, n);
                assert_eq!(
                    solve(&mut solver),
                    !kind.apply(n as u32),
                    "not {kind:?} with count {n}"
                );
            }
        }
    }
}
