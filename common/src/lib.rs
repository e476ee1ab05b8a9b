//! A deduction engine for mined-grid logic puzzles.
//!
//! Ground-truth clues become *regions* (count constraints over sets of
//! hidden cells), pattern *rules* combine regions to reveal cells or derive
//! new regions, and a SAT backend answers the two hard questions: is a
//! candidate rule a sound deduction, and is a given cell's status forced by
//! what is currently known.
//!
//! The [`Engine`] owns a board and its deduction state; everything else is
//! reachable through it. Concurrent callers clone the engine (cheap, and the
//! [`SolutionCache`] stays shared) rather than lock it.

pub mod board;
pub mod cardinality;
pub mod codec;
pub mod engine;
pub mod oracle;
pub mod predicate;
pub mod region;
pub mod rules;
pub mod soundness;
pub mod xy;

pub use board::{Axis, Board, CellContent, EdgeClue, Shape, SquareGrid, Topology};
pub use codec::{RuleCode, decode_board, encode_board};
pub use engine::{Engine, Outcome};
pub use oracle::SolutionCache;
pub use predicate::RegionType;
pub use region::{Provenance, Region, RegionHandle, RegionSet, RuleId, Visibility};
pub use rules::{Binding, Rule, RuleCounters, builtin_rules};
pub use soundness::{Soundness, check_rule};
pub use xy::{Coord, XYSet};
