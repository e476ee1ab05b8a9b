use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

use crate::predicate::RegionType;
use crate::xy::{Coord, UNIVERSE, XYSet};

/// Grid shape tag carried by the board encoding. Only the square topology is
/// implemented here; the triangle and hexagon geometries belong to the shape
/// layer that supplies its own [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Square,
    Triangle,
    Hexagon,
}

impl Shape {
    pub fn tag(self) -> char {
        match self {
            Shape::Square => 's',
            Shape::Triangle => 't',
            Shape::Hexagon => 'x',
        }
    }

    pub fn from_tag(tag: char) -> Option<Shape> {
        match tag {
            's' => Some(Shape::Square),
            't' => Some(Shape::Triangle),
            'x' => Some(Shape::Hexagon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Column,
}

/// What the shape layer must provide: adjacency and aggregate lines over the
/// current grid. The deduction core never looks at geometry beyond this.
pub trait Topology {
    fn contains(&self, c: Coord) -> bool;
    fn neighbors(&self, c: Coord) -> XYSet;
    fn line(&self, axis: Axis, index: u8) -> XYSet;
}

/// The in-core square topology, with optional torus wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareGrid {
    width: u8,
    height: u8,
    wrap: bool,
}

impl SquareGrid {
    pub fn new(width: u8, height: u8, wrap: bool) -> anyhow::Result<Self> {
        ensure!(
            (1..=UNIVERSE).contains(&width) && (1..=UNIVERSE).contains(&height),
            "grid {width}x{height} does not fit the {UNIVERSE}x{UNIVERSE} universe"
        );
        Ok(Self {
            width,
            height,
            wrap,
        })
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn wrap(&self) -> bool {
        self.wrap
    }
}

impl Topology for SquareGrid {
    fn contains(&self, c: Coord) -> bool {
        c.x < self.width && c.y < self.height
    }

    fn neighbors(&self, c: Coord) -> XYSet {
        let mut out = XYSet::EMPTY;
        for dy in -1i16..=1 {
            for dx in -1i16..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let mut nx = i16::from(c.x) + dx;
                let mut ny = i16::from(c.y) + dy;
                if self.wrap {
                    nx = nx.rem_euclid(i16::from(self.width));
                    ny = ny.rem_euclid(i16::from(self.height));
                } else if nx < 0
                    || ny < 0
                    || nx >= i16::from(self.width)
                    || ny >= i16::from(self.height)
                {
                    continue;
                }
                let n = Coord::new(nx as u8, ny as u8);
                if n != c {
                    out.insert(n);
                }
            }
        }
        out
    }

    fn line(&self, axis: Axis, index: u8) -> XYSet {
        let mut out = XYSet::EMPTY;
        match axis {
            Axis::Row => {
                if index < self.height {
                    for x in 0..self.width {
                        out.insert(Coord::new(x, index));
                    }
                }
            }
            Axis::Column => {
                if index < self.width {
                    for y in 0..self.height {
                        out.insert(Coord::new(index, y));
                    }
                }
            }
        }
        out
    }
}

/// Ground truth for one cell: either it holds a mine, or it is clear and
/// shows the given clue once revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellContent {
    Mine,
    Clue(RegionType),
}

/// An aggregate clue over a whole row or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeClue {
    pub axis: Axis,
    pub index: u8,
    pub kind: RegionType,
}

/// The puzzle board: ground truth, player-visible resolution state, merged
/// cell groups and aggregate clues.
///
/// Resolved mined cells live in `flags`; resolved clear cells are simply no
/// longer hidden. The board itself carries no deduction state, so a deep copy
/// (plain `clone`) is all a concurrent caller needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    shape: Shape,
    grid: SquareGrid,
    innie: Option<Coord>,
    merges: Vec<XYSet>,
    edge_clues: Vec<EdgeClue>,
    cells: Vec<CellContent>,
    hidden: XYSet,
    flags: XYSet,
}

impl Board {
    pub fn new(width: u8, height: u8, wrap: bool) -> anyhow::Result<Self> {
        let grid = SquareGrid::new(width, height, wrap)?;
        let mut hidden = XYSet::EMPTY;
        for y in 0..height {
            for x in 0..width {
                hidden.insert(Coord::new(x, y));
            }
        }
        Ok(Self {
            shape: Shape::Square,
            grid,
            innie: None,
            merges: Vec::new(),
            edge_clues: Vec::new(),
            cells: vec![CellContent::Clue(RegionType::Equal(0)); width as usize * height as usize],
            hidden,
            flags: XYSet::EMPTY,
        })
    }

    /// Builds a board from a mine layout and fills in all Equal clues.
    pub fn with_mines(width: u8, height: u8, mines: &[Coord]) -> anyhow::Result<Self> {
        let mut board = Self::new(width, height, false)?;
        for &m in mines {
            board.place_mine(m)?;
        }
        board.assign_clues()?;
        Ok(board)
    }

    fn idx(&self, c: Coord) -> usize {
        c.y as usize * self.grid.width() as usize + c.x as usize
    }

    pub fn topology(&self) -> &dyn Topology {
        &self.grid
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn width(&self) -> u8 {
        self.grid.width()
    }

    pub fn height(&self) -> u8 {
        self.grid.height()
    }

    pub fn wrap(&self) -> bool {
        self.grid.wrap()
    }

    pub fn innie(&self) -> Option<Coord> {
        self.innie
    }

    pub fn set_innie(&mut self, c: Option<Coord>) -> anyhow::Result<()> {
        if let Some(c) = c {
            ensure!(self.grid.contains(c), "innie anchor {c} outside the board");
        }
        self.innie = c;
        Ok(())
    }

    /// Every coordinate on the board.
    pub fn universe(&self) -> XYSet {
        let mut out = XYSet::EMPTY;
        for y in 0..self.height() {
            for x in 0..self.width() {
                out.insert(Coord::new(x, y));
            }
        }
        out
    }

    pub fn contains(&self, c: Coord) -> bool {
        self.grid.contains(c)
    }

    pub fn cell(&self, c: Coord) -> CellContent {
        self.cells[self.idx(c)]
    }

    pub fn is_mined(&self, c: Coord) -> bool {
        matches!(self.cell(c), CellContent::Mine)
    }

    pub fn clue(&self, c: Coord) -> Option<RegionType> {
        match self.cell(c) {
            CellContent::Clue(kind) => Some(kind),
            CellContent::Mine => None,
        }
    }

    pub fn place_mine(&mut self, c: Coord) -> anyhow::Result<()> {
        ensure!(self.grid.contains(c), "mine at {c} outside the board");
        let i = self.idx(c);
        self.cells[i] = CellContent::Mine;
        Ok(())
    }

    /// A clue must be a real count constraint with a single-digit value, so
    /// it survives the printable encoding.
    fn encodable_clue(kind: RegionType) -> bool {
        match kind {
            RegionType::Equal(v)
            | RegionType::NotEqual(v)
            | RegionType::AtMost(v)
            | RegionType::AtLeast(v)
            | RegionType::Xor2(v)
            | RegionType::Xor3(v)
            | RegionType::Xor22(v)
            | RegionType::Xor222(v) => v <= 9,
            _ => false,
        }
    }

    pub fn set_clue(&mut self, c: Coord, kind: RegionType) -> anyhow::Result<()> {
        ensure!(self.grid.contains(c), "clue at {c} outside the board");
        ensure!(
            Self::encodable_clue(kind),
            "cell clue must be a count constraint with a single-digit value"
        );
        let i = self.idx(c);
        self.cells[i] = CellContent::Clue(kind);
        Ok(())
    }

    /// Recomputes every clear cell's clue as `Equal(adjacent mine count)`.
    pub fn assign_clues(&mut self) -> anyhow::Result<()> {
        for c in self.universe().iter() {
            if self.is_mined(c) {
                continue;
            }
            let scope = self.clue_scope(c);
            let count = scope.iter().filter(|&n| self.is_mined(n)).count();
            ensure!(count <= 9, "clue at {c} exceeds a single digit");
            self.set_clue(c, RegionType::Equal(count as u8))?;
        }
        Ok(())
    }

    /// Merges a group of cells into one logical clue cell.
    pub fn add_merge(&mut self, group: XYSet) -> anyhow::Result<()> {
        ensure!(
            group.len() >= 2 && group.len() <= 16,
            "merge group must hold 2..=16 cells"
        );
        ensure!(
            group.iter().all(|c| self.grid.contains(c)),
            "merge group leaves the board"
        );
        ensure!(
            self.merges.iter().all(|m| !m.overlaps(&group)),
            "merge groups must be disjoint"
        );
        self.merges.push(group);
        Ok(())
    }

    pub fn merges(&self) -> &[XYSet] {
        &self.merges
    }

    pub fn add_edge_clue(&mut self, axis: Axis, index: u8, kind: RegionType) -> anyhow::Result<()> {
        let limit = match axis {
            Axis::Row => self.height(),
            Axis::Column => self.width(),
        };
        ensure!(index < limit, "edge clue index {index} out of range");
        ensure!(
            Self::encodable_clue(kind),
            "edge clue must be a count constraint with a single-digit value"
        );
        self.edge_clues.push(EdgeClue { axis, index, kind });
        Ok(())
    }

    pub fn edge_clues(&self) -> &[EdgeClue] {
        &self.edge_clues
    }

    pub fn line(&self, axis: Axis, index: u8) -> XYSet {
        self.grid.line(axis, index)
    }

    /// The merge group containing `c`, or a singleton.
    pub fn group_of(&self, c: Coord) -> XYSet {
        self.merges
            .iter()
            .find(|m| m.contains(c))
            .copied()
            .unwrap_or_else(|| XYSet::singleton(c))
    }

    /// The cells a clue at `c` counts over: the union of its group members'
    /// neighborhoods, minus the group itself.
    pub fn clue_scope(&self, c: Coord) -> XYSet {
        let group = self.group_of(c);
        let mut scope = XYSet::EMPTY;
        for member in group.iter() {
            scope = scope.union(&self.grid.neighbors(member));
        }
        scope.difference(&group)
    }

    pub fn hidden_cells(&self) -> XYSet {
        self.hidden
    }

    pub fn is_hidden(&self, c: Coord) -> bool {
        self.hidden.contains(c)
    }

    pub fn flags(&self) -> XYSet {
        self.flags
    }

    /// Uncovers a clear cell. Returns true if the cell was hidden.
    pub fn reveal(&mut self, c: Coord) -> bool {
        self.hidden.remove(c)
    }

    /// Marks a mined cell as resolved. Returns true if the cell was hidden.
    pub fn flag(&mut self, c: Coord) -> bool {
        let was = self.hidden.remove(c);
        if was {
            self.flags.insert(c);
        }
        was
    }

    /// Revealed clear cells that carry a clue, in row-major order.
    pub fn clue_cells(&self) -> Vec<(Coord, RegionType)> {
        self.universe()
            .iter()
            .filter(|&c| !self.hidden.contains(c) && !self.flags.contains(c))
            .filter_map(|c| self.clue(c).map(|kind| (c, kind)))
            .collect()
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bcs::to_bytes(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let board: Board = bcs::from_bytes(bytes)?;
        if board.cells.len() != board.width() as usize * board.height() as usize {
            bail!("snapshot cell count does not match its dimensions");
        }
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: u8, y: u8) -> Coord {
        Coord::new(x, y)
    }

    #[test]
    fn neighbor_counts_on_a_plain_grid() {
        let grid = SquareGrid::new(3, 3, false).unwrap();
        assert_eq!(grid.neighbors(c(0, 0)).len(), 3);
        assert_eq!(grid.neighbors(c(1, 0)).len(), 5);
        assert_eq!(grid.neighbors(c(1, 1)).len(), 8);
    }

    #[test]
    fn wrapping_grid_has_no_edges() {
        let grid = SquareGrid::new(4, 4, true).unwrap();
        let n = grid.neighbors(c(0, 0));
        assert_eq!(n.len(), 8);
        assert!(n.contains(c(3, 3)));
        assert!(n.contains(c(3, 0)));
        assert!(n.contains(c(0, 3)));
    }

    #[test]
    fn lines() {
        let grid = SquareGrid::new(3, 2, false).unwrap();
        let row = grid.line(Axis::Row, 1);
        assert_eq!(row, [c(0, 1), c(1, 1), c(2, 1)].into_iter().collect());
        let col = grid.line(Axis::Column, 0);
        assert_eq!(col, [c(0, 0), c(0, 1)].into_iter().collect());
    }

    #[test]
    fn assign_clues_counts_adjacent_mines() {
        let board = Board::with_mines(3, 3, &[c(0, 0), c(2, 2)]).unwrap();
        assert_eq!(board.clue(c(1, 1)), Some(RegionType::Equal(2)));
        assert_eq!(board.clue(c(2, 0)), Some(RegionType::Equal(1)));
        assert_eq!(board.clue(c(0, 2)), Some(RegionType::Equal(1)));
        assert_eq!(board.clue(c(0, 0)), None);
    }

    #[test]
    fn merged_clue_scope_spans_the_group() {
        let mut board = Board::new(4, 1, false).unwrap();
        let group: XYSet = [c(1, 0), c(2, 0)].into_iter().collect();
        board.add_merge(group).unwrap();
        let scope = board.clue_scope(c(1, 0));
        assert_eq!(scope, [c(0, 0), c(3, 0)].into_iter().collect());
    }

    #[test]
    fn resolution_state() {
        let mut board = Board::with_mines(2, 1, &[c(1, 0)]).unwrap();
        assert_eq!(board.hidden_cells().len(), 2);
        assert!(board.reveal(c(0, 0)));
        assert!(!board.reveal(c(0, 0)));
        assert!(board.flag(c(1, 0)));
        assert!(board.hidden_cells().is_empty());
        assert_eq!(board.flags(), XYSet::singleton(c(1, 0)));
        assert_eq!(board.clue_cells(), vec![(c(0, 0), RegionType::Equal(1))]);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut board = Board::with_mines(3, 3, &[c(1, 1)]).unwrap();
        board.reveal(c(0, 0));
        let bytes = board.to_bytes().unwrap();
        assert_eq!(Board::from_bytes(&bytes).unwrap(), board);
    }
}
