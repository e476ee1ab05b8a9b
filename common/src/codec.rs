//! External wire formats: the compact printable board string and the
//! structured rule record.
//!
//! The board string is header, then optional innie anchor, merged-group and
//! edge-clue records, then one token per base cell. Decoding is strict: it
//! stops with an error at the first malformed token and never panics, so a
//! truncated or corrupted string simply fails to load.

use anyhow::{anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::str::Chars;

use crate::board::{Axis, Board, CellContent, Shape};
use crate::predicate::RegionType;
use crate::rules::Rule;
use crate::xy::Coord;

fn nib(v: u8) -> char {
    char::from_digit(u32::from(v) & 0xf, 16).unwrap_or('0')
}

fn clue_token(kind: RegionType) -> (char, u8) {
    match kind {
        RegionType::Equal(v) => ('e', v),
        RegionType::NotEqual(v) => ('q', v),
        RegionType::AtMost(v) => ('a', v),
        RegionType::AtLeast(v) => ('b', v),
        RegionType::Xor2(v) => ('x', v),
        RegionType::Xor3(v) => ('y', v),
        RegionType::Xor22(v) => ('z', v),
        RegionType::Xor222(v) => ('w', v),
        _ => unreachable!("board clues are count constraints"),
    }
}

fn clue_from(letter: char, value: u8) -> anyhow::Result<RegionType> {
    Ok(match letter {
        'e' => RegionType::Equal(value),
        'q' => RegionType::NotEqual(value),
        'a' => RegionType::AtMost(value),
        'b' => RegionType::AtLeast(value),
        'x' => RegionType::Xor2(value),
        'y' => RegionType::Xor3(value),
        'z' => RegionType::Xor22(value),
        'w' => RegionType::Xor222(value),
        other => bail!("unknown clue kind '{other}'"),
    })
}

fn push_coord(out: &mut String, c: Coord) {
    out.push(nib(c.x));
    out.push(nib(c.y));
}

/// Serializes a board to its printable form.
pub fn encode_board(board: &Board) -> String {
    let mut out = String::new();
    out.push(board.shape().tag());
    out.push(if board.wrap() { 'w' } else { 'n' });
    out.push(nib(board.width() - 1));
    out.push(nib(board.height() - 1));
    if let Some(c) = board.innie() {
        out.push('i');
        push_coord(&mut out, c);
    }
    for group in board.merges() {
        out.push('m');
        out.push(nib(group.len() as u8 - 1));
        for c in group.iter() {
            push_coord(&mut out, c);
        }
    }
    for clue in board.edge_clues() {
        out.push('g');
        out.push(match clue.axis {
            Axis::Row => 'r',
            Axis::Column => 'c',
        });
        out.push(nib(clue.index));
        let (letter, value) = clue_token(clue.kind);
        out.push(letter);
        out.push((b'0' + value) as char);
    }
    for y in 0..board.height() {
        for x in 0..board.width() {
            let c = Coord::new(x, y);
            if board.is_hidden(c) {
                out.push('#');
            }
            match board.cell(c) {
                CellContent::Mine => out.push('*'),
                CellContent::Clue(kind) => {
                    let (letter, value) = clue_token(kind);
                    out.push(letter);
                    out.push((b'0' + value) as char);
                }
            }
        }
    }
    out
}

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(code: &'a str) -> Self {
        Self {
            chars: code.chars().peekable(),
            pos: 0,
        }
    }

    fn next(&mut self) -> anyhow::Result<char> {
        let c = self
            .chars
            .next()
            .ok_or_else(|| anyhow!("board code ends early at position {}", self.pos))?;
        self.pos += 1;
        Ok(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn nibble(&mut self) -> anyhow::Result<u8> {
        let pos = self.pos;
        let c = self.next()?;
        c.to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| anyhow!("expected a hex digit at position {pos}, found '{c}'"))
    }

    fn digit(&mut self) -> anyhow::Result<u8> {
        let pos = self.pos;
        let c = self.next()?;
        c.to_digit(10)
            .map(|d| d as u8)
            .ok_or_else(|| anyhow!("expected a digit at position {pos}, found '{c}'"))
    }

    fn coord(&mut self) -> anyhow::Result<Coord> {
        let x = self.nibble()?;
        let y = self.nibble()?;
        Ok(Coord::new(x, y))
    }
}

/// Parses a board from its printable form; the exact inverse of
/// [`encode_board`].
pub fn decode_board(code: &str) -> anyhow::Result<Board> {
    let mut s = Scanner::new(code);
    let tag = s.next()?;
    match Shape::from_tag(tag) {
        Some(Shape::Square) => {}
        Some(other) => bail!("no topology available for shape {other:?}"),
        None => bail!("unknown shape tag '{tag}'"),
    }
    let wrap = match s.next()? {
        'w' => true,
        'n' => false,
        c => bail!("unknown wrap mode '{c}'"),
    };
    let width = s.nibble()? + 1;
    let height = s.nibble()? + 1;
    let mut board = Board::new(width, height, wrap)?;
    if s.peek() == Some('i') {
        s.next()?;
        let c = s.coord()?;
        board.set_innie(Some(c))?;
    }
    while s.peek() == Some('m') {
        s.next()?;
        let size = s.nibble()? as usize + 1;
        let mut group = crate::xy::XYSet::EMPTY;
        for _ in 0..size {
            group.insert(s.coord()?);
        }
        ensure!(group.len() == size, "merge group repeats a cell");
        board.add_merge(group)?;
    }
    while s.peek() == Some('g') {
        s.next()?;
        let axis = match s.next()? {
            'r' => Axis::Row,
            'c' => Axis::Column,
            c => bail!("unknown edge clue axis '{c}'"),
        };
        let index = s.nibble()?;
        let letter = s.next()?;
        let value = s.digit()?;
        board.add_edge_clue(axis, index, clue_from(letter, value)?)?;
    }
    for y in 0..height {
        for x in 0..width {
            let c = Coord::new(x, y);
            let mut token = s.next()?;
            let hidden = token == '#';
            if hidden {
                token = s.next()?;
            }
            if token == '*' {
                board.place_mine(c)?;
                if !hidden {
                    board.flag(c);
                }
            } else {
                let value = s.digit()?;
                board.set_clue(c, clue_from(token, value)?)?;
                if !hidden {
                    board.reveal(c);
                }
            }
        }
    }
    ensure!(
        s.peek().is_none(),
        "trailing characters after the cell grid"
    );
    Ok(board)
}

/// The structured rule record exchanged with the outside world.
///
/// `square_counts` holds the packed per-atom size constraints (index 0
/// included, always unconstrained); `used_count` and `clear_count` are the
/// rule's lifetime counters. Packed values from older encodings carry no
/// kind tag and are read as "unconstrained if negative, else Equal(value)".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCode {
    pub region_count: u8,
    pub apply_region_type: i32,
    pub apply_region_bitmap: u16,
    pub region_type: Vec<i32>,
    pub square_counts: Vec<i32>,
    pub used_count: u64,
    pub clear_count: u64,
}

impl RuleCode {
    pub fn from_rule(rule: &Rule) -> Self {
        Self {
            region_count: rule.slot_count() as u8,
            apply_region_type: rule.action().pack(),
            apply_region_bitmap: rule.action_bitmap(),
            region_type: rule.slots().iter().map(|s| s.pack()).collect(),
            square_counts: rule.partition_counts().iter().map(|p| p.pack()).collect(),
            used_count: rule.counters.lifetime_applied,
            clear_count: rule.counters.lifetime_cleared,
        }
    }

    pub fn into_rule(self) -> anyhow::Result<Rule> {
        ensure!(
            self.region_count as usize == self.region_type.len(),
            "slot list does not match the region count"
        );
        let slots = self
            .region_type
            .iter()
            .map(|&raw| RegionType::unpack(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let partition_counts = self
            .square_counts
            .iter()
            .map(|&raw| RegionType::unpack(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let action = RegionType::unpack(self.apply_region_type)?;
        let mut rule = Rule::new(slots, partition_counts, action, self.apply_region_bitmap)?;
        rule.counters.lifetime_applied = self.used_count;
        rule.counters.lifetime_cleared = self.clear_count;
        Ok(rule)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bcs::to_bytes(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bcs::from_bytes(bytes)?)
    }
}
