//! Connectivity grid geometry and the viewer-side matrix model.
//!
//! Each (source, dest) pair owns a fixed two-character cell:
//!
//! ```text
//!    from\to
//!         n0   n1
//!   +----+----+----+
//!   | n0 | ██ | ██ |      x = x0 + 6 + 5*dest
//!   +----+----+----+      y = y0 + 1 + 2*source
//!   | n1 | ██ | ██ |
//!   +----+----+----+
//! ```

use netsplit_env::{index_of, NodeName};
use std::collections::HashMap;

use crate::wire::StatusLine;

/// Default top-left corner of the grid.
pub const GRID_ORIGIN: (u16, u16) = (8, 2);

/// Horizontal distance between neighbouring cells.
pub const COLUMN_STRIDE: u16 = 5;

/// Vertical distance between neighbouring cells.
pub const ROW_STRIDE: u16 = 2;

/// Width of a painted cell in characters.
pub const CELL_WIDTH: u16 = 2;

/// Largest node count the grid lays out. Labels are three characters
/// wide, so `n99` is the last one that reads in full.
pub const MAX_GRID_NODES: usize = 100;

/// Screen position of the cell for (`source`, `dest`) indices, or `None`
/// when it falls outside the addressable screen.
pub fn cell_position(x0: u16, y0: u16, source: usize, dest: usize) -> Option<(u16, u16)> {
    let x = offset(x0, COLUMN_STRIDE, dest)?.checked_add(6)?;
    let y = offset(y0, ROW_STRIDE, source)?.checked_add(1)?;
    Some((x, y))
}

fn offset(origin: u16, stride: u16, index: usize) -> Option<u16> {
    u16::try_from(index).ok()?.checked_mul(stride)?.checked_add(origin)
}

/// One fixed glyph of the grid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGlyph {
    pub x: u16,
    pub y: u16,
    pub ch: char,
}

/// Grid geometry for a fixed number of nodes.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub x0: u16,
    pub y0: u16,
    pub nodes: usize,
    pub prefix: String,
}

impl GridLayout {
    pub fn new(nodes: usize) -> Self {
        Self {
            x0: GRID_ORIGIN.0,
            y0: GRID_ORIGIN.1,
            nodes,
            prefix: NodeName::DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Nodes actually laid out, capped at [`MAX_GRID_NODES`].
    pub fn span(&self) -> usize {
        self.nodes.min(MAX_GRID_NODES)
    }

    /// Cell for a pair of indices, or `None` outside the laid out set.
    pub fn cell(&self, source: usize, dest: usize) -> Option<(u16, u16)> {
        let span = self.span();
        if source >= span || dest >= span {
            return None;
        }
        cell_position(self.x0, self.y0, source, dest)
    }

    /// Columns needed to show the whole grid.
    pub fn width(&self) -> u16 {
        let span = self.span() as u16;
        self.x0.saturating_add(COLUMN_STRIDE * (span + 1))
    }

    /// Rows needed to show the whole grid.
    pub fn height(&self) -> u16 {
        let span = self.span() as u16;
        self.y0.saturating_add(ROW_STRIDE * span + 1)
    }

    /// Every glyph of the static frame: header, borders and labels.
    pub fn frame(&self) -> Vec<FrameGlyph> {
        let (x0, y0) = (self.x0, self.y0);
        let mut glyphs = Vec::new();
        let mut put = |x: u16, y: u16, ch: char| glyphs.push(FrameGlyph { x, y, ch });

        for (i, ch) in "from\\to".chars().enumerate() {
            put(3 + i as u16, 0, ch);
        }

        // Glyphs pushed past the u16 edge land on it and get clipped.
        let span = self.span() as u16;
        for i in 0..=span {
            let row = y0.saturating_add(ROW_STRIDE * i);
            for j in 0..=span {
                let col = x0.saturating_add(COLUMN_STRIDE * j);
                for k in 0..4 {
                    put(col.saturating_add(k), row, '-');
                }
                if i > 0 {
                    put(col.saturating_add(4), row - 1, '|');
                }
                put(col.saturating_add(4), row, '+');
            }
        }

        for i in 0..span {
            let label = format!("{}{}", self.prefix, i);
            let col = x0.saturating_add(6 + COLUMN_STRIDE * i);
            let row = y0.saturating_add(1 + ROW_STRIDE * i);
            for (k, ch) in label.chars().take(3).enumerate() {
                put(col.saturating_add(k as u16), y0.saturating_sub(1), ch);
                put(x0.saturating_add(1 + k as u16), row, ch);
            }
        }

        glyphs
    }
}

/// Latest known outcome per cell. No history: last write wins.
#[derive(Debug, Clone)]
pub struct ConnectivityMatrix {
    layout: GridLayout,
    cells: HashMap<(usize, usize), bool>,
}

impl ConnectivityMatrix {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            cells: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Records a decoded result; returns its indices when it maps to a
    /// cell of the grid.
    pub fn apply(&mut self, line: &StatusLine) -> Option<(usize, usize)> {
        let source = index_of(&line.source)?;
        let dest = index_of(&line.dest)?;
        self.layout.cell(source, dest)?;
        self.cells.insert((source, dest), line.success);
        Some((source, dest))
    }

    /// Latest outcome for a pair, if any was seen.
    pub fn outcome(&self, source: usize, dest: usize) -> Option<bool> {
        self.cells.get(&(source, dest)).copied()
    }

    /// All painted cells with their screen position and outcome.
    pub fn painted(&self) -> impl Iterator<Item = ((u16, u16), bool)> + '_ {
        self.cells.iter().filter_map(|(&(s, d), &ok)| {
            self.layout.cell(s, d).map(|pos| (pos, ok))
        })
    }
}
