use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum LayoutError {
    #[error("layout has no keys")]
    Empty,
    #[error("layout row {row} has {found} keys, expected {expected}")]
    Ragged {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("layout is {layout_rows}x{layout_cols} but {rows} row and {cols} column lines are configured")]
    DimensionMismatch {
        layout_rows: usize,
        layout_cols: usize,
        rows: usize,
        cols: usize,
    },
}

/// A rectangular grid of key symbols, indexed by (row, column).
///
/// Symbols don't have to be unique.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeypadLayout {
    cols: usize,
    keys: Vec<String>,
}

impl KeypadLayout {
    /// Creates a layout from its rows.
    ///
    /// # Errors
    /// - `LayoutError::Empty` if there are no rows or the rows have no keys.
    /// - `LayoutError::Ragged` if the rows are not all the same length.
    pub fn new<R, S>(rows: impl IntoIterator<Item = R>) -> Result<Self, LayoutError>
    where
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cols = None;
        let mut keys = Vec::new();

        for (row, symbols) in rows.into_iter().enumerate() {
            let before = keys.len();
            keys.extend(symbols.into_iter().map(Into::into));
            let found = keys.len() - before;

            match cols {
                None => cols = Some(found),
                Some(expected) if expected != found => {
                    return Err(LayoutError::Ragged { row, found, expected });
                }
                Some(_) => {}
            }
        }

        match cols {
            Some(cols) if cols > 0 => Ok(KeypadLayout { cols, keys }),
            _ => Err(LayoutError::Empty),
        }
    }

    /// The 4x3 telephone layout.
    pub fn phone() -> Self {
        const KEYS: [[&str; 3]; 4] = [
            ["1", "2", "3"],
            ["4", "5", "6"],
            ["7", "8", "9"],
            ["*", "0", "#"],
        ];

        KeypadLayout {
            cols: 3,
            keys: KEYS.iter().flatten().map(|&s| s.to_string()).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.keys.len() / self.cols
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Gets the symbol at the given position, or `None` if it's outside the grid.
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        if row < self.rows() && col < self.cols {
            Some(&self.keys[row * self.cols + col])
        } else {
            None
        }
    }

    /// Checks that the layout covers exactly `rows` x `cols` lines.
    pub fn check_dimensions(&self, rows: usize, cols: usize) -> Result<(), LayoutError> {
        if self.rows() == rows && self.cols == cols {
            Ok(())
        } else {
            Err(LayoutError::DimensionMismatch {
                layout_rows: self.rows(),
                layout_cols: self.cols,
                rows,
                cols,
            })
        }
    }
}

impl Default for KeypadLayout {
    fn default() -> Self {
        Self::phone()
    }
}

impl Display for KeypadLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, row) in self.keys.chunks(self.cols).enumerate() {
            if i > 0 {
                write!(f, " / ")?;
            }
            write!(f, "{}", row.join(" "))?;
        }
        Ok(())
    }
}
