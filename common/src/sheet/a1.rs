//! A1記法のセル・範囲参照

use crate::error::SheetError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// 列文字を0始まりの列番号に変換（A→0, Z→25, AA→26）
pub fn column_letter_to_index(letter: &str) -> Option<usize> {
    if letter.is_empty() {
        return None;
    }
    let mut result = 0usize;
    for c in letter.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        result = result * 26 + (c as usize - 'A' as usize + 1);
    }
    Some(result - 1)
}

/// 0始まりの列番号を列文字に変換
pub fn index_to_column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// 単一セル参照（行は1始まり、列は0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: u32, col: usize) -> Self {
        Self { row, col }
    }

    /// 列文字と行番号から作る
    pub fn at(column: &str, row: u32) -> Result<Self, SheetError> {
        let col = column_letter_to_index(column)
            .ok_or_else(|| SheetError::InvalidRange(format!("{}{}", column, row)))?;
        if row == 0 {
            return Err(SheetError::InvalidRange(format!("{}{}", column, row)));
        }
        Ok(Self { row, col })
    }

    pub fn column_letter(&self) -> String {
        index_to_column_letter(self.col)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column_letter(), self.row)
    }
}

impl FromStr for CellRef {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static::lazy_static! {
            static ref CELL_RE: Regex = Regex::new(r"^([A-Za-z]+)([0-9]+)$").unwrap();
        }
        let caps = CELL_RE
            .captures(s.trim())
            .ok_or_else(|| SheetError::InvalidRange(s.to_string()))?;
        let row: u32 = caps[2]
            .parse()
            .map_err(|_| SheetError::InvalidRange(s.to_string()))?;
        Self::at(&caps[1], row)
    }
}

/// 矩形範囲（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl A1Range {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        Self {
            start: CellRef::new(start.row.min(end.row), start.col.min(end.col)),
            end: CellRef::new(start.row.max(end.row), start.col.max(end.col)),
        }
    }

    pub fn single(cell: CellRef) -> Self {
        Self { start: cell, end: cell }
    }

    /// 1列の縦範囲（例: H4:H30）
    pub fn column(column: &str, first_row: u32, last_row: u32) -> Result<Self, SheetError> {
        Ok(Self::new(CellRef::at(column, first_row)?, CellRef::at(column, last_row)?))
    }

    pub fn height(&self) -> usize {
        (self.end.row - self.start.row + 1) as usize
    }

    pub fn width(&self) -> usize {
        self.end.col - self.start.col + 1
    }
}

impl fmt::Display for A1Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for A1Range {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => Ok(Self::new(a.parse()?, b.parse()?)),
            None => Ok(Self::single(s.parse()?)),
        }
    }
}
