//! メモリ上のワークブック
//!
//! テストやJSONスナップショットに使うバックエンド。
//! グリッド操作（書き込み・追記・行削除）は `WorkbookData` に置き、
//! ファイル系バックエンドもこれを共有する。

use super::{CellRef, CellValue, Grid, Row, SheetAccessor};
use crate::error::SheetError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 1シート分のデータ
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    pub name: String,
    #[serde(default)]
    pub rows: Grid,
}

/// 1スプレッドシート分のデータ（シート順を保持）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbookData {
    #[serde(default)]
    pub sheets: Vec<SheetData>,
}

impl WorkbookData {
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Grid> {
        self.sheets.iter().find(|s| s.name == name).map(|s| &s.rows)
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut Grid> {
        self.sheets.iter_mut().find(|s| s.name == name).map(|s| &mut s.rows)
    }

    /// シートを追加（同名があれば置き換え）
    pub fn put_sheet(&mut self, name: &str, rows: Grid) {
        match self.sheet_mut(name) {
            Some(existing) => *existing = rows,
            None => self.sheets.push(SheetData {
                name: name.to_string(),
                rows,
            }),
        }
    }

    pub fn write_range(
        &mut self,
        sheet: &str,
        start: CellRef,
        values: &[Row],
    ) -> Result<(), SheetError> {
        let grid = self.require_sheet(sheet)?;
        for (dr, value_row) in values.iter().enumerate() {
            let r = start.row as usize - 1 + dr;
            if grid.len() <= r {
                grid.resize_with(r + 1, Vec::new);
            }
            let row = &mut grid[r];
            for (dc, value) in value_row.iter().enumerate() {
                let c = start.col + dc;
                if row.len() <= c {
                    row.resize(c + 1, CellValue::Empty);
                }
                row[c] = value.clone();
            }
        }
        Ok(())
    }

    pub fn append_rows(&mut self, sheet: &str, rows: &[Row]) -> Result<(), SheetError> {
        let grid = self.require_sheet(sheet)?;
        let last_used = grid
            .iter()
            .rposition(|row| row.iter().any(|c| !c.is_blank()))
            .map(|i| i + 1)
            .unwrap_or(0);
        grid.truncate(last_used);
        grid.extend(rows.iter().cloned());
        Ok(())
    }

    pub fn delete_rows(&mut self, sheet: &str, start_row: u32, count: u32) -> Result<(), SheetError> {
        if start_row == 0 {
            return Err(SheetError::InvalidRange(format!("row {}", start_row)));
        }
        let grid = self.require_sheet(sheet)?;
        let start = (start_row as usize - 1).min(grid.len());
        let end = (start + count as usize).min(grid.len());
        grid.drain(start..end);
        Ok(())
    }

    fn require_sheet(&mut self, sheet: &str) -> Result<&mut Grid, SheetError> {
        self.sheet_mut(sheet).ok_or_else(|| SheetError::SheetMissing {
            spreadsheet_id: String::new(),
            sheet: sheet.to_string(),
        })
    }
}

/// メモリ上の複数スプレッドシート
#[derive(Debug, Default)]
pub struct MemoryBackend {
    books: RwLock<HashMap<String, WorkbookData>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// シートを追加したバックエンドを返す（ビルダー形式）
    pub fn with_sheet(self, spreadsheet_id: &str, sheet: &str, rows: Grid) -> Self {
        self.put_sheet(spreadsheet_id, sheet, rows);
        self
    }

    pub fn put_sheet(&self, spreadsheet_id: &str, sheet: &str, rows: Grid) {
        self.books
            .write()
            .entry(spreadsheet_id.to_string())
            .or_default()
            .put_sheet(sheet, rows);
    }

    /// 現在のシート内容を複製して返す
    pub fn snapshot(&self, spreadsheet_id: &str, sheet: &str) -> Option<Grid> {
        self.books
            .read()
            .get(spreadsheet_id)
            .and_then(|wb| wb.sheet(sheet).cloned())
    }

    /// JSONスナップショット（スプレッドシートID → ワークブック）から作る
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        let books: HashMap<String, WorkbookData> = serde_json::from_str(json)?;
        Ok(Self {
            books: RwLock::new(books),
        })
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(&*self.books.read())?)
    }

    fn with_book_mut<F>(&self, spreadsheet_id: &str, f: F) -> Result<(), SheetError>
    where
        F: FnOnce(&mut WorkbookData) -> Result<(), SheetError>,
    {
        let mut books = self.books.write();
        let book = books
            .get_mut(spreadsheet_id)
            .ok_or_else(|| SheetError::SpreadsheetMissing(spreadsheet_id.to_string()))?;
        f(book).map_err(|e| with_spreadsheet_id(e, spreadsheet_id))
    }
}

/// シート不在エラーにスプレッドシートIDを付け直す
pub fn with_spreadsheet_id(error: SheetError, id: &str) -> SheetError {
    match error {
        SheetError::SheetMissing { sheet, .. } => SheetError::SheetMissing {
            spreadsheet_id: id.to_string(),
            sheet,
        },
        other => other,
    }
}

impl SheetAccessor for MemoryBackend {
    fn sheet_names(&self, spreadsheet_id: &str) -> Result<Option<Vec<String>>, SheetError> {
        Ok(self.books.read().get(spreadsheet_id).map(WorkbookData::sheet_names))
    }

    fn read_sheet(&self, spreadsheet_id: &str, sheet: &str) -> Result<Option<Grid>, SheetError> {
        Ok(self.snapshot(spreadsheet_id, sheet))
    }

    fn write_range(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start: CellRef,
        values: &[Row],
    ) -> Result<(), SheetError> {
        self.with_book_mut(spreadsheet_id, |book| book.write_range(sheet, start, values))
    }

    fn append_rows(&self, spreadsheet_id: &str, sheet: &str, rows: &[Row]) -> Result<(), SheetError> {
        self.with_book_mut(spreadsheet_id, |book| book.append_rows(sheet, rows))
    }

    fn delete_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start_row: u32,
        count: u32,
    ) -> Result<(), SheetError> {
        self.with_book_mut(spreadsheet_id, |book| book.delete_rows(sheet, start_row, count))
    }
}
