//! シートアクセス層
//!
//! コアロジックは特定のスプレッドシート製品に依存せず、
//! 矩形範囲の読み書きだけを行う `SheetAccessor` に依存する。

pub mod a1;
pub mod memory;

pub use a1::{column_letter_to_index, index_to_column_letter, A1Range, CellRef};
pub use memory::{with_spreadsheet_id, MemoryBackend, SheetData, WorkbookData};

use crate::error::SheetError;
use crate::normalize::parse_number;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// セル値（生の値を保持し、表示用文字列は `display` で得る）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// 表示用文字列
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(b) => if *b { "TRUE".into() } else { "FALSE".into() },
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }

    /// 前後の空白を除いた表示用文字列
    pub fn text(&self) -> String {
        match self {
            CellValue::Text(s) => s.trim().to_string(),
            other => other.display(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// JSON入力からセル値を作る（オブジェクトや配列は文字列化）
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
            serde_json::Value::String(s) if s.is_empty() => CellValue::Empty,
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// JSON出力用（数値は数値のまま）
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Empty => serde_json::Value::String(String::new()),
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

/// 行の並び（1行目がヘッダー）
pub type Row = Vec<CellValue>;
pub type Grid = Vec<Row>;

static EMPTY_CELL: CellValue = CellValue::Empty;

/// 範囲外でも空セルを返すセル参照
pub fn cell_at(row: &[CellValue], col: usize) -> &CellValue {
    row.get(col).unwrap_or(&EMPTY_CELL)
}

/// 列位置が不明（`None`）なら空文字を返す
pub fn cell_text(row: &[CellValue], col: Option<usize>) -> String {
    col.map(|c| cell_at(row, c).text()).unwrap_or_default()
}

/// 文字列の2次元配列からグリッドを作る（テスト・初期データ用）
pub fn grid_from_strs(rows: &[&[&str]]) -> Grid {
    rows.iter()
        .map(|r| r.iter().map(|s| CellValue::from(*s)).collect())
        .collect()
}

/// 範囲のセルを矩形で切り出す（足りない部分は空セルで埋める）
pub fn slice_range(grid: &[Row], range: &A1Range) -> Grid {
    (range.start.row..=range.end.row)
        .map(|r| {
            let row = grid.get(r as usize - 1).map(Vec::as_slice).unwrap_or(&[]);
            (range.start.col..=range.end.col)
                .map(|c| cell_at(row, c).clone())
                .collect()
        })
        .collect()
}

/// スプレッドシートへの狭い読み書き契約
///
/// シート・スプレッドシートの不在は `Ok(None)` で表す。
/// `Err` はバックエンド自体の失敗。
pub trait SheetAccessor: Send + Sync {
    /// シート名一覧（スプレッドシートがなければ `None`）
    fn sheet_names(&self, spreadsheet_id: &str) -> Result<Option<Vec<String>>, SheetError>;

    /// シート全体を読む
    fn read_sheet(&self, spreadsheet_id: &str, sheet: &str) -> Result<Option<Grid>, SheetError>;

    /// 矩形範囲を読む（範囲の大きさぶん空セルで埋めて返す）
    fn read_range(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        range: &A1Range,
    ) -> Result<Option<Grid>, SheetError> {
        Ok(self
            .read_sheet(spreadsheet_id, sheet)?
            .map(|grid| slice_range(&grid, range)))
    }

    /// 単一セルを読む
    fn read_cell(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        cell: CellRef,
    ) -> Result<Option<CellValue>, SheetError> {
        Ok(self
            .read_range(spreadsheet_id, sheet, &A1Range::single(cell))?
            .and_then(|grid| grid.into_iter().next())
            .and_then(|row| row.into_iter().next()))
    }

    /// `start` を左上として値を書き込む
    fn write_range(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start: CellRef,
        values: &[Row],
    ) -> Result<(), SheetError>;

    fn write_cell(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        cell: CellRef,
        value: CellValue,
    ) -> Result<(), SheetError> {
        self.write_range(spreadsheet_id, sheet, cell, &[vec![value]])
    }

    /// 最後の非空行の後ろに行を追加
    fn append_rows(&self, spreadsheet_id: &str, sheet: &str, rows: &[Row]) -> Result<(), SheetError>;

    /// `start_row`（1始まり）から `count` 行を削除
    fn delete_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start_row: u32,
        count: u32,
    ) -> Result<(), SheetError>;
}

/// URLや生のIDからスプレッドシートIDを取り出す
pub fn extract_spreadsheet_id(text: &str) -> Option<String> {
    lazy_static::lazy_static! {
        static ref URL_RE: Regex = Regex::new(r"/spreadsheets/d/([-\w]+)").unwrap();
        static ref RAW_RE: Regex = Regex::new(r"[-\w]{25,}").unwrap();
    }
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(caps) = URL_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    RAW_RE.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Number(5.0).display(), "5");
        assert_eq!(CellValue::Number(2.5).display(), "2.5");
        assert_eq!(CellValue::Bool(true).display(), "TRUE");
        assert_eq!(CellValue::Empty.display(), "");
        assert_eq!(CellValue::from("  青チャート ").text(), "青チャート");
    }

    #[test]
    fn test_cell_blank() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::from("　 ").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn test_cell_to_number() {
        assert_eq!(CellValue::from("120").to_number(), Some(120.0));
        assert_eq!(CellValue::Number(f64::NAN).to_number(), None);
        assert_eq!(CellValue::from("abc").to_number(), None);
    }

    #[test]
    fn test_cell_serde_untagged() {
        let row: Row = serde_json::from_value(json!(["a", 1, null, true])).unwrap();
        assert_eq!(
            row,
            vec![
                CellValue::Text("a".into()),
                CellValue::Number(1.0),
                CellValue::Empty,
                CellValue::Bool(true)
            ]
        );
    }

    #[test]
    fn test_slice_range_pads() {
        let grid = grid_from_strs(&[&["a", "b"], &["c"]]);
        let range: A1Range = "A1:C3".parse().unwrap();
        let sliced = slice_range(&grid, &range);
        assert_eq!(sliced.len(), 3);
        assert!(sliced.iter().all(|r| r.len() == 3));
        assert_eq!(sliced[1][0].text(), "c");
        assert!(sliced[2][2].is_blank());
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        let url = "https://docs.google.com/spreadsheets/d/1AbCdEfGhIjKlMnOpQrStUvWxYz012345/edit#gid=0";
        assert_eq!(
            extract_spreadsheet_id(url).as_deref(),
            Some("1AbCdEfGhIjKlMnOpQrStUvWxYz012345")
        );
        assert_eq!(
            extract_spreadsheet_id("1AbCdEfGhIjKlMnOpQrStUvWxYz012345").as_deref(),
            Some("1AbCdEfGhIjKlMnOpQrStUvWxYz012345")
        );
        assert_eq!(extract_spreadsheet_id("short"), None);
        assert_eq!(extract_spreadsheet_id(""), None);
    }
}
