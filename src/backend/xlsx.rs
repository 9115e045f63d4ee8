//! xlsxファイルのバックエンド
//!
//! `<data_dir>/<spreadsheet_id>.xlsx` を1つのスプレッドシートとみなす。
//! 読み込みは calamine、書き込みはワークブック全体を rust_xlsxwriter で書き直す。
//! 書式や数式は保持しない（値のみ）。

use crate::error::{CramError, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate};
use cram_sheets_common::sheet::{with_spreadsheet_id, SheetData, WorkbookData};
use cram_sheets_common::{CellRef, CellValue, Grid, Row, SheetAccessor, SheetError};
use parking_lot::Mutex;
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const EXTENSION: &str = "xlsx";
const MAX_COLUMNS: usize = 16_384;

pub struct XlsxBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl XlsxBackend {
    /// データフォルダを開く（なければ作る）
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(CramError::DataDirNotFound(dir.display().to_string()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// スプレッドシートIDに対応するファイルパス（パス区切りなどを含むIDは拒否）
    pub fn path_for(&self, spreadsheet_id: &str) -> Option<PathBuf> {
        let id = spreadsheet_id.trim();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !id.starts_with('.');
        if valid {
            Some(self.dir.join(format!("{}.{}", id, EXTENSION)))
        } else {
            None
        }
    }

    /// データフォルダ内のスプレッドシートID一覧
    pub fn list_spreadsheets(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(EXTENSION))
                    .unwrap_or(false)
            })
            .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().to_string()))
            .filter(|stem| !stem.starts_with("~$"))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// ワークブック全体を読む（ファイルがなければ `None`）
    pub fn load(&self, spreadsheet_id: &str) -> Result<Option<WorkbookData>> {
        let Some(path) = self.path_for(spreadsheet_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let mut workbook: Xlsx<_> = open_workbook(&path)?;
        let mut data = WorkbookData::default();
        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            let mut rows: Grid = Vec::new();
            if let Some((start_row, start_col)) = range.start() {
                rows.resize_with(start_row as usize, Vec::new);
                for source in range.rows() {
                    let mut row: Row = vec![CellValue::Empty; start_col as usize];
                    row.extend(source.iter().map(to_cell));
                    rows.push(row);
                }
            }
            data.sheets.push(SheetData { name, rows });
        }
        debug!(spreadsheet_id, sheets = data.sheets.len(), "ワークブックを読み込み");
        Ok(Some(data))
    }

    /// ワークブック全体を書き出す（一時ファイルに書いてから置き換える）
    pub fn save(&self, spreadsheet_id: &str, data: &WorkbookData) -> Result<()> {
        let path = self
            .path_for(spreadsheet_id)
            .ok_or_else(|| CramError::Sheet(SheetError::SpreadsheetMissing(spreadsheet_id.to_string())))?;

        let mut workbook = Workbook::new();
        for sheet in &data.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;
            for (r, row) in sheet.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    if c >= MAX_COLUMNS {
                        return Err(CramError::WorkbookWrite(format!("列数が上限を超えています: {}", sheet.name)));
                    }
                    let (r, c) = (r as u32, c as u16);
                    match cell {
                        CellValue::Empty => {}
                        CellValue::Text(s) => {
                            worksheet.write_string(r, c, s)?;
                        }
                        CellValue::Number(n) => {
                            worksheet.write_number(r, c, *n)?;
                        }
                        CellValue::Bool(b) => {
                            worksheet.write_boolean(r, c, *b)?;
                        }
                    }
                }
            }
        }

        let tmp = path.with_extension("tmp.xlsx");
        workbook.save(&tmp)?;
        std::fs::rename(&tmp, &path)?;
        info!(spreadsheet_id, "ワークブックを保存");
        Ok(())
    }

    /// 新規作成（既存ファイルは上書き）
    pub fn create(&self, spreadsheet_id: &str, data: &WorkbookData) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.save(spreadsheet_id, data)
    }

    fn modify<F>(&self, spreadsheet_id: &str, f: F) -> std::result::Result<(), SheetError>
    where
        F: FnOnce(&mut WorkbookData) -> std::result::Result<(), SheetError>,
    {
        let _guard = self.write_lock.lock();
        let mut data = self
            .load(spreadsheet_id)?
            .ok_or_else(|| SheetError::SpreadsheetMissing(spreadsheet_id.to_string()))?;
        f(&mut data).map_err(|e| with_spreadsheet_id(e, spreadsheet_id))?;
        self.save(spreadsheet_id, &data)?;
        Ok(())
    }
}

fn to_cell(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(CellValue::Text)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        other => CellValue::Text(other.to_string()),
    }
}

/// Excelのシリアル値を `YYYY-MM-DD` にする
fn excel_serial_to_date(serial: f64) -> Option<String> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(Duration::days(serial.floor() as i64))?;
    Some(date.format("%Y-%m-%d").to_string())
}

impl SheetAccessor for XlsxBackend {
    fn sheet_names(&self, spreadsheet_id: &str) -> std::result::Result<Option<Vec<String>>, SheetError> {
        Ok(self.load(spreadsheet_id)?.map(|wb| wb.sheet_names()))
    }

    fn read_sheet(&self, spreadsheet_id: &str, sheet: &str) -> std::result::Result<Option<Grid>, SheetError> {
        Ok(self
            .load(spreadsheet_id)?
            .and_then(|wb| wb.sheet(sheet).cloned()))
    }

    fn write_range(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start: CellRef,
        values: &[Row],
    ) -> std::result::Result<(), SheetError> {
        self.modify(spreadsheet_id, |wb| wb.write_range(sheet, start, values))
    }

    fn append_rows(&self, spreadsheet_id: &str, sheet: &str, rows: &[Row]) -> std::result::Result<(), SheetError> {
        self.modify(spreadsheet_id, |wb| wb.append_rows(sheet, rows))
    }

    fn delete_rows(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        start_row: u32,
        count: u32,
    ) -> std::result::Result<(), SheetError> {
        self.modify(spreadsheet_id, |wb| wb.delete_rows(sheet, start_row, count))
    }
}
