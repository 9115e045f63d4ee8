//! 学習プランナーの操作
//!
//! プランナーは生徒ごとのスプレッドシート。生徒一覧のプランナーID列や
//! リンク列から引くか、`spreadsheet_id` を直接指定する。

mod monthly;
mod weekly;

pub use monthly::{MonthlyFilterArgs, MonthplanItem, MonthplanSetArgs};
pub use weekly::{DatesSetArgs, PlanCreateArgs, PlanItem, PlanSetArgs};

use super::students::{find_student, planner_id_of};
use super::Service;
use cram_sheets_common::{
    cell_at, extract_spreadsheet_id, ApiError, ApiResult, CellRef, CellValue, Grid, HeaderIndex,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

lazy_static! {
    /// A列の「月コード + 参考書ID」（例: `254gMB001`）
    static ref BOOK_CODE_RE: Regex = Regex::new(r"^(\d{3,4})(.+)$").unwrap();
}

/// 見出しにこれを含む列をリンク列とみなす（リンク列が見つからないとき）
const LINK_HEADER_HINTS: &[&str] = &["スプレッドシート", "planner", "プランナー"];

/// 対象プランナーの指定（どちらか一方）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetArgs {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

/// 開いたプランナーのシート
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannerSheet {
    pub spreadsheet_id: String,
    pub sheet: String,
}

/// A列のコードを月コードと参考書IDに分ける
pub(crate) fn parse_book_code(raw: &str) -> (Option<i64>, String) {
    let raw = raw.trim();
    match BOOK_CODE_RE.captures(raw) {
        Some(caps) => (caps[1].parse().ok(), caps[2].to_string()),
        None => (None, raw.to_string()),
    }
}

static EMPTY: CellValue = CellValue::Empty;

/// グリッド上のセル（範囲外は空）
pub(crate) fn grid_cell(grid: &Grid, cell: CellRef) -> &CellValue {
    grid.get(cell.row as usize - 1)
        .map(|row| cell_at(row, cell.col))
        .unwrap_or(&EMPTY)
}

impl Service {
    /// 生徒IDまたは直接指定からプランナーのスプレッドシートIDを決める
    pub(crate) fn resolve_planner_id(&self, student_id: Option<&str>, spreadsheet_id: Option<&str>) -> ApiResult<String> {
        if let Some(direct) = spreadsheet_id.map(str::trim).filter(|s| !s.is_empty()) {
            return Ok(extract_spreadsheet_id(direct)
                .filter(|_| direct.contains('/'))
                .unwrap_or_else(|| direct.to_string()));
        }
        let student_id = student_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::bad_request("student_id か spreadsheet_id が必要です"))?;

        let table = self.load_students()?;
        let (_, row) = find_student(&table, student_id)
            .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;

        let resolved = planner_id_of(&table, row).or_else(|| {
            if table.index.col("planner_link").is_some() {
                return None;
            }
            fallback_link_col(&table.index).and_then(|c| extract_spreadsheet_id(&cell_at(row, c).text()))
        });
        let id = resolved.ok_or_else(|| {
            ApiError::not_found(format!("プランナーのスプレッドシートが見つかりません: {}", student_id))
        })?;
        debug!(student_id, spreadsheet_id = %id, "プランナーを解決");
        Ok(id)
    }

    /// 週間管理シートを開く
    ///
    /// 既知のシート名を順に探し、なければA4が月コード形式のシートを使う。
    pub(crate) fn open_weekly(&self, target: &TargetArgs) -> ApiResult<PlannerSheet> {
        let spreadsheet_id = self.resolve_planner_id(target.student_id.as_deref(), target.spreadsheet_id.as_deref())?;
        let names = self
            .sheets
            .sheet_names(&spreadsheet_id)?
            .ok_or_else(|| ApiError::not_found(format!("プランナーが見つかりません: {}", spreadsheet_id)))?;

        let layout = &self.planner_layout;
        if let Some(name) = layout
            .weekly_sheet_names
            .iter()
            .find(|want| names.iter().any(|n| n.as_str() == **want))
        {
            return Ok(PlannerSheet {
                spreadsheet_id,
                sheet: name.to_string(),
            });
        }

        let a4 = CellRef::new(layout.first_row, 0);
        for name in &names {
            let value = self.sheets.read_cell(&spreadsheet_id, name, a4)?.unwrap_or_default();
            if BOOK_CODE_RE.is_match(&value.text()) {
                debug!(spreadsheet_id = %spreadsheet_id, sheet = %name, "A4の形式から週間シートを推定");
                return Ok(PlannerSheet {
                    spreadsheet_id,
                    sheet: name.clone(),
                });
            }
        }
        Err(ApiError::not_found(format!("週間管理シートが見つかりません: {}", spreadsheet_id)))
    }

    /// 名前の決まったシート（月間管理・今月プラン）を開く
    pub(crate) fn open_named(&self, target: &TargetArgs, sheet: &str) -> ApiResult<PlannerSheet> {
        let spreadsheet_id = self.resolve_planner_id(target.student_id.as_deref(), target.spreadsheet_id.as_deref())?;
        let names = self.sheets.sheet_names(&spreadsheet_id)?.unwrap_or_default();
        if !names.iter().any(|n| n.as_str() == sheet) {
            return Err(ApiError::not_found(format!("シート '{}' が見つかりません", sheet)));
        }
        Ok(PlannerSheet {
            spreadsheet_id,
            sheet: sheet.to_string(),
        })
    }

    pub(crate) fn read_planner(&self, planner: &PlannerSheet) -> ApiResult<Grid> {
        Ok(self
            .sheets
            .read_sheet(&planner.spreadsheet_id, &planner.sheet)?
            .unwrap_or_default())
    }
}

fn fallback_link_col(index: &HeaderIndex) -> Option<usize> {
    index.find_header_containing(LINK_HEADER_HINTS)
}
