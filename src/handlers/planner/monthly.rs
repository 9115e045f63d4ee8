//! 月間管理・今月プランシート

use super::{grid_cell, TargetArgs};
use crate::handlers::books::number_json;
use crate::handlers::Service;
use cram_sheets_common::{
    as_whole_number, cell_at, ApiError, ApiResult, CellRef, CellValue, ErrorCode, ItemResult, WEEK_COUNT,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

/// 月間管理シートで実績週を持つ列（N〜R）
const MONTHLY_WEEK_COLUMNS: std::ops::Range<usize> = 13..18;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonthlyFilterArgs {
    /// 2桁または4桁
    #[serde(default)]
    pub year: Value,
    #[serde(default)]
    pub month: Value,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonthplanItem {
    #[serde(default)]
    pub row: Option<i64>,
    #[serde(default)]
    pub week: Option<i64>,
    #[serde(default)]
    pub hours: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonthplanSetArgs {
    #[serde(default)]
    pub items: Vec<MonthplanItem>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

/// 数値または数字だけの文字列を整数として読む
fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(as_whole_number)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 西暦を下2桁にそろえる
fn two_digit_year(value: &Value) -> Option<i64> {
    match integer_of(value)? {
        n if n >= 2000 => Some(n - 2000),
        n if (0..=99).contains(&n) => Some(n),
        _ => None,
    }
}

/// 今月プランの時間セル（空や不正は0）
fn hours_of(cell: &CellValue) -> i64 {
    match cell {
        CellValue::Number(n) => as_whole_number(*n).unwrap_or(0),
        CellValue::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

impl Service {
    /// 月間管理シートから、B列=年（下2桁）・C列=月の行を取り出す
    pub fn planner_monthly_filter(&self, args: MonthlyFilterArgs) -> ApiResult<Value> {
        let yy = two_digit_year(&args.year);
        let mm = integer_of(&args.month).filter(|m| (1..=12).contains(m));
        let (Some(yy), Some(mm)) = (yy, mm) else {
            return Err(ApiError::bad_request("year（2桁/4桁）と month（1〜12）を指定してください"));
        };

        let target = TargetArgs {
            student_id: args.student_id,
            spreadsheet_id: args.spreadsheet_id,
        };
        let planner = self.open_named(&target, self.planner_layout.monthly_sheet)?;
        let grid = self.read_planner(&planner)?;

        let mut items = Vec::new();
        for (i, row) in grid.iter().enumerate().skip(1) {
            let (a, b, c) = (cell_at(row, 0).text(), cell_at(row, 1).text(), cell_at(row, 2).text());
            if a.is_empty() && b.is_empty() && c.is_empty() {
                continue;
            }
            let (Ok(year), Ok(month)) = (b.parse::<i64>(), c.parse::<i64>()) else {
                continue;
            };
            if year != yy || month != mm {
                continue;
            }

            let text = |col: usize| cell_at(row, col).text();
            let number = |col: usize| number_json(cell_at(row, col).to_number());
            let weeks: Vec<Value> = MONTHLY_WEEK_COLUMNS
                .enumerate()
                .map(|(j, col)| json!({ "index": j + 1, "actual": text(col) }))
                .collect();
            items.push(json!({
                "row": i + 1,
                "raw_code": a,
                "month_code": year * 10 + month,
                "year": year,
                "month": month,
                "book_id": text(6),
                "subject": text(7),
                "title": text(8),
                "guideline_note": text(9),
                "unit_load": number(10),
                "monthly_minutes": number(11),
                "guideline_amount": number(12),
                "weeks": weeks,
            }));
        }
        Ok(json!({ "year": yy, "month": mm, "count": items.len(), "items": items }))
    }

    /// 今月プラン（A4:H30）の週ごとの時間と合計
    pub fn planner_monthplan_get(&self, target: TargetArgs) -> ApiResult<Value> {
        let layout = &self.planner_layout;
        let planner = self.open_named(&target, layout.monthplan_sheet)?;
        let grid = self.read_planner(&planner)?;

        let mut week_totals = [0i64; WEEK_COUNT];
        let mut items = Vec::new();
        for row in layout.first_row..=layout.last_row {
            let text = |col: usize| grid_cell(&grid, CellRef::new(row, col)).text();
            let book_id = text(0);
            if book_id.is_empty() {
                break;
            }
            let mut weeks = Map::new();
            let mut row_total = 0;
            for (w, total) in week_totals.iter_mut().enumerate() {
                let hours = layout
                    .monthplan_cell(w as i64 + 1, row)
                    .map(|cell| hours_of(grid_cell(&grid, cell)))
                    .unwrap_or(0);
                weeks.insert((w + 1).to_string(), json!(hours));
                row_total += hours;
                *total += hours;
            }
            items.push(json!({
                "row": row,
                "book_id": book_id,
                "subject": text(1),
                "title": text(2),
                "weeks": weeks,
                "row_total": row_total,
            }));
        }

        let totals: Map<String, Value> = week_totals
            .iter()
            .enumerate()
            .map(|(w, t)| ((w + 1).to_string(), json!(t)))
            .collect();
        Ok(json!({
            "count": items.len(),
            "items": items,
            "week_totals": totals,
            "grand_total": week_totals.iter().sum::<i64>(),
        }))
    }

    /// 今月プランの時間を一括で書く
    pub fn planner_monthplan_set(&self, args: MonthplanSetArgs) -> ApiResult<Value> {
        if args.items.is_empty() {
            return Err(ApiError::bad_request("items が必要です"));
        }
        let layout = &self.planner_layout;
        let target = TargetArgs {
            student_id: args.student_id,
            spreadsheet_id: args.spreadsheet_id,
        };
        let planner = self.open_named(&target, layout.monthplan_sheet)?;

        let mut results = Vec::with_capacity(args.items.len());
        for item in &args.items {
            let at = |result: ItemResult| result.at(item.row, item.week);

            let Some(row) = item.row.filter(|r| layout.contains_row(*r)) else {
                results.push(at(ItemResult::failure(
                    ErrorCode::BadRow,
                    format!("row は{}〜{}です", layout.first_row, layout.last_row),
                )));
                continue;
            };
            let Some(cell) = item.week.and_then(|w| layout.monthplan_cell(w, row as u32)) else {
                results.push(at(ItemResult::failure(ErrorCode::BadWeek, "week は1〜5です")));
                continue;
            };
            let Some(hours) = item.hours.as_ref().and_then(integer_of) else {
                results.push(at(ItemResult::failure(ErrorCode::BadHours, "hours は整数で指定してください")));
                continue;
            };

            match self
                .sheets
                .write_cell(&planner.spreadsheet_id, &planner.sheet, cell, CellValue::from(hours))
            {
                Ok(()) => results.push(at(ItemResult::success().with_cell(cell.to_string()))),
                Err(e) => {
                    warn!(%cell, error = %e, "今月プランの書き込みに失敗");
                    results.push(at(ItemResult::failure(ErrorCode::Error, e.to_string())));
                }
            }
        }
        info!(
            spreadsheet_id = %planner.spreadsheet_id,
            written = results.iter().filter(|r| r.ok).count(),
            total = results.len(),
            "今月プランを更新"
        );
        Ok(json!({ "updated": true, "results": results }))
    }
}
