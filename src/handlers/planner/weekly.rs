//! 週間管理シート
//!
//! 4〜30行目が参考書ごとの行。1〜5週目がそれぞれ
//! 時間・単位処理量・目安量・計画の4列を持つ。

use super::{grid_cell, parse_book_code, PlannerSheet, TargetArgs};
use crate::handlers::books::number_json;
use crate::handlers::Service;
use chrono::NaiveDate;
use cram_sheets_common::{
    ApiError, ApiResult, CellRef, CellValue, ErrorCode, Grid, ItemResult, PlannerLayout, Row, WEEK_COUNT,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatesSetArgs {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

/// 計画セル1つぶんの書き込み
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanItem {
    #[serde(default)]
    pub week_index: Option<i64>,
    #[serde(default)]
    pub plan_text: Option<String>,
    #[serde(default)]
    pub row: Option<i64>,
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
}

/// 単発（`week_index` など）か一括（`items`）のどちらか
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanSetArgs {
    #[serde(default)]
    pub week_index: Option<i64>,
    #[serde(default)]
    pub plan_text: Option<String>,
    #[serde(default)]
    pub row: Option<i64>,
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub items: Option<Vec<PlanItem>>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

impl PlanSetArgs {
    fn target(&self) -> TargetArgs {
        TargetArgs {
            student_id: self.student_id.clone(),
            spreadsheet_id: self.spreadsheet_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanCreateArgs {
    #[serde(default)]
    pub items: Vec<PlanItem>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

/// 書き込み前の検証に使うシートの写し
///
/// 一括書き込みでは受理したセルをここにも反映し、
/// 同じセルへの2回目の書き込みが既存扱いになるようにする。
struct PlanSheet<'a> {
    layout: &'a PlannerLayout,
    grid: Grid,
    book_rows: HashMap<String, u32>,
    max_len: usize,
}

impl<'a> PlanSheet<'a> {
    fn new(layout: &'a PlannerLayout, grid: Grid, max_len: usize) -> Self {
        let book_rows = item_rows(layout, &grid)
            .map(|(row, code)| (parse_book_code(&code).1, row))
            .collect();
        Self {
            layout,
            grid,
            book_rows,
            max_len,
        }
    }

    fn resolve_row(&self, row: Option<i64>, book_id: Option<&str>) -> Option<u32> {
        match row.filter(|r| *r != 0) {
            Some(r) if self.layout.contains_row(r) => Some(r as u32),
            Some(_) => None,
            None => book_id
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .and_then(|b| self.book_rows.get(b).copied()),
        }
    }

    /// 書き込み先のセルを検証する（週番号は検証済み）
    fn check(&self, week: i64, text: &str, row: Option<i64>, book_id: Option<&str>, overwrite: bool) -> ApiResult<CellRef> {
        let len = text.chars().count();
        if len > self.max_len {
            return Err(ApiError::new(
                ErrorCode::TooLong,
                format!("plan_text は{}文字以内にしてください（{}文字）", self.max_len, len),
            ));
        }
        let row = self.resolve_row(row, book_id).ok_or_else(|| {
            ApiError::new(ErrorCode::RowNotFound, "row または book_id に一致する行がありません")
        })?;
        let week_cols = self
            .layout
            .week(week)
            .ok_or_else(|| ApiError::new(ErrorCode::BadWeek, "week_index は1〜5です"))?;

        if grid_cell(&self.grid, CellRef::new(row, 0)).is_blank() {
            return Err(ApiError::new(
                ErrorCode::PreconditionAEmpty,
                format!("A{} が空のため書き込めません", row),
            ));
        }
        let time_cell = week_cols.time_cell(row);
        if grid_cell(&self.grid, time_cell).is_blank() {
            return Err(ApiError::new(
                ErrorCode::PreconditionTimeEmpty,
                format!("週の時間セル {} が空のため書き込めません", time_cell),
            ));
        }
        let plan_cell = week_cols.plan_cell(row);
        if !overwrite && !grid_cell(&self.grid, plan_cell).is_blank() {
            return Err(ApiError::new(
                ErrorCode::AlreadyExists,
                format!("{} には既に計画があります（上書きは overwrite=true）", plan_cell),
            )
            .with_details(json!({ "cell": plan_cell.to_string() })));
        }
        Ok(plan_cell)
    }

    fn accept(&mut self, cell: CellRef, text: &str) {
        let r = cell.row as usize - 1;
        if self.grid.len() <= r {
            self.grid.resize_with(r + 1, Vec::new);
        }
        let row = &mut self.grid[r];
        if row.len() <= cell.col {
            row.resize(cell.col + 1, CellValue::Empty);
        }
        row[cell.col] = CellValue::from(text);
    }
}

/// 受理したセルを列ごと・連続する行ごとにまとめ、書き込む範囲と値にする
///
/// 値は受理後の写しから取るので、同じセルへの上書きは最後の値になる。
fn column_runs(grid: &Grid, cells: &[CellRef]) -> Vec<(CellRef, Vec<Row>)> {
    let mut by_column: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    for cell in cells {
        by_column.entry(cell.col).or_default().insert(cell.row);
    }

    let mut runs = Vec::new();
    for (col, rows) in by_column {
        let mut current: Option<(u32, u32)> = None;
        for row in rows {
            current = match current {
                Some((first, last)) if row == last + 1 => Some((first, row)),
                Some(run) => {
                    runs.push(run_values(grid, col, run));
                    Some((row, row))
                }
                None => Some((row, row)),
            };
        }
        if let Some(run) = current {
            runs.push(run_values(grid, col, run));
        }
    }
    runs
}

fn run_values(grid: &Grid, col: usize, (first, last): (u32, u32)) -> (CellRef, Vec<Row>) {
    let values = (first..=last)
        .map(|row| vec![grid_cell(grid, CellRef::new(row, col)).clone()])
        .collect();
    (CellRef::new(first, col), values)
}

/// 4行目から、A列が最初に空になる手前までの (行番号, A列の値)
fn item_rows<'g>(layout: &PlannerLayout, grid: &'g Grid) -> impl Iterator<Item = (u32, String)> + 'g {
    (layout.first_row..=layout.last_row)
        .map(move |r| (r, grid_cell(grid, CellRef::new(r, 0)).text()))
        .take_while(|(_, a)| !a.is_empty())
}

fn week_start_refs(layout: &PlannerLayout) -> ApiResult<Vec<CellRef>> {
    layout
        .week_start_cells
        .iter()
        .map(|c| c.parse::<CellRef>().map_err(ApiError::from))
        .collect()
}

impl Service {
    fn weekly_target(&self, target: &TargetArgs) -> ApiResult<(PlannerSheet, Grid)> {
        let planner = self.open_weekly(target)?;
        let grid = self.read_planner(&planner)?;
        Ok((planner, grid))
    }

    /// A〜D列の参考書一覧
    pub fn planner_ids_list(&self, target: TargetArgs) -> ApiResult<Value> {
        let (_, grid) = self.weekly_target(&target)?;
        let items: Vec<Value> = item_rows(&self.planner_layout, &grid)
            .map(|(row, raw)| {
                let (month_code, book_id) = parse_book_code(&raw);
                let text = |col: usize| grid_cell(&grid, CellRef::new(row, col)).text();
                json!({
                    "row": row,
                    "raw_code": raw,
                    "month_code": month_code,
                    "book_id": book_id,
                    "subject": text(1),
                    "title": text(2),
                    "guideline_note": text(3),
                })
            })
            .collect();
        Ok(json!({ "count": items.len(), "items": items }))
    }

    /// 各週の開始日（D1/L1/T1/AB1/AJ1）
    pub fn planner_dates_get(&self, target: TargetArgs) -> ApiResult<Value> {
        let (_, grid) = self.weekly_target(&target)?;
        let week_starts: Vec<String> = week_start_refs(&self.planner_layout)?
            .into_iter()
            .map(|cell| grid_cell(&grid, cell).text())
            .collect();
        Ok(json!({ "week_starts": week_starts }))
    }

    /// 1週目の開始日（D1）を書く。残りの週はシートの数式が埋める
    pub fn planner_dates_set(&self, args: DatesSetArgs) -> ApiResult<Value> {
        let start_date = args
            .start_date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::bad_request("start_date が必要です（YYYY-MM-DD）"))?
            .to_string();
        if NaiveDate::parse_from_str(&start_date, "%Y-%m-%d").is_err() {
            return Err(ApiError::new(
                ErrorCode::BadDate,
                format!("start_date は YYYY-MM-DD 形式で指定してください: {}", start_date),
            ));
        }

        let target = TargetArgs {
            student_id: args.student_id,
            spreadsheet_id: args.spreadsheet_id,
        };
        let planner = self.open_weekly(&target)?;
        let cell = week_start_refs(&self.planner_layout)?[0];
        self.sheets.write_cell(
            &planner.spreadsheet_id,
            &planner.sheet,
            cell,
            CellValue::from(start_date.as_str()),
        )?;
        info!(spreadsheet_id = %planner.spreadsheet_id, %start_date, "週の開始日を設定");
        Ok(json!({ "updated": true, "cell": cell.to_string(), "start_date": start_date }))
    }

    /// 週ごとの時間・単位処理量・目安量
    pub fn planner_metrics_get(&self, target: TargetArgs) -> ApiResult<Value> {
        let (_, grid) = self.weekly_target(&target)?;
        let layout = &self.planner_layout;
        let weeks: Vec<Value> = layout
            .weeks
            .iter()
            .enumerate()
            .map(|(i, cols)| {
                let number = |column: &str, row: u32| {
                    let cell = CellRef::at(column, row).ok()?;
                    grid_cell(&grid, cell).to_number()
                };
                let items: Vec<Value> = (layout.first_row..=layout.last_row)
                    .map(|row| {
                        json!({
                            "row": row,
                            "weekly_minutes": number_json(number(cols.time, row)),
                            "unit_load": number_json(number(cols.unit, row)),
                            "guideline_amount": number_json(number(cols.guide, row)),
                        })
                    })
                    .collect();
                json!({
                    "week_index": i + 1,
                    "column_time": cols.time,
                    "column_unit": cols.unit,
                    "column_guide": cols.guide,
                    "items": items,
                })
            })
            .collect();
        Ok(json!({ "weeks": weeks }))
    }

    /// 週ごとの計画テキスト
    pub fn planner_plan_get(&self, target: TargetArgs) -> ApiResult<Value> {
        let (_, grid) = self.weekly_target(&target)?;
        let layout = &self.planner_layout;
        let weeks: Vec<Value> = layout
            .weeks
            .iter()
            .enumerate()
            .map(|(i, cols)| {
                let items: Vec<Value> = (layout.first_row..=layout.last_row)
                    .map(|row| json!({ "row": row, "plan_text": grid_cell(&grid, cols.plan_cell(row)).text() }))
                    .collect();
                json!({ "week_index": i + 1, "column": cols.plan, "items": items })
            })
            .collect();
        Ok(json!({ "weeks": weeks }))
    }

    /// 計画セルへの書き込み
    ///
    /// 単発では検証失敗をそのままエラーで返す。一括では項目ごとに結果を返し、
    /// 呼び出し自体は成功扱い。
    pub fn planner_plan_set(&self, args: PlanSetArgs) -> ApiResult<Value> {
        let (planner, grid) = self.weekly_target(&args.target())?;
        let mut sheet = PlanSheet::new(&self.planner_layout, grid, self.config.plan_text_max_length);

        let Some(items) = args.items else {
            let week = args
                .week_index
                .filter(|w| self.planner_layout.week(*w).is_some())
                .ok_or_else(|| ApiError::bad_request("week_index は1〜5です"))?;
            let text = args.plan_text.unwrap_or_default();
            let cell = sheet.check(week, &text, args.row, args.book_id.as_deref(), args.overwrite)?;
            self.sheets
                .write_cell(&planner.spreadsheet_id, &planner.sheet, cell, CellValue::from(text.as_str()))?;
            info!(spreadsheet_id = %planner.spreadsheet_id, %cell, "計画を書き込み");
            return Ok(json!({ "updated": true, "cell": cell.to_string() }));
        };

        let mut accepted: Vec<CellRef> = Vec::new();
        let mut results: Vec<ItemResult> = Vec::with_capacity(items.len());
        for item in &items {
            let week = item.week_index.unwrap_or(0);
            let overwrite = item.overwrite.unwrap_or(args.overwrite);
            let text = item.plan_text.clone().unwrap_or_default();

            let checked = if self.planner_layout.week(week).is_none() {
                Err(ApiError::new(ErrorCode::BadWeek, "week_index は1〜5です"))
            } else {
                sheet.check(week, &text, item.row, item.book_id.as_deref(), overwrite)
            };
            match checked {
                Ok(cell) => {
                    sheet.accept(cell, &text);
                    accepted.push(cell);
                    results.push(ItemResult::success().with_cell(cell.to_string()).at(Some(cell.row as i64), Some(week)));
                }
                Err(err) => {
                    let mut result = ItemResult::from(err).at(item.row, item.week_index);
                    if let Some(cell) = result.error.as_ref().and_then(|e| e.details.as_ref()).and_then(|d| d["cell"].as_str()) {
                        result.cell = Some(cell.to_string());
                    }
                    results.push(result);
                }
            }
        }

        for (start, values) in column_runs(&sheet.grid, &accepted) {
            if let Err(e) = self
                .sheets
                .write_range(&planner.spreadsheet_id, &planner.sheet, start, &values)
            {
                warn!(%start, rows = values.len(), error = %e, "計画の書き込みに失敗");
                let labels: HashSet<String> = (0..values.len() as u32)
                    .map(|i| CellRef::new(start.row + i, start.col).to_string())
                    .collect();
                for result in results
                    .iter_mut()
                    .filter(|r| r.ok && r.cell.as_ref().is_some_and(|c| labels.contains(c)))
                {
                    let cell = result.cell.take().unwrap_or_default();
                    *result = ItemResult::failure(ErrorCode::Error, e.to_string())
                        .with_cell(cell)
                        .at(result.row, result.week);
                }
            }
        }
        info!(
            spreadsheet_id = %planner.spreadsheet_id,
            written = accepted.len(),
            total = items.len(),
            "計画を一括書き込み"
        );
        Ok(json!({ "updated": true, "results": results }))
    }

    /// 一括作成。書き込み前に警告を集め、作成ガイドを添えて返す
    pub fn planner_plan_create(&self, args: PlanCreateArgs) -> ApiResult<Value> {
        if args.items.is_empty() {
            return Err(ApiError::bad_request("items が必要です"));
        }
        let target = TargetArgs {
            student_id: args.student_id.clone(),
            spreadsheet_id: args.spreadsheet_id.clone(),
        };

        // 開始日が入っている週の数（1つもなければ5週）
        let week_count = match self.planner_dates_get(target.clone()) {
            Ok(dates) => dates["week_starts"]
                .as_array()
                .map(|starts| starts.iter().filter(|s| s.as_str().is_some_and(|s| !s.is_empty())).count())
                .filter(|n| *n > 0)
                .unwrap_or(WEEK_COUNT),
            Err(_) => WEEK_COUNT,
        };

        let max_len = self.config.plan_text_max_length;
        let mut warnings = Vec::new();
        for item in &args.items {
            let week = item.week_index.unwrap_or(0);
            if week < 1 || week > week_count as i64 {
                warnings.push(format!("week_index が範囲外です: {}（1〜{}）", week, week_count));
            }
            let len = item.plan_text.as_deref().unwrap_or_default().chars().count();
            if len > max_len {
                warnings.push(format!("plan_text が長すぎます（{} > {}）", len, max_len));
            }
        }

        let result = self.planner_plan_set(PlanSetArgs {
            overwrite: args.overwrite.unwrap_or(false),
            items: Some(args.items),
            student_id: args.student_id,
            spreadsheet_id: args.spreadsheet_id,
            ..PlanSetArgs::default()
        })?;

        let mut data = result;
        data["warnings"] = json!(warnings);
        data["guidance_digest"] = self.planner_guidance();
        Ok(data)
    }

    /// 計画作成の手引き（シート構成と書き込み方針）
    pub fn planner_guidance(&self) -> Value {
        let layout = &self.planner_layout;
        let weeks: serde_json::Map<String, Value> = layout
            .weeks
            .iter()
            .enumerate()
            .map(|(i, w)| {
                (
                    (i + 1).to_string(),
                    json!({ "time": w.time, "unit": w.unit, "guide": w.guide, "plan": w.plan }),
                )
            })
            .collect();
        json!({
            "sheet": {
                "name": layout.weekly_sheet_names.first().copied().unwrap_or_default(),
                "rows": format!("{}-{}", layout.first_row, layout.last_row),
                "id_column": "A: <month_code><book_id>",
                "weeks": weeks,
                "week_starts": layout.week_start_cells,
            },
            "policy": {
                "preconditions": ["A[row]非空", "週間時間セル非空"],
                "overwrite_default": false,
                "max_chars": self.config.plan_text_max_length,
                "conservative_planning": true,
                "ask_when_uncertain": true,
            },
            "format": {
                "range": "~ を用いる",
                "multi": "カンマ/改行で複数範囲",
                "freeform": "短く具体的に",
            },
            "workflow": {
                "collect": [
                    "planner.ids_list で対象行を取得",
                    "planner.dates.get で週数を把握",
                    "planner.plan.get と planner.metrics.get で計画と時間を取得",
                ],
                "write": ["planner.plan.create で一括作成"],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cram_sheets_common::sheet::grid_from_strs;
    use cram_sheets_common::{MemoryBackend, SheetAccessor};
    use std::sync::Arc;

    fn put(grid: &mut Grid, a1: &str, value: CellValue) {
        let cell: CellRef = a1.parse().unwrap();
        let r = cell.row as usize - 1;
        if grid.len() <= r {
            grid.resize_with(r + 1, Vec::new);
        }
        if grid[r].len() <= cell.col {
            grid[r].resize(cell.col + 1, CellValue::Empty);
        }
        grid[r][cell.col] = value;
    }

    fn fixture() -> (Arc<MemoryBackend>, Service) {
        let mut weekly = Grid::new();
        put(&mut weekly, "D1", "2025-04-07".into());
        put(&mut weekly, "L1", "2025-04-14".into());
        put(&mut weekly, "A4", "254gMB001".into());
        put(&mut weekly, "B4", "数学".into());
        put(&mut weekly, "C4", "青チャート".into());
        put(&mut weekly, "E4", 120.0.into());
        put(&mut weekly, "F4", 2.0.into());
        put(&mut weekly, "M4", 90.0.into());
        put(&mut weekly, "A5", "254gEN002".into());
        put(&mut weekly, "P4", "既存の計画".into());

        let students = grid_from_strs(&[&["生徒ID", "名前", "スピードプランナーID"], &["s001", "田中", "planner_s001"]]);
        let backend = Arc::new(
            MemoryBackend::new()
                .with_sheet("students_master", "生徒一覧", students)
                .with_sheet("planner_s001", "週間管理", weekly),
        );
        let svc = Service::new(backend.clone(), Config::default());
        (backend, svc)
    }

    fn target() -> TargetArgs {
        TargetArgs {
            student_id: Some("s001".into()),
            spreadsheet_id: None,
        }
    }

    fn cell(backend: &MemoryBackend, a1: &str) -> CellValue {
        backend
            .read_cell("planner_s001", "週間管理", a1.parse().unwrap())
            .unwrap()
            .unwrap_or_default()
    }

    #[test]
    fn test_ids_list_stops_at_blank_a() {
        let (_, svc) = fixture();
        let data = svc.planner_ids_list(target()).unwrap();
        assert_eq!(data["count"], json!(2));
        assert_eq!(data["items"][0]["book_id"], json!("gMB001"));
        assert_eq!(data["items"][0]["month_code"], json!(254));
        assert_eq!(data["items"][0]["title"], json!("青チャート"));
        assert_eq!(data["items"][1]["row"], json!(5));
    }

    #[test]
    fn test_dates_get_and_set() {
        let (backend, svc) = fixture();
        let data = svc.planner_dates_get(target()).unwrap();
        assert_eq!(data["week_starts"], json!(["2025-04-07", "2025-04-14", "", "", ""]));

        let err = svc
            .planner_dates_set(DatesSetArgs {
                start_date: Some("2025-02-30".into()),
                student_id: Some("s001".into()),
                spreadsheet_id: None,
            })
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::BadDate);

        let data = svc
            .planner_dates_set(DatesSetArgs {
                start_date: Some("2025-05-05".into()),
                student_id: Some("s001".into()),
                spreadsheet_id: None,
            })
            .unwrap();
        assert_eq!(data["cell"], json!("D1"));
        assert_eq!(cell(&backend, "D1").text(), "2025-05-05");
    }

    #[test]
    fn test_metrics_and_plan_get() {
        let (_, svc) = fixture();
        let metrics = svc.planner_metrics_get(target()).unwrap();
        assert_eq!(metrics["weeks"][0]["column_time"], json!("E"));
        assert_eq!(metrics["weeks"][0]["items"][0]["weekly_minutes"], json!(120));
        assert_eq!(metrics["weeks"][0]["items"][0]["unit_load"], json!(2));
        assert_eq!(metrics["weeks"][0]["items"][1]["weekly_minutes"], Value::Null);

        let plans = svc.planner_plan_get(target()).unwrap();
        assert_eq!(plans["weeks"][1]["column"], json!("P"));
        assert_eq!(plans["weeks"][1]["items"][0]["plan_text"], json!("既存の計画"));
        assert_eq!(plans["weeks"][0]["items"].as_array().unwrap().len(), 27);
    }

    #[test]
    fn test_plan_set_single() {
        let (backend, svc) = fixture();
        let data = svc
            .planner_plan_set(PlanSetArgs {
                week_index: Some(1),
                plan_text: Some("p.10~20".into()),
                book_id: Some("gMB001".into()),
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
            .unwrap();
        assert_eq!(data["cell"], json!("H4"));
        assert_eq!(cell(&backend, "H4").text(), "p.10~20");

        let err = svc
            .planner_plan_set(PlanSetArgs {
                week_index: Some(6),
                plan_text: Some("x".into()),
                row: Some(4),
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[test]
    fn test_plan_set_preconditions() {
        let (_, svc) = fixture();
        let run = |week: i64, row: i64, text: &str| {
            svc.planner_plan_set(PlanSetArgs {
                week_index: Some(week),
                plan_text: Some(text.into()),
                row: Some(row),
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
            .err()
            .unwrap()
            .code
        };
        assert_eq!(run(1, 6, "x"), ErrorCode::PreconditionAEmpty);
        assert_eq!(run(1, 5, "x"), ErrorCode::PreconditionTimeEmpty);
        assert_eq!(run(2, 4, "x"), ErrorCode::AlreadyExists);
        assert_eq!(run(1, 31, "x"), ErrorCode::RowNotFound);
        assert_eq!(run(1, 4, &"あ".repeat(53)), ErrorCode::TooLong);
    }

    #[test]
    fn test_plan_text_length_boundary() {
        let (backend, svc) = fixture();
        let set = |text: String| {
            svc.planner_plan_set(PlanSetArgs {
                week_index: Some(1),
                plan_text: Some(text),
                row: Some(4),
                overwrite: true,
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
        };

        let err = set("あ".repeat(53)).err().unwrap();
        assert_eq!(err.code, ErrorCode::TooLong);
        assert!(cell(&backend, "H4").is_blank());

        let data = set("あ".repeat(52)).unwrap();
        assert_eq!(data["cell"], json!("H4"));
        assert_eq!(cell(&backend, "H4").text().chars().count(), 52);
    }

    #[test]
    fn test_plan_set_batch_rejected_items_leave_cells() {
        let (backend, svc) = fixture();
        let data = svc
            .planner_plan_set(PlanSetArgs {
                items: Some(vec![
                    PlanItem {
                        week_index: Some(0),
                        plan_text: Some("週なし".into()),
                        row: Some(4),
                        overwrite: Some(true),
                        ..PlanItem::default()
                    },
                    PlanItem {
                        week_index: Some(2),
                        plan_text: Some("い".repeat(53)),
                        row: Some(4),
                        overwrite: Some(true),
                        ..PlanItem::default()
                    },
                ]),
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
            .unwrap();
        let results = data["results"].as_array().unwrap();
        assert_eq!(results[0]["error"]["code"], json!("BAD_WEEK"));
        assert_eq!(results[1]["error"]["code"], json!("TOO_LONG"));
        assert!(cell(&backend, "H4").is_blank());
        assert_eq!(cell(&backend, "P4").text(), "既存の計画");
    }

    #[test]
    fn test_column_runs_split_on_gaps() {
        let mut grid = Grid::new();
        put(&mut grid, "H4", "a".into());
        put(&mut grid, "H5", "b".into());
        put(&mut grid, "H7", "c".into());
        put(&mut grid, "P4", "d".into());
        let cells: Vec<CellRef> = ["H5", "P4", "H4", "H7", "H4"].iter().map(|a| a.parse().unwrap()).collect();

        let runs: Vec<(String, Vec<String>)> = column_runs(&grid, &cells)
            .into_iter()
            .map(|(start, values)| (start.to_string(), values.iter().map(|row| row[0].text()).collect()))
            .collect();
        assert_eq!(
            runs,
            vec![
                ("H4".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("H7".to_string(), vec!["c".to_string()]),
                ("P4".to_string(), vec!["d".to_string()]),
            ]
        );
    }

    #[test]
    fn test_plan_set_batch_second_write_to_same_cell() {
        let (backend, svc) = fixture();
        let item = |text: &str| PlanItem {
            week_index: Some(1),
            plan_text: Some(text.into()),
            row: Some(4),
            ..PlanItem::default()
        };
        let data = svc
            .planner_plan_set(PlanSetArgs {
                items: Some(vec![
                    item("first"),
                    item("second"),
                    PlanItem {
                        week_index: Some(9),
                        ..item("bad")
                    },
                ]),
                student_id: Some("s001".into()),
                ..PlanSetArgs::default()
            })
            .unwrap();
        let results = data["results"].as_array().unwrap();
        assert_eq!(results[0]["ok"], json!(true));
        assert_eq!(results[0]["cell"], json!("H4"));
        assert_eq!(results[1]["error"]["code"], json!("ALREADY_EXISTS"));
        assert_eq!(results[2]["error"]["code"], json!("BAD_WEEK"));
        assert_eq!(cell(&backend, "H4").text(), "first");
    }

    #[test]
    fn test_plan_create_warnings_and_digest() {
        let (_, svc) = fixture();
        let err = svc.planner_plan_create(PlanCreateArgs::default()).err().unwrap();
        assert_eq!(err.code, ErrorCode::BadRequest);

        let data = svc
            .planner_plan_create(PlanCreateArgs {
                items: vec![
                    PlanItem {
                        week_index: Some(1),
                        plan_text: Some("p.1~5".into()),
                        book_id: Some("gMB001".into()),
                        ..PlanItem::default()
                    },
                    PlanItem {
                        week_index: Some(3),
                        plan_text: Some("p.6~9".into()),
                        row: Some(4),
                        ..PlanItem::default()
                    },
                ],
                student_id: Some("s001".into()),
                ..PlanCreateArgs::default()
            })
            .unwrap();
        // 開始日は2週分しか入っていない
        assert_eq!(data["warnings"].as_array().unwrap().len(), 1);
        assert_eq!(data["results"][0]["ok"], json!(true));
        assert!(data["guidance_digest"]["policy"]["max_chars"].is_number());
    }

    #[test]
    fn test_guidance_shape() {
        let (_, svc) = fixture();
        let guide = svc.planner_guidance();
        assert_eq!(guide["sheet"]["weeks"]["1"]["plan"], json!("H"));
        assert_eq!(guide["sheet"]["rows"], json!("4-30"));
        assert_eq!(guide["policy"]["overwrite_default"], json!(false));
    }
}
