//! 生徒一覧の操作
//!
//! 生徒は1行1人。ID列は見出しが空のこともある。

use super::two_phase::{unexpected, FieldChange, STUDENTS_DELETE, STUDENTS_UPDATE};
use super::{apply_limit, required, row_values, Conditions, PendingMutation, Service, Table};
use cram_sheets_common::{
    cell_at, extract_spreadsheet_id, next_id_for_prefix, ApiError, ApiResult, CellValue, ErrorCode, Row,
    SearchDoc, SearchIndex, ACTIVE_STATUSES,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const DEFAULT_ID_PREFIX: &str = "s";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListArgs {
    #[serde(default)]
    pub limit: Option<usize>,
    /// 退塾者なども含める
    #[serde(default)]
    pub include_all: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_all: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetArgs {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub student_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterArgs {
    #[serde(default, rename = "where")]
    pub where_: BTreeMap<String, Value>,
    #[serde(default)]
    pub contains: BTreeMap<String, Value>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 新規登録（`record` のキーは見出し名）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateArgs {
    #[serde(default)]
    pub record: BTreeMap<String, Value>,
    #[serde(default)]
    pub id_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateArgs {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub updates: BTreeMap<String, Value>,
    #[serde(default)]
    pub confirm_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteArgs {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub confirm_token: Option<String>,
}

/// 行の生徒IDが一致する行（シート上の行番号つき）
pub(crate) fn find_student<'a>(table: &'a Table, student_id: &str) -> Option<(u32, &'a Row)> {
    let id_col = table.index.col("id")?;
    table
        .records()
        .find(|(_, row)| cell_at(row, id_col).text() == student_id)
}

/// プランナーのスプレッドシートID（ID列 → リンク列の順）
pub(crate) fn planner_id_of(table: &Table, row: &[CellValue]) -> Option<String> {
    let explicit = table.text(row, "planner_sheet_id");
    if !explicit.is_empty() {
        return Some(extract_spreadsheet_id(&explicit).unwrap_or(explicit));
    }
    extract_spreadsheet_id(&table.text(row, "planner_link"))
}

fn is_active(table: &Table, row: &[CellValue]) -> bool {
    match table.index.col("status") {
        Some(c) => {
            let status = cell_at(row, c).text();
            ACTIVE_STATUSES.iter().any(|s| *s == status)
        }
        None => true,
    }
}

fn is_empty_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_blank)
}

fn student_json(table: &Table, row: &[CellValue]) -> Value {
    json!({
        "id": table.text(row, "id"),
        "comiru_id": table.text(row, "comiru_id"),
        "name": table.text(row, "name"),
        "grade": table.text(row, "grade"),
        "status": table.text(row, "status"),
        "planner_sheet_id": planner_id_of(table, row).unwrap_or_default(),
        "planner_link": table.text(row, "planner_link"),
        "meeting_doc": table.text(row, "meeting_doc"),
        "tags": table.text(row, "tags"),
    })
}

impl Service {
    pub(crate) fn load_students(&self) -> ApiResult<Table> {
        self.load_table(&self.config.students_master_id, &self.config.students_sheet, &self.students_layout)
    }

    /// 生徒一覧（既定は在籍中のみ）
    pub fn students_list(&self, args: ListArgs) -> ApiResult<Value> {
        let table = self.load_students()?;
        let mut students: Vec<Value> = table
            .records()
            .filter(|(_, row)| !is_empty_row(row))
            .filter(|(_, row)| args.include_all || is_active(&table, row))
            .map(|(_, row)| student_json(&table, row))
            .collect();
        apply_limit(&mut students, args.limit);
        Ok(json!({ "students": students, "count": students.len() }))
    }

    /// 名前・ID・Comiru番号であいまい検索
    pub fn students_find(&self, args: FindArgs) -> ApiResult<Value> {
        let query = required(Some(args.query.as_str()), "query")?;
        let table = self.load_students()?;

        let mut grades: HashMap<String, String> = HashMap::new();
        let docs: Vec<SearchDoc> = table
            .records()
            .filter(|(_, row)| args.include_all || is_active(&table, row))
            .filter_map(|(_, row)| {
                let id = table.text(row, "id");
                let name = table.text(row, "name");
                if id.is_empty() && name.is_empty() {
                    return None;
                }
                grades.insert(id.clone(), table.text(row, "grade"));
                let aliases = ["family_name", "given_name", "comiru_id"]
                    .iter()
                    .map(|key| table.text(row, key))
                    .filter(|s| !s.is_empty())
                    .collect();
                Some(SearchDoc {
                    id,
                    title: name,
                    subject: String::new(),
                    aliases,
                })
            })
            .collect();

        let limit = args.limit.filter(|n| *n > 0).unwrap_or(self.config.students_find_limit);
        let outcome = SearchIndex::build(docs).search(&query, limit);
        let to_json = |c: &cram_sheets_common::Candidate| {
            json!({
                "student_id": c.id,
                "name": c.title,
                "grade": grades.get(&c.id).cloned().unwrap_or_default(),
                "score": c.score,
                "reason": c.reason,
                "matched_field": c.matched_field,
            })
        };
        Ok(json!({
            "query": query,
            "candidates": outcome.candidates.iter().map(to_json).collect::<Vec<_>>(),
            "top": outcome.top.as_ref().map(to_json),
            "confidence": outcome.confidence,
        }))
    }

    pub fn students_get(&self, args: GetArgs) -> ApiResult<Value> {
        if let Some(ids) = args.student_ids.filter(|ids| !ids.is_empty()) {
            let table = self.load_students()?;
            let mut students = Vec::new();
            let mut missing = Vec::new();
            for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
                match find_student(&table, id) {
                    Some((_, row)) => students.push(student_json(&table, row)),
                    None => missing.push(id.to_string()),
                }
            }
            return Ok(json!({ "students": students, "missing": missing }));
        }

        let student_id = required(args.student_id.as_deref(), "student_id")?;
        let table = self.load_students()?;
        let (_, row) = find_student(&table, &student_id)
            .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;
        Ok(json!({ "student": student_json(&table, row) }))
    }

    pub fn students_filter(&self, args: FilterArgs) -> ApiResult<Value> {
        let table = self.load_students()?;
        let conditions = Conditions::build(&table.index, &args.where_, &args.contains);
        let mut students: Vec<Value> = table
            .records()
            .filter(|(_, row)| !is_empty_row(row))
            .filter(|(_, row)| conditions.matches(|col| row_values(row, col)))
            .map(|(_, row)| student_json(&table, row))
            .collect();
        apply_limit(&mut students, args.limit);
        Ok(json!({ "students": students, "count": students.len() }))
    }

    /// 生徒を追加する（IDは `s` + 連番）
    pub fn students_create(&self, args: CreateArgs) -> ApiResult<Value> {
        let table = self.load_students()?;
        let id_col = table.require_col("id")?;
        let prefix = match args.id_prefix.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => DEFAULT_ID_PREFIX.to_string(),
        };
        let new_id = next_id_for_prefix(&prefix, &table.rows, Some(id_col));

        let mut row = table.blank_row();
        row[id_col] = CellValue::from(new_id.as_str());
        let mut ignored = Vec::new();
        for (key, value) in &args.record {
            match table.index.find_header(key) {
                Some(c) if c != id_col => row[c] = CellValue::from_json(value),
                _ => ignored.push(key.clone()),
            }
        }

        self.sheets.append_rows(&table.spreadsheet_id, &table.sheet, &[row])?;
        info!(student_id = %new_id, "生徒を追加");
        Ok(json!({ "id": new_id, "created": true, "ignored_fields": ignored }))
    }

    /// 見出し名をキーに項目を更新する（プレビュー → 確定）
    pub fn students_update(&self, args: UpdateArgs) -> ApiResult<Value> {
        let student_id = required(args.student_id.as_deref(), "student_id")?;

        if let Some(token) = args.confirm_token.as_deref().filter(|t| !t.trim().is_empty()) {
            let PendingMutation::StudentUpdate { changes } = self.take_change(STUDENTS_UPDATE, &student_id, token)?
            else {
                return Err(unexpected(STUDENTS_UPDATE));
            };
            let table = self.load_students()?;
            let (row_number, _) = find_student(&table, &student_id)
                .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;
            let cells = changes
                .iter()
                .map(|change| {
                    let col = table.index.find_header(&change.field).ok_or_else(|| {
                        ApiError::new(ErrorCode::BadHeader, format!("{} 列が見つかりません", change.field))
                    })?;
                    Ok((col, change.value.clone()))
                })
                .collect::<ApiResult<Vec<_>>>()?;
            if let Some((start, span)) = table.patch_row(row_number, &cells) {
                self.sheets.write_range(&table.spreadsheet_id, &table.sheet, start, &[span])?;
            }
            info!(student_id = %student_id, fields = changes.len(), "生徒情報を更新");
            return Ok(json!({ "student_id": student_id, "updated": true, "changed_fields": changes.len() }));
        }

        if args.updates.is_empty() {
            return Err(ApiError::bad_request("updates か confirm_token が必要です"));
        }

        let table = self.load_students()?;
        let id_col = table.require_col("id")?;
        let (row_number, row) = find_student(&table, &student_id)
            .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;

        let mut diffs = Map::new();
        let mut changes = Vec::new();
        let mut ignored = Vec::new();
        for (key, value) in &args.updates {
            let Some(col) = table.index.find_header(key) else {
                ignored.push(key.clone());
                continue;
            };
            if col == id_col {
                return Err(ApiError::bad_request("生徒IDは変更できません"));
            }
            let current = cell_at(row, col);
            let next = CellValue::from_json(value);
            if current.text() == next.text() {
                continue;
            }
            let header = table.index.headers()[col].clone();
            diffs.insert(header.clone(), json!({ "from": current.to_json(), "to": next.to_json() }));
            changes.push(FieldChange {
                field: header,
                value: next,
            });
        }

        let preview = json!({
            "student_id": student_id,
            "row": row_number,
            "diffs": diffs,
            "ignored_fields": ignored,
        });
        Ok(self.propose_change(
            STUDENTS_UPDATE,
            "student_id",
            &student_id,
            preview,
            PendingMutation::StudentUpdate { changes },
        ))
    }

    /// 生徒の行を削除する（プレビュー → 確定）
    pub fn students_delete(&self, args: DeleteArgs) -> ApiResult<Value> {
        let student_id = required(args.student_id.as_deref(), "student_id")?;

        if let Some(token) = args.confirm_token.as_deref().filter(|t| !t.trim().is_empty()) {
            let PendingMutation::StudentDelete = self.take_change(STUDENTS_DELETE, &student_id, token)? else {
                return Err(unexpected(STUDENTS_DELETE));
            };
            let table = self.load_students()?;
            let (row_number, _) = find_student(&table, &student_id)
                .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;
            self.sheets.delete_rows(&table.spreadsheet_id, &table.sheet, row_number, 1)?;
            info!(student_id = %student_id, row = row_number, "生徒を削除");
            return Ok(json!({ "student_id": student_id, "deleted": true }));
        }

        let table = self.load_students()?;
        let (row_number, row) = find_student(&table, &student_id)
            .ok_or_else(|| ApiError::not_found(format!("生徒が見つかりません: {}", student_id)))?;
        let snapshot: Map<String, Value> = table
            .index
            .headers()
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(c, h)| (h.clone(), cell_at(row, c).to_json()))
            .collect();
        let preview = json!({
            "student_id": student_id,
            "name": table.text(row, "name"),
            "row": row_number,
            "snapshot": snapshot,
        });
        Ok(self.propose_change(
            STUDENTS_DELETE,
            "student_id",
            &student_id,
            preview,
            PendingMutation::StudentDelete,
        ))
    }
}
