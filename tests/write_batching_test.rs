//! 書き込み回数の結合テスト
//!
//! 確定や一括書き込みが、行や列ごとにまとめて1回で書かれることを確認する

use cram_sheets::{Config, Service};
use cram_sheets_common::sheet::grid_from_strs;
use cram_sheets_common::{CellRef, Grid, MemoryBackend, Response, Row, SheetAccessor, SheetError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

/// 書き込み範囲を記録するバックエンド
#[derive(Default)]
struct RecordingBackend {
    inner: MemoryBackend,
    writes: Mutex<Vec<(String, usize)>>,
}

impl RecordingBackend {
    fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// (左上セル, 行数) の一覧
    fn writes(&self) -> Vec<(String, usize)> {
        self.writes.lock().clone()
    }
}

impl SheetAccessor for RecordingBackend {
    fn sheet_names(&self, spreadsheet_id: &str) -> Result<Option<Vec<String>>, SheetError> {
        self.inner.sheet_names(spreadsheet_id)
    }

    fn read_sheet(&self, spreadsheet_id: &str, sheet: &str) -> Result<Option<Grid>, SheetError> {
        self.inner.read_sheet(spreadsheet_id, sheet)
    }

    fn write_range(&self, spreadsheet_id: &str, sheet: &str, start: CellRef, values: &[Row]) -> Result<(), SheetError> {
        self.writes.lock().push((start.to_string(), values.len()));
        self.inner.write_range(spreadsheet_id, sheet, start, values)
    }

    fn append_rows(&self, spreadsheet_id: &str, sheet: &str, rows: &[Row]) -> Result<(), SheetError> {
        self.inner.append_rows(spreadsheet_id, sheet, rows)
    }

    fn delete_rows(&self, spreadsheet_id: &str, sheet: &str, start_row: u32, count: u32) -> Result<(), SheetError> {
        self.inner.delete_rows(spreadsheet_id, sheet, start_row, count)
    }
}

fn call(svc: &Service, op: &str, args: Value) -> Response {
    svc.handle_json(&json!({ "op": op, "args": args }).to_string())
}

fn data(response: Response) -> Value {
    assert!(response.ok, "失敗: {:?}", response.error);
    response.data.unwrap()
}

fn confirm(svc: &Service, op: &str, mut args: Value) -> Value {
    let preview = data(call(svc, op, args.clone()));
    let token = preview["confirm_token"].as_str().unwrap().to_string();
    if let Some(obj) = args.as_object_mut() {
        obj.remove("updates");
        obj.insert("confirm_token".into(), json!(token));
    }
    data(call(svc, op, args))
}

#[test]
fn test_book_update_writes_parent_row_once() {
    let books = grid_from_strs(&[
        &["参考書ID", "参考書名", "教科", "単位当たり処理量", "月間目標"],
        &["gEN002", "速読英単語", "英語", "", "1時間"],
    ]);
    let backend = Arc::new(RecordingBackend::new(
        MemoryBackend::new().with_sheet("books_master", "参考書マスター", books),
    ));
    let svc = Service::new(backend.clone(), Config::default());

    let done = confirm(
        &svc,
        "books.update",
        json!({ "book_id": "gEN002", "updates": { "title": "速読英単語 必修編", "unit_load": 50 } }),
    );
    assert_eq!(done["changed_fields"], json!(2));
    assert_eq!(backend.writes(), vec![("B2".to_string(), 1)]);

    let row = backend.read_sheet("books_master", "参考書マスター").unwrap().unwrap().remove(1);
    assert_eq!(row[1].text(), "速読英単語 必修編");
    assert_eq!(row[2].text(), "英語");
    assert_eq!(row[3].to_number(), Some(50.0));
    assert_eq!(row[4].text(), "1時間");
}

#[test]
fn test_student_update_writes_row_once() {
    let students = grid_from_strs(&[
        &["生徒ID", "名前", "学年", "Status", "タグ"],
        &["s001", "田中 太郎", "高1", "在塾", "理系"],
    ]);
    let backend = Arc::new(RecordingBackend::new(
        MemoryBackend::new().with_sheet("students_master", "生徒一覧", students),
    ));
    let svc = Service::new(backend.clone(), Config::default());

    confirm(
        &svc,
        "students.update",
        json!({ "student_id": "s001", "updates": { "タグ": "文系", "学年": "高2" } }),
    );
    assert_eq!(backend.writes(), vec![("C2".to_string(), 1)]);

    let row = backend.read_sheet("students_master", "生徒一覧").unwrap().unwrap().remove(1);
    assert_eq!(row[2].text(), "高2");
    assert_eq!(row[3].text(), "在塾");
    assert_eq!(row[4].text(), "文系");
}

#[test]
fn test_plan_batch_writes_each_column_once() {
    let mut weekly: Grid = vec![Vec::new(); 3];
    for (code, title) in [("254gMB001", "青チャート"), ("254gEN001", "システム英単語")] {
        let mut row: Row = vec![code.into(), "".into(), title.into(), "".into(), 120.0.into()];
        row.resize(13, "".into());
        row[12] = 90.0.into();
        weekly.push(row);
    }
    let students = grid_from_strs(&[&["生徒ID", "名前", "スピードプランナーID"], &["s001", "田中", "planner_s001"]]);
    let backend = Arc::new(RecordingBackend::new(
        MemoryBackend::new()
            .with_sheet("students_master", "生徒一覧", students)
            .with_sheet("planner_s001", "週間管理", weekly),
    ));
    let svc = Service::new(backend.clone(), Config::default());

    let done = data(call(
        &svc,
        "planner.plan.set",
        json!({
            "student_id": "s001",
            "items": [
                { "week_index": 1, "row": 4, "plan_text": "例題1~10" },
                { "week_index": 1, "row": 5, "plan_text": "1~100" },
                { "week_index": 2, "row": 4, "plan_text": "例題11~20" },
                { "week_index": 9, "row": 5, "plan_text": "週なし" }
            ]
        }),
    ));
    let results = done["results"].as_array().unwrap();
    assert_eq!(results.iter().filter(|r| r["ok"] == json!(true)).count(), 3);
    assert_eq!(backend.writes(), vec![("H4".to_string(), 2), ("P4".to_string(), 1)]);

    let sheet = backend.read_sheet("planner_s001", "週間管理").unwrap().unwrap();
    assert_eq!(sheet[3][7].text(), "例題1~10");
    assert_eq!(sheet[4][7].text(), "1~100");
    assert_eq!(sheet[3][15].text(), "例題11~20");
}
