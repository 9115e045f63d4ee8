//! 生徒操作の結合テスト

use cram_sheets::{Config, Service};
use cram_sheets_common::sheet::grid_from_strs;
use cram_sheets_common::{ErrorCode, MemoryBackend, Response};
use serde_json::{json, Value};
use std::sync::Arc;

const STUDENTS: &str = "students_master";
const SHEET: &str = "生徒一覧";

fn backend() -> Arc<MemoryBackend> {
    // ID列の見出しが空のシート
    let students = grid_from_strs(&[
        &["", "Comiru生徒番号", "名前", "姓", "名", "学年", "Status", "スプレッドシート", "タグ"],
        &["s001", "1001", "田中 太郎", "田中", "太郎", "高2", "在塾", "https://docs.google.com/spreadsheets/d/1AbCdEfGhIjKlMnOpQrStUvWx/edit", "理系"],
        &["s002", "1002", "鈴木 花子", "鈴木", "花子", "高1", "在塾", "", "文系"],
        &["s003", "1003", "佐藤 次郎", "佐藤", "次郎", "高3", "退塾", "", ""],
    ]);
    Arc::new(MemoryBackend::new().with_sheet(STUDENTS, SHEET, students))
}

fn call(svc: &Service, op: &str, args: Value) -> Response {
    svc.handle_json(&json!({ "op": op, "args": args }).to_string())
}

fn data(response: Response) -> Value {
    assert!(response.ok, "失敗: {:?}", response.error);
    response.data.unwrap()
}

#[test]
fn test_list_active_only_by_default() {
    let svc = Service::new(backend(), Config::default());
    assert_eq!(data(call(&svc, "students.list", json!({})))["count"], json!(2));
    assert_eq!(data(call(&svc, "students.list", json!({ "include_all": true })))["count"], json!(3));
}

#[test]
fn test_get_resolves_planner_from_link() {
    let svc = Service::new(backend(), Config::default());
    let student = data(call(&svc, "students.get", json!({ "student_id": "s001" })))["student"].clone();
    assert_eq!(student["planner_sheet_id"], json!("1AbCdEfGhIjKlMnOpQrStUvWx"));
    assert_eq!(student["grade"], json!("高2"));

    let missing = call(&svc, "students.get", json!({ "student_id": "s999" }));
    assert_eq!(missing.error_code(), Some(ErrorCode::NotFound));
}

#[test]
fn test_find_by_family_name() {
    let svc = Service::new(backend(), Config::default());
    let found = data(call(&svc, "students.find", json!({ "query": "鈴木" })));
    assert_eq!(found["top"]["student_id"], json!("s002"));
    assert_eq!(found["top"]["grade"], json!("高1"));

    // 退塾者は include_all のときだけ
    let retired = data(call(&svc, "students.find", json!({ "query": "佐藤" })));
    assert!(retired["top"].is_null());
    let retired = data(call(&svc, "students.find", json!({ "query": "佐藤", "include_all": true })));
    assert_eq!(retired["top"]["student_id"], json!("s003"));
}

#[test]
fn test_filter_by_header() {
    let svc = Service::new(backend(), Config::default());
    let found = data(call(&svc, "students.filter", json!({ "where": { "タグ": "文系" } })));
    assert_eq!(found["count"], json!(1));
    assert_eq!(found["students"][0]["id"], json!("s002"));

    let none = data(call(&svc, "students.filter", json!({ "where": { "部活": "野球" } })));
    assert_eq!(none["count"], json!(0));
}

#[test]
fn test_create_assigns_next_id() {
    let backend = backend();
    let svc = Service::new(backend.clone(), Config::default());
    let created = data(call(
        &svc,
        "students.create",
        json!({ "record": { "名前": "高橋 三郎", "学年": "中3", "Status": "在塾", "部活": "野球" } }),
    ));
    assert_eq!(created["id"], json!("s004"));
    assert_eq!(created["ignored_fields"], json!(["部活"]));

    let sheet = backend.snapshot(STUDENTS, SHEET).unwrap();
    assert_eq!(sheet[4][0].text(), "s004");
    assert_eq!(sheet[4][2].text(), "高橋 三郎");
}

#[test]
fn test_update_and_delete_round() {
    let backend = backend();
    let svc = Service::new(backend.clone(), Config::default());

    let preview = data(call(
        &svc,
        "students.update",
        json!({ "student_id": "s002", "updates": { "学年": "高2", "名前": "鈴木 花子" } }),
    ));
    assert_eq!(preview["preview"]["row"], json!(3));
    assert_eq!(preview["preview"]["diffs"], json!({ "学年": { "from": "高1", "to": "高2" } }));
    let token = preview["confirm_token"].as_str().unwrap();
    data(call(&svc, "students.update", json!({ "student_id": "s002", "confirm_token": token })));
    assert_eq!(backend.snapshot(STUDENTS, SHEET).unwrap()[2][5].text(), "高2");

    let preview = data(call(&svc, "students.delete", json!({ "student_id": "s001" })));
    assert_eq!(preview["preview"]["name"], json!("田中 太郎"));
    let token = preview["confirm_token"].as_str().unwrap();
    let done = data(call(&svc, "students.delete", json!({ "student_id": "s001", "confirm_token": token })));
    assert_eq!(done["deleted"], json!(true));

    let sheet = backend.snapshot(STUDENTS, SHEET).unwrap();
    assert_eq!(sheet.len(), 3);
    assert_eq!(sheet[1][0].text(), "s002");
}

#[test]
fn test_update_requires_changes() {
    let svc = Service::new(backend(), Config::default());
    let response = call(&svc, "students.update", json!({ "student_id": "s002", "updates": {} }));
    assert_eq!(response.error_code(), Some(ErrorCode::BadRequest));
}

#[test]
fn test_update_id_column_rejected_when_named() {
    let students = grid_from_strs(&[&["生徒ID", "名前"], &["s001", "田中"]]);
    let backend = Arc::new(MemoryBackend::new().with_sheet(STUDENTS, SHEET, students));
    let svc = Service::new(backend, Config::default());
    let response = call(&svc, "students.update", json!({ "student_id": "s001", "updates": { "生徒ID": "s100" } }));
    assert_eq!(response.error_code(), Some(ErrorCode::BadRequest));
}
