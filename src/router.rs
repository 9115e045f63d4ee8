//! 操作名からハンドラへの振り分け
//!
//! リクエストは `{"op": "...", "args": {...}}`。引数は操作ごとの型で受け、
//! 知らないキーはここで `BAD_REQUEST` になる。

use crate::handlers::planner::{
    DatesSetArgs, MonthlyFilterArgs, MonthplanSetArgs, PlanCreateArgs, PlanSetArgs, TargetArgs,
};
use crate::handlers::{books, students, Service};
use cram_sheets_common::{ApiError, ApiResult, ErrorCode, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info};

/// 引数を取らない操作用
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

/// 受け付ける操作の一覧
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum Request {
    #[serde(rename = "books.find")]
    BooksFind(books::FindArgs),
    #[serde(rename = "books.get")]
    BooksGet(books::GetArgs),
    #[serde(rename = "books.filter")]
    BooksFilter(books::FilterArgs),
    #[serde(rename = "books.list")]
    BooksList(books::ListArgs),
    #[serde(rename = "books.create")]
    BooksCreate(books::CreateArgs),
    #[serde(rename = "books.update")]
    BooksUpdate(books::UpdateArgs),
    #[serde(rename = "books.delete")]
    BooksDelete(books::DeleteArgs),

    #[serde(rename = "students.list")]
    StudentsList(students::ListArgs),
    #[serde(rename = "students.find")]
    StudentsFind(students::FindArgs),
    #[serde(rename = "students.get")]
    StudentsGet(students::GetArgs),
    #[serde(rename = "students.filter")]
    StudentsFilter(students::FilterArgs),
    #[serde(rename = "students.create")]
    StudentsCreate(students::CreateArgs),
    #[serde(rename = "students.update")]
    StudentsUpdate(students::UpdateArgs),
    #[serde(rename = "students.delete")]
    StudentsDelete(students::DeleteArgs),

    #[serde(rename = "planner.ids_list")]
    PlannerIdsList(TargetArgs),
    #[serde(rename = "planner.dates.get")]
    PlannerDatesGet(TargetArgs),
    #[serde(rename = "planner.dates.set")]
    PlannerDatesSet(DatesSetArgs),
    #[serde(rename = "planner.metrics.get")]
    PlannerMetricsGet(TargetArgs),
    #[serde(rename = "planner.plan.get")]
    PlannerPlanGet(TargetArgs),
    #[serde(rename = "planner.plan.set")]
    PlannerPlanSet(PlanSetArgs),
    #[serde(rename = "planner.plan.create")]
    PlannerPlanCreate(PlanCreateArgs),
    #[serde(rename = "planner.guidance")]
    PlannerGuidance(NoArgs),
    #[serde(rename = "planner.monthly.filter")]
    PlannerMonthlyFilter(MonthlyFilterArgs),
    #[serde(rename = "planner.monthplan.get")]
    PlannerMonthplanGet(TargetArgs),
    #[serde(rename = "planner.monthplan.set")]
    PlannerMonthplanSet(MonthplanSetArgs),

    #[serde(rename = "tools.help")]
    ToolsHelp(NoArgs),
}

/// 操作名と説明（`tools.help` の出力）
pub const OPERATIONS: &[(&str, &str)] = &[
    ("books.find", "参考書をあいまい検索（query, limit）"),
    ("books.get", "参考書の詳細（book_id または book_ids）"),
    ("books.filter", "列条件で参考書を絞り込む（where, contains, limit）"),
    ("books.list", "参考書の一覧（limit）"),
    ("books.create", "参考書を登録（title, subject, chapters など）"),
    ("books.update", "参考書を更新（プレビュー後に confirm_token で確定）"),
    ("books.delete", "参考書を削除（プレビュー後に confirm_token で確定）"),
    ("students.list", "在塾生の一覧（include_all で全員）"),
    ("students.find", "生徒をあいまい検索（query, limit）"),
    ("students.get", "生徒の詳細（student_id または student_ids）"),
    ("students.filter", "列条件で生徒を絞り込む（where, contains, limit）"),
    ("students.create", "生徒を登録（record）"),
    ("students.update", "生徒を更新（プレビュー後に confirm_token で確定）"),
    ("students.delete", "生徒を削除（プレビュー後に confirm_token で確定）"),
    ("planner.ids_list", "週間管理の参考書行（A〜D列）"),
    ("planner.dates.get", "各週の開始日"),
    ("planner.dates.set", "1週目の開始日を設定（start_date）"),
    ("planner.metrics.get", "週ごとの時間・単位処理量・目安量"),
    ("planner.plan.get", "週ごとの計画テキスト"),
    ("planner.plan.set", "計画セルに書き込む（単発または items）"),
    ("planner.plan.create", "計画を一括作成（警告と作成ガイド付き）"),
    ("planner.guidance", "計画作成の手引き"),
    ("planner.monthly.filter", "月間管理を年・月で絞り込む（year, month）"),
    ("planner.monthplan.get", "今月プランの週ごとの時間と合計"),
    ("planner.monthplan.set", "今月プランの時間を一括で書く（items）"),
    ("tools.help", "この一覧"),
];

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::BooksFind(_) => "books.find",
            Request::BooksGet(_) => "books.get",
            Request::BooksFilter(_) => "books.filter",
            Request::BooksList(_) => "books.list",
            Request::BooksCreate(_) => "books.create",
            Request::BooksUpdate(_) => "books.update",
            Request::BooksDelete(_) => "books.delete",
            Request::StudentsList(_) => "students.list",
            Request::StudentsFind(_) => "students.find",
            Request::StudentsGet(_) => "students.get",
            Request::StudentsFilter(_) => "students.filter",
            Request::StudentsCreate(_) => "students.create",
            Request::StudentsUpdate(_) => "students.update",
            Request::StudentsDelete(_) => "students.delete",
            Request::PlannerIdsList(_) => "planner.ids_list",
            Request::PlannerDatesGet(_) => "planner.dates.get",
            Request::PlannerDatesSet(_) => "planner.dates.set",
            Request::PlannerMetricsGet(_) => "planner.metrics.get",
            Request::PlannerPlanGet(_) => "planner.plan.get",
            Request::PlannerPlanSet(_) => "planner.plan.set",
            Request::PlannerPlanCreate(_) => "planner.plan.create",
            Request::PlannerGuidance(_) => "planner.guidance",
            Request::PlannerMonthlyFilter(_) => "planner.monthly.filter",
            Request::PlannerMonthplanGet(_) => "planner.monthplan.get",
            Request::PlannerMonthplanSet(_) => "planner.monthplan.set",
            Request::ToolsHelp(_) => "tools.help",
        }
    }

    /// `{"op", "args"}` の値から組み立てる（`args` 省略は空オブジェクト扱い）
    pub fn from_value(mut value: Value) -> ApiResult<Self> {
        let Some(obj) = value.as_object_mut() else {
            return Err(ApiError::bad_request("リクエストはオブジェクトで指定してください"));
        };
        let op = obj.get("op").and_then(Value::as_str).unwrap_or_default().to_string();
        if op.is_empty() {
            return Err(ApiError::bad_request("op が必要です"));
        }
        if !OPERATIONS.iter().any(|(name, _)| *name == op) {
            return Err(ApiError::bad_request(format!("未知の操作です: {}", op))
                .with_details(json!({ "known_ops": OPERATIONS.iter().map(|(n, _)| *n).collect::<Vec<_>>() })));
        }
        if obj.get("args").map_or(true, Value::is_null) {
            obj.insert("args".into(), json!({}));
        }
        serde_json::from_value(value)
            .map_err(|e| ApiError::bad_request(format!("{} の引数が不正です: {}", op, e)))
    }
}

fn tools_help() -> Value {
    let ops: Vec<Value> = OPERATIONS
        .iter()
        .map(|(op, description)| json!({ "op": op, "description": description }))
        .collect();
    json!({
        "count": ops.len(),
        "ops": ops,
        "request": { "op": "<操作名>", "args": {} },
        "confirm": "更新・削除は1回目でプレビューと confirm_token を返す。同じ対象IDと confirm_token で再度呼ぶと確定する",
    })
}

/// パニックのメッセージを取り出す
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "不明なエラー".to_string())
}

impl Service {
    fn dispatch(&self, request: Request) -> ApiResult<Value> {
        match request {
            Request::BooksFind(args) => self.books_find(args),
            Request::BooksGet(args) => self.books_get(args),
            Request::BooksFilter(args) => self.books_filter(args),
            Request::BooksList(args) => self.books_list(args),
            Request::BooksCreate(args) => self.books_create(args),
            Request::BooksUpdate(args) => self.books_update(args),
            Request::BooksDelete(args) => self.books_delete(args),
            Request::StudentsList(args) => self.students_list(args),
            Request::StudentsFind(args) => self.students_find(args),
            Request::StudentsGet(args) => self.students_get(args),
            Request::StudentsFilter(args) => self.students_filter(args),
            Request::StudentsCreate(args) => self.students_create(args),
            Request::StudentsUpdate(args) => self.students_update(args),
            Request::StudentsDelete(args) => self.students_delete(args),
            Request::PlannerIdsList(args) => self.planner_ids_list(args),
            Request::PlannerDatesGet(args) => self.planner_dates_get(args),
            Request::PlannerDatesSet(args) => self.planner_dates_set(args),
            Request::PlannerMetricsGet(args) => self.planner_metrics_get(args),
            Request::PlannerPlanGet(args) => self.planner_plan_get(args),
            Request::PlannerPlanSet(args) => self.planner_plan_set(args),
            Request::PlannerPlanCreate(args) => self.planner_plan_create(args),
            Request::PlannerGuidance(_) => Ok(self.planner_guidance()),
            Request::PlannerMonthlyFilter(args) => self.planner_monthly_filter(args),
            Request::PlannerMonthplanGet(args) => self.planner_monthplan_get(args),
            Request::PlannerMonthplanSet(args) => self.planner_monthplan_set(args),
            Request::ToolsHelp(_) => Ok(tools_help()),
        }
    }

    /// 1件のリクエストを処理して封筒に包む
    ///
    /// ハンドラ内のパニックは `UNCAUGHT` として返し、プロセスは止めない。
    pub fn handle(&self, request: Request) -> Response {
        let op = request.op();
        debug!(op, ?request, "リクエスト");
        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(request))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            let stack = Backtrace::force_capture().to_string();
            error!(op, %message, "ハンドラで想定外のエラー");
            Err(ApiError::new(ErrorCode::Uncaught, message).with_details(json!({ "stack": stack })))
        });
        let response = Response::from_result(op, result);
        match response.error_code() {
            None => info!(op, "ok"),
            Some(code) => info!(op, %code, "ng"),
        }
        response
    }

    /// JSON文字列のリクエストを処理する
    pub fn handle_json(&self, input: &str) -> Response {
        let value: Value = match serde_json::from_str(input) {
            Ok(v) => v,
            Err(e) => {
                return Response::failure("unknown", &ApiError::bad_request(format!("JSONとして読めません: {}", e)));
            }
        };
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();
        match Request::from_value(value) {
            Ok(request) => self.handle(request),
            Err(err) => {
                info!(op = %op, code = %err.code, "リクエストを拒否");
                Response::failure(&op, &err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cram_sheets_common::MemoryBackend;
    use std::sync::Arc;

    fn service() -> Service {
        Service::new(Arc::new(MemoryBackend::new()), Config::default())
    }

    #[test]
    fn test_every_operation_is_routable() {
        for (op, _) in OPERATIONS {
            let value = json!({ "op": op });
            let request = Request::from_value(value);
            // 必須引数の欠落はハンドラ側で弾くので、ここではデコードだけ確認
            assert!(request.is_ok(), "{} が解釈できない: {:?}", op, request.err());
            assert_eq!(request.unwrap().op(), *op);
        }
    }

    #[test]
    fn test_unknown_op() {
        let response = service().handle_json(r#"{"op": "books.rename", "args": {}}"#);
        assert!(!response.ok);
        assert_eq!(response.op, "books.rename");
        assert_eq!(response.error_code(), Some(ErrorCode::BadRequest));
    }

    #[test]
    fn test_unknown_arg_rejected() {
        let response = service().handle_json(r#"{"op": "books.find", "args": {"query": "x", "colour": 1}}"#);
        assert_eq!(response.error_code(), Some(ErrorCode::BadRequest));
        assert!(response.error.unwrap().message.contains("colour"));
    }

    #[test]
    fn test_invalid_json() {
        let response = service().handle_json("{op:");
        assert_eq!(response.op, "unknown");
        assert_eq!(response.error_code(), Some(ErrorCode::BadRequest));
    }

    #[test]
    fn test_tools_help() {
        let response = service().handle_json(r#"{"op": "tools.help"}"#);
        assert!(response.ok);
        let data = response.data.unwrap();
        assert_eq!(data["count"], json!(OPERATIONS.len()));
    }

    #[test]
    fn test_handler_error_keeps_op() {
        let response = service().handle_json(r#"{"op": "books.list", "args": null}"#);
        assert!(!response.ok);
        assert_eq!(response.op, "books.list");
        assert_eq!(response.error_code(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
    }
}
