//! 操作ハンドラ
//!
//! 参考書・生徒・プランナーの各操作を [`Service`] のメソッドとして実装する。
//! ハンドラは `ApiResult<Value>` を返し、エンベロープへの変換はルーターが行う。

pub mod books;
pub mod planner;
pub mod students;
mod two_phase;

pub use two_phase::PendingMutation;

use crate::config::Config;
use cram_sheets_common::normalize::normalize;
use cram_sheets_common::{
    cell_at, cell_text, ApiError, ApiResult, CellRef, CellValue, Clock, ErrorCode, Grid, HeaderIndex, PlannerLayout,
    PreviewCache, Row, SheetAccessor, SheetLayout, SystemClock,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// 全ハンドラが共有するサービス
///
/// プレビューキャッシュはプロセスに1つだけ作り、ここから各ハンドラへ渡る。
pub struct Service {
    sheets: Arc<dyn SheetAccessor>,
    config: Config,
    previews: PreviewCache<PendingMutation>,
    books_layout: SheetLayout,
    students_layout: SheetLayout,
    planner_layout: PlannerLayout,
}

impl Service {
    pub fn new(sheets: Arc<dyn SheetAccessor>, config: Config) -> Self {
        Self::with_clock(sheets, config, Arc::new(SystemClock))
    }

    /// 時計を差し替えて作る（期限切れのテスト用）
    pub fn with_clock(sheets: Arc<dyn SheetAccessor>, config: Config, clock: Arc<dyn Clock>) -> Self {
        let previews = PreviewCache::with_clock(config.preview_ttl_seconds, clock);
        Self {
            sheets,
            config,
            previews,
            books_layout: SheetLayout::books(),
            students_layout: SheetLayout::students(),
            planner_layout: PlannerLayout::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sheets(&self) -> &Arc<dyn SheetAccessor> {
        &self.sheets
    }

    pub fn previews(&self) -> &PreviewCache<PendingMutation> {
        &self.previews
    }

    pub fn planner_layout(&self) -> &PlannerLayout {
        &self.planner_layout
    }

    /// マスターシートを読み、ヘッダー索引を作る
    ///
    /// シートがなければ `NOT_FOUND`、行が1つもなければ `EMPTY`。
    pub(crate) fn load_table(&self, spreadsheet_id: &str, sheet: &str, layout: &SheetLayout) -> ApiResult<Table> {
        let rows = self.sheets.read_sheet(spreadsheet_id, sheet)?.ok_or_else(|| {
            ApiError::not_found(format!("シートが見つかりません: {} / {}", spreadsheet_id, sheet))
        })?;
        if rows.is_empty() {
            return Err(ApiError::empty("シートが空です"));
        }
        let index = HeaderIndex::from_row(&rows[0], layout);
        debug!(spreadsheet_id, sheet, rows = rows.len(), kind = layout.kind, "シートを読み込み");
        Ok(Table {
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet: sheet.to_string(),
            rows,
            index,
        })
    }
}

/// ヘッダー行つきのシート内容
pub(crate) struct Table {
    pub spreadsheet_id: String,
    pub sheet: String,
    pub rows: Grid,
    pub index: HeaderIndex,
}

impl Table {
    /// ヘッダーを除いた行と、そのシート上の行番号（1始まり）
    pub fn records(&self) -> impl Iterator<Item = (u32, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, row)| (i as u32 + 1, row))
    }

    pub fn text(&self, row: &[CellValue], key: &str) -> String {
        cell_text(row, self.index.col(key))
    }

    /// 必須列の位置（見つからなければ `BAD_HEADER`）
    pub fn require_col(&self, key: &str) -> ApiResult<usize> {
        self.index.col(key).ok_or_else(|| {
            ApiError::new(ErrorCode::BadHeader, format!("{} 列が見つかりません", key))
                .with_details(serde_json::json!({ "headers": self.index.headers() }))
        })
    }

    /// ヘッダー幅ぶんの空行
    pub fn blank_row(&self) -> Row {
        vec![CellValue::Empty; self.index.width().max(1)]
    }

    /// 1行ぶんの変更を、変更列の左端から右端までの連続した範囲にまとめる
    ///
    /// 間の列は今の値のまま。変更がなければ `None`。
    pub fn patch_row(&self, row_number: u32, changes: &[(usize, CellValue)]) -> Option<(CellRef, Row)> {
        let first = changes.iter().map(|(col, _)| *col).min()?;
        let last = changes.iter().map(|(col, _)| *col).max()?;
        let source: &[CellValue] = self
            .rows
            .get(row_number as usize - 1)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut span: Row = (first..=last).map(|col| cell_at(source, col).clone()).collect();
        for (col, value) in changes {
            span[col - first] = value.clone();
        }
        Some((CellRef::new(row_number, first), span))
    }
}

/// `where`（完全一致）と `contains`（部分一致）の条件
///
/// 列はヘッダー名を正規化して照合する。存在しない列を指定した条件は一致しない。
pub(crate) struct Conditions {
    exact: Vec<(Option<usize>, String)>,
    partial: Vec<(Option<usize>, String)>,
}

impl Conditions {
    pub fn build(
        index: &HeaderIndex,
        where_: &BTreeMap<String, Value>,
        contains: &BTreeMap<String, Value>,
    ) -> Self {
        let resolve = |conds: &BTreeMap<String, Value>| -> Vec<(Option<usize>, String)> {
            conds
                .iter()
                .map(|(k, v)| (index.find_header(k), normalize(&json_text(v))))
                .collect()
        };
        Self {
            exact: resolve(where_),
            partial: resolve(contains),
        }
    }

    /// `values_of(col)` は列の値（ブロックなら複数行ぶん）を返す
    pub fn matches<F>(&self, values_of: F) -> bool
    where
        F: Fn(usize) -> Vec<String>,
    {
        all_hit(&self.exact, &values_of, |value, want| value == want)
            && all_hit(&self.partial, &values_of, |value, want| value.contains(want))
    }
}

fn all_hit<F, H>(conds: &[(Option<usize>, String)], values_of: &F, hit: H) -> bool
where
    F: Fn(usize) -> Vec<String>,
    H: Fn(&str, &str) -> bool,
{
    conds.iter().all(|(col, want)| match col {
        Some(c) => values_of(*c).iter().any(|v| hit(normalize(v).as_str(), want.as_str())),
        None => false,
    })
}

/// JSON値をセル文字列として読む
pub(crate) fn json_text(value: &Value) -> String {
    CellValue::from_json(value).text()
}

/// 1行の列値（`Conditions::matches` 用）
pub(crate) fn row_values(row: &[CellValue], col: usize) -> Vec<String> {
    vec![cell_at(row, col).text()]
}

/// `limit` の解釈（0や未指定は無制限）
pub(crate) fn apply_limit<T>(items: &mut Vec<T>, limit: Option<usize>) {
    if let Some(n) = limit.filter(|n| *n > 0) {
        items.truncate(n);
    }
}

/// 必須の文字列引数を取り出す
pub(crate) fn required(value: Option<&str>, name: &str) -> ApiResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::bad_request(format!("{} が必要です", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cram_sheets_common::sheet::grid_from_strs;
    use cram_sheets_common::MemoryBackend;
    use serde_json::json;

    fn service(backend: MemoryBackend) -> Service {
        Service::new(Arc::new(backend), Config::default())
    }

    #[test]
    fn test_patch_row_keeps_cells_between_changes() {
        let backend = MemoryBackend::new().with_sheet(
            "students_master",
            "生徒一覧",
            grid_from_strs(&[&["生徒ID", "名前", "学年", "Status"], &["s001", "田中", "高1", "在塾"]]),
        );
        let svc = service(backend);
        let table = svc.load_students().unwrap();

        let (start, span) = table
            .patch_row(2, &[(3, CellValue::from("退塾")), (1, CellValue::from("田中 太郎"))])
            .unwrap();
        assert_eq!(start.to_string(), "B2");
        assert_eq!(span, vec![CellValue::from("田中 太郎"), CellValue::from("高1"), CellValue::from("退塾")]);
        assert!(table.patch_row(2, &[]).is_none());
    }

    #[test]
    fn test_load_table_missing_sheet() {
        let svc = service(MemoryBackend::new());
        let err = svc.load_table("none", "シート", &SheetLayout::books()).err().unwrap();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_load_table_empty_sheet() {
        let svc = service(MemoryBackend::new().with_sheet("m", "s", Vec::new()));
        let err = svc.load_table("m", "s", &SheetLayout::books()).err().unwrap();
        assert_eq!(err.code, ErrorCode::Empty);
    }

    #[test]
    fn test_records_row_numbers() {
        let grid = grid_from_strs(&[&["参考書ID", "参考書名"], &["gMB001", "A"], &["gMB002", "B"]]);
        let svc = service(MemoryBackend::new().with_sheet("m", "s", grid));
        let table = svc.load_table("m", "s", &SheetLayout::books()).unwrap();
        let rows: Vec<u32> = table.records().map(|(n, _)| n).collect();
        assert_eq!(rows, vec![2, 3]);
        assert_eq!(table.require_col("id").unwrap(), 0);
        assert_eq!(table.require_col("subject").err().unwrap().code, ErrorCode::BadHeader);
    }

    #[test]
    fn test_conditions() {
        let index = HeaderIndex::build(&["学年", "名前"], &SheetLayout::students());
        let mut where_ = BTreeMap::new();
        where_.insert("学年".to_string(), json!("高２"));
        let mut contains = BTreeMap::new();
        contains.insert("名前".to_string(), json!("田中"));
        let conds = Conditions::build(&index, &where_, &contains);

        let row = grid_from_strs(&[&["高2", "田中 太郎"]]).remove(0);
        assert!(conds.matches(|c| row_values(&row, c)));

        let other = grid_from_strs(&[&["高3", "田中 花子"]]).remove(0);
        assert!(!conds.matches(|c| row_values(&other, c)));
    }

    #[test]
    fn test_conditions_unknown_column_never_matches() {
        let index = HeaderIndex::build(&["名前"], &SheetLayout::students());
        let mut where_ = BTreeMap::new();
        where_.insert("住所".to_string(), json!(""));
        let conds = Conditions::build(&index, &where_, &BTreeMap::new());
        let row = grid_from_strs(&[&["田中"]]).remove(0);
        assert!(!conds.matches(|c| row_values(&row, c)));
    }

    #[test]
    fn test_required() {
        assert_eq!(required(Some(" gMB001 "), "book_id").unwrap(), "gMB001");
        assert_eq!(required(Some("  "), "book_id").err().unwrap().code, ErrorCode::BadRequest);
        assert!(required(None, "book_id").is_err());
    }
}
