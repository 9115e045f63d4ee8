//! シート種別ごとの列構成
//!
//! ヘッダー名の候補はシート種別ごとに一か所で定義し、
//! そのシートを扱うすべてのハンドラーで共有する。

use crate::normalize::{header_key, pick_column};
use crate::sheet::{column_letter_to_index, CellRef, CellValue};
use std::collections::HashMap;

/// 論理列名とヘッダー候補
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub key: &'static str,
    pub candidates: &'static [&'static str],
    /// 候補に一致しない場合、空ヘッダーの列を使う
    pub blank_header_fallback: bool,
}

impl ColumnSpec {
    pub const fn new(key: &'static str, candidates: &'static [&'static str]) -> Self {
        Self {
            key,
            candidates,
            blank_header_fallback: false,
        }
    }

    pub const fn or_blank_header(mut self) -> Self {
        self.blank_header_fallback = true;
        self
    }
}

/// 在籍中とみなすステータス値
pub const ACTIVE_STATUSES: &[&str] = &["在塾", "在籍", "active", "Active"];

/// 1シート種別の列構成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub kind: &'static str,
    pub columns: Vec<ColumnSpec>,
}

impl SheetLayout {
    /// 参考書マスター
    pub fn books() -> Self {
        Self {
            kind: "books",
            columns: vec![
                ColumnSpec::new("id", &["参考書ID", "ID", "id"]),
                ColumnSpec::new("title", &["参考書名", "タイトル", "書名", "title"]),
                ColumnSpec::new("subject", &["教科", "科目", "subject"]),
                ColumnSpec::new("unit_load", &["単位当たり処理量", "単位処理量", "単元負荷", "unit_load"]),
                ColumnSpec::new("monthly_goal", &["月間目標", "goal", "monthly_goal"]),
                ColumnSpec::new("chap_idx", &["章立て"]),
                ColumnSpec::new("chap_name", &["章の名前", "章名"]),
                ColumnSpec::new("chap_begin", &["章のはじめ", "開始", "begin", "start"]),
                ColumnSpec::new("chap_end", &["章の終わり", "終了", "end"]),
                ColumnSpec::new("numbering", &["番号の数え方", "番号", "numbering"]),
                ColumnSpec::new("book_type", &["参考書のタイプ", "book_type"]),
                ColumnSpec::new("quiz_type", &["確認テストのタイプ", "quiz_type"]),
                ColumnSpec::new("quiz_id", &["確認テストID", "quiz_id"]),
                ColumnSpec::new("aliases", &["別名", "エイリアス", "略称", "aliases"]),
            ],
        }
    }

    /// 生徒一覧（ID列はヘッダーが空のことがある）
    pub fn students() -> Self {
        Self {
            kind: "students",
            columns: vec![
                ColumnSpec::new("id", &["生徒ID", "ID", "id"]).or_blank_header(),
                ColumnSpec::new("comiru_id", &["Comiru生徒番号", "comiru_id"]),
                ColumnSpec::new("name", &["名前", "氏名", "生徒名", "name"]),
                ColumnSpec::new("family_name", &["姓"]),
                ColumnSpec::new("given_name", &["名"]),
                ColumnSpec::new("grade", &["学年", "grade"]),
                ColumnSpec::new("status", &["Status", "ステータス", "status", "在籍状況"]),
                ColumnSpec::new(
                    "planner_link",
                    &[
                        "スプレッドシート",
                        "スピードプランナー",
                        "PlannerLink",
                        "プランナーリンク",
                        "スプレッドシートURL",
                    ],
                ),
                ColumnSpec::new(
                    "planner_sheet_id",
                    &["スピードプランナーID", "PlannerSheetId", "planner_sheet_id", "プランナーID"],
                ),
                ColumnSpec::new("meeting_doc", &["ドキュメント", "面談メモID", "MeetingDocId", "meeting_doc_id"]),
                ColumnSpec::new("tags", &["タグ", "tags"]),
            ],
        }
    }

    pub fn spec(&self, key: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.key == key)
    }
}

/// ヘッダー行から作る列位置の索引
///
/// シートを読むたびに一度だけ作り、以降の位置参照はすべてこれを通す。
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    headers: Vec<String>,
    keys: Vec<String>,
    columns: HashMap<&'static str, usize>,
}

impl HeaderIndex {
    pub fn build<H: AsRef<str>>(headers: &[H], layout: &SheetLayout) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.as_ref().trim().to_string()).collect();
        let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();

        let mut columns = HashMap::new();
        for spec in &layout.columns {
            let found = pick_column(&headers, spec.candidates).or_else(|| {
                if spec.blank_header_fallback {
                    keys.iter().position(|k| k.is_empty())
                } else {
                    None
                }
            });
            if let Some(idx) = found {
                columns.insert(spec.key, idx);
            }
        }

        Self {
            headers,
            keys,
            columns,
        }
    }

    /// グリッドの1行目から作る
    pub fn from_row(row: &[CellValue], layout: &SheetLayout) -> Self {
        let headers: Vec<String> = row.iter().map(CellValue::text).collect();
        Self::build(&headers, layout)
    }

    /// 論理列名の位置
    pub fn col(&self, key: &str) -> Option<usize> {
        self.columns.get(key).copied()
    }

    /// 任意のヘッダー名の位置（正規化して完全一致）
    pub fn find_header(&self, name: &str) -> Option<usize> {
        let key = header_key(name);
        if key.is_empty() {
            return None;
        }
        self.keys.iter().position(|k| *k == key)
    }

    /// 正規化したヘッダーにいずれかの語を含む最初の列
    pub fn find_header_containing(&self, needles: &[&str]) -> Option<usize> {
        let needles: Vec<String> = needles.iter().map(|n| header_key(n)).collect();
        self.keys
            .iter()
            .position(|k| needles.iter().any(|n| !n.is_empty() && k.contains(n.as_str())))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

/// 1週分の列（時間・単位処理量・目安・計画）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekColumns {
    pub time: &'static str,
    pub unit: &'static str,
    pub guide: &'static str,
    pub plan: &'static str,
}

impl WeekColumns {
    pub fn time_cell(&self, row: u32) -> CellRef {
        cell(self.time, row)
    }

    pub fn plan_cell(&self, row: u32) -> CellRef {
        cell(self.plan, row)
    }
}

fn cell(column: &'static str, row: u32) -> CellRef {
    CellRef::new(row, column_letter_to_index(column).unwrap_or(0))
}

/// 週数
pub const WEEK_COUNT: usize = 5;

/// プランナー（週間管理・月間管理・今月プラン）の固定配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerLayout {
    pub weekly_sheet_names: &'static [&'static str],
    pub monthly_sheet: &'static str,
    pub monthplan_sheet: &'static str,
    pub first_row: u32,
    pub last_row: u32,
    pub weeks: [WeekColumns; WEEK_COUNT],
    pub week_start_cells: [&'static str; WEEK_COUNT],
    pub monthplan_hour_columns: [&'static str; WEEK_COUNT],
}

impl Default for PlannerLayout {
    fn default() -> Self {
        Self {
            weekly_sheet_names: &["週間管理", "週間計画", "週刊計画", "週刊管理"],
            monthly_sheet: "月間管理",
            monthplan_sheet: "今月プラン",
            first_row: 4,
            last_row: 30,
            weeks: [
                WeekColumns { time: "E", unit: "F", guide: "G", plan: "H" },
                WeekColumns { time: "M", unit: "N", guide: "O", plan: "P" },
                WeekColumns { time: "U", unit: "V", guide: "W", plan: "X" },
                WeekColumns { time: "AC", unit: "AD", guide: "AE", plan: "AF" },
                WeekColumns { time: "AK", unit: "AL", guide: "AM", plan: "AN" },
            ],
            week_start_cells: ["D1", "L1", "T1", "AB1", "AJ1"],
            monthplan_hour_columns: ["D", "E", "F", "G", "H"],
        }
    }
}

impl PlannerLayout {
    /// 1始まりの週番号で列を引く（範囲外は `None`）
    pub fn week(&self, week_index: i64) -> Option<&WeekColumns> {
        if (1..=WEEK_COUNT as i64).contains(&week_index) {
            self.weeks.get(week_index as usize - 1)
        } else {
            None
        }
    }

    pub fn contains_row(&self, row: i64) -> bool {
        (self.first_row as i64..=self.last_row as i64).contains(&row)
    }

    pub fn row_count(&self) -> usize {
        (self.last_row - self.first_row + 1) as usize
    }

    pub fn monthplan_cell(&self, week_index: i64, row: u32) -> Option<CellRef> {
        if !(1..=WEEK_COUNT as i64).contains(&week_index) {
            return None;
        }
        Some(cell(self.monthplan_hour_columns[week_index as usize - 1], row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_books_header_index() {
        let headers = ["参考書ＩＤ", "参考書名", "教科", "単位当たり処理量", "月間目標", "章立て"];
        let index = HeaderIndex::build(&headers, &SheetLayout::books());
        assert_eq!(index.col("id"), Some(0));
        assert_eq!(index.col("title"), Some(1));
        assert_eq!(index.col("subject"), Some(2));
        assert_eq!(index.col("unit_load"), Some(3));
        assert_eq!(index.col("chap_idx"), Some(5));
        assert_eq!(index.col("aliases"), None);
    }

    #[test]
    fn test_students_blank_id_header() {
        let headers = ["", "Comiru生徒番号", "名前", "Status"];
        let index = HeaderIndex::build(&headers, &SheetLayout::students());
        assert_eq!(index.col("id"), Some(0));
        assert_eq!(index.col("name"), Some(2));
        assert_eq!(index.col("status"), Some(3));
    }

    #[test]
    fn test_students_named_id_preferred_over_blank() {
        let headers = ["", "メモ", "生徒ID", "名前"];
        let index = HeaderIndex::build(&headers, &SheetLayout::students());
        assert_eq!(index.col("id"), Some(2));
    }

    #[test]
    fn test_find_header() {
        let index = HeaderIndex::build(&["学年", "保護者 連絡先"], &SheetLayout::students());
        assert_eq!(index.find_header("保護者連絡先"), Some(1));
        assert_eq!(index.find_header(""), None);
        assert_eq!(index.find_header("住所"), None);
    }

    #[test]
    fn test_find_header_containing() {
        let index = HeaderIndex::build(&["名前", "Planner URL"], &SheetLayout::students());
        assert_eq!(index.find_header_containing(&["スプレッドシート", "planner"]), Some(1));
    }

    #[test]
    fn test_planner_week_columns() {
        let layout = PlannerLayout::default();
        assert_eq!(layout.week(1).map(|w| w.plan), Some("H"));
        assert_eq!(layout.week(5).map(|w| w.time), Some("AK"));
        assert!(layout.week(0).is_none());
        assert!(layout.week(6).is_none());
        assert_eq!(layout.week(4).unwrap().plan_cell(10).to_string(), "AF10");
        assert_eq!(layout.row_count(), 27);
    }

    #[test]
    fn test_monthplan_cell() {
        let layout = PlannerLayout::default();
        assert_eq!(layout.monthplan_cell(3, 5).map(|c| c.to_string()).as_deref(), Some("F5"));
        assert!(layout.monthplan_cell(6, 5).is_none());
    }
}
