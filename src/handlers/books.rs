//! 参考書マスターの操作
//!
//! 1冊の参考書は「ID のある親行 + 章ごとの続き行」のブロックで表される。
//! 次に別のIDが現れる行の手前までが1ブロック。

use super::two_phase::{unexpected, FieldChange, BOOKS_DELETE, BOOKS_UPDATE};
use super::{apply_limit, required, Conditions, PendingMutation, Service, Table};
use cram_sheets_common::normalize::as_whole_number;
use cram_sheets_common::{
    cell_at, decide_prefix, next_id_for_prefix, ApiError, ApiResult, CellValue, Row, SearchDoc,
    SearchIndex,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

lazy_static! {
    static ref HOURS_RE: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*時間").unwrap();
}

const ALIAS_SEPARATORS: &[char] = &[',', '、', '/', '|', '，'];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetArgs {
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub book_ids: Option<Vec<String>>,
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

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListArgs {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterRange {
    #[serde(default)]
    pub start: Option<Value>,
    #[serde(default)]
    pub end: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub range: Option<ChapterRange>,
    #[serde(default)]
    pub numbering: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateArgs {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub unit_load: Option<Value>,
    #[serde(default)]
    pub monthly_goal: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterInput>,
    #[serde(default)]
    pub id_prefix: Option<String>,
}

/// 更新できる項目（章の構成は対象外）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookUpdates {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub monthly_goal: Option<String>,
    #[serde(default)]
    pub unit_load: Option<Value>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

impl BookUpdates {
    fn fields(&self) -> Vec<(&'static str, CellValue)> {
        let mut fields = Vec::new();
        if let Some(v) = &self.title {
            fields.push(("title", CellValue::from(v.trim())));
        }
        if let Some(v) = &self.subject {
            fields.push(("subject", CellValue::from(v.trim())));
        }
        if let Some(v) = &self.monthly_goal {
            fields.push(("monthly_goal", CellValue::from(v.trim())));
        }
        if let Some(v) = &self.unit_load {
            fields.push(("unit_load", CellValue::from_json(v)));
        }
        if let Some(v) = &self.aliases {
            fields.push(("aliases", CellValue::from(join_aliases(v))));
        }
        fields
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateArgs {
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub updates: Option<BookUpdates>,
    #[serde(default)]
    pub confirm_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteArgs {
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub confirm_token: Option<String>,
}

/// 参考書1冊ぶんの行範囲（`start` は `Table::rows` の添字）
#[derive(Debug, Clone, PartialEq)]
struct Block {
    id: String,
    start: usize,
    len: usize,
}

impl Block {
    /// 親行のシート上の行番号
    fn sheet_row(&self) -> u32 {
        self.start as u32 + 1
    }

    fn rows<'a>(&self, table: &'a Table) -> &'a [Row] {
        &table.rows[self.start..self.start + self.len]
    }
}

/// IDのある行ごとにブロックへ分ける（先頭のID無し行は捨てる）
///
/// 章の行に親と同じIDが続く場合は同じブロックに含める。
/// 離れた位置で同じIDが再び現れたら、その行と続く章の行は無視する（最初の出現が有効）。
fn blocks(table: &Table, id_col: usize) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipping = false;
    for (i, row) in table.rows.iter().enumerate().skip(1) {
        let id = cell_at(row, id_col).text();
        let continues = blocks.last().is_some_and(|last| !skipping && last.id == id);
        if id.is_empty() || continues {
            if !skipping {
                if let Some(last) = blocks.last_mut() {
                    last.len += 1;
                }
            }
        } else if seen.insert(id.clone()) {
            skipping = false;
            blocks.push(Block {
                id,
                start: i,
                len: 1,
            });
        } else {
            debug!(book_id = %id, row = i + 1, "重複したIDの行を無視");
            skipping = true;
        }
    }
    blocks
}

fn find_block(table: &Table, id_col: usize, book_id: &str) -> Option<Block> {
    blocks(table, id_col).into_iter().find(|b| b.id == book_id)
}

fn split_aliases(text: &str) -> Vec<String> {
    text.split(ALIAS_SEPARATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_aliases(aliases: &[String]) -> String {
    aliases
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join("、")
}

/// 数値をJSONにする（整数なら整数のまま）
pub(crate) fn number_json(n: Option<f64>) -> Value {
    match n {
        Some(n) => match as_whole_number(n) {
            Some(i) => json!(i),
            None => json!(n),
        },
        None => Value::Null,
    }
}

/// 「1.5時間」のような月間目標を1日あたりの分数に読む
fn parse_monthly_goal(text: &str) -> Value {
    let per_day_minutes = HOURS_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|hours| (hours * 60.0).round() as i64);
    json!({
        "text": text,
        "per_day_minutes": per_day_minutes,
        "days": Value::Null,
        "total_minutes_est": Value::Null,
    })
}

fn parse_chapter(table: &Table, row: &[CellValue], count: usize) -> Option<Value> {
    let name = table.text(row, "chap_name");
    let num = |key: &str| table.index.col(key).and_then(|c| cell_at(row, c).to_number());
    let begin = num("chap_begin");
    let end = num("chap_end");
    if name.is_empty() && begin.is_none() && end.is_none() {
        return None;
    }
    let idx = num("chap_idx").and_then(as_whole_number).unwrap_or(count as i64 + 1);
    let numbering = Some(table.text(row, "numbering")).filter(|s| !s.is_empty());
    let title = Some(name).filter(|s| !s.is_empty());
    let range = if begin.is_some() || end.is_some() {
        json!({ "start": number_json(begin), "end": number_json(end) })
    } else {
        Value::Null
    };
    Some(json!({
        "idx": idx,
        "title": title,
        "range": range,
        "numbering": numbering,
    }))
}

fn book_json(table: &Table, block: &Block) -> Value {
    let rows = block.rows(table);
    let parent = &rows[0];
    let mut chapters: Vec<Value> = Vec::new();
    for row in rows {
        if let Some(chapter) = parse_chapter(table, row, chapters.len()) {
            chapters.push(chapter);
        }
    }
    let unit_load = table.index.col("unit_load").and_then(|c| cell_at(parent, c).to_number());
    json!({
        "id": block.id,
        "title": table.text(parent, "title"),
        "subject": table.text(parent, "subject"),
        "monthly_goal": parse_monthly_goal(&table.text(parent, "monthly_goal")),
        "unit_load": number_json(unit_load),
        "aliases": split_aliases(&table.text(parent, "aliases")),
        "structure": { "chapters": chapters },
        "assessment": {
            "book_type": table.text(parent, "book_type"),
            "quiz_type": table.text(parent, "quiz_type"),
            "quiz_id": table.text(parent, "quiz_id"),
        },
    })
}

impl Service {
    fn load_books(&self) -> ApiResult<Table> {
        self.load_table(&self.config.books_master_id, &self.config.books_sheet, &self.books_layout)
    }

    /// 参考書のあいまい検索
    pub fn books_find(&self, args: FindArgs) -> ApiResult<Value> {
        let query = required(Some(args.query.as_str()), "query")?;
        let table = self.load_books()?;
        let id_col = table.require_col("id")?;

        let docs: Vec<SearchDoc> = blocks(&table, id_col)
            .iter()
            .map(|block| {
                let parent = &table.rows[block.start];
                SearchDoc {
                    id: block.id.clone(),
                    title: table.text(parent, "title"),
                    subject: table.text(parent, "subject"),
                    aliases: split_aliases(&table.text(parent, "aliases")),
                }
            })
            .collect();

        let limit = args.limit.filter(|n| *n > 0).unwrap_or(self.config.books_find_limit);
        let outcome = SearchIndex::build(docs).search(&query, limit);
        let to_json = |c: &cram_sheets_common::Candidate| {
            json!({
                "book_id": c.id,
                "title": c.title,
                "subject": c.subject,
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

    /// IDで参考書を取得（`book_ids` があれば複数）
    pub fn books_get(&self, args: GetArgs) -> ApiResult<Value> {
        if let Some(ids) = args.book_ids.filter(|ids| !ids.is_empty()) {
            return self.books_get_many(&ids);
        }
        let book_id = required(args.book_id.as_deref(), "book_id")?;
        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let block = find_block(&table, id_col, &book_id)
            .ok_or_else(|| ApiError::not_found(format!("参考書が見つかりません: {}", book_id)))?;
        Ok(json!({ "book": book_json(&table, &block) }))
    }

    fn books_get_many(&self, ids: &[String]) -> ApiResult<Value> {
        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let all = blocks(&table, id_col);

        let mut books = Vec::new();
        let mut missing = Vec::new();
        for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            match all.iter().find(|b| b.id == id) {
                Some(block) => books.push(book_json(&table, block)),
                None => missing.push(id.to_string()),
            }
        }
        Ok(json!({ "books": books, "missing": missing }))
    }

    /// 列の値で絞り込み（ブロック内のどれかの行が一致すればよい）
    pub fn books_filter(&self, args: FilterArgs) -> ApiResult<Value> {
        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let conditions = Conditions::build(&table.index, &args.where_, &args.contains);

        let mut books: Vec<Value> = blocks(&table, id_col)
            .iter()
            .filter(|block| {
                let rows = block.rows(&table);
                conditions.matches(|col| {
                    rows.iter()
                        .map(|row| cell_at(row, col).text())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
            })
            .map(|block| book_json(&table, block))
            .collect();
        apply_limit(&mut books, args.limit);

        Ok(json!({ "books": books, "count": books.len(), "limit": args.limit }))
    }

    pub fn books_list(&self, args: ListArgs) -> ApiResult<Value> {
        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let mut books: Vec<Value> = blocks(&table, id_col)
            .iter()
            .map(|block| {
                let parent = &table.rows[block.start];
                json!({
                    "id": block.id,
                    "title": table.text(parent, "title"),
                    "subject": table.text(parent, "subject"),
                })
            })
            .collect();
        apply_limit(&mut books, args.limit);
        Ok(json!({ "books": books, "count": books.len() }))
    }

    /// 新しい参考書を追加する
    ///
    /// IDは `g` + 教科コード + 連番。`id_prefix` 指定時はそれを使う。
    pub fn books_create(&self, args: CreateArgs) -> ApiResult<Value> {
        let title = args.title.as_deref().map(str::trim).unwrap_or_default();
        let subject = args.subject.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() || subject.is_empty() {
            return Err(ApiError::bad_request("title と subject が必要です"));
        }

        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let prefix = match args.id_prefix.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => format!("g{}", decide_prefix(subject, title)),
        };
        let new_id = next_id_for_prefix(&prefix, &table.rows, Some(id_col));

        let mut parent = table.blank_row();
        let set = |row: &mut Row, key: &str, value: CellValue| {
            if let Some(c) = table.index.col(key) {
                row[c] = value;
            }
        };
        set(&mut parent, "id", CellValue::from(new_id.as_str()));
        set(&mut parent, "title", CellValue::from(title));
        set(&mut parent, "subject", CellValue::from(subject));
        set(&mut parent, "monthly_goal", CellValue::from(args.monthly_goal.as_deref().unwrap_or_default().trim()));
        set(&mut parent, "unit_load", args.unit_load.as_ref().map(CellValue::from_json).unwrap_or_default());
        set(&mut parent, "aliases", CellValue::from(join_aliases(&args.aliases)));

        let mut rows = vec![parent];
        for (i, chapter) in args.chapters.iter().enumerate() {
            if i > 0 {
                rows.push(table.blank_row());
            }
            let Some(row) = rows.last_mut() else { break };
            let range = chapter.range.clone().unwrap_or_default();
            set(row, "chap_idx", CellValue::from(i as i64 + 1));
            set(row, "chap_name", CellValue::from(chapter.title.as_deref().unwrap_or_default().trim()));
            set(row, "chap_begin", range.start.as_ref().map(CellValue::from_json).unwrap_or_default());
            set(row, "chap_end", range.end.as_ref().map(CellValue::from_json).unwrap_or_default());
            set(row, "numbering", CellValue::from(chapter.numbering.as_deref().unwrap_or_default().trim()));
        }

        self.sheets.append_rows(&table.spreadsheet_id, &table.sheet, &rows)?;
        info!(book_id = %new_id, rows = rows.len(), "参考書を追加");
        Ok(json!({ "id": new_id, "created_rows": rows.len() }))
    }

    /// 親行の項目を更新する（プレビュー → 確定）
    pub fn books_update(&self, args: UpdateArgs) -> ApiResult<Value> {
        let book_id = required(args.book_id.as_deref(), "book_id")?;

        if let Some(token) = args.confirm_token.as_deref().filter(|t| !t.trim().is_empty()) {
            let PendingMutation::BookUpdate { changes } = self.take_change(BOOKS_UPDATE, &book_id, token)? else {
                return Err(unexpected(BOOKS_UPDATE));
            };
            let table = self.load_books()?;
            let id_col = table.require_col("id")?;
            let block = find_block(&table, id_col, &book_id)
                .ok_or_else(|| ApiError::not_found(format!("参考書が見つかりません: {}", book_id)))?;
            let cells = changes
                .iter()
                .map(|change| Ok((table.require_col(&change.field)?, change.value.clone())))
                .collect::<ApiResult<Vec<_>>>()?;
            if let Some((start, span)) = table.patch_row(block.sheet_row(), &cells) {
                self.sheets.write_range(&table.spreadsheet_id, &table.sheet, start, &[span])?;
            }
            info!(book_id = %book_id, fields = changes.len(), "参考書を更新");
            return Ok(json!({ "book_id": book_id, "updated": true, "changed_fields": changes.len() }));
        }

        let updates = args.updates.unwrap_or_default();
        let fields = updates.fields();
        if fields.is_empty() {
            return Err(ApiError::bad_request("updates か confirm_token が必要です"));
        }

        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let block = find_block(&table, id_col, &book_id)
            .ok_or_else(|| ApiError::not_found(format!("参考書が見つかりません: {}", book_id)))?;
        let parent = &table.rows[block.start];

        let mut meta_changes = Map::new();
        let mut changes = Vec::new();
        for (field, value) in fields {
            let col = table.require_col(field)?;
            let current = cell_at(parent, col);
            if current.text() == value.text() {
                continue;
            }
            meta_changes.insert(
                field.to_string(),
                json!({ "from": current.to_json(), "to": value.to_json() }),
            );
            changes.push(FieldChange {
                field: field.to_string(),
                value,
            });
        }

        let preview = json!({ "book_id": book_id, "meta_changes": meta_changes });
        Ok(self.propose_change(
            BOOKS_UPDATE,
            "book_id",
            &book_id,
            preview,
            PendingMutation::BookUpdate { changes },
        ))
    }

    /// ブロックごと削除する（プレビュー → 確定）
    pub fn books_delete(&self, args: DeleteArgs) -> ApiResult<Value> {
        let book_id = required(args.book_id.as_deref(), "book_id")?;

        if let Some(token) = args.confirm_token.as_deref().filter(|t| !t.trim().is_empty()) {
            let PendingMutation::BookDelete { rows } = self.take_change(BOOKS_DELETE, &book_id, token)? else {
                return Err(unexpected(BOOKS_DELETE));
            };
            let table = self.load_books()?;
            let id_col = table.require_col("id")?;
            let block = find_block(&table, id_col, &book_id)
                .ok_or_else(|| ApiError::not_found(format!("参考書が見つかりません: {}", book_id)))?;
            if block.len as u32 != rows {
                warn!(book_id = %book_id, previewed = rows, current = block.len, "プレビュー後に行数が変わっています");
            }
            self.sheets
                .delete_rows(&table.spreadsheet_id, &table.sheet, block.sheet_row(), block.len as u32)?;
            info!(book_id = %book_id, rows = block.len, "参考書を削除");
            return Ok(json!({ "book_id": book_id, "deleted_rows": block.len }));
        }

        let table = self.load_books()?;
        let id_col = table.require_col("id")?;
        let block = find_block(&table, id_col, &book_id)
            .ok_or_else(|| ApiError::not_found(format!("参考書が見つかりません: {}", book_id)))?;
        let snapshot: Vec<Vec<String>> = block
            .rows(&table)
            .iter()
            .map(|row| row.iter().map(CellValue::text).collect())
            .collect();
        let end_row = block.sheet_row() + block.len as u32 - 1;
        let preview = json!({
            "book_id": book_id,
            "title": table.text(&table.rows[block.start], "title"),
            "delete_rows": block.len,
            "range": { "start_row": block.sheet_row(), "end_row": end_row },
            "rows": snapshot,
        });
        Ok(self.propose_change(
            BOOKS_DELETE,
            "book_id",
            &book_id,
            preview,
            PendingMutation::BookDelete { rows: block.len as u32 },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cram_sheets_common::sheet::grid_from_strs;
    use cram_sheets_common::{HeaderIndex, SheetLayout};

    fn table(rows: &[&[&str]]) -> Table {
        let rows = grid_from_strs(rows);
        let index = HeaderIndex::from_row(&rows[0], &SheetLayout::books());
        Table {
            spreadsheet_id: "books_master".into(),
            sheet: "参考書マスター".into(),
            rows,
            index,
        }
    }

    #[test]
    fn test_blocks_merge_repeated_id_rows() {
        let table = table(&[
            &["参考書ID", "参考書名", "章の名前"],
            &["gMB001", "青チャート", "数と式"],
            &["gMB001", "", "二次関数"],
            &["", "", "図形と計量"],
            &["gEN001", "システム英単語", ""],
        ]);
        let blocks = blocks(&table, 0);
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].len), (1, 3));
        assert_eq!(blocks[1].id, "gEN001");
    }

    #[test]
    fn test_blocks_later_duplicate_is_ignored() {
        let table = table(&[
            &["参考書ID", "参考書名", "章の名前"],
            &["gMB001", "青チャート", "数と式"],
            &["gEN001", "システム英単語", ""],
            &["gMB001", "青チャート（旧版）", "旧版の章"],
            &["", "", "旧版の章2"],
            &["gEN002", "速読英単語", ""],
        ]);
        let ids: Vec<(String, usize)> = blocks(&table, 0).into_iter().map(|b| (b.id, b.len)).collect();
        assert_eq!(
            ids,
            vec![("gMB001".to_string(), 1), ("gEN001".to_string(), 1), ("gEN002".to_string(), 1)]
        );
    }

    #[test]
    fn test_split_aliases() {
        assert_eq!(split_aliases("青チャ、 青チャート / aochart"), vec!["青チャ", "青チャート", "aochart"]);
        assert!(split_aliases("").is_empty());
    }

    #[test]
    fn test_parse_monthly_goal() {
        let goal = parse_monthly_goal("1.5時間");
        assert_eq!(goal["per_day_minutes"], json!(90));
        assert_eq!(goal["text"], json!("1.5時間"));

        let none = parse_monthly_goal("毎日");
        assert_eq!(none["per_day_minutes"], Value::Null);
    }

    #[test]
    fn test_number_json() {
        assert_eq!(number_json(Some(3.0)), json!(3));
        assert_eq!(number_json(Some(2.5)), json!(2.5));
        assert_eq!(number_json(None), Value::Null);
    }
}
