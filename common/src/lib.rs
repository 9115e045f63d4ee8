//! Cram Sheets Common Library
//!
//! 塾のスプレッドシート（参考書マスター・生徒一覧・プランナー）を扱う純粋なコア。
//! ファイルやネットワークには触れず、シートの読み書きは [`SheetAccessor`] 越しに行う。

pub mod columns;
pub mod envelope;
pub mod error;
pub mod id_rules;
pub mod normalize;
pub mod preview;
pub mod search;
pub mod sheet;

pub use columns::{HeaderIndex, PlannerLayout, SheetLayout, WeekColumns, ACTIVE_STATUSES, WEEK_COUNT};
pub use envelope::{ApiError, ApiResult, ErrorBody, ErrorCode, ItemResult, Response};
pub use error::{Error, Result, SheetError};
pub use id_rules::{collect_ids, decide_prefix, next_id_for_prefix};
pub use normalize::{as_whole_number, header_key, is_blank, normalize, parse_number, pick_column, to_number_or_null};
pub use preview::{Clock, ConfirmError, ManualClock, PreviewCache, Proposal, SystemClock};
pub use search::{tokenize, Candidate, MatchReason, MatchedField, SearchDoc, SearchIndex, SearchOutcome};
pub use sheet::{
    cell_at, cell_text, extract_spreadsheet_id, A1Range, CellRef, CellValue, Grid, MemoryBackend, Row,
    SheetAccessor,
};
