//! レスポンス封筒とエラーコード
//!
//! すべての操作結果は `{ok, op, data?, error?}` の形で返す。
//! 呼び出し側（LLMエージェント）は `error.code` で分岐する。

use crate::error::SheetError;
use crate::preview::ConfirmError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// 機械可読なエラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    BadDate,
    TooLong,
    AlreadyExists,
    RowNotFound,
    PreconditionAEmpty,
    PreconditionTimeEmpty,
    ConfirmExpired,
    ConfirmMismatch,
    BadWeek,
    Empty,
    BadHeader,
    BadRow,
    BadHours,
    Error,
    Uncaught,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::BadDate => "BAD_DATE",
            ErrorCode::TooLong => "TOO_LONG",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::RowNotFound => "ROW_NOT_FOUND",
            ErrorCode::PreconditionAEmpty => "PRECONDITION_A_EMPTY",
            ErrorCode::PreconditionTimeEmpty => "PRECONDITION_TIME_EMPTY",
            ErrorCode::ConfirmExpired => "CONFIRM_EXPIRED",
            ErrorCode::ConfirmMismatch => "CONFIRM_MISMATCH",
            ErrorCode::BadWeek => "BAD_WEEK",
            ErrorCode::Empty => "EMPTY",
            ErrorCode::BadHeader => "BAD_HEADER",
            ErrorCode::BadRow => "BAD_ROW",
            ErrorCode::BadHours => "BAD_HOURS",
            ErrorCode::Error => "ERROR",
            ErrorCode::Uncaught => "UNCAUGHT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// レスポンスの `error` 部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// ハンドラーが返すエラー（ルーターで封筒に包まれる）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Empty, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Error, message)
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl From<ConfirmError> for ApiError {
    fn from(err: ConfirmError) -> Self {
        match &err {
            ConfirmError::Expired => ApiError::new(ErrorCode::ConfirmExpired, err.to_string()),
            ConfirmError::Mismatch { expected, actual } => {
                ApiError::new(ErrorCode::ConfirmMismatch, err.to_string())
                    .with_details(json!({ "expected": expected, "actual": actual }))
            }
        }
    }
}

impl From<SheetError> for ApiError {
    fn from(err: SheetError) -> Self {
        ApiError::internal(err.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// 操作結果の封筒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(op: &str, data: Value) -> Self {
        Self {
            ok: true,
            op: op.to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(op: &str, error: &ApiError) -> Self {
        Self {
            ok: false,
            op: op.to_string(),
            data: None,
            error: Some(error.body()),
        }
    }

    /// シリアライズ可能なデータから作る
    pub fn from_serializable<T: Serialize>(op: &str, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::success(op, value),
            Err(e) => Self::failure(op, &ApiError::internal(e.to_string())),
        }
    }

    pub fn from_result(op: &str, result: ApiResult<Value>) -> Self {
        match result {
            Ok(data) => Self::success(op, data),
            Err(e) => Self::failure(op, &e),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// バッチ処理の1件分の結果
///
/// 1件の失敗は他の件に影響しない。全体は `ok: true` のまま返す。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ItemResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            row: None,
            week: None,
            cell: None,
            error: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(ApiError::new(code, message).body()),
            ..Self::success()
        }
    }

    pub fn with_cell(mut self, cell: impl Into<String>) -> Self {
        self.cell = Some(cell.into());
        self
    }

    pub fn at(mut self, row: Option<i64>, week: Option<i64>) -> Self {
        self.row = row;
        self.week = week;
        self
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl From<ApiError> for ItemResult {
    fn from(err: ApiError) -> Self {
        Self {
            ok: false,
            error: Some(err.body()),
            ..Self::success()
        }
    }
}
