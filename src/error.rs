use cram_sheets_common::SheetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CramError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("データフォルダが見つかりません: {0}")]
    DataDirNotFound(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("Excel読み込みエラー: {0}")]
    Workbook(String),

    #[error("Excel書き込みエラー: {0}")]
    WorkbookWrite(String),

    #[error("入力エラー: {0}")]
    Prompt(String),

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error(transparent)]
    Common(#[from] cram_sheets_common::Error),
}

impl From<calamine::XlsxError> for CramError {
    fn from(err: calamine::XlsxError) -> Self {
        CramError::Workbook(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for CramError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        CramError::WorkbookWrite(err.to_string())
    }
}

/// バックエンド境界ではシート層のエラーに落とす
impl From<CramError> for SheetError {
    fn from(err: CramError) -> Self {
        match err {
            CramError::Sheet(e) => e,
            other => SheetError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CramError>;
