//! エラー型定義

use thiserror::Error;

/// 共通エラー型
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Sheet(#[from] SheetError),
}

/// シートアクセス層のエラー
///
/// シートや行が存在しないことはエラーではなく `Option` で表す。
/// ここに来るのはバックエンド自体の失敗のみ。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SheetError {
    #[error("範囲指定が不正: {0}")]
    InvalidRange(String),

    #[error("スプレッドシートが見つかりません: {0}")]
    SpreadsheetMissing(String),

    #[error("シートが見つかりません: {spreadsheet_id}/{sheet}")]
    SheetMissing { spreadsheet_id: String, sheet: String },

    #[error("書き込みできません: {0}")]
    ReadOnly(String),

    #[error("バックエンドエラー: {0}")]
    Backend(String),
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::Io(io_error);
        let display = format!("{}", error);
        assert!(display.contains("IO error"));
        assert!(display.contains("file not found"));
    }

    #[test]
    fn test_error_display_config() {
        let error = Error::Config("設定ファイルが見つかりません".to_string());
        assert_eq!(format!("{}", error), "Config error: 設定ファイルが見つかりません");
    }

    #[test]
    fn test_error_from_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
    }

    #[test]
    fn test_sheet_error_is_transparent() {
        let error: Error = SheetError::InvalidRange("A0".to_string()).into();
        assert_eq!(format!("{}", error), "範囲指定が不正: A0");
    }

    #[test]
    fn test_sheet_missing_display() {
        let error = SheetError::SheetMissing {
            spreadsheet_id: "abc".to_string(),
            sheet: "週間管理".to_string(),
        };
        assert!(format!("{}", error).contains("abc/週間管理"));
    }
}
