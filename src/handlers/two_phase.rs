//! プレビュー → 確定の2段階操作
//!
//! 更新・削除はまず差分だけを返してトークンを払い出し、
//! 同じ対象IDとトークンで再度呼ばれたときに初めてシートを書き換える。

use super::Service;
use cram_sheets_common::{ApiError, ApiResult, CellValue};
use serde_json::{json, Value};
use tracing::info;

pub(crate) const BOOKS_UPDATE: &str = "books.update";
pub(crate) const BOOKS_DELETE: &str = "books.delete";
pub(crate) const STUDENTS_UPDATE: &str = "students.update";
pub(crate) const STUDENTS_DELETE: &str = "students.delete";

/// 1項目の書き換え
///
/// `field` は参考書ではレイアウトのキー（`title` など）、生徒ではヘッダー名。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub value: CellValue,
}

/// 確定待ちの変更
///
/// 行番号は持たない。確定時にIDで引き直す。
#[derive(Debug, Clone, PartialEq)]
pub enum PendingMutation {
    BookUpdate { changes: Vec<FieldChange> },
    BookDelete { rows: u32 },
    StudentUpdate { changes: Vec<FieldChange> },
    StudentDelete,
}

impl Service {
    /// 変更を保留し、プレビュー応答を組み立てる
    pub(crate) fn propose_change(
        &self,
        namespace: &str,
        id_key: &str,
        target_id: &str,
        preview: Value,
        payload: PendingMutation,
    ) -> Value {
        let proposal = self.previews.propose(namespace, target_id, payload);
        info!(namespace, target_id, "確定待ちの変更を登録");
        json!({
            id_key: target_id,
            "requires_confirmation": true,
            "preview": preview,
            "confirm_token": proposal.token,
            "expires_at": proposal.expires_at.to_rfc3339(),
            "expires_in_seconds": proposal.expires_in_seconds,
        })
    }

    /// トークンを消費して保留中の変更を取り出す
    pub(crate) fn take_change(&self, namespace: &str, target_id: &str, token: &str) -> ApiResult<PendingMutation> {
        let pending = self.previews.confirm(namespace, target_id, token)?;
        info!(namespace, target_id, "確定トークンを受理");
        Ok(pending)
    }
}

/// 想定外の保留内容（名前空間が分かれているので通常は起きない）
pub(crate) fn unexpected(namespace: &str) -> ApiError {
    ApiError::internal(format!("保留中の変更の種類が一致しません: {}", namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use cram_sheets_common::{ErrorCode, MemoryBackend};
    use std::sync::Arc;

    fn service() -> Service {
        Service::new(Arc::new(MemoryBackend::new()), Config::default())
    }

    #[test]
    fn test_propose_shape() {
        let svc = service();
        let value = svc.propose_change(
            BOOKS_DELETE,
            "book_id",
            "gMB001",
            json!({"delete_rows": 2}),
            PendingMutation::BookDelete { rows: 2 },
        );
        assert_eq!(value["book_id"], json!("gMB001"));
        assert_eq!(value["requires_confirmation"], json!(true));
        assert_eq!(value["expires_in_seconds"], json!(300));
        assert!(value["confirm_token"].as_str().unwrap().len() >= 32);
    }

    #[test]
    fn test_take_is_single_use() {
        let svc = service();
        let value = svc.propose_change(
            STUDENTS_DELETE,
            "student_id",
            "s001",
            json!({}),
            PendingMutation::StudentDelete,
        );
        let token = value["confirm_token"].as_str().unwrap().to_string();

        assert_eq!(
            svc.take_change(STUDENTS_DELETE, "s001", &token).unwrap(),
            PendingMutation::StudentDelete
        );
        let replay = svc.take_change(STUDENTS_DELETE, "s001", &token).err().unwrap();
        assert_eq!(replay.code, ErrorCode::ConfirmExpired);
    }

    #[test]
    fn test_take_wrong_namespace() {
        let svc = service();
        let value = svc.propose_change(
            BOOKS_UPDATE,
            "book_id",
            "gMB001",
            json!({}),
            PendingMutation::BookUpdate { changes: Vec::new() },
        );
        let token = value["confirm_token"].as_str().unwrap().to_string();
        let err = svc.take_change(STUDENTS_UPDATE, "gMB001", &token).err().unwrap();
        assert_eq!(err.code, ErrorCode::ConfirmExpired);
    }
}
