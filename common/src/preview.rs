//! プレビュー/確定の二段階トランザクション
//!
//! 更新・削除はまずプレビューで差分を返し、払い出したトークンで確定したときだけ
//! 反映する。保留中の変更はプロセス内の [`PreviewCache`] が持つ。
//!
//! トークンは一度きり。確定では必ずエントリを取り出すので、
//! 成功・期限切れ・対象違いのどの場合でも同じトークンは二度と使えない。

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// 既定の有効期限（秒）
pub const DEFAULT_TTL_SECONDS: i64 = 300;

/// 現在時刻の取得元
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 実時間
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手動で進める時計（テスト用）
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock();
        *now += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// プレビュー結果として返すトークン情報
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

/// 確定の失敗
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("確認トークンが無効または期限切れです")]
    Expired,

    #[error("確認トークンの対象が一致しません（発行時: {expected}, 指定: {actual}）")]
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Clone)]
struct PendingChange<P> {
    target_id: String,
    payload: P,
    expires_at: DateTime<Utc>,
}

/// 保留中の変更を名前空間とトークンで保持するキャッシュ
///
/// 名前空間は `"books.update"` のような操作ごとの文字列。
/// 参考書・生徒の両方がこの1つの実装を共有する。
pub struct PreviewCache<P> {
    entries: Mutex<HashMap<(String, String), PendingChange<P>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<P> PreviewCache<P> {
    pub fn new(ttl_seconds: i64) -> Self {
        Self::with_clock(ttl_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_seconds.max(1)),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 変更を保留してトークンを払い出す
    pub fn propose(&self, namespace: &str, target_id: &str, payload: P) -> Proposal {
        let now = self.clock.now();
        let token = Uuid::new_v4().to_string();
        let expires_at = now + self.ttl;

        let mut entries = self.entries.lock();
        entries.retain(|_, pending| pending.expires_at >= now);
        entries.insert(
            (namespace.to_string(), token.clone()),
            PendingChange {
                target_id: target_id.to_string(),
                payload,
                expires_at,
            },
        );
        debug!(namespace, target_id, pending = entries.len(), "プレビューを保留");

        Proposal {
            token,
            expires_at,
            expires_in_seconds: self.ttl.num_seconds(),
        }
    }

    /// トークンを消費して保留中の変更を取り出す
    pub fn confirm(&self, namespace: &str, target_id: &str, token: &str) -> Result<P, ConfirmError> {
        let now = self.clock.now();
        let taken = self
            .entries
            .lock()
            .remove(&(namespace.to_string(), token.trim().to_string()));

        let Some(pending) = taken else {
            debug!(namespace, target_id, "未知または使用済みのトークン");
            return Err(ConfirmError::Expired);
        };
        if now > pending.expires_at {
            info!(namespace, target_id, "期限切れのトークン");
            return Err(ConfirmError::Expired);
        }
        if pending.target_id != target_id {
            info!(namespace, expected = %pending.target_id, actual = target_id, "トークンの対象が不一致");
            return Err(ConfirmError::Mismatch {
                expected: pending.target_id,
                actual: target_id.to_string(),
            });
        }
        Ok(pending.payload)
    }

    /// 期限切れのエントリを捨てる
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, pending| pending.expires_at >= now);
        before - entries.len()
    }

    /// 名前空間のエントリをすべて捨てる
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(ns, _), _| ns != namespace);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> Default for PreviewCache<P> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}
