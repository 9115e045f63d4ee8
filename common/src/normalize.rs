//! 文字列正規化モジュール
//!
//! シートのヘッダーやセル値は手入力のため、全角/半角・大文字小文字・
//! 空白の揺れがある。比較は必ずここの関数を通して行う。

use unicode_normalization::UnicodeNormalization;

/// 比較用に文字列を正規化する
///
/// 前後の空白除去 → NFKC → 小文字化 → 全空白（全角スペース含む）除去。
/// 何度適用しても結果は変わらない。
///
/// # Examples
/// ```
/// use cram_sheets_common::normalize;
///
/// assert_eq!(normalize("ＡＢＣ"), "abc");
/// assert_eq!(normalize("参考書 ID"), "参考書id");
/// ```
pub fn normalize(text: &str) -> String {
    // 小文字化でNFKC非安定な文字列が生じることがあるので不動点まで繰り返す
    let mut current = fold_once(text.trim());
    for _ in 0..4 {
        let next = fold_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn fold_once(text: &str) -> String {
    let composed: String = text.nfkc().collect();
    composed
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// ヘッダー比較用のキー
///
/// `normalize` と同じ規則。呼び出し側でヘッダー比較であることを明示するために分けている。
pub fn header_key(text: &str) -> String {
    normalize(text)
}

/// 候補名のいずれかに一致する最初の列位置を返す
///
/// ヘッダー順に走査し、候補は並び順に試す。比較は `header_key` による完全一致。
pub fn pick_column<H, C>(headers: &[H], candidates: &[C]) -> Option<usize>
where
    H: AsRef<str>,
    C: AsRef<str>,
{
    if headers.is_empty() || candidates.is_empty() {
        return None;
    }

    let keys: Vec<String> = headers.iter().map(|h| header_key(h.as_ref())).collect();
    keys.iter().position(|key| {
        candidates
            .iter()
            .any(|candidate| header_key(candidate.as_ref()) == *key)
    })
}

/// 空白のみの文字列か
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// 数値文字列を数値に変換する
///
/// 空・空白のみ・数値でない・NaN・無限大は `None`。
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // "inf" や "NaN" は f64::from_str が受け付けるので有限値のみ通す
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// JSON値を数値に変換する
pub fn to_number_or_null(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// 整数に丸められる数値なら整数として返す
pub fn as_whole_number(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
