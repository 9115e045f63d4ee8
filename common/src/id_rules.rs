//! ID採番ルール
//!
//! 教科・書名からのプレフィックス判定と、既存IDからの連番計算。
//! どちらも失敗せず、判定できない場合は既定値に倒す。

use crate::normalize::normalize;
use crate::sheet::{cell_at, CellValue, Row};

/// 教科が判定できないときのプレフィックス
pub const DEFAULT_PREFIX: &str = "MB";

/// 教科グループ（教科名のキーと汎用コード）
struct SubjectGroup {
    keys: &'static [&'static str],
    code: &'static str,
    rules: &'static [KeywordRule],
}

/// 教科内の細分ルール（書名・教科名のキーワード）
struct KeywordRule {
    keywords: &'static [&'static str],
    code: &'static str,
}

const MATH_RULES: &[KeywordRule] = &[
    KeywordRule { keywords: &["数学iii", "数学3", "数iii", "数3"], code: "M3" },
    KeywordRule { keywords: &["数学c", "数c"], code: "MC" },
];

const ENGLISH_RULES: &[KeywordRule] = &[
    KeywordRule { keywords: &["ライティング", "writing", "英作文"], code: "EW" },
    KeywordRule {
        keywords: &["リーディング", "reading", "コミュニケーション", "長文", "読解"],
        code: "EC",
    },
    KeywordRule { keywords: &["文法", "grammar", "語法"], code: "EG" },
    KeywordRule { keywords: &["単語", "熟語", "vocabulary", "vocab"], code: "EV" },
];

const JAPANESE_RULES: &[KeywordRule] = &[
    KeywordRule { keywords: &["古文", "古典文法"], code: "JG" },
    KeywordRule { keywords: &["漢文"], code: "JK" },
    KeywordRule { keywords: &["現代文", "現文"], code: "JM" },
];

// 並び順が判定の優先順
const SUBJECT_GROUPS: &[SubjectGroup] = &[
    SubjectGroup { keys: &["古文"], code: "JG", rules: &[] },
    SubjectGroup { keys: &["漢文"], code: "JK", rules: &[] },
    SubjectGroup { keys: &["現代文"], code: "JM", rules: &[] },
    SubjectGroup { keys: &["国語"], code: "JA", rules: JAPANESE_RULES },
    SubjectGroup { keys: &["英語", "english"], code: "EN", rules: ENGLISH_RULES },
    SubjectGroup { keys: &["数学", "算数", "math"], code: "MB", rules: MATH_RULES },
    SubjectGroup { keys: &["物理"], code: "PP", rules: &[] },
    SubjectGroup { keys: &["化学"], code: "PC", rules: &[] },
    SubjectGroup { keys: &["生物"], code: "PB", rules: &[] },
    SubjectGroup { keys: &["地学"], code: "PE", rules: &[] },
    SubjectGroup { keys: &["日本史"], code: "HJ", rules: &[] },
    SubjectGroup { keys: &["世界史"], code: "HW", rules: &[] },
    SubjectGroup { keys: &["地理"], code: "HG", rules: &[] },
    SubjectGroup { keys: &["政治経済", "政経"], code: "HP", rules: &[] },
    SubjectGroup { keys: &["倫理"], code: "HE", rules: &[] },
];

/// 教科と書名からIDプレフィックスを決める
///
/// 教科名でグループを決め、グループ内のキーワード規則を教科名・書名に順に当てる。
/// 最初に一致した規則のコードを返す。規則に当たらなければ教科の汎用コード、
/// 教科自体が不明なら [`DEFAULT_PREFIX`]。
///
/// ```
/// use cram_sheets_common::id_rules::decide_prefix;
///
/// assert_eq!(decide_prefix("数学", "青チャート数学IA"), "MB");
/// assert_eq!(decide_prefix("英語", "ライティング問題集"), "EW");
/// assert_eq!(decide_prefix("美術", "デッサン入門"), "MB");
/// ```
pub fn decide_prefix(subject: &str, title: &str) -> &'static str {
    let subject_key = normalize(subject);
    if subject_key.is_empty() {
        return DEFAULT_PREFIX;
    }
    let combined = format!("{}{}", subject_key, normalize(title));

    let Some(group) = SUBJECT_GROUPS
        .iter()
        .find(|g| g.keys.iter().any(|k| subject_key.contains(&normalize(k))))
    else {
        return DEFAULT_PREFIX;
    };

    group
        .rules
        .iter()
        .find(|rule| rule.keywords.iter().any(|kw| combined.contains(&normalize(kw))))
        .map(|rule| rule.code)
        .unwrap_or(group.code)
}

/// 既存IDの最大連番 + 1 で次のIDを作る
///
/// 1行目はヘッダーとして読み飛ばす。`prefix` の直後が数字だけのIDを対象にし、
/// 3桁ゼロ詰め（999を超えたら桁を増やす）で返す。
/// 列位置が `None` や範囲外なら既存IDなしとして 1 から始める。
pub fn next_id_for_prefix(prefix: &str, rows: &[Row], id_col: Option<usize>) -> String {
    let max_seq = collect_ids(rows, id_col)
        .iter()
        .filter_map(|id| sequence_of(prefix, id))
        .max()
        .unwrap_or(0);
    format!("{}{:03}", prefix, max_seq + 1)
}

fn sequence_of(prefix: &str, id: &str) -> Option<u64> {
    let digits = id.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// ヘッダー行を除いたID列の非空テキスト
pub fn collect_ids(rows: &[Row], id_col: Option<usize>) -> Vec<String> {
    let Some(col) = id_col else {
        return Vec::new();
    };
    rows.iter()
        .skip(1)
        .filter_map(|row| match cell_at(row, col) {
            CellValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .collect()
}
