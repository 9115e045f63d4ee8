//! 検索・ランキング
//!
//! レコード（ID・タイトル・教科・別名）に対する曖昧検索。
//! スコアは理由ごとの帯に収まり、帯どうしは重ならない。
//!
//! | 理由 | スコア |
//! |---|---|
//! | `exact` | 1.0 |
//! | `partial` | 0.80 〜 0.95 |
//! | `alias` | 0.60 〜 0.75 |
//! | `token` | 0 より大きく 0.55 以下 |

use crate::normalize::normalize;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// 検索から除外する頻出語
pub const STOPWORDS: &[&str] = &[
    "問題集", "入試", "演習", "講座", "ノート", "完全", "総合", "実戦", "実践",
];

const SUBJECT_BONUS: f64 = 0.02;

/// 一致理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    Exact,
    Partial,
    Alias,
    Token,
}

/// 一致したフィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedField {
    Id,
    Title,
    Alias,
    Tokens,
}

/// 検索対象の1レコード
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchDoc {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub aliases: Vec<String>,
}

/// 検索候補
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub matched_field: MatchedField,
    pub score: f64,
    pub reason: MatchReason,
    #[serde(skip)]
    pub row_order: usize,
}

impl Candidate {
    fn exact_rank(&self) -> u8 {
        match (self.reason, self.matched_field) {
            (MatchReason::Exact, MatchedField::Id) => 0,
            (MatchReason::Exact, _) => 1,
            _ => 2,
        }
    }
}

/// 検索結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub candidates: Vec<Candidate>,
    pub top: Option<Candidate>,
    pub confidence: f64,
}

impl SearchOutcome {
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            top: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Kanji,
    Hiragana,
    Katakana,
    Word,
    Separator,
}

impl Script {
    fn of(c: char) -> Self {
        match c {
            '\u{3041}'..='\u{309F}' => Script::Hiragana,
            '\u{30FB}' => Script::Separator,
            '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' => Script::Katakana,
            '\u{3005}' | '\u{3006}' | '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}' => {
                Script::Kanji
            }
            c if c.is_alphanumeric() => Script::Word,
            _ => Script::Separator,
        }
    }

    fn is_cjk(self) -> bool {
        matches!(self, Script::Kanji | Script::Hiragana | Script::Katakana)
    }
}

fn replace_numerals(text: &str) -> String {
    const ROMAN: [&str; 12] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12"];
    text.chars()
        .map(|c| match c {
            '\u{2160}'..='\u{216B}' => ROMAN[c as usize - 0x2160].to_string(),
            '\u{2170}'..='\u{217B}' => ROMAN[c as usize - 0x2170].to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// 検索用の分かち書き
///
/// NFKC・ローマ数字の数字化・小文字化の後、文字種（漢字・ひらがな・カタカナ・英数字）の
/// 連続ごとに区切る。2文字以上の連続をトークンとし、3文字以上の日本語の連続は
/// 文字bigramも加える。停止語は除く。
pub fn tokenize(text: &str) -> Vec<String> {
    let prepared: String = replace_numerals(text).nfkc().collect::<String>().to_lowercase();

    let mut runs: Vec<(Script, String)> = Vec::new();
    for c in prepared.chars() {
        let script = Script::of(c);
        match runs.last_mut() {
            Some((last, run)) if *last == script => run.push(c),
            _ => runs.push((script, c.to_string())),
        }
    }

    let mut tokens = Vec::new();
    for (script, run) in runs {
        if script == Script::Separator {
            continue;
        }
        let chars: Vec<char> = run.chars().collect();
        if chars.len() < 2 || is_stopword(&run) {
            continue;
        }
        if script.is_cjk() && chars.len() > 2 {
            for pair in chars.windows(2) {
                let bigram: String = pair.iter().collect();
                if !is_stopword(&bigram) {
                    tokens.push(bigram);
                }
            }
        }
        tokens.push(run);
    }
    tokens
}

/// BM25系のIDF
pub fn idf(doc_freq: usize, total_docs: usize) -> f64 {
    let n = total_docs as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    doc: SearchDoc,
    id_key: String,
    title_key: String,
    subject_key: String,
    alias_keys: Vec<String>,
    tokens: HashSet<String>,
}

/// 文書頻度表つきの検索索引
///
/// コーパスを読むたびに一度作り、同じ索引で何度でも検索できる。
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
}

impl SearchIndex {
    pub fn build(docs: Vec<SearchDoc>) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let docs: Vec<IndexedDoc> = docs
            .into_iter()
            .map(|doc| {
                let mut tokens: HashSet<String> = tokenize(&doc.title).into_iter().collect();
                for alias in &doc.aliases {
                    tokens.extend(tokenize(alias));
                }
                for t in &tokens {
                    *doc_freq.entry(t.clone()).or_default() += 1;
                }
                IndexedDoc {
                    id_key: normalize(&doc.id),
                    title_key: normalize(&doc.title),
                    subject_key: normalize(&doc.subject),
                    alias_keys: doc
                        .aliases
                        .iter()
                        .map(|a| normalize(a))
                        .filter(|a| !a.is_empty())
                        .collect(),
                    tokens,
                    doc,
                }
            })
            .collect();
        Self { docs, doc_freq }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf_of(&self, term: &str) -> f64 {
        idf(self.doc_freq.get(term).copied().unwrap_or(0), self.docs.len())
    }

    /// クエリで検索し、上位 `limit` 件を返す
    pub fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        let query_key = normalize(query);
        if query_key.is_empty() || self.docs.is_empty() {
            return SearchOutcome::empty();
        }

        let mut query_tokens: Vec<String> = tokenize(query);
        query_tokens.sort();
        query_tokens.dedup();
        let total_idf: f64 = query_tokens.iter().map(|t| self.idf_of(t)).sum();

        let mut candidates: Vec<Candidate> = self
            .docs
            .iter()
            .enumerate()
            .filter_map(|(row_order, doc)| {
                let (score, reason, field) =
                    self.score_doc(doc, &query_key, &query_tokens, total_idf)?;
                Some(Candidate {
                    id: doc.doc.id.clone(),
                    title: doc.doc.title.clone(),
                    subject: doc.doc.subject.clone(),
                    matched_field: field,
                    score: round4(score),
                    reason,
                    row_order,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.exact_rank().cmp(&b.exact_rank()))
                .then_with(|| a.row_order.cmp(&b.row_order))
        });
        candidates.truncate(limit.max(1));

        let top = candidates.first().cloned();
        let confidence = top.as_ref().map(|c| c.score.clamp(0.0, 1.0)).unwrap_or(0.0);
        SearchOutcome {
            candidates,
            top,
            confidence,
        }
    }

    fn score_doc(
        &self,
        doc: &IndexedDoc,
        query_key: &str,
        query_tokens: &[String],
        total_idf: f64,
    ) -> Option<(f64, MatchReason, MatchedField)> {
        if query_key == doc.id_key {
            return Some((1.0, MatchReason::Exact, MatchedField::Id));
        }
        if query_key == doc.title_key {
            return Some((1.0, MatchReason::Exact, MatchedField::Title));
        }

        let bonus = if !doc.subject_key.is_empty() && query_key.contains(doc.subject_key.as_str()) {
            SUBJECT_BONUS
        } else {
            0.0
        };
        let query_len = query_key.chars().count();

        if query_len >= 2 {
            let partial = [(&doc.id_key, MatchedField::Id), (&doc.title_key, MatchedField::Title)]
                .into_iter()
                .filter(|(field, _)| field.contains(query_key))
                .map(|(field, kind)| (coverage(query_len, field), kind))
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            if let Some((cov, field)) = partial {
                return Some((0.80 + 0.13 * cov + bonus, MatchReason::Partial, field));
            }

            if doc.alias_keys.iter().any(|a| a == query_key) {
                return Some((0.73 + bonus, MatchReason::Alias, MatchedField::Alias));
            }
            let alias_cov = doc
                .alias_keys
                .iter()
                .filter(|a| a.chars().count() >= 2)
                .filter(|a| a.contains(query_key) || query_key.contains(a.as_str()))
                .map(|a| {
                    let alias_len = a.chars().count();
                    query_len.min(alias_len) as f64 / query_len.max(alias_len) as f64
                })
                .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))));
            if let Some(cov) = alias_cov {
                return Some((0.60 + 0.11 * cov.min(0.99) + bonus, MatchReason::Alias, MatchedField::Alias));
            }
        }

        if total_idf <= 0.0 {
            return None;
        }
        let hit_idf: f64 = query_tokens
            .iter()
            .filter(|t| doc.tokens.contains(t.as_str()))
            .map(|t| self.idf_of(t))
            .sum();
        if hit_idf <= 0.0 {
            return None;
        }
        let cov = (hit_idf / total_idf).min(1.0);
        Some(((0.53 * cov).max(0.0001) + bonus, MatchReason::Token, MatchedField::Tokens))
    }
}

// 完全一致でない部分一致なので必ず 1 未満
fn coverage(query_len: usize, field: &str) -> f64 {
    let field_len = field.chars().count().max(1);
    (query_len as f64 / field_len as f64).min(0.99)
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
