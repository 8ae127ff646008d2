//! Step 4: does quoted text appear in the source?
//!
//! Similarity is `1 - d / len(quote)` where `d` is the edit distance of
//! the quote against its best-matching substring of the source. Only the
//! first `MAX_SOURCE_CHARS` normalized characters of the source are
//! searched; the cost is quadratic and callers run it off the async
//! executor.

use super::types::{Flag, FlagKind};

pub const EXACT: f64 = 0.95;
pub const MINOR: f64 = 0.90;
pub const REVIEW: f64 = 0.80;

pub const MAX_SOURCE_CHARS: usize = 250_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteMatch {
    Exact,
    MinorDiscrepancy,
    AttorneyReview,
    Fabrication,
}

impl QuoteMatch {
    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= EXACT {
            Self::Exact
        } else if similarity >= MINOR {
            Self::MinorDiscrepancy
        } else if similarity >= REVIEW {
            Self::AttorneyReview
        } else {
            Self::Fabrication
        }
    }

    pub fn flag_kind(&self) -> Option<FlagKind> {
        match self {
            Self::Exact => None,
            Self::MinorDiscrepancy => Some(FlagKind::QuoteMinorDiscrepancy),
            Self::AttorneyReview => Some(FlagKind::QuoteAttorneyReview),
            Self::Fabrication => Some(FlagKind::QuoteFabrication),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteCheck {
    pub similarity: f64,
    pub result: QuoteMatch,
}

impl QuoteCheck {
    pub fn flag(&self) -> Option<Flag> {
        self.result.flag_kind().map(|kind| {
            Flag::new(kind, format!("quote similarity {:.2}", self.similarity))
        })
    }
}

/// Lowercase, unify typographic quotes and dashes, drop ellipses and
/// collapse whitespace.
fn normalize(text: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(text.len());
    let mut last_space = true;
    for c in text.replace("...", " ").replace('…', " ").chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            c if c.is_whitespace() => ' ',
            c => c,
        };
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.extend(c.to_lowercase());
            last_space = false;
        }
    }
    if out.last() == Some(&' ') {
        out.pop();
    }
    out
}

/// Edit distance from `pattern` to its closest substring of `text`.
fn substring_distance(pattern: &[char], text: &[char]) -> usize {
    if pattern.is_empty() {
        return 0;
    }
    // Row i holds distances for pattern[..i] ending at each text offset;
    // row 0 is all zero so the match may start anywhere.
    let mut prev = vec![0usize; text.len() + 1];
    let mut curr = vec![0usize; text.len() + 1];
    for (i, &p) in pattern.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &t) in text.iter().enumerate() {
            let substitute = prev[j] + usize::from(p != t);
            curr[j + 1] = substitute.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev.into_iter().min().unwrap_or(pattern.len())
}

pub fn similarity(quote: &str, source: &str) -> f64 {
    let quote = normalize(quote);
    if quote.is_empty() {
        return 1.0;
    }
    let mut source = normalize(source);
    source.truncate(MAX_SOURCE_CHARS);
    let distance = substring_distance(&quote, &source);
    (1.0 - distance as f64 / quote.len() as f64).clamp(0.0, 1.0)
}

pub fn check_quote(quote: &str, source: &str) -> QuoteCheck {
    let similarity = similarity(quote, source);
    QuoteCheck {
        similarity,
        result: QuoteMatch::from_similarity(similarity),
    }
}
