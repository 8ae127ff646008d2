//! Citation extraction from free text.
//!
//! Text is cleaned first (markup stripped, underscores and inline
//! whitespace collapsed); spans refer to the cleaned text. Short forms are
//! resolved to the nearest plausible antecedent and inherit its fields.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use super::types::{Citation, CitationKind};

const REPORTERS: &str = r"U\.\s?S\.|S\.\s?Ct\.|L\.\s?Ed\.\s?2d|F\.\s?Supp\.\s?(?:2d|3d)|F\.\s?Supp\.|F\.\s?App'x|F\.\s?(?:2d|3d|4th)|Cal\.\s?App\.\s?(?:2d|3d|4th|5th)|Cal\.\s?Rptr\.\s?(?:2d|3d)|Cal\.\s?Rptr\.|Cal\.\s?(?:2d|3d|4th|5th)|P\.\s?(?:2d|3d)|So\.\s?(?:2d|3d)|N\.\s?E\.\s?(?:2d|3d)|N\.\s?W\.\s?2d|S\.\s?W\.\s?(?:2d|3d)|A\.\s?(?:2d|3d)";

const NAME_TOKEN: &str = r"[A-Z][\w.'&\-]*";

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\n]+").unwrap());

static FULL_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<volume>\d{{1,4}})\s+(?P<reporter>{REPORTERS})\s+(?P<page>\d{{1,5}})(?:,\s*(?P<pin>\d+(?:[-–]\d+)?))?(?:\s*\((?P<court>[^()]*?)\s*(?P<year>\d{{4}})\))?"
    ))
    .unwrap()
});

static SHORT_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<volume>\d{{1,4}})\s+(?P<reporter>{REPORTERS})\s+at\s+(?P<pin>\d+(?:[-–]\d+)?)"
    ))
    .unwrap()
});

static ID_CITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Id|Ibid)\.(?:\s+at\s+(?P<pin>\d+(?:[-–]\d+)?))?").unwrap()
});

static SUPRA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<name>{NAME_TOKEN}),?\s+supra(?:,\s+(?:\d{{1,4}}\s+(?:{REPORTERS})\s+)?at\s+(?P<pin>\d+(?:[-–]\d+)?))?"
    ))
    .unwrap()
});

static STATUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<code>\d+\s+U\.\s?S\.\s?C\.|(?:Cal\.\s+)?(?:[A-Z][a-z]*\.?\s+){1,4}Code|Code\s+(?:[A-Z][a-z]*\.\s*){1,3}),?\s+§{1,2}\s*(?P<section>\d[\w.\-]*(?:\([\w]+\))*)",
    )
    .unwrap()
});

static PARTIES: LazyLock<Regex> = LazyLock::new(|| {
    let name = format!(r"{NAME_TOKEN}(?:\s+(?:{NAME_TOKEN}|of|the|and|for|de|&))*");
    let entity = r"(?:,\s+(?:Inc\.|LLC|L\.L\.C\.|Co\.|Corp\.|Ltd\.|N\.A\.|L\.P\.))?";
    Regex::new(&format!(
        r"(?P<plaintiff>{name})\s+v\.\s+(?P<defendant>{name}{entity}),\s*$"
    ))
    .unwrap()
});

const SIGNALS: &[&str] = &["See also", "See", "But see", "Cf.", "Accord", "In", "E.g.,"];

/// One citation found in a text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedCitation {
    pub index: usize,
    pub citation: Citation,
    /// Byte span in the cleaned text.
    pub span: (usize, usize),
    /// Raw text of the citation a short form resolved to.
    pub antecedent: Option<String>,
}

/// Markup removed, underscore runs and inline whitespace collapsed.
pub fn clean_text(text: &str) -> String {
    let text = MARKUP.replace_all(text, " ");
    let text = UNDERSCORES.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

struct Hit {
    start: usize,
    end: usize,
    citation: Citation,
    supra_name: Option<String>,
}

pub fn extract_citations(text: &str) -> Vec<ExtractedCitation> {
    let cleaned = clean_text(text);
    let mut hits: Vec<Hit> = Vec::new();

    for caps in FULL_CASE.captures_iter(&cleaned) {
        let Some(m) = caps.get(0) else { continue };
        let mut citation = Citation {
            kind: CitationKind::FullCase,
            volume: parse_num(&caps, "volume"),
            reporter: caps.name("reporter").map(|r| normalize_reporter(r.as_str())),
            page: parse_num(&caps, "page"),
            pinpoint: caps.name("pin").map(|p| p.as_str().to_string()),
            court: caps
                .name("court")
                .map(|c| c.as_str().trim().to_string())
                .filter(|c| !c.is_empty()),
            year: caps.name("year").and_then(|y| y.as_str().parse().ok()),
            ..Default::default()
        };
        let mut start = m.start();
        if let Some((name_start, plaintiff, defendant)) = parties_before(&cleaned, m.start()) {
            start = name_start;
            citation.plaintiff = Some(plaintiff);
            citation.defendant = Some(defendant);
        }
        citation.raw = cleaned[start..m.end()].to_string();
        hits.push(Hit {
            start,
            end: m.end(),
            citation,
            supra_name: None,
        });
    }

    for caps in SHORT_CASE.captures_iter(&cleaned) {
        let Some(m) = caps.get(0) else { continue };
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            citation: Citation {
                raw: m.as_str().to_string(),
                kind: CitationKind::ShortCase,
                volume: parse_num(&caps, "volume"),
                reporter: caps.name("reporter").map(|r| normalize_reporter(r.as_str())),
                pinpoint: caps.name("pin").map(|p| p.as_str().to_string()),
                ..Default::default()
            },
            supra_name: None,
        });
    }

    for caps in ID_CITE.captures_iter(&cleaned) {
        let Some(m) = caps.get(0) else { continue };
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            citation: Citation {
                raw: m.as_str().to_string(),
                kind: CitationKind::Id,
                pinpoint: caps.name("pin").map(|p| p.as_str().to_string()),
                ..Default::default()
            },
            supra_name: None,
        });
    }

    for caps in SUPRA.captures_iter(&cleaned) {
        let Some(m) = caps.get(0) else { continue };
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            citation: Citation {
                raw: m.as_str().to_string(),
                kind: CitationKind::Supra,
                pinpoint: caps.name("pin").map(|p| p.as_str().to_string()),
                ..Default::default()
            },
            supra_name: caps.name("name").map(|n| n.as_str().to_string()),
        });
    }

    for caps in STATUTE.captures_iter(&cleaned) {
        let Some(m) = caps.get(0) else { continue };
        let code = caps.name("code").map(|c| c.as_str().trim()).unwrap_or_default();
        let section = caps.name("section").map(|s| s.as_str()).unwrap_or_default();
        hits.push(Hit {
            start: m.start(),
            end: m.end(),
            citation: Citation {
                raw: m.as_str().to_string(),
                kind: CitationKind::Statute,
                section: Some(format!("{} § {}", code.trim_end_matches(','), section)),
                ..Default::default()
            },
            supra_name: None,
        });
    }

    // Earlier start wins; at equal start the longer match wins.
    hits.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    let mut kept: Vec<Hit> = Vec::with_capacity(hits.len());
    for hit in hits {
        if kept.last().is_some_and(|prev| hit.start < prev.end) {
            continue;
        }
        kept.push(hit);
    }

    resolve(kept)
}

fn resolve(hits: Vec<Hit>) -> Vec<ExtractedCitation> {
    let mut out: Vec<ExtractedCitation> = Vec::with_capacity(hits.len());
    // Index into `out` of the most recent case citation (full or resolved short).
    let mut last_case: Option<usize> = None;

    for hit in hits {
        let mut citation = hit.citation;
        let antecedent_idx = match citation.kind {
            CitationKind::FullCase => None,
            CitationKind::Statute => None,
            CitationKind::Id => last_case,
            CitationKind::ShortCase => out.iter().rposition(|e| {
                e.citation.kind == CitationKind::FullCase
                    && e.citation.volume == citation.volume
                    && e.citation.reporter == citation.reporter
            }),
            CitationKind::Supra => hit.supra_name.as_deref().and_then(|name| {
                out.iter().rposition(|e| {
                    e.citation.kind == CitationKind::FullCase
                        && [&e.citation.plaintiff, &e.citation.defendant]
                            .iter()
                            .any(|p| p.as_deref().is_some_and(|p| p.contains(name)))
                })
            }),
        };

        let antecedent = antecedent_idx.map(|i| {
            let base = &out[i].citation;
            inherit(&mut citation, base);
            base.raw.clone()
        });

        let is_case = matches!(citation.kind, CitationKind::FullCase)
            || (citation.kind != CitationKind::Statute && antecedent.is_some());
        out.push(ExtractedCitation {
            index: out.len(),
            citation,
            span: (hit.start, hit.end),
            antecedent,
        });
        if is_case {
            last_case = Some(out.len() - 1);
        }
    }
    out
}

fn inherit(short: &mut Citation, base: &Citation) {
    short.volume = short.volume.or(base.volume);
    short.reporter = short.reporter.clone().or_else(|| base.reporter.clone());
    short.page = base.page;
    short.court = base.court.clone();
    short.year = base.year;
    short.plaintiff = base.plaintiff.clone();
    short.defendant = base.defendant.clone();
    short.section = base.section.clone();
    if short.pinpoint.is_none() {
        short.pinpoint = base.pinpoint.clone();
    }
}

fn parties_before(text: &str, cite_start: usize) -> Option<(usize, String, String)> {
    let window_start = text[..cite_start]
        .rfind([';', '(', ')'])
        .map(|i| i + 1)
        .unwrap_or(0)
        .max(cite_start.saturating_sub(200));
    let window_start = (window_start..cite_start)
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(cite_start);
    let window = &text[window_start..cite_start];
    let caps = PARTIES.captures(window)?;
    let whole = caps.get(0)?;
    let mut plaintiff = caps.name("plaintiff")?.as_str().to_string();
    let mut offset = whole.start();
    for signal in SIGNALS {
        if let Some(rest) = plaintiff.strip_prefix(signal) {
            if rest.starts_with(' ') {
                let trimmed = rest.trim_start();
                offset += plaintiff.len() - trimmed.len();
                plaintiff = trimmed.to_string();
                break;
            }
        }
    }
    let defendant = caps.name("defendant")?.as_str().trim().to_string();
    Some((window_start + offset, plaintiff, defendant))
}

fn parse_num(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

/// Canonical reporter spelling: single-letter series stay compact
/// (`F.3d`, `Cal.4th`), multi-word ones are spaced (`S. Ct.`, `Cal. App. 4th`).
fn normalize_reporter(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    match compact.as_str() {
        "U.S." => "U.S.".into(),
        "S.Ct." => "S. Ct.".into(),
        "L.Ed.2d" => "L. Ed. 2d".into(),
        "F.App'x" => "F. App'x".into(),
        s if s.starts_with("F.Supp.") => format!("F. Supp.{}", spaced_suffix(&s[7..])),
        s if s.starts_with("Cal.App.") => format!("Cal. App.{}", spaced_suffix(&s[8..])),
        s if s.starts_with("Cal.Rptr.") => format!("Cal. Rptr.{}", spaced_suffix(&s[9..])),
        s if s.starts_with("Cal.") => format!("Cal.{}", &s[4..]),
        other => other.to_string(),
    }
}

fn spaced_suffix(suffix: &str) -> String {
    if suffix.is_empty() {
        String::new()
    } else {
        format!(" {}", suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_full_case_with_parties_pin_and_year() {
        let cites = extract_citations(
            "Summary judgment is proper. Celotex Corp. v. Catrett, 477 U.S. 317, 322 (1986).",
        );
        assert_eq!(cites.len(), 1);
        let c = &cites[0].citation;
        assert_eq!(c.kind, CitationKind::FullCase);
        assert_eq!((c.volume, c.page), (Some(477), Some(317)));
        assert_eq!(c.reporter.as_deref(), Some("U.S."));
        assert_eq!(c.pinpoint.as_deref(), Some("322"));
        assert_eq!(c.year, Some(1986));
        assert_eq!(c.case_name().as_deref(), Some("Celotex Corp. v. Catrett"));
        assert!(c.raw.starts_with("Celotex"));
    }

    #[test]
    fn strips_signal_words_from_plaintiff() {
        let cites = extract_citations("See Anderson v. Liberty Lobby, Inc., 477 U.S. 242 (1986).");
        assert_eq!(cites[0].citation.plaintiff.as_deref(), Some("Anderson"));
        assert_eq!(cites[0].citation.defendant.as_deref(), Some("Liberty Lobby, Inc."));
    }

    #[test]
    fn parses_court_parenthetical() {
        let cites = extract_citations("Doe v. Roe, 250 F.3d 1000, 1004 (9th Cir. 2001)");
        let c = &cites[0].citation;
        assert_eq!(c.court.as_deref(), Some("9th Cir."));
        assert_eq!(c.year, Some(2001));
        assert_eq!(c.reporter.as_deref(), Some("F.3d"));
    }

    #[test]
    fn resolves_id_and_short_forms_to_antecedent() {
        let text = "Aguilar v. Atlantic Richfield Co., 25 Cal.4th 826, 850 (2001). \
                    Id. at 851. The burden shifts. 25 Cal.4th at 853.";
        let cites = extract_citations(text);
        assert_eq!(cites.len(), 3);
        assert_eq!(cites[1].citation.kind, CitationKind::Id);
        assert_eq!(cites[1].citation.page, Some(826));
        assert_eq!(cites[1].citation.pinpoint.as_deref(), Some("851"));
        assert_eq!(cites[1].antecedent.as_deref(), Some(cites[0].citation.raw.as_str()));
        assert_eq!(cites[2].citation.kind, CitationKind::ShortCase);
        assert_eq!(cites[2].citation.plaintiff.as_deref(), Some("Aguilar"));
    }

    #[test]
    fn resolves_supra_by_party_name() {
        let text = "Celotex Corp. v. Catrett, 477 U.S. 317 (1986); Anderson v. Liberty Lobby, 477 U.S. 242 (1986). \
                    As Celotex, supra, at 323 explains.";
        let cites = extract_citations(text);
        let supra = cites
            .iter()
            .find(|c| c.citation.kind == CitationKind::Supra)
            .unwrap();
        assert_eq!(supra.citation.page, Some(317));
        assert_eq!(supra.citation.pinpoint.as_deref(), Some("323"));
    }

    #[test]
    fn extracts_statutes() {
        let cites = extract_citations("Under 42 U.S.C. § 1983 and Code Civ. Proc., § 437c(c), relief lies.");
        let statutes: Vec<_> = cites
            .iter()
            .filter(|c| c.citation.kind == CitationKind::Statute)
            .collect();
        assert_eq!(statutes.len(), 2);
        assert_eq!(statutes[0].citation.section.as_deref(), Some("42 U.S.C. § 1983"));
        assert!(statutes[1].citation.section.as_deref().unwrap().ends_with("437c(c)"));
    }

    #[test]
    fn clean_text_strips_markup_and_collapses_whitespace() {
        assert_eq!(clean_text("<p>Id.</p>\n\n  at __ 5"), "Id. at 5");
    }

    #[test]
    fn empty_text_has_no_citations() {
        assert!(extract_citations("   ").is_empty());
    }
}
