//! Result normalisation: raw model text → [`AnalysisResult`].
//!
//! Models follow the four-section format loosely. Headers show up numbered,
//! bolded, as Markdown headings, with or without the sentence-count hint, and
//! with "and" in place of "&". Matching therefore compares a canonical form
//! of each line (lower-case, alphanumerics only, "and" dropped, leading
//! numbering and trailing "N-M sentences" removed) against the canonical
//! section titles.
//!
//! ## Partial output
//!
//! A missing section becomes an empty sequence as long as at least one
//! header was found. No header at all means the response format drifted and
//! is reported as [`ConcallError::MalformedResponse`].

use crate::error::ConcallError;
use crate::output::{AnalysisResult, Section};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Short forms that end in a period without ending the sentence.
const ABBREVIATIONS: &[&str] = &[
    "rs.", "cr.", "mn.", "bn.", "vs.", "approx.", "e.g.", "i.e.", "no.", "nos.", "ltd.", "inc.",
    "co.", "mr.", "ms.", "dr.", "etc.",
];

/// Parse `raw_text` into the four-section summary.
pub fn normalize(raw_text: &str, source_label: &str) -> Result<AnalysisResult, ConcallError> {
    normalize_at(raw_text, source_label, Utc::now())
}

/// As [`normalize`], with an explicit generation timestamp.
pub fn normalize_at(
    raw_text: &str,
    source_label: &str,
    generated_at: DateTime<Utc>,
) -> Result<AnalysisResult, ConcallError> {
    let text = clean_response(raw_text);
    let bodies = split_sections(&text);

    if bodies.iter().all(Option::is_none) {
        let preview: String = text.chars().take(120).collect();
        warn!("No section headers found in analysis response");
        return Err(ConcallError::MalformedResponse {
            detail: format!("none of the four section headers found (response starts: {preview:?})"),
        });
    }

    let sections = bodies.map(|body| body.map(|lines| sentences_from_lines(&lines)).unwrap_or_default());
    for (section, sentences) in Section::ALL.iter().zip(sections.iter()) {
        if sentences.is_empty() {
            debug!("Section '{}' is empty", section.title());
        }
    }

    let [guidance, achievements, risks, strategic_focus] = sections;
    Ok(AnalysisResult {
        guidance,
        achievements,
        risks,
        strategic_focus,
        source_label: source_label.to_string(),
        generated_at,
    })
}

// ── Clean-up ─────────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn clean_response(input: &str) -> String {
    let text = input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    let trimmed = text.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Header detection ─────────────────────────────────────────────────────────

static RE_LEADING_NUMBERING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:\d+|section|part|[ivx]+) )+").unwrap());
static RE_SENTENCE_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?: \d+)*(?: to)?(?: \d+)* sentences?$").unwrap());

/// Lower-case alphanumeric words, "and" dropped, numbering and count hint removed.
fn canonical(text: &str) -> String {
    let words: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| *w != "and")
        .collect::<Vec<_>>()
        .join(" ");
    let words = RE_SENTENCE_HINT.replace(&words, "");
    RE_LEADING_NUMBERING.replace(words.trim(), "").trim().to_string()
}

fn aliases(section: Section) -> &'static [&'static str] {
    match section {
        Section::Guidance => &["future guidance outlook", "future guidance", "guidance outlook"],
        Section::Achievements => &["key achievements highlights", "key achievements", "achievements highlights"],
        Section::Risks => &["risks challenges", "key risks challenges", "risks"],
        Section::StrategicFocus => &["strategic focus areas", "strategic focus", "key strategic focus areas"],
    }
}

static RE_SYMBOL_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*•▪◦]\s+").unwrap());

fn section_for_key(key: &str) -> Option<Section> {
    if key.is_empty() {
        return None;
    }
    Section::ALL.into_iter().find(|s| aliases(*s).contains(&key))
}

fn match_title(text: &str) -> Option<Section> {
    section_for_key(&canonical(text))
}

/// Recognise a header line, returning the section and any body text that
/// follows a `Header: body` colon.
///
/// The colon form needs a multi-word title and no bullet marker, so a body
/// sentence such as `Risks: currency volatility persists.` or
/// `- Strategic focus: exports.` stays in the section it appears in.
fn match_header(line: &str) -> Option<(Section, &str)> {
    if let Some(section) = match_title(line) {
        return Some((section, ""));
    }
    let (head, rest) = line.split_once(':')?;
    if RE_SYMBOL_BULLET.is_match(head) {
        return None;
    }
    let key = canonical(head);
    if !key.contains(' ') {
        return None;
    }
    let section = section_for_key(&key)?;
    Some((section, rest.trim_start_matches(['*', '_', ' '])))
}

/// Body lines per section, `None` where the header never appeared.
fn split_sections(text: &str) -> [Option<Vec<String>>; 4] {
    let mut bodies: [Option<Vec<String>>; 4] = Default::default();
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some((section, rest)) = match_header(line) {
            let idx = section_index(section);
            let body = bodies[idx].get_or_insert_with(Vec::new);
            if !rest.trim().is_empty() {
                body.push(rest.to_string());
            }
            current = Some(idx);
        } else if let Some(idx) = current {
            if let Some(body) = bodies[idx].as_mut() {
                body.push(line.to_string());
            }
        }
    }
    bodies
}

fn section_index(section: Section) -> usize {
    match section {
        Section::Guidance => 0,
        Section::Achievements => 1,
        Section::Risks => 2,
        Section::StrategicFocus => 3,
    }
}

// ── Sentence splitting ───────────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•▪◦]|\d{1,2}[.)]|[a-z][.)])\s+").unwrap());
static RE_HEADING_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*#{1,6}\s*").unwrap());

/// Group lines into chunks (bullets start a chunk, blank lines end one),
/// strip list and emphasis markup, then split each chunk into sentences.
fn sentences_from_lines(lines: &[String]) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut open = false;

    for line in lines {
        if line.trim().is_empty() {
            open = false;
            continue;
        }
        let is_bullet = RE_BULLET.is_match(line);
        let stripped = RE_BULLET.replace(line, "");
        let stripped = RE_HEADING_MARK.replace(&stripped, "");
        let cleaned = stripped.replace("**", "").replace("__", "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        match chunks.last_mut() {
            Some(last) if open && !is_bullet => {
                last.push(' ');
                last.push_str(cleaned);
            }
            _ => chunks.push(cleaned.to_string()),
        }
        open = true;
    }

    chunks.iter().flat_map(|c| split_sentences(c)).collect()
}

/// Split on `.`, `!` or `?` followed by whitespace or end of text.
///
/// Abbreviations in [`ABBREVIATIONS`] do not end a sentence. Entries with no
/// alphanumeric content are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (i, &(pos, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_end = i + 1 == chars.len();
        let before_space = chars.get(i + 1).is_some_and(|(_, n)| n.is_whitespace());
        if !(at_end || before_space) {
            continue;
        }
        let end = pos + c.len_utf8();
        if c == '.' && ends_with_abbreviation(&text[start..end]) {
            continue;
        }
        push_sentence(&mut out, &text[start..end]);
        start = end;
    }
    if start < text.len() {
        push_sentence(&mut out, &text[start..]);
    }
    out
}

fn ends_with_abbreviation(fragment: &str) -> bool {
    let last_word = fragment
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(['(', '"', '\''])
        .to_lowercase();
    ABBREVIATIONS.contains(&last_word.as_str())
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let sentence = raw.trim();
    if sentence.chars().any(char::is_alphanumeric) {
        out.push(sentence.to_string());
    }
}
