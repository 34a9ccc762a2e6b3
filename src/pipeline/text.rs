//! Text-only analysis: whitespace normalization, section detection, key
//! terms and the extractive summary fallback. Nothing here fails the
//! pipeline; internal problems degrade to empty results.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Section bodies are truncated to this many characters.
pub const SECTION_MAX_CHARS: usize = 1000;

/// Key terms kept after frequency ranking.
pub const KEY_TERM_LIMIT: usize = 20;

/// Sentences kept by the extractive summary.
const EXTRACTIVE_SENTENCES: usize = 3;

static WORD_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b[a-z]+\b").ok());

static SENTENCE_BREAK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[.!?]+").ok());

/// English stop words (NLTK list).
const STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

/// Recognised document sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    Abstract,
    Introduction,
    Methodology,
    Results,
    Conclusion,
}

struct SectionRule {
    name: SectionName,
    starts: &'static [&'static str],
    terminators: &'static [&'static str],
}

const SECTION_RULES: &[SectionRule] = &[
    SectionRule {
        name: SectionName::Abstract,
        starts: &["abstract"],
        terminators: &["introduction", "chapter", "acknowledgment", "table of contents"],
    },
    SectionRule {
        name: SectionName::Introduction,
        starts: &["introduction"],
        terminators: &["literature review", "methodology", "chapter", "background"],
    },
    SectionRule {
        name: SectionName::Methodology,
        starts: &["methodology", "methods"],
        terminators: &["results", "findings", "analysis", "chapter"],
    },
    SectionRule {
        name: SectionName::Results,
        starts: &["results", "findings"],
        terminators: &["discussion", "conclusion", "chapter"],
    },
    SectionRule {
        name: SectionName::Conclusion,
        starts: &["conclusion"],
        terminators: &["references", "bibliography", "appendix"],
    },
];

/// A detected section. Bodies stay in memory only; reports carry names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: SectionName,
    pub body: String,
}

/// Join fragments and collapse every whitespace run to a single space.
pub fn normalize_whitespace<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in parts.into_iter().flat_map(str::split_whitespace) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Detect sections on lowercased text. A section runs from its start
/// keyword (optionally followed by a colon) to the first line that opens
/// with one of its terminator keywords; sections without a terminator are
/// not reported.
pub fn extract_sections(text: &str) -> Vec<Section> {
    let lower = text.to_lowercase();
    SECTION_RULES
        .iter()
        .filter_map(|rule| {
            find_section(&lower, rule).map(|body| Section {
                name: rule.name,
                body: truncate_chars(body.trim(), SECTION_MAX_CHARS).to_string(),
            })
        })
        .collect()
}

fn find_section<'a>(lower: &'a str, rule: &SectionRule) -> Option<&'a str> {
    let (start, keyword) = rule
        .starts
        .iter()
        .filter_map(|k| lower.find(k).map(|pos| (pos, *k)))
        .min_by_key(|(pos, _)| *pos)?;

    let keyword_end = start + keyword.len();
    let rest = &lower[keyword_end..];
    let after_ws = rest.trim_start();
    let after_colon = after_ws.strip_prefix(':').unwrap_or(after_ws).trim_start();
    let body_start = lower.len() - after_colon.len();

    let terminator = lower[keyword_end..]
        .match_indices('\n')
        .map(|(i, _)| keyword_end + i)
        .find(|&newline| {
            let line = lower[newline..].trim_start();
            rule.terminators.iter().any(|t| line.starts_with(t))
        })?;

    Some(&lower[body_start.min(terminator)..terminator])
}

/// Frequency-ranked key terms: alphabetic, stop words removed, longer than
/// three letters, plural suffixes folded. Ties keep first-seen order.
pub fn extract_key_terms(text: &str) -> Vec<String> {
    let Some(pattern) = WORD_PATTERN.as_ref() else {
        tracing::warn!("Key term pattern unavailable; skipping key terms");
        return Vec::new();
    };

    let lower = text.to_lowercase();
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (order, word) in pattern
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 3 && !STOP_WORDS.contains(w))
        .enumerate()
    {
        let entry = counts.entry(lemmatize(word)).or_insert((0, order));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(term, (count, first))| (term, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(KEY_TERM_LIMIT)
        .map(|(term, _, _)| term)
        .collect()
}

/// Light plural folding: studies → study, classes → class, patients → patient.
pub fn lemmatize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() >= 2 {
            return format!("{stem}y");
        }
    }
    if word.ends_with("sses") {
        return word[..word.len() - 2].to_string();
    }
    for suffix in ["ches", "shes", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !["ss", "us", "is"].iter().any(|s| word.ends_with(s)) {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// First three sentences followed by "...".
pub fn extractive_summary(text: &str) -> String {
    let Some(pattern) = SENTENCE_BREAK.as_ref() else {
        return format!("{}...", truncate_chars(text, SECTION_MAX_CHARS));
    };
    let sentences: Vec<&str> = pattern
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(EXTRACTIVE_SENTENCES)
        .collect();
    format!("{}...", normalize_whitespace(sentences))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER: &str = "Title Page\n\
        Abstract: We study sleep in 240 adults.\nIt matters.\n\
        Introduction\nSleep is important.\n\
        Background\nPrior work exists.\n\
        Methods: randomised trial.\n\
        Results\nParticipants slept longer.\n\
        Discussion\nGood.\n\
        Conclusion: more sleep helps.\n\
        References\n[1] Someone.";

    fn section<'a>(sections: &'a [Section], name: SectionName) -> Option<&'a Section> {
        sections.iter().find(|s| s.name == name)
    }

    #[test]
    fn normalize_collapses_all_whitespace() {
        assert_eq!(normalize_whitespace(["  a\t b\n", "\n c  "]), "a b c");
        assert_eq!(normalize_whitespace(["", "   "]), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn detects_all_sections_with_terminators() {
        let sections = extract_sections(PAPER);
        assert_eq!(sections.len(), 5);
        assert_eq!(
            section(&sections, SectionName::Abstract).unwrap().body,
            "we study sleep in 240 adults.\nit matters."
        );
        assert_eq!(
            section(&sections, SectionName::Introduction).unwrap().body,
            "sleep is important."
        );
        assert_eq!(
            section(&sections, SectionName::Methodology).unwrap().body,
            "randomised trial."
        );
        assert_eq!(
            section(&sections, SectionName::Conclusion).unwrap().body,
            "more sleep helps."
        );
    }

    #[test]
    fn section_without_terminator_is_not_reported() {
        let sections = extract_sections("Abstract: no introduction follows on its own line");
        assert!(section(&sections, SectionName::Abstract).is_none());
    }

    #[test]
    fn section_body_is_truncated() {
        let long = format!("Abstract: {}\nIntroduction", "x".repeat(5000));
        let sections = extract_sections(&long);
        let body = &section(&sections, SectionName::Abstract).unwrap().body;
        assert_eq!(body.chars().count(), SECTION_MAX_CHARS);
    }

    #[test]
    fn sections_on_empty_text() {
        assert!(extract_sections("").is_empty());
    }

    #[test]
    fn lemmatize_folds_plurals() {
        assert_eq!(lemmatize("studies"), "study");
        assert_eq!(lemmatize("classes"), "class");
        assert_eq!(lemmatize("approaches"), "approach");
        assert_eq!(lemmatize("patients"), "patient");
        assert_eq!(lemmatize("analysis"), "analysis");
        assert_eq!(lemmatize("status"), "status");
        assert_eq!(lemmatize("class"), "class");
    }

    #[test]
    fn key_terms_rank_by_frequency() {
        let text = "Patients and patient outcomes. Sleep sleep sleep sleep! The outcomes of trials; \
                    trial design with patients.";
        let terms = extract_key_terms(text);
        assert_eq!(terms[0], "sleep");
        assert_eq!(terms[1], "patient");
        assert!(terms.contains(&"outcome".to_string()));
        assert!(terms.contains(&"trial".to_string()));
        assert!(!terms.iter().any(|t| t == "the" || t == "with" || t == "and"));
    }

    #[test]
    fn key_terms_skip_short_and_non_alphabetic() {
        let terms = extract_key_terms("cat dog 1234 x2y3 covid19 rna");
        assert!(terms.is_empty(), "{terms:?}");
    }

    #[test]
    fn key_terms_are_capped() {
        let text: String = ('a'..='y').map(|c| format!("alpha{c}{c} ")).collect();
        assert_eq!(extract_key_terms(&text).len(), KEY_TERM_LIMIT);
    }

    #[test]
    fn extractive_summary_takes_three_sentences() {
        let text = "First finding. Second finding! Third? Fourth is dropped.";
        assert_eq!(extractive_summary(text), "First finding Second finding Third...");
    }

    #[test]
    fn extractive_summary_of_empty_text() {
        assert_eq!(extractive_summary(""), "...");
    }
}
