//! Text utilities shared by the analysis back ends and the context analyzer.
//!
//! Tokenization folds input through NFKD and strips combining marks so
//! lexicon matching survives accented text. Identifier parsing accepts bare
//! addresses, bare display names, and `"Display Name" <addr>` header forms.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

fn re_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z][a-z0-9']*").unwrap())
}

/// NFKD-fold, drop combining marks, lowercase.
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Lowercased word tokens of `text`, folded. Apostrophes stay inside tokens
/// ("i'm"), everything else splits.
pub fn tokenize(text: &str) -> Vec<String> {
    let folded = fold(text);
    re_word()
        .find_iter(&folded)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS
        .get_or_init(|| {
            [
                "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at",
                "be", "been", "but", "by", "can", "could", "did", "do", "does", "for", "from",
                "get", "had", "has", "have", "he", "her", "him", "his", "how", "i", "if", "in",
                "into", "is", "it", "its", "i'm", "just", "let", "me", "my", "no", "not", "of",
                "on", "or", "our", "out", "over", "please", "she", "so", "some", "than", "that",
                "the", "their", "them", "then", "there", "these", "they", "this", "to", "up",
                "us", "was", "we", "were", "what", "when", "which", "who", "will", "with",
                "would", "you", "your",
            ]
            .into_iter()
            .collect()
        })
        .contains(token)
}

/// Free-text sender identifier, split into its name and address parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentifier {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl ParsedIdentifier {
    /// The best single string to resolve against the directory: the address
    /// when present, the display name otherwise.
    pub fn resolution_key(&self) -> Option<&str> {
        self.email.as_deref().or(self.display_name.as_deref())
    }
}

/// Parse an identifier like `"Jane Doe" <jane@firm.com>`, `jane@firm.com`,
/// or a bare display name.
pub fn parse_identifier(raw: &str) -> ParsedIdentifier {
    let trimmed = raw.trim();
    if let Some(lt) = trimmed.find('<') {
        if let Some(gt) = trimmed.rfind('>') {
            if gt > lt {
                let email = trimmed[lt + 1..gt].trim().to_string();
                let name = trimmed[..lt].trim().trim_matches('"').trim().to_string();
                return ParsedIdentifier {
                    display_name: if name.is_empty() { None } else { Some(name) },
                    email: if email.is_empty() { None } else { Some(email) },
                };
            }
        }
    }
    if trimmed.contains('@') {
        ParsedIdentifier {
            display_name: None,
            email: Some(trimmed.to_string()),
        }
    } else {
        ParsedIdentifier {
            display_name: if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            },
            email: None,
        }
    }
}

/// Local part of an address ("jane.doe" of "jane.doe@firm.com"); the whole
/// string when there is no `@`.
pub fn local_part(identifier: &str) -> &str {
    identifier.split('@').next().unwrap_or(identifier)
}

/// Whitespace-normalized prefix of `text`, trimmed to a word boundary, with
/// an ellipsis when anything was cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    let cut: String = cleaned.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        // Only back up to a space if that keeps a useful amount of text
        Some(pos) if pos > max_chars / 2 => cut[..pos].to_string(),
        _ => cut,
    };
    format!("{}…", cut.trim_end())
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 char.
pub fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
