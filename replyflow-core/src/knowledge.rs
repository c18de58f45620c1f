//! Static knowledge table consulted before anything else.
//!
//! Entries are checked in configured order and the first match wins. An entry
//! matches when any of its triggers fire:
//! - **keywords**: whole-word phrase match against the normalized utterance
//! - **patterns**: regular expressions over the normalized utterance
//! - **intents**: case-insensitive match on the upstream intent name
//!
//! Response templates may reference classifier parameters as `{name}`. An
//! entry whose template needs a parameter the request does not carry is
//! skipped, so a reply never goes out with an unfilled placeholder.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::KnowledgeEntryConfig;
use crate::error::ReplyflowError;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("static placeholder regex"))
}

/// A compiled knowledge entry.
#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    name: String,
    keywords: Vec<Vec<String>>,
    patterns: Vec<Regex>,
    intents: Vec<String>,
    template: String,
    placeholders: Vec<String>,
}

/// The entry that answered, with its template already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeMatch {
    pub name: String,
    pub text: String,
}

impl KnowledgeEntry {
    pub fn from_config(config: &KnowledgeEntryConfig) -> Result<Self, ReplyflowError> {
        let keywords = config
            .keywords
            .iter()
            .map(|k| words(&k.to_lowercase()))
            .filter(|w| !w.is_empty())
            .collect();

        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ReplyflowError::KnowledgePattern {
                    entry: config.name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let intents = config
            .intents
            .iter()
            .map(|i| i.trim().to_lowercase())
            .filter(|i| !i.is_empty())
            .collect();

        let placeholders = placeholder_regex()
            .captures_iter(&config.response)
            .map(|c| c[1].to_string())
            .collect();

        Ok(Self {
            name: config.name.clone(),
            keywords,
            patterns,
            intents,
            template: config.response.clone(),
            placeholders,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn triggered_by(&self, utterance_words: &[String], normalized: &str, intent: Option<&str>) -> bool {
        if let Some(intent) = intent {
            let intent = intent.trim().to_lowercase();
            if self.intents.iter().any(|i| *i == intent) {
                return true;
            }
        }

        if self
            .keywords
            .iter()
            .any(|phrase| contains_phrase(utterance_words, phrase))
        {
            return true;
        }

        self.patterns.iter().any(|p| p.is_match(normalized))
    }

    /// Fill `{name}` placeholders, or `None` if any of them is unavailable.
    fn render(&self, parameters: &BTreeMap<&str, String>) -> Option<String> {
        if self
            .placeholders
            .iter()
            .any(|p| !parameters.contains_key(p.as_str()))
        {
            return None;
        }

        let rendered = placeholder_regex()
            .replace_all(&self.template, |caps: &regex::Captures| {
                parameters.get(&caps[1]).cloned().unwrap_or_default()
            })
            .trim()
            .to_string();

        if rendered.is_empty() {
            None
        } else {
            Some(rendered)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn from_config(entries: &[KnowledgeEntryConfig]) -> Result<Self, ReplyflowError> {
        let entries = entries
            .iter()
            .map(KnowledgeEntry::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry (in table order) whose trigger fires and whose template
    /// can be rendered. `normalized` must already be lower-cased.
    pub fn lookup(
        &self,
        normalized: &str,
        intent: Option<&str>,
        parameters: &BTreeMap<&str, String>,
    ) -> Option<KnowledgeMatch> {
        let utterance_words = words(normalized);

        self.entries
            .iter()
            .filter(|e| e.triggered_by(&utterance_words, normalized, intent))
            .find_map(|e| {
                e.render(parameters).map(|text| KnowledgeMatch {
                    name: e.name.clone(),
                    text,
                })
            })
    }
}

/// Split into alphanumeric words; punctuation such as `¿`, `?` or `,` acts as a separator.
fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(haystack: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty()
        && haystack.len() >= phrase.len()
        && haystack.windows(phrase.len()).any(|w| w == phrase)
}
