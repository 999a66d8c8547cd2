//! Prompt templates for generation agents.
//!
//! Every stage renders one template. Placeholders are written `{{name}}`;
//! `{{format}}` is always filled with the expected JSON shape of the
//! stage's schema. Built-in templates can be replaced by files named
//! `<key>.txt` in a prompt directory.
//!
//! Techniques for the style stage are numbered templates containing a
//! `{{text}}` placeholder. The first line of each is its menu title.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;

use crate::agents::AgentRole;
use crate::config::ConfigError;

/// Stage prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PromptKey {
    SentenceSelect,
    SentenceRewrite,
    SentenceCritique,
    Splice,
    SeedRevision,
    TechniqueSelect,
    NumericRewrite,
    NumericCritique,
    Evaluation,
    DetectionFeedback,
    Universal,
    Title,
}

impl PromptKey {
    pub const ALL: [PromptKey; 12] = [
        PromptKey::SentenceSelect,
        PromptKey::SentenceRewrite,
        PromptKey::SentenceCritique,
        PromptKey::Splice,
        PromptKey::SeedRevision,
        PromptKey::TechniqueSelect,
        PromptKey::NumericRewrite,
        PromptKey::NumericCritique,
        PromptKey::Evaluation,
        PromptKey::DetectionFeedback,
        PromptKey::Universal,
        PromptKey::Title,
    ];

    /// File stem used for overrides.
    pub fn file_stem(&self) -> &'static str {
        match self {
            PromptKey::SentenceSelect => "sentence_select",
            PromptKey::SentenceRewrite => "sentence_rewrite",
            PromptKey::SentenceCritique => "sentence_critique",
            PromptKey::Splice => "splice",
            PromptKey::SeedRevision => "seed_revision",
            PromptKey::TechniqueSelect => "technique_select",
            PromptKey::NumericRewrite => "numeric_rewrite",
            PromptKey::NumericCritique => "numeric_critique",
            PromptKey::Evaluation => "evaluation",
            PromptKey::DetectionFeedback => "detection_feedback",
            PromptKey::Universal => "universal",
            PromptKey::Title => "title",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptKey::SentenceSelect => SENTENCE_SELECT,
            PromptKey::SentenceRewrite => SENTENCE_REWRITE,
            PromptKey::SentenceCritique => SENTENCE_CRITIQUE,
            PromptKey::Splice => SPLICE,
            PromptKey::SeedRevision => SEED_REVISION,
            PromptKey::TechniqueSelect => TECHNIQUE_SELECT,
            PromptKey::NumericRewrite => NUMERIC_REWRITE,
            PromptKey::NumericCritique => NUMERIC_CRITIQUE,
            PromptKey::Evaluation => EVALUATION,
            PromptKey::DetectionFeedback => DETECTION_FEEDBACK,
            PromptKey::Universal => UNIVERSAL,
            PromptKey::Title => TITLE,
        }
    }
}

const SENTENCE_SELECT: &str = r#"Read the text below. List the sentences that carry its main claims and every number, amount or date it mentions.

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const SENTENCE_REWRITE: &str = r#"Rewrite the sentence below so that it reads naturally in the context of the full text.
{{feedback}}

Respond with ONLY a JSON object in this format:
{{format}}

Sentence:
{{sentence}}

Full text:
{{text}}"#;

const SENTENCE_CRITIQUE: &str = r#"Here is an original sentence and a rewritten version of it. Give brief, concrete feedback on how the rewrite could fit its context more smoothly. If it needs no change, return an empty string.

Respond with ONLY a JSON object in this format:
{{format}}

Original sentence:
{{sentence}}

Rewritten sentence:
{{modified_sentence}}"#;

const SPLICE: &str = r#"Replace the target sentence in the text with the replacement sentence. Change nothing else.

Respond with ONLY a JSON object in this format:
{{format}}

Target sentence:
{{sentence}}

Replacement sentence:
{{modified_sentence}}

Text:
{{text}}"#;

const SEED_REVISION: &str = r#"Revise the text below according to this feedback:
{{feedback}}

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const TECHNIQUE_SELECT: &str = r#"Choose the rewriting style from the numbered list that best suits the text below.

{{techniques}}

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const NUMERIC_REWRITE: &str = r#"Review the numbers, amounts and dates in the text below and revise them where needed so they are consistent with each other and with the rest of the text.
{{feedback}}

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const NUMERIC_CRITIQUE: &str = r#"Check whether the numbers, amounts and dates in the text below are consistent with each other and with the narrative. Give brief feedback, or an empty string if they are consistent.

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const EVALUATION: &str = r#"Compare the original and the revised text. Quality metrics for the revision:
{{metrics}}

Give short, targeted feedback to each of these agents: {{targets}}

Respond with ONLY a JSON object in this format:
{{format}}

Original text:
{{original}}

Revised text:
{{text}}"#;

const DETECTION_FEEDBACK: &str = r#"A text classifier labelled the text below as {{label}}. The words and phrases that most influenced that decision were:
{{explanation}}

Suggest concrete revisions to the wording and style of the text.

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const UNIVERSAL: &str = r#"Revise the text below so it reads as clear, well-structured prose.
{{feedback}}

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const TITLE: &str = r#"Write a headline for the text below. The current headline is: {{title}}

Respond with ONLY a JSON object in this format:
{{format}}

Text:
{{text}}"#;

const BUILTIN_TECHNIQUES: [&str; 4] = [
    "Formal newswire register\nRewrite the text in a neutral, formal newswire register. Keep its length and structure.\n\nRespond with ONLY a JSON object in this format:\n{{format}}\n\nText:\n{{text}}",
    "Narrative framing\nRewrite the text as a narrative that opens with a concrete scene and then presents the facts.\n\nRespond with ONLY a JSON object in this format:\n{{format}}\n\nText:\n{{text}}",
    "Concise summary\nRewrite the text in short, direct sentences. Remove repetition.\n\nRespond with ONLY a JSON object in this format:\n{{format}}\n\nText:\n{{text}}",
    "Attributed statements\nRewrite the text so that claims are attributed to their sources in reported speech.\n\nRespond with ONLY a JSON object in this format:\n{{format}}\n\nText:\n{{text}}",
];

/// System prompt for an agent playing `role`.
pub fn system_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::SentenceSelector => {
            "You analyse news-style texts and identify their key sentences and figures. Reply with JSON only."
        }
        AgentRole::SentenceRewriter => {
            "You rewrite single sentences so they fit their surrounding text. Reply with JSON only."
        }
        AgentRole::Critic => {
            "You review revisions and give short, concrete feedback. Reply with JSON only."
        }
        AgentRole::Splicer => {
            "You replace one sentence of a text with another and change nothing else. Reply with JSON only."
        }
        AgentRole::StyleTransformer => {
            "You revise the style of news-style texts following the instructions given. Reply with JSON only."
        }
        AgentRole::NumericRewriter => {
            "You revise the numbers, amounts and dates of a text for internal consistency. Reply with JSON only."
        }
        AgentRole::Evaluator => {
            "You assess revisions against quality metrics and address feedback to named agents. Reply with JSON only."
        }
        AgentRole::TitleGenerator => "You write headlines for news-style texts. Reply with JSON only.",
        AgentRole::DetectionFeedback => {
            "You explain how to revise a text given the words a classifier relied on. Reply with JSON only."
        }
        AgentRole::Universal => {
            "You revise news-style texts end to end and apply any feedback given. Reply with JSON only."
        }
        AgentRole::Judge => "You label texts with a single word and nothing else.",
    }
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(\w+)\}\}").unwrap();
}

/// Fill `{{name}}` placeholders in one pass over the template.
///
/// Unknown placeholders are left in place. Inserted values are never
/// scanned again, so a document quoting `{{format}}` keeps it verbatim.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match values.iter().find(|(key, _)| *key == name) {
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Stage templates plus the numbered technique catalogue.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: BTreeMap<PromptKey, String>,
    techniques: BTreeMap<i64, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let templates = PromptKey::ALL
            .iter()
            .map(|k| (*k, k.builtin().to_string()))
            .collect();
        let techniques = BUILTIN_TECHNIQUES
            .iter()
            .enumerate()
            .map(|(i, t)| (i as i64 + 1, t.to_string()))
            .collect();
        Self {
            templates,
            techniques,
        }
    }

    /// Replace built-in stage templates with `<dir>/<key>.txt` where present.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self, ConfigError> {
        for key in PromptKey::ALL {
            let path = dir.join(format!("{}.txt", key.file_stem()));
            if path.is_file() {
                let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                self.templates.insert(key, text);
            }
        }
        Ok(self)
    }

    /// Replace the technique catalogue with the numbered files in `dir`
    /// (`1`, `2.txt`, ...). Files whose stem is not a number are ignored.
    pub fn with_technique_dir(mut self, dir: &Path) -> Result<Self, ConfigError> {
        let io_err = |e: std::io::Error| ConfigError::Io {
            path: dir.display().to_string(),
            source: e,
        };

        let mut techniques = BTreeMap::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let number = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok());
            if let (Some(n), true) = (number, path.is_file()) {
                let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                techniques.insert(n, text);
            }
        }
        self.techniques = techniques;
        Ok(self)
    }

    pub fn template(&self, key: PromptKey) -> &str {
        self.templates
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }

    pub fn render(&self, key: PromptKey, values: &[(&str, &str)]) -> String {
        render(self.template(key), values)
    }

    /// Technique template `n`, if the catalogue has one.
    pub fn technique(&self, n: i64) -> Option<&str> {
        self.techniques.get(&n).map(String::as_str)
    }

    /// Numbered list of technique titles for the selection prompt.
    pub fn technique_menu(&self) -> String {
        self.techniques
            .iter()
            .map(|(n, t)| format!("{}. {}", n, t.lines().next().unwrap_or("").trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
