//! Prompt intent detection for template fallbacks.
//!
//! Two small classifiers live here:
//! - [`Intent`] picks a canned response when nothing else can answer.
//! - [`TemplateTag`] picks the cache tag used by tag-based cache lookups.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref GREETING_PATTERN: Regex =
        Regex::new(r"(?i)\b(hello|hi|hey|greetings?)\b").unwrap();

    static ref HELP_PATTERN: Regex = Regex::new(r"(?i)\b(help|support)\b").unwrap();

    static ref DEFINITION_PATTERN: Regex =
        Regex::new(r"(?i)(\bwhat\s+is\b|\bdefine\b)").unwrap();

    static ref CALCULATION_PATTERN: Regex =
        Regex::new(r"(?i)\b(calculate|compute)\b").unwrap();
}

/// Intent category for canned template responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    HelpRequest,
    DefinitionRequest,
    CalculationRequest,
    Generic,
}

impl Intent {
    /// Classify a prompt. Checks run in a fixed order; the first match wins.
    pub fn classify(prompt: &str) -> Self {
        let intent = if GREETING_PATTERN.is_match(prompt) {
            Self::Greeting
        } else if HELP_PATTERN.is_match(prompt) {
            Self::HelpRequest
        } else if DEFINITION_PATTERN.is_match(prompt) {
            Self::DefinitionRequest
        } else if CALCULATION_PATTERN.is_match(prompt) {
            Self::CalculationRequest
        } else {
            Self::Generic
        };
        tracing::trace!(intent = ?intent, "Classified prompt intent");
        intent
    }

    /// Static message returned for this intent.
    pub fn canned_response(&self) -> &'static str {
        match self {
            Self::Greeting => {
                "Hello! I'm currently experiencing technical difficulties. \
                 Please try again later or contact support."
            }
            Self::HelpRequest => {
                "For immediate assistance, please contact our support team. \
                 We apologize for the inconvenience."
            }
            Self::DefinitionRequest => {
                "I'm unable to process your request at the moment. \
                 Please try rephrasing your question or contact support."
            }
            Self::CalculationRequest => {
                "Our calculation services are temporarily unavailable. Please try again later."
            }
            Self::Generic => {
                "I'm currently experiencing technical difficulties. Your request has been \
                 noted and will be processed as soon as possible."
            }
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic)
    }
}

/// Cache tag associated with a recognizable prompt shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateTag {
    Definition,
    Instruction,
    Explanation,
    Calculation,
    Translation,
}

impl TemplateTag {
    const MARKERS: [(&'static str, TemplateTag); 5] = [
        ("what is", TemplateTag::Definition),
        ("how to", TemplateTag::Instruction),
        ("explain", TemplateTag::Explanation),
        ("calculate", TemplateTag::Calculation),
        ("translate", TemplateTag::Translation),
    ];

    /// First tag whose marker phrase appears in the prompt.
    pub fn detect(prompt: &str) -> Option<Self> {
        Self::detect_all(prompt).into_iter().next()
    }

    /// Every tag whose marker phrase appears in the prompt, in marker order.
    pub fn detect_all(prompt: &str) -> Vec<Self> {
        let lower = prompt.to_lowercase();
        Self::MARKERS
            .iter()
            .filter(|(marker, _)| lower.contains(marker))
            .map(|(_, tag)| *tag)
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Instruction => "instruction",
            Self::Explanation => "explanation",
            Self::Calculation => "calculation",
            Self::Translation => "translation",
        }
    }
}

impl fmt::Display for TemplateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
