//! Assistant reply classification.
//!
//! Turns free-form assistant text into a typed [`ClassificationResult`].
//! Two layers:
//!
//! 1. **Structured reply**: the model is asked to answer with a JSON object
//!    `{category, response, action, parameters, confidence}`. Fenced code
//!    block markers around it are stripped before parsing.
//! 2. **Fallback**: anything that does not parse becomes a general reply
//!    carrying the cleaned text. An unparseable reply is an expected case and
//!    never an error.
//!
//! [`heuristic`] provides a keyword classifier for replies that arrive
//! without a category.

pub mod heuristic;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Response used when a structured reply carries no `response` text.
pub const MISSING_RESPONSE_TEXT: &str = "I'm here to help you. What would you like me to do?";

/// Response used when an unparseable reply is empty after cleaning.
pub const EMPTY_REPLY_TEXT: &str = "I'm here to help you with various tasks.";

/// String parameters attached to an action.
pub type Parameters = BTreeMap<String, String>;

static EMPTY_PARAMETERS: Parameters = BTreeMap::new();

static FENCE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"```(?i:json)?\n?").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Closed set of reply categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    General,
    SystemCommand,
    Communication,
    FileOperation,
    AppControl,
    Productivity,
    Creative,
    Technical,
    WebSearch,
    WebNavigation,
    Clarification,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 11] = [
        Category::General,
        Category::SystemCommand,
        Category::Communication,
        Category::FileOperation,
        Category::AppControl,
        Category::Productivity,
        Category::Creative,
        Category::Technical,
        Category::WebSearch,
        Category::WebNavigation,
        Category::Clarification,
    ];

    /// Wire name (`"app_control"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::SystemCommand => "system_command",
            Self::Communication => "communication",
            Self::FileOperation => "file_operation",
            Self::AppControl => "app_control",
            Self::Productivity => "productivity",
            Self::Creative => "creative",
            Self::Technical => "technical",
            Self::WebSearch => "web_search",
            Self::WebNavigation => "web_navigation",
            Self::Clarification => "clarification",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category name is not in the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}

/// How sure the classifier is about a result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confidence {
    Low,
    Medium,
    High,
    /// Numeric score in `0.0..=1.0`.
    Score(f32),
}

impl Confidence {
    /// Numeric view of the confidence.
    #[must_use]
    pub fn as_score(self) -> f32 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.6,
            Self::High => 0.9,
            Self::Score(s) => s,
        }
    }

    /// Label view of the confidence.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Score(s) if s >= 0.8 => "high",
            Self::Score(s) if s >= 0.5 => "medium",
            Self::Score(_) => "low",
        }
    }

    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "medium" => Self::Medium,
            other => match other.parse::<f32>() {
                Ok(score) => Self::Score(score.clamp(0.0, 1.0)),
                Err(_) => Self::Medium,
            },
        }
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Score(s) => serializer.serialize_f32(*s),
            other => serializer.serialize_str(other.label()),
        }
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Score(f64),
            Label(String),
        }

        match Raw::deserialize(deserializer)
            .map_err(|_| de::Error::custom("confidence must be a label or a number"))?
        {
            Raw::Score(s) => Ok(Self::Score((s as f32).clamp(0.0, 1.0))),
            Raw::Label(label) => Ok(Self::from_label(&label)),
        }
    }
}

/// A reply the classifier understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub response: String,
    pub action: Option<String>,
    pub parameters: Parameters,
    pub confidence: Confidence,
    /// Suggested follow-up question or action.
    pub follow_up: Option<String>,
}

/// Typed result of classifying one assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationResult {
    /// The reply carried (or was assigned) a category.
    Structured(Classification),
    /// The reply could not be interpreted; treated as general conversation
    /// with medium confidence.
    Fallback { response: String },
}

impl ClassificationResult {
    /// Wrap unparsed reply text.
    pub fn fallback(response: impl Into<String>) -> Self {
        Self::Fallback {
            response: response.into(),
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Structured(c) => c.category,
            Self::Fallback { .. } => Category::General,
        }
    }

    #[must_use]
    pub fn response(&self) -> &str {
        match self {
            Self::Structured(c) => &c.response,
            Self::Fallback { response } => response,
        }
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Structured(c) => c.action.as_deref(),
            Self::Fallback { .. } => None,
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        match self {
            Self::Structured(c) => &c.parameters,
            Self::Fallback { .. } => &EMPTY_PARAMETERS,
        }
    }

    #[must_use]
    pub fn confidence(&self) -> Confidence {
        match self {
            Self::Structured(c) => c.confidence,
            Self::Fallback { .. } => Confidence::Medium,
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// A structured model reply before the category policy is applied.
///
/// `category` is `None` when the model omitted it or named a category
/// outside the closed set.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub category: Option<Category>,
    pub response: String,
    pub action: Option<String>,
    pub parameters: Parameters,
    pub confidence: Option<Confidence>,
    pub follow_up: Option<String>,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default, alias = "type", alias = "responseType")]
    category: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default, alias = "followUp")]
    follow_up: Option<String>,
}

impl ModelReply {
    /// Parse raw model text as a structured reply.
    ///
    /// Returns `None` when the cleaned text is not a JSON object of the
    /// expected shape.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = strip_code_fences(raw);
        let value: serde_json::Value = serde_json::from_str(&cleaned).ok()?;
        if !value.is_object() {
            return None;
        }
        let wire: WireReply = match serde_json::from_value(value) {
            Ok(wire) => wire,
            Err(e) => {
                debug!("structured reply has unexpected field types: {e}");
                return None;
            }
        };

        let category = wire.category.as_deref().and_then(|name| {
            name.parse::<Category>()
                .map_err(|e| debug!("{e}; treating category as omitted"))
                .ok()
        });
        let response = wire
            .response
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| MISSING_RESPONSE_TEXT.to_owned());

        Some(Self {
            category,
            response,
            action: wire.action.filter(|a| !a.trim().is_empty()),
            parameters: string_parameters(wire.parameters),
            confidence: wire.confidence,
            follow_up: wire.follow_up,
        })
    }

    /// Apply defaults for omitted fields.
    #[must_use]
    pub fn into_classification(self) -> Classification {
        Classification {
            category: self.category.unwrap_or(Category::General),
            response: self.response,
            action: self.action,
            parameters: self.parameters,
            confidence: self.confidence.unwrap_or(Confidence::Medium),
            follow_up: self.follow_up,
        }
    }
}

/// Classify raw assistant text.
///
/// Never fails: text that is not a structured reply becomes
/// [`ClassificationResult::Fallback`] carrying the cleaned text.
#[must_use]
pub fn parse_reply(raw: &str) -> ClassificationResult {
    match ModelReply::parse(raw) {
        Some(reply) => ClassificationResult::Structured(reply.into_classification()),
        None => {
            debug!("non-JSON reply received, wrapping as general");
            ClassificationResult::fallback(fallback_text(raw))
        }
    }
}

/// Cleaned reply text for the fallback path.
#[must_use]
pub fn fallback_text(raw: &str) -> String {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        EMPTY_REPLY_TEXT.to_owned()
    } else {
        cleaned
    }
}

/// Remove every fenced code block marker (```` ``` ```` and ```` ```json ````)
/// anywhere in the text, keeping the block contents, and trim.
#[must_use]
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").trim().to_owned()
}

/// Flatten loosely-typed JSON parameters into strings.
///
/// Nulls are dropped; numbers and booleans are rendered; nested values are
/// kept as compact JSON.
#[must_use]
pub fn string_parameters(raw: Option<serde_json::Map<String, serde_json::Value>>) -> Parameters {
    raw.into_iter()
        .flatten()
        .filter_map(|(key, value)| {
            let text = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, text))
        })
        .collect()
}
