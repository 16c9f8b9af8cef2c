//! Keyword classifier for commands the backend returned without a category.
//!
//! Two passes over the command:
//!
//! 1. **Category table**: ordered `(category, keywords)` scan over the
//!    lower-cased command. The first category with at least one hit wins;
//!    confidence grows with the number of hits.
//! 2. **Action overrides**: a few high-value commands are recognised by
//!    phrase and override the table result, extracting parameters by fixed
//!    patterns.

use super::{Category, Parameters};
use regex::Regex;
use std::sync::LazyLock;

/// Confidence for a single keyword hit (or an override with no table hit).
pub const BASE_CONFIDENCE: f32 = 0.5;

/// Added per additional keyword hit.
pub const CONFIDENCE_STEP: f32 = 0.2;

/// Upper bound for heuristic confidence.
pub const MAX_CONFIDENCE: f32 = 0.9;

// ── Keyword table ───────────────────────────────────────────────────────

const CATEGORY_TABLE: &[(Category, &[&str])] = &[
    (
        Category::SystemCommand,
        &[
            "open file",
            "file manager",
            "explorer",
            "system settings",
            "control panel",
            "task manager",
            "registry",
            "command prompt",
            "cmd",
            "powershell",
        ],
    ),
    (
        Category::Communication,
        &[
            "send email",
            "whatsapp",
            "telegram",
            "sms",
            "message",
            "call",
            "contact",
            "social media",
            "facebook",
            "twitter",
            "instagram",
            "linkedin",
        ],
    ),
    (
        Category::FileOperation,
        &[
            "create file",
            "create folder",
            "delete file",
            "rename",
            "move file",
            "copy file",
            "save document",
            "new document",
            "organize files",
        ],
    ),
    (
        Category::AppControl,
        &[
            "open app",
            "launch",
            "start program",
            "close app",
            "switch to",
            "browser",
            "chrome",
            "firefox",
            "notepad",
            "calculator",
            "music",
        ],
    ),
    (
        Category::Productivity,
        &[
            "schedule",
            "reminder",
            "calendar",
            "meeting",
            "appointment",
            "todo",
            "task",
            "note",
            "deadline",
        ],
    ),
    (
        Category::Creative,
        &[
            "write",
            "story",
            "poem",
            "design",
            "create",
            "brainstorm",
            "ideas",
            "creative",
            "art",
            "drawing",
        ],
    ),
    (
        Category::Technical,
        &[
            "code",
            "programming",
            "debug",
            "error",
            "fix",
            "install",
            "troubleshoot",
            "configuration",
            "setup",
        ],
    ),
    (
        Category::WebNavigation,
        &["new tab", "go to", "website", "open site", "navigate to"],
    ),
    (
        Category::WebSearch,
        &["search for", "look up", "google", "find out", "latest news"],
    ),
];

// ── Parameter patterns ──────────────────────────────────────────────────

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| unreachable!("static pattern {re}: {e}"))
}

static WHATSAPP_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)whatsapp.*?(?:to|send)\s+([^:]+):\s*(.+)"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)send\s+(?:an\s+)?email\s+to\s+([^:,.]+)(?::\s*(.+))?"));

static OPEN_APP_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)open\s+([a-zA-Z\s]+?)(?:\s+app|\s+program|$)"));

static GO_TO_RE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\bgo\s+to\s+([a-z0-9.\-\s]+?)\s*$"));

/// Result of a heuristic scan.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicMatch {
    pub category: Category,
    pub action: Option<String>,
    pub parameters: Parameters,
    /// `0.5 + 0.2` per additional keyword hit, capped at `0.9`.
    pub confidence: f32,
    /// Number of keyword hits for the winning category (0 for override-only).
    pub matched: usize,
}

impl HeuristicMatch {
    fn with_action(mut self, category: Category, action: &str) -> Self {
        self.category = category;
        self.action = Some(action.to_owned());
        self
    }

    fn with_param(mut self, key: &str, value: &str) -> Self {
        let value = value.trim();
        if !value.is_empty() {
            self.parameters.insert(key.to_owned(), value.to_owned());
        }
        self
    }
}

/// Confidence for `hits` keyword matches.
#[must_use]
pub fn confidence_for(hits: usize) -> f32 {
    if hits == 0 {
        return BASE_CONFIDENCE;
    }
    (BASE_CONFIDENCE + CONFIDENCE_STEP * (hits - 1) as f32).min(MAX_CONFIDENCE)
}

/// Classify a user command by keywords and known phrases.
///
/// Returns `None` when neither the table nor any override recognises the
/// command.
#[must_use]
pub fn classify(command: &str) -> Option<HeuristicMatch> {
    let lower = command.to_lowercase();
    let table_hit = scan_table(&lower);
    let seed = table_hit.clone().unwrap_or(HeuristicMatch {
        category: Category::General,
        action: None,
        parameters: Parameters::new(),
        confidence: BASE_CONFIDENCE,
        matched: 0,
    });

    match apply_overrides(command, &lower, seed) {
        Some(overridden) => Some(overridden),
        None => table_hit,
    }
}

fn scan_table(lower: &str) -> Option<HeuristicMatch> {
    CATEGORY_TABLE.iter().find_map(|(category, keywords)| {
        let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        (hits > 0).then(|| HeuristicMatch {
            category: *category,
            action: None,
            parameters: Parameters::new(),
            confidence: confidence_for(hits),
            matched: hits,
        })
    })
}

fn apply_overrides(command: &str, lower: &str, seed: HeuristicMatch) -> Option<HeuristicMatch> {
    if lower.contains("open file manager") || lower.contains("file explorer") {
        return Some(seed.with_action(Category::SystemCommand, "open_file_manager"));
    }

    if lower.contains("whatsapp") {
        let mut result = seed.with_action(Category::Communication, "send_whatsapp");
        if let Some(caps) = WHATSAPP_RE.captures(command) {
            result = result
                .with_param("contact", caps.get(1).map_or("", |m| m.as_str()))
                .with_param("message", caps.get(2).map_or("", |m| m.as_str()));
        }
        return Some(result);
    }

    if lower.contains("send email") || lower.contains("send an email") {
        let mut result = seed.with_action(Category::Communication, "send_email");
        if let Some(caps) = EMAIL_RE.captures(command) {
            result = result
                .with_param("recipient", caps.get(1).map_or("", |m| m.as_str()))
                .with_param("message", caps.get(2).map_or("", |m| m.as_str()));
        }
        return Some(result);
    }

    if lower.contains("what time") || lower.contains("current time") || lower.contains("the time")
    {
        return Some(seed.with_action(Category::SystemCommand, "get_current_time"));
    }

    if lower.contains("screenshot") {
        return Some(seed.with_action(Category::SystemCommand, "screenshot"));
    }

    if lower.contains("new tab") {
        return Some(seed.with_action(Category::WebNavigation, "open_new_tab"));
    }

    if let Some(caps) = GO_TO_RE.captures(command)
        && let Some(url) = caps.get(1).and_then(|m| site_url(m.as_str()))
    {
        return Some(
            seed.with_action(Category::WebNavigation, "open_website")
                .with_param("url", &url),
        );
    }

    let wants_app = lower.contains("app") || lower.contains("program");
    if lower.contains("open") && (wants_app || seed.category == Category::AppControl) {
        let mut result = seed.with_action(Category::AppControl, "open_app");
        if let Some(caps) = OPEN_APP_RE.captures(command) {
            let app = caps.get(1).map_or("", |m| m.as_str()).to_lowercase();
            result = result.with_param("app", &app);
        }
        return Some(result);
    }

    None
}

/// Turn a spoken site name into a URL: `"google"` → `https://www.google.com`.
fn site_url(spoken: &str) -> Option<String> {
    let host: String = spoken
        .split_whitespace()
        .collect::<String>()
        .to_lowercase();
    if host.is_empty() {
        return None;
    }
    if host.contains('.') {
        Some(format!("https://{host}"))
    } else {
        Some(format!("https://www.{host}.com"))
    }
}
