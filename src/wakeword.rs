//! Wake word detection over final transcripts.
//!
//! The assistant is addressed when its name appears anywhere in a final
//! transcript. Matching is case-insensitive exact substring containment on
//! the first occurrence; there is no stemming or fuzzy matching. The text
//! after the name is the command.

/// Outcome of checking one final transcript for the wake word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeMatch {
    /// The wake word does not appear in the transcript.
    NotAddressed,
    /// The wake word was spoken with nothing after it.
    WakeWordOnly,
    /// The wake word was followed by a command.
    Command(String),
}

impl WakeMatch {
    /// Consume the match, keeping only an extracted command.
    #[must_use]
    pub fn into_command(self) -> Option<String> {
        match self {
            Self::Command(command) => Some(command),
            Self::NotAddressed | Self::WakeWordOnly => None,
        }
    }
}

/// Decide whether `transcript` addresses the assistant and extract the command.
///
/// Returns the trimmed text following the first occurrence of `wake_word`,
/// or `None` when the wake word is absent or spoken alone.
#[must_use]
pub fn detect(transcript: &str, wake_word: &str) -> Option<String> {
    inspect(transcript, wake_word).into_command()
}

/// Like [`detect`], but distinguishes "not addressed" from "name only".
#[must_use]
pub fn inspect(transcript: &str, wake_word: &str) -> WakeMatch {
    let wake_word = wake_word.to_lowercase();
    if wake_word.is_empty() {
        return WakeMatch::NotAddressed;
    }

    let trimmed = transcript.trim();
    let lower = trimmed.to_lowercase();
    let Some(pos) = lower.find(&wake_word) else {
        return WakeMatch::NotAddressed;
    };
    let end = pos + wake_word.len();

    // Keep the speaker's casing when lower-casing preserved byte offsets;
    // otherwise the offsets only make sense in the lower-cased text.
    let remainder = if lower.len() == trimmed.len() && trimmed.is_char_boundary(end) {
        &trimmed[end..]
    } else {
        &lower[end..]
    };

    let command = remainder.trim();
    if command.is_empty() {
        WakeMatch::WakeWordOnly
    } else {
        WakeMatch::Command(command.to_owned())
    }
}
