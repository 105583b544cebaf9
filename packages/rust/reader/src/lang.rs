//! `lang.txt` instruction parsing.
//!
//! The file holds up to three instructions, one per line, optionally
//! followed by a `confidence: <value>` annotation:
//!
//! ```text
//! take the silver pot and place it on the top left burner
//! confidence: 1
//! ```

use std::sync::LazyLock;

use bridge_rlds_shared::NUM_INSTRUCTIONS;
use regex::Regex;
use tracing::warn;

/// Matches an annotation line such as `confidence: 0.9`.
static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*confidence\s*:").expect("confidence regex"));

/// Split `lang.txt` into exactly three instructions, padding with empty strings.
pub fn parse_instructions(text: &str) -> [String; NUM_INSTRUCTIONS] {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !CONFIDENCE_RE.is_match(line))
        .collect();

    let dropped = lines
        .iter()
        .skip(NUM_INSTRUCTIONS)
        .filter(|line| !line.is_empty())
        .count();
    if dropped > 0 {
        warn!(dropped, "lang.txt has more than three instructions; extra lines ignored");
    }

    std::array::from_fn(|i| lines.get(i).map(|line| line.to_string()).unwrap_or_default())
}
