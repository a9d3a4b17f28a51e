use std::sync::LazyLock;

use regex::Regex;

static CLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d{1,2}:\d{2}\s*(?:AM|PM)").unwrap());
static WIDE_GAP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

/// A compound cell split into the market label and its draw time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitField {
    pub label: String,
    pub time_of_day: String,
}

/// Separate "NAME  01:40 PM" style text into label and time.
///
/// Tries an explicit clock time first, then a trailing token after a wide
/// whitespace gap, and otherwise returns the whole text as the label.
/// Never fails; empty input yields two empty strings.
pub fn split(text: &str) -> SplitField {
    if text.trim().is_empty() {
        return SplitField::default();
    }

    if let Some(m) = CLOCK_RE.find(text) {
        let rest = text.replacen(m.as_str(), "", 1);
        return SplitField {
            label: WIDE_GAP_RE.replace_all(&rest, " ").trim().to_string(),
            time_of_day: m.as_str().trim().to_string(),
        };
    }

    let mut parts: Vec<&str> = WIDE_GAP_RE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        let time_of_day = parts.pop().unwrap_or_default().to_string();
        return SplitField {
            label: parts.join(" "),
            time_of_day,
        };
    }

    SplitField {
        label: text.trim().to_string(),
        time_of_day: String::new(),
    }
}

// ── Tests ──
