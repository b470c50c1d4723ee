//! Conversation title rules: when to generate one, how to clean a model reply,
//! and the deterministic fallback used when generation fails.

/// Title shown for a conversation that has not been named yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Hard cap applied to every stored title.
pub const DEFAULT_TITLE_MAX_CHARS: usize = 60;

/// Length of the user-message truncation used as a fallback title.
pub const FALLBACK_TITLE_CHARS: usize = 50;

/// How much of the assistant reply the title call gets to see.
pub const TITLE_REPLY_PREVIEW_CHARS: usize = 300;

pub const TITLE_SYSTEM_PROMPT: &str =
    "Return only a concise, descriptive chat title. Max 6 words. No quotes.";

const QUOTE_CHARS: &[char] = &['"', '\'', '`', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

/// True when a conversation with `current` title should get a generated one.
pub fn needs_title(current: Option<&str>) -> bool {
    match current.map(str::trim) {
        None => true,
        Some("") => true,
        Some(t) => t.eq_ignore_ascii_case(DEFAULT_TITLE),
    }
}

/// User prompt for the title call.
pub fn title_request(user_message: &str, assistant_reply: &str) -> String {
    let preview: String = assistant_reply
        .chars()
        .take(TITLE_REPLY_PREVIEW_CHARS)
        .collect();
    format!(
        "Create a very short, descriptive chat title (max 6 words, no quotes) for this conversation.\n\nUser: {}\nAssistant: {}",
        user_message, preview
    )
}

/// Clean a raw title: first line only, quotes stripped from both ends,
/// whitespace collapsed, capped at `max_chars`. Returns `None` when nothing
/// usable is left.
pub fn sanitize_title(raw: &str, max_chars: usize) -> Option<String> {
    let first_line = raw.lines().find(|l| !l.trim().is_empty())?;
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    let unquoted = strip_quotes(&collapsed);
    let capped: String = unquoted.chars().take(max_chars).collect();
    // Truncation can expose a quote or trailing space at the new end.
    let cleaned = strip_quotes(&capped);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim()
        .trim_matches(|c: char| QUOTE_CHARS.contains(&c) || c.is_whitespace())
}

/// Title derived from the user's own message when generation fails.
pub fn fallback_title(user_message: &str, max_chars: usize) -> String {
    let head: String = user_message.chars().take(FALLBACK_TITLE_CHARS).collect();
    sanitize_title(&head, max_chars.min(FALLBACK_TITLE_CHARS))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Title as presented to clients (`None` renders as the placeholder).
pub fn display_title(title: Option<&str>) -> &str {
    match title {
        Some(t) if !t.trim().is_empty() => t,
        _ => DEFAULT_TITLE,
    }
}
