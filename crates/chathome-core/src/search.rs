//! Web search result model and grounding-context formatting.

use serde::{Deserialize, Serialize};

/// Fixed upper bound on results requested from the search provider.
pub const DEFAULT_RESULT_COUNT: usize = 5;

pub const NO_RESULTS: &str = "No search results found.";

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Format hits as a numbered list of title / snippet / source blocks,
/// separated by blank lines.
pub fn format_search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] {}\n{}\nSource: {}",
                i + 1,
                hit.title.trim(),
                hit.snippet.trim(),
                hit.link.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Instruction for the cheap "should we search" classification call.
pub const CLASSIFIER_PROMPT: &str = "You are a classifier that determines if a web search would help answer the user's request. \
Respond \"YES\" if the user is asking for: \
- News, headlines, trending topics, or current events. \
- Weather, forecasts, air quality, or conditions for a specific place and time. \
- Sports scores, schedules, live results, stocks/crypto prices, exchange rates, or any other live data. \
- Product details, reviews, prices, or availability. \
- Any topic where up-to-date information is better than your training data. \
- The conversation shows the assistant previously lacked information or could not answer. \
If you are even slightly unsure, respond \"YES\". \
Respond \"NO\" only if the request is clearly: \
- Purely creative writing, math, or coding. \
- Personal chitchat or greeting. \
- General static knowledge (e.g. history, definitions) that definitely hasn't changed. \
Output ONLY \"YES\" or \"NO\".";

/// Instruction for turning the conversation into one search query.
pub const QUERY_PROMPT: &str = "Based on the conversation history and the following user message, generate a single, concise search query that best addresses the user's need. If the user's message is standalone, just use that. Output ONLY the query text.";

/// Interpret a classifier reply. Anything other than `YES` means no search.
pub fn classifier_says_yes(reply: &str) -> bool {
    reply.trim().to_ascii_uppercase() == "YES"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbered_blocks() {
        let hits = vec![
            SearchHit {
                title: "Paris weather".into(),
                link: "https://weather.example/paris".into(),
                snippet: "Sunny, 21C".into(),
            },
            SearchHit {
                title: "Forecast".into(),
                link: "https://forecast.example".into(),
                snippet: "Rain later".into(),
            },
        ];
        assert_eq!(
            format_search_results(&hits),
            "[1] Paris weather\nSunny, 21C\nSource: https://weather.example/paris\n\n\
             [2] Forecast\nRain later\nSource: https://forecast.example"
        );
    }

    #[test]
    fn empty_results_have_explicit_text() {
        assert_eq!(format_search_results(&[]), NO_RESULTS);
    }

    #[test]
    fn classifier_reply_parsing() {
        assert!(classifier_says_yes(" yes\n"));
        assert!(!classifier_says_yes("YES."));
        assert!(!classifier_says_yes("NO"));
        assert!(!classifier_says_yes(""));
    }
}
