//! Role-conditioned system instructions.
//!
//! The only caller-controlled value interpolated into an instruction is the
//! user's own display name, and it is sanitised first.

use crate::models::Role;

/// Longest display name placed into an instruction.
pub const MAX_PROMPT_NAME_CHARS: usize = 64;

/// Header introducing formatted search results inside the system instruction.
pub const SEARCH_CONTEXT_HEADER: &str = "Web search results for context:";

/// Structured prompt template selected by [`PromptTemplate::for_role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Describes who the assistant is talking to; `{name}` is the display name.
    audience: &'static str,
    guidelines: &'static [&'static str],
}

const GENERAL_GUIDELINES: &[&str] = &[
    "Address the user by their name naturally in conversation",
    "Maintain context from previous messages to understand the full conversation flow",
    "When provided with web search results, use them to answer the user's question accurately and cite them if applicable",
    "Provide factual, logical responses",
    "Do not offer emotional support or therapy",
    "Focus on accuracy and practical solutions",
    "Be direct and concise",
];

const KID_GUIDELINES: &[&str] = &[
    "Address the user by their name naturally in conversation",
    "Use simple, age-appropriate language",
    "Remember what we were talking about in previous messages",
    "Provide factual, educational responses",
    "Do not discuss adult topics, violence, or inappropriate content",
    "Be encouraging but stick to facts",
    "Redirect inappropriate questions politely",
    "Keep explanations simple and engaging",
];

impl PromptTemplate {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Kid => Self {
                audience: "a child",
                guidelines: KID_GUIDELINES,
            },
            Role::Admin | Role::Adult => Self {
                audience: "",
                guidelines: GENERAL_GUIDELINES,
            },
        }
    }

    /// Render the instruction for `display_name`.
    pub fn render(&self, display_name: &str) -> String {
        let name = sanitize_display_name(display_name);
        let mut out = if self.audience.is_empty() {
            format!("You are a helpful AI assistant for {}.", name)
        } else {
            format!("You are a helpful AI assistant for {}, {}.", name, self.audience)
        };
        for line in self.guidelines {
            out.push_str("\n- ");
            out.push_str(line);
        }
        out
    }
}

/// Build the full system instruction, appending search grounding when present.
pub fn system_instruction(role: Role, display_name: &str, search_context: Option<&str>) -> String {
    let mut out = PromptTemplate::for_role(role).render(display_name);
    if let Some(ctx) = search_context.filter(|c| !c.trim().is_empty()) {
        out.push_str("\n\n");
        out.push_str(SEARCH_CONTEXT_HEADER);
        out.push('\n');
        out.push_str(ctx);
    }
    out
}

/// Strip control characters and newlines, collapse whitespace, cap length.
pub fn sanitize_display_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_PROMPT_NAME_CHARS).collect();
    if capped.is_empty() {
        "there".to_string()
    } else {
        capped
    }
}
