//! Prompt text sent to the completion provider.

use std::fmt::Write as _;

use crate::generator::Reference;

/// Longest reference excerpt embedded in a prompt, in characters.
pub const EXCERPT_LIMIT: usize = 1_500;

/// System instruction shared by every generation request.
pub const SYSTEM_PROMPT: &str = r#"You write tools for a tool server. Answer with a single JSON object and nothing else:
{"name": string, "description": string, "category": string, "inputSchema": JSON Schema object, "handlerCode": string}

handlerCode is Lua 5.4 source that evaluates to one function:
  function(args, ctx) ... end
- args is the decoded argument table; ctx has tool_name and now (ISO-8601 string).
- Return { content = { { type = "text", text = <string> } } }. Add isError = true for expected failures.
- Available helpers: json.encode, json.decode, base64.encode, base64.decode, log.info, log.warn, log.error, and the string, table, math and utf8 libraries.
- The handler must be self-contained and side-effect free: no os, io, require, load, debug, metatables, coroutines or global assignments.
- Network access is only allowed through a host-provided fetch primitive. This host provides none, so do not perform HTTP calls.
- Validate inputs and return a text error with isError = true instead of raising.
- Keep the implementation short and deterministic apart from math.random."#;

/// Renders the user message for one tool.
#[must_use]
pub fn user_prompt(tool_name: &str, description: Option<&str>, references: &[Reference]) -> String {
    let mut prompt = format!("Create a tool named `{tool_name}`.\n");
    if let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) {
        let _ = writeln!(prompt, "Requested behaviour: {description}");
    }

    if references.is_empty() {
        prompt.push_str("\nNo existing implementations were found; design the tool from its name.\n");
    } else {
        prompt.push_str("\nExisting implementations that may help:\n");
        for (idx, reference) in references.iter().enumerate() {
            let _ = write!(
                prompt,
                "\n{}. {} ({}, relevance {:.2})\n   {}\n   {}\n",
                idx + 1,
                reference.name,
                reference.source,
                reference.relevance_score,
                reference.description,
                reference.url,
            );
            if let Some(excerpt) = &reference.excerpt {
                let _ = write!(prompt, "```\n{}\n```\n", truncate(excerpt, EXCERPT_LIMIT));
            }
        }
    }

    prompt.push_str("\nReturn only the JSON object.");
    prompt
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
