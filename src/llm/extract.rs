//! JSON extraction from free-form model output.
//!
//! Model responses frequently wrap JSON in markdown fences or surround it
//! with prose. Extraction tries, in order: direct parse, fenced code block,
//! then the first balanced object or array found by bracket matching.

use serde_json::Value;

/// Extract the first JSON object or array from a model response.
///
/// Returns `None` when no parseable JSON is present.
pub fn extract_json_object(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    // Direct parse
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // Fenced code block
    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    // First balanced object or array anywhere in the content
    for open in ['{', '['] {
        if let Some(candidate) = balanced_span(trimmed, open) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

fn extract_fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Find the first balanced `{...}` or `[...]` span, respecting strings.
fn balanced_span(content: &str, open: char) -> Option<&str> {
    let close = if open == '{' { '}' } else { ']' };
    let start = content.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}
