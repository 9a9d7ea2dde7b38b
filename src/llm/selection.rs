//! LLM-scored selection of representative tasks.
//!
//! One completion call per selection batch. The model is shown candidate
//! summaries and asked for a JSON selection; malformed output is salvaged
//! where possible and otherwise surfaces as a recoverable `SelectionError`
//! so the controller can fall back to a default selection.

use std::collections::HashSet;

use serde_json::{json, Value};

use super::{extract_json_object, Collaborator, CompletionRequest};
use crate::discovery::Task;
use crate::error::SelectionError;

const BODY_PREVIEW_LEN: usize = 500;

/// Select `count` representative tasks from the candidates.
///
/// When the candidate list already fits the budget, no collaborator call is
/// made. Selected task ids that do not match any candidate are ignored.
pub async fn select_tasks<C: Collaborator>(
    collaborator: &C,
    model: &str,
    candidates: &[Task],
    count: usize,
    instructions: Option<&str>,
) -> Result<Vec<Task>, SelectionError> {
    if candidates.len() <= count {
        return Ok(candidates.to_vec());
    }

    let prompt = build_selection_prompt(candidates, count, instructions);
    let response = collaborator
        .complete(CompletionRequest::new(model, prompt))
        .await?;

    let selected_ids = parse_selection_response(&response)
        .ok_or_else(|| SelectionError::UnusableResponse(preview(&response)))?;

    let wanted: HashSet<u64> = selected_ids.into_iter().collect();
    let selected: Vec<Task> = candidates
        .iter()
        .filter(|t| wanted.contains(&t.id))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(SelectionError::UnusableResponse(
            "selection matched no candidate ids".to_string(),
        ));
    }

    Ok(selected)
}

fn build_selection_prompt(candidates: &[Task], count: usize, instructions: Option<&str>) -> String {
    let summaries: Vec<Value> = candidates
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "title": t.title,
                "author": t.author,
                "additions": t.additions,
                "deletions": t.deletions,
                "changed_files": t.changed_files,
                "body": t.body.as_deref().map(|b| truncate(b, BODY_PREVIEW_LEN)),
            })
        })
        .collect();

    let extra = instructions
        .map(|i| format!("\n\nAdditional selection criteria: {i}"))
        .unwrap_or_default();

    format!(
        "Analyze merged changes and select the most representative ones for replay analysis.\n\n\
         Select exactly {count} changes that are:\n\
         1. Diverse - covering different parts of the codebase or types of changes\n\
         2. Non-trivial - meaningful changes (not just typo fixes or version bumps)\n\
         3. Interesting - good examples of real-world code changes{extra}\n\n\
         Here are the candidates:\n\n{}\n\n\
         Return your selection as a JSON object with this exact format:\n\
         {{\"selected\": [<list of change ids as integers>], \"reasoning\": \"<brief explanation>\"}}\n\n\
         Return ONLY the JSON object, no other text.",
        serde_json::to_string_pretty(&summaries).unwrap_or_default()
    )
}

/// Salvage a list of selected ids from model output.
///
/// Accepts a `{"selected": [...]}` object, a bare array of numbers, or
/// either embedded in surrounding prose. Returns `None` when nothing
/// usable is present.
pub fn parse_selection_response(response: &str) -> Option<Vec<u64>> {
    let value = extract_json_object(response)?;

    let array = match &value {
        Value::Object(map) => map.get("selected").and_then(Value::as_array)?.clone(),
        Value::Array(items) => items.clone(),
        _ => return None,
    };

    let ids: Vec<u64> = array.iter().filter_map(Value::as_u64).collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

fn preview(s: &str) -> String {
    truncate(s.trim(), 80)
}
