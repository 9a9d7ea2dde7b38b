//! Replay-prompt reverse engineering.
//!
//! Given the human solution's diff, ask the collaborator for the concise
//! request a developer might have written to ask for that change. The
//! result becomes the task's `ReplayPrompt`: produced once, never mutated.

use super::{Collaborator, CompletionRequest};
use crate::discovery::Task;
use crate::error::CollaboratorError;

/// Diffs beyond this length are truncated before being shown to the model.
const MAX_DIFF_LEN: usize = 100_000;

/// Reverse-engineer a natural-language prompt from a task's diff.
pub async fn generate_replay_prompt<C: Collaborator>(
    collaborator: &C,
    model: &str,
    task: &Task,
) -> Result<String, CollaboratorError> {
    let prompt = build_prompt(task);
    let response = collaborator
        .complete(CompletionRequest::new(model, prompt))
        .await?;

    let text = response.trim().to_string();
    if text.is_empty() {
        return Err(CollaboratorError::EmptyCompletion(model.to_string()));
    }
    Ok(text)
}

fn build_prompt(task: &Task) -> String {
    let diff = truncate_diff(&task.diff);

    format!(
        "You are helping to reverse-engineer what a human might have asked for.\n\n\
         Given this merged change, write a concise prompt a human might have used to request it.\n\
         The prompt should be:\n\
         1. Natural and conversational\n\
         2. Focused on the end goal, not implementation details\n\
         3. Similar to how a developer would describe the task to a colleague\n\n\
         Title: {}\n\
         Author: {}\n\
         Files Changed: {}\n\
         Additions: {}\n\
         Deletions: {}\n\n\
         Description:\n{}\n\n\
         Diff:\n{}\n\n\
         Return ONLY the human prompt, nothing else. Keep it to 1-3 sentences.",
        task.title,
        task.author,
        task.changed_files,
        task.additions,
        task.deletions,
        task.body.as_deref().unwrap_or("(no description)"),
        diff,
    )
}

fn truncate_diff(diff: &str) -> String {
    if diff.len() <= MAX_DIFF_LEN {
        return diff.to_string();
    }
    let mut end = MAX_DIFF_LEN;
    while !diff.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n... (diff truncated)", &diff[..end])
}
