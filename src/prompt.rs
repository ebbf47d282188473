//! System prompt assembly for agent runs.
//!
//! Prompts are rebuilt every step because the workspace path can change when
//! a sandbox is replaced between steps.

use crate::agent::{CommentRecord, PostSnapshot};
use crate::workspace::{GitContext, Workspace};

/// Ground rules shared by both agent flavors.
pub const GROUNDING_INSTRUCTION: &str = "Use the read_file, grep, and list_dir tools to ground \
every claim in the actual code, and cite file paths when you do. If the code does not answer a \
question, say so instead of guessing. Keep replies concise.";

fn repo_line(git_context: &GitContext) -> String {
    match &git_context.ref_name {
        Some(ref_name) => format!("{} at ref {ref_name}", git_context.slug()),
        None => git_context.slug(),
    }
}

/// The per-step system prompt for a thread agent.
pub fn thread_system_prompt(git_context: &GitContext, workspace: &Workspace) -> String {
    format!(
        "You are a software agent discussing the repository {} with its readers.\n\n\
         A checkout of {} is available at {}.\n\n{}",
        git_context.slug(),
        repo_line(git_context),
        workspace.path.display(),
        GROUNDING_INSTRUCTION,
    )
}

/// The per-step system prompt for a response agent: the thread framing plus
/// the post and the older comments of the reply chain.
pub fn response_system_prompt(
    git_context: &GitContext,
    workspace: &Workspace,
    post: &PostSnapshot,
    history: &[CommentRecord],
) -> String {
    let mut prompt = format!(
        "You are a software agent replying to a comment about the repository {}.\n\n\
         A checkout of {} is available at {}.\n\n\
         The post under discussion:\n## {}\n{}\n",
        git_context.slug(),
        repo_line(git_context),
        workspace.path.display(),
        post.title,
        post.body,
    );

    if !history.is_empty() {
        prompt.push_str("\nEarlier comments in this reply chain, oldest first:\n");
        for comment in history {
            prompt.push_str(&format!("- {}: {}\n", comment.author, comment.body));
        }
    }

    prompt.push_str(&format!(
        "\nThe user's comment is the next message. {GROUNDING_INSTRUCTION}"
    ));
    prompt
}
