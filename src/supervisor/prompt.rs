//! Agent prompt construction.

use crate::models::task::TaskRequest;

/// Build the prompt handed to the agent CLI as a single argument.
#[must_use]
pub fn build_prompt(request: &TaskRequest) -> String {
    let mut parts = vec![
        "You are an autonomous agent executing a task inside a Docker container.".to_owned(),
        String::new(),
        format!("## Task File: {}", request.task_file_path),
        format!("## Branch: {}", request.branch_name),
        format!("## Repository: {}", request.repo_url),
        String::new(),
        "Execute the stories in the task file. For each story:".to_owned(),
        "1. Read the story requirements and acceptance criteria".to_owned(),
        "2. Implement the changes".to_owned(),
        "3. Verify acceptance criteria are met".to_owned(),
        "4. Commit with a descriptive message".to_owned(),
        String::new(),
        "Work through stories in dependency order. Skip stories whose dependencies have failed."
            .to_owned(),
    ];

    if !request.env_vars.is_empty() {
        parts.push(String::new());
        parts.push("## Environment Variables".to_owned());
        parts.extend(
            request
                .env_vars
                .iter()
                .map(|(key, value)| format!("- {key}={value}")),
        );
    }

    parts.join("\n")
}
