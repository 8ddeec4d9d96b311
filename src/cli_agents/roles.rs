use std::path::Path;
use tracing::warn;

const ROLES_DIR: &str = ".mcp-the-force/roles";

const DEFAULT_ROLE: &str = "You are a capable software engineering agent. Work autonomously, \
verify your changes, and report what you did.";

const PLANNER_ROLE: &str = "You are a planning specialist. Break the task into concrete, \
ordered steps with file-level detail. Do not write code; produce the plan.";

const REVIEWER_ROLE: &str = "You are a code review specialist. Examine the changes for \
correctness, edge cases, and maintainability. Report findings ordered by severity.";

/// Resolve a role name to its system-prompt text. Custom roles in
/// `<project>/.mcp-the-force/roles/<name>.txt` shadow the built-ins; an
/// unknown name falls back to the default role.
pub fn get_role(project_dir: &Path, name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        let custom = project_dir.join(ROLES_DIR).join(format!("{name}.txt"));
        if let Ok(content) = std::fs::read_to_string(&custom) {
            return content.trim().to_string();
        }
    }
    match name {
        "default" => DEFAULT_ROLE.to_string(),
        "planner" => PLANNER_ROLE.to_string(),
        "reviewer" => REVIEWER_ROLE.to_string(),
        other => {
            warn!("Unknown role '{other}', using default");
            DEFAULT_ROLE.to_string()
        }
    }
}
