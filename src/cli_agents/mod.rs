pub mod claude;
pub mod codex;
pub mod compactor;
pub mod environment;
pub mod executor;
pub mod gemini_cli;
pub mod output;
pub mod plugin;
pub mod resolver;
pub mod roles;
pub mod service;
pub mod session_bridge;

pub use compactor::Compactor;
pub use plugin::{CliPlugin, ParsedOutput, get_cli_plugin};
pub use resolver::resolve_model_to_cli;
pub use service::{CliAgentService, WorkWithRequest, consult_tool_candidates};
pub use session_bridge::SessionBridge;
