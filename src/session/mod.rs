pub mod cache;
pub mod db;
pub mod history;
pub mod sanitize;

pub use cache::{CROSS_TOOL, HistorySearchHit, SessionSummary, UnifiedSession, UnifiedSessionCache};
pub use db::SessionDb;
pub use history::{ApiFormat, ChatMessage, HistoryItem, ResponsesItem, dedup_tool_ids};
