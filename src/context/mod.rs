pub mod builder;
pub mod stable_list;

pub use builder::{BuiltContext, ContextFile, build_context_with_stable_list};
pub use stable_list::{SentFileInfo, StableListCache};
