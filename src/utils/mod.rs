pub mod fs;
pub mod tokens;
