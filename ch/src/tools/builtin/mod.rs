//! Built-in tool implementations

mod fetch;
mod read_file;

pub use fetch::FetchTool;
pub use read_file::ReadFileTool;
