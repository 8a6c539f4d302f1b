//! Built-in tools for the agent.
//!
//! - Browser page rendering and text extraction
//! - Web search
//! - Sandboxed code execution
//! - Workspace file operations (read/write/list)

mod browser;
mod code;
mod file;
mod search;

// Browser tool
pub use browser::{BrowserTool, PageContent, discover_browser};

// Code execution tool
pub use code::CodeExecutionTool;

// File tools
pub use file::{FileListTool, FileReadTool, FileWriteTool, Workspace};

// Web search tool
pub use search::{SearchProvider, SearchResult, WebSearchTool};
