//! Patchwright tools — capabilities bound to a sandboxed workspace
//!
//! Each tool is a self-contained module implementing the `Tool` trait over a
//! shared sandbox handle. Agents register the subset they are allowed to use;
//! a tool that isn't registered is invisible to the decision-maker.

pub mod registry;
pub mod tools;

pub use registry::{ArtifactSink, Tool, ToolRegistry, ToolResult};
pub use tools::command::{CommandPolicy, RunCommandTool};
pub use tools::files::{CreateFileTool, DeleteFileTool, ReadFileTool, WriteFileTool};
pub use tools::list_dir::ListDirectoryTool;
pub use tools::screenshot::ScreenshotTool;
