//! Content served behind the capability gate
//!
//! Registered resources, prompts and tools, exposed through the `RequestHandler` seam.

pub mod catalog;

pub use catalog::{
    Catalog, EchoExecutor, EchoTool, ExperimentalMethod, PromptTemplate, TemplateArgument,
    ToolExecutor,
};
