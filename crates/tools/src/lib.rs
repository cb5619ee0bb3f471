//! Tool registry and executor.
//!
//! Tools are externally defined capabilities the model invokes through
//! structured function calls. The registry holds the process-wide
//! name→tool mapping and produces OpenAI-function-calling schemas; the
//! executor validates arguments, bounds execution with per-tool timeouts,
//! caches successful results, and fans out batches concurrently.

pub mod builtin;
pub mod cache;
pub mod executor;
pub mod registry;

pub use executor::ToolExecutor;
pub use registry::{ParameterType, Tool, ToolParameter, ToolRegistry};
