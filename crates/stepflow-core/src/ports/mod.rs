//! Collaborator traits the engine calls out to.
//!
//! Async ports are declared with RPITIT and paired with an object-safe `*Dyn`
//! twin (boxed futures, blanket-implemented) so the engine can hold them as
//! `Arc<dyn ...>` and pick implementations at runtime.

pub mod input;
pub mod llm;
pub mod output;
pub mod script;
pub mod tool;

pub use input::{
    ASK_USER_TOOL, AskUserTool, DEFAULT_INPUT_TIMEOUT, InputError, InputSource, InputSourceDyn,
    read_input,
};
pub use llm::{LlmClient, LlmClientDyn};
pub use output::{DisplaySink, OutputValidator, TracingDisplaySink, ValidationPolicy};
pub use script::{ScriptError, ScriptExecutor, ScriptExecutorDyn, ScriptOutput, ScriptRequest};
pub use tool::{Tool, ToolDyn, ToolError, ToolRegistry};
