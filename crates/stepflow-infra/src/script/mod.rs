//! Script execution on the host.

pub mod shell;
pub mod temp_file;

pub use shell::ShellScriptExecutor;
pub use temp_file::{TempFileError, TempScript, cleanup_temp_file};
