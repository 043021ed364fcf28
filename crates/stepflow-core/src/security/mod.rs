//! Script security checks.
//!
//! Scripts are validated line by line against denylists before they are
//! handed to a `ScriptExecutor`. Config-authored (trusted) scripts only hit
//! the destructive-command list; model- or step-generated (untrusted) scripts
//! also hit a strict list covering privilege, network, process and path access.

pub mod validator;

pub use validator::{ScriptSecurityValidator, SecurityError};
