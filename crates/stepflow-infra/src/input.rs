//! Line-based [`InputSource`] backed by any async reader (stdin by default).

use std::time::Duration;

use stepflow_core::ports::{AskUserTool, InputError, InputSource};
use stepflow_types::config::EngineConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Writes the prompt to stderr and reads one line from `reader`.
#[derive(Debug)]
pub struct LineInputSource<R> {
    reader: Mutex<R>,
}

impl<R> LineInputSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

impl LineInputSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> InputSource for LineInputSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn read_line(&self, prompt: &str) -> Result<String, InputError> {
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("{prompt} ").as_bytes())
            .await
            .map_err(|e| InputError::Io(e.to_string()))?;
        stderr
            .flush()
            .await
            .map_err(|e| InputError::Io(e.to_string()))?;

        let mut line = String::new();
        let read = self
            .reader
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| InputError::Io(e.to_string()))?;
        if read == 0 {
            return Err(InputError::Closed);
        }
        Ok(line)
    }
}

/// The `ask_user` tool reading from stdin with the configured timeout.
pub fn ask_user_tool(config: &EngineConfig) -> AskUserTool {
    AskUserTool::new(LineInputSource::stdin())
        .with_timeout(Duration::from_secs(config.input_timeout_secs))
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use stepflow_core::ports::Tool;

    use super::*;

    #[tokio::test]
    async fn reads_one_line_per_call() {
        let source = LineInputSource::new(BufReader::new(&b"first\nsecond\n"[..]));
        assert_eq!(source.read_line("?").await.unwrap(), "first\n");
        assert_eq!(source.read_line("?").await.unwrap(), "second\n");
        assert_eq!(source.read_line("?").await.unwrap_err(), InputError::Closed);
    }

    #[tokio::test]
    async fn ask_user_answers_as_response() {
        let tool = AskUserTool::new(LineInputSource::new(BufReader::new(&b"ship it\n"[..])));
        let mut params = Map::new();
        params.insert("prompt".into(), json!("next?"));
        assert_eq!(
            tool.execute(params).await.unwrap(),
            json!({ "response": "ship it" })
        );
    }

    #[test]
    fn stdin_tool_uses_configured_timeout() {
        let config = EngineConfig {
            input_timeout_secs: 5,
            ..EngineConfig::default()
        };
        let debug = format!("{:?}", ask_user_tool(&config));
        assert!(debug.contains("5s"), "{debug}");
    }
}
