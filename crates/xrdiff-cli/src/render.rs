//! Subprocess adapter for the injected render engine
//!
//! The engine is external to this tool. The adapter hands it the render
//! inputs as a YAML document on stdin and reads the rendered outputs back
//! from stdout. A failing engine may still report the requirements it
//! discovered; those are surfaced so the render loop can make progress.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use xrdiff_core::render::{RenderFailure, RenderInputs, RenderOutputs, Renderer};

pub struct ExecRenderer {
    program: String,
}

impl ExecRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Renderer for ExecRenderer {
    async fn render(&self, inputs: RenderInputs) -> Result<RenderOutputs, RenderFailure> {
        let payload = serde_yaml::to_string(&inputs)
            .map_err(|e| RenderFailure::new(format!("cannot serialize render inputs: {e}")))?;

        let mut words = self.program.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| RenderFailure::new("renderer command is empty"))?;

        let mut child = Command::new(program)
            .args(words)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RenderFailure::new(format!("cannot spawn renderer {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderFailure::new("renderer stdin unavailable"))?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| RenderFailure::new(format!("cannot write render inputs: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RenderFailure::new(format!("renderer did not complete: {e}")))?;

        let stdout_text = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return serde_yaml::from_str(&stdout_text)
                .map_err(|e| RenderFailure::new(format!("cannot parse renderer output: {e}")));
        }

        let stderr_text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = if stderr_text.is_empty() {
            format!("renderer exited with {}", output.status)
        } else {
            stderr_text
        };

        // A failed pass may still have discovered requirements.
        let requirements = serde_yaml::from_str::<RenderOutputs>(&stdout_text)
            .map(|o| o.requirements)
            .unwrap_or_default();

        Err(RenderFailure::with_requirements(reason, requirements))
    }
}
