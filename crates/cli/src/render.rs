//! Terminal rendering of agent events.
//!
//! Answer text goes to `out` (stdout) as it streams; everything else
//! (reasoning, tool activity, retries, errors) goes to `err` (stderr).

use std::io::{self, Write};

use astrolabe_agent::{AgentEvent, ErrorKind};

pub struct Renderer {
    show_reasoning: bool,
    in_reasoning: bool,
    wrote_content: bool,
}

impl Renderer {
    pub fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            in_reasoning: false,
            wrote_content: false,
        }
    }

    pub fn render(
        &mut self,
        event: &AgentEvent,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> io::Result<()> {
        match event {
            AgentEvent::ContentChunk { content } => {
                self.end_reasoning(err)?;
                write!(out, "{content}")?;
                out.flush()?;
                self.wrote_content = true;
            }
            AgentEvent::ReasoningChunk { content } if self.show_reasoning => {
                if !self.in_reasoning {
                    write!(err, "  [thinking] ")?;
                    self.in_reasoning = true;
                }
                write!(err, "{content}")?;
                err.flush()?;
            }
            AgentEvent::ReasoningChunk { .. } => {}
            AgentEvent::ToolCallsStarted { calls } => {
                self.end_content(out)?;
                self.end_reasoning(err)?;
                writeln!(err, "  [tools] {} call(s) requested", calls.len())?;
            }
            AgentEvent::ToolExecuting {
                name, arguments, ..
            } => {
                writeln!(err, "  [tool] {name} {arguments}")?;
            }
            AgentEvent::ToolResult {
                name,
                success,
                summary,
                ..
            } => {
                let mark = if *success { "ok" } else { "failed" };
                writeln!(err, "  [tool] {name} {mark}: {summary}")?;
            }
            AgentEvent::RetryInfo {
                attempt,
                max_attempts,
                delay_ms,
                reason,
            } => {
                writeln!(
                    err,
                    "  [retry {attempt}/{max_attempts}] in {delay_ms}ms: {reason}"
                )?;
            }
            AgentEvent::Error {
                kind,
                message,
                retryable,
            } => {
                self.end_content(out)?;
                self.end_reasoning(err)?;
                let label = match kind {
                    ErrorKind::Provider => "provider error",
                    ErrorKind::ToolIterationCeiling | ErrorKind::TotalIterationCeiling => {
                        "stopped"
                    }
                };
                let hint = if *retryable { " (you can try again)" } else { "" };
                writeln!(err, "  [{label}] {message}{hint}")?;
            }
            AgentEvent::Complete { content, .. } => {
                self.end_reasoning(err)?;
                // Print the final answer if nothing streamed, e.g. when
                // reasoning stood in for content.
                if !self.wrote_content {
                    write!(out, "{content}")?;
                    self.wrote_content = true;
                }
                self.end_content(out)?;
            }
            AgentEvent::TokenUsage { .. } | AgentEvent::ModelInfo { .. } => {}
        }
        Ok(())
    }

    fn end_content(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.wrote_content {
            writeln!(out)?;
            out.flush()?;
            self.wrote_content = false;
        }
        Ok(())
    }

    fn end_reasoning(&mut self, err: &mut impl Write) -> io::Result<()> {
        if self.in_reasoning {
            writeln!(err)?;
            self.in_reasoning = false;
        }
        Ok(())
    }
}
