use std::io::{self, Write};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::agent::TurnEvent;
use crate::markdown::MarkdownRenderer;
use crate::theme::Theme;

/// Folds [`TurnEvent`]s into console output as they arrive.
///
/// Text is rendered one completed line at a time; the unfinished tail is
/// held until its newline arrives or the turn ends.
pub struct LiveDisplay<'w> {
    out: &'w mut dyn Write,
    theme: Theme,
    renderer: MarkdownRenderer,
    pending: String,
}

impl<'w> LiveDisplay<'w> {
    pub fn new(out: &'w mut dyn Write, theme: Theme) -> Self {
        Self {
            out,
            theme,
            renderer: MarkdownRenderer::new(theme.styled),
            pending: String::new(),
        }
    }

    pub fn apply(&mut self, event: TurnEvent) -> io::Result<()> {
        match event {
            TurnEvent::TextDelta(delta) => {
                self.pending.push_str(&delta);
                while let Some(pos) = self.pending.find('\n') {
                    let line = self.pending[..pos].to_string();
                    self.pending.drain(..=pos);
                    self.renderer.render_line(&line, self.out)?;
                }
            }
            TurnEvent::DelegationStarted { agent, query } => {
                self.flush_pending()?;
                writeln!(self.out, "{}", self.theme.progress_line(&agent, &query))?;
            }
            TurnEvent::ToolFailed { name, error } => {
                self.flush_pending()?;
                writeln!(self.out, "{}", self.theme.failure_line(&name, &error))?;
            }
            TurnEvent::ToolCompleted { name } => {
                tracing::debug!(tool = %name, "Tool completed");
            }
        }
        self.out.flush()
    }

    /// Renders whatever text is still buffered and resets per-turn state.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.renderer.reset();
        self.out.flush()
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        self.renderer.render_line(&line, self.out)
    }

    /// Consumes events until every sender is gone, then finishes the turn.
    pub async fn drain(mut self, mut rx: UnboundedReceiver<TurnEvent>) -> io::Result<()> {
        let mut result = Ok(());
        while let Some(event) = rx.recv().await {
            // Keep receiving after a write error so the turn never stalls.
            if result.is_ok() {
                result = self.apply(event);
            }
        }
        result.and(self.finish())
    }
}
