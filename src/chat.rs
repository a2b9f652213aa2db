use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::agent::EventSink;
use crate::session::ControllerSession;
use crate::streaming::LiveDisplay;
use crate::theme::Theme;

pub const EXIT_KEYWORDS: [&str; 4] = ["exit", "quit", "bye", "goodbye"];

pub fn is_exit_keyword(input: &str) -> bool {
    let trimmed = input.trim();
    EXIT_KEYWORDS
        .iter()
        .any(|keyword| trimmed.eq_ignore_ascii_case(keyword))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    Tools,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let command = trimmed
        .trim_start_matches('/')
        .split_whitespace()
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match command.as_str() {
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "tools" => ParsedChatCommand::Command(ChatCommand::Tools),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

/// How the chat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    Keyword,
    EndOfInput,
    Interrupted,
}

fn write_chat_help(out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "Chat commands:")?;
    writeln!(out, "- /help: show this reference")?;
    writeln!(out, "- /tools: list the enabled specialist agents")?;
    writeln!(out, "- /status: show model, turn count and history size")?;
    writeln!(out, "- exit, quit, bye, goodbye: end the session")?;
    writeln!(out)
}

fn write_chat_tools(session: &ControllerSession, out: &mut dyn Write) -> std::io::Result<()> {
    let delegations = session.controller().delegations();
    if delegations.is_empty() {
        writeln!(out, "No specialist agents are enabled.")?;
        return writeln!(out);
    }
    writeln!(out, "Specialist agents:")?;
    for tool in delegations.tools() {
        writeln!(out, "- {} ({} agent)", tool.name(), tool.agent())?;
    }
    writeln!(out)
}

fn write_chat_status(session: &ControllerSession, out: &mut dyn Write) -> std::io::Result<()> {
    let status = session.status();
    writeln!(out, "Model: {}", status.model)?;
    writeln!(
        out,
        "Specialists: {}",
        if status.specialists.is_empty() {
            "none".to_string()
        } else {
            status.specialists.join(", ")
        }
    )?;
    writeln!(out, "Turns: {}", status.turns)?;
    writeln!(out, "History messages: {}", status.messages)?;
    writeln!(out)
}

/// Reads user lines until an exit keyword or end of input. Turn failures are
/// reported on one line and the loop continues.
pub async fn run_chat<R>(
    session: &mut ControllerSession,
    mut input: R,
    out: &mut dyn Write,
    theme: Theme,
) -> Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        write!(out, "{}", theme.user_prompt())?;
        out.flush().context("failed to flush stdout")?;

        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read input from stdin")?;
        if read == 0 {
            writeln!(out)?;
            writeln!(out, "Goodbye!")?;
            return Ok(ChatExit::EndOfInput);
        }

        // Invalid UTF-8 is replaced rather than ending the session.
        let line = String::from_utf8_lossy(&buf);
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if is_exit_keyword(text) {
            writeln!(out, "Goodbye!")?;
            return Ok(ChatExit::Keyword);
        }

        match parse_chat_command(text) {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::Command(ChatCommand::Help) => {
                write_chat_help(out)?;
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Tools) => {
                write_chat_tools(session, out)?;
                continue;
            }
            ParsedChatCommand::Command(ChatCommand::Status) => {
                write_chat_status(session, out)?;
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                writeln!(out, "Unknown command '{command}'. Use /help.")?;
                continue;
            }
        }

        writeln!(out)?;
        writeln!(out, "{}", theme.assistant_header())?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let turn = async {
            let sink = EventSink::new(tx);
            session.handle(text, &sink).await
        };
        let display = LiveDisplay::new(&mut *out, theme);
        let (result, rendered) = tokio::join!(turn, display.drain(rx));
        rendered.context("failed to write assistant output")?;

        match result {
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "Turn failed");
                writeln!(out, "{}", theme.error_line(&format!("{err:#}")))?;
            }
        }
        writeln!(out)?;
    }
}

enum Ending {
    Chat(Result<ChatExit>),
    Interrupted(std::io::Result<()>),
}

/// Runs [`run_chat`] until it ends or `interrupt` resolves, then closes every
/// tool-server connection of the session on either path.
pub async fn run_session<R, I>(
    session: &mut ControllerSession,
    input: R,
    out: &mut dyn Write,
    theme: Theme,
    interrupt: I,
) -> Result<ChatExit>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = std::io::Result<()>>,
{
    let ending = tokio::select! {
        result = run_chat(&mut *session, input, &mut *out, theme) => Ending::Chat(result),
        signal = interrupt => Ending::Interrupted(signal),
    };

    let outcome = match ending {
        Ending::Chat(result) => result,
        Ending::Interrupted(signal) => signal
            .context("failed to listen for Ctrl-C")
            .and_then(|()| {
                tracing::info!("Interrupted; closing tool servers");
                writeln!(out)?;
                writeln!(out, "Goodbye!")?;
                out.flush()?;
                Ok(ChatExit::Interrupted)
            }),
    };

    let closed = session.shutdown().await;
    let exit = outcome?;
    closed?;
    Ok(exit)
}
