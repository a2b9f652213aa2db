//! Line-at-a-time markdown rendering with winnow 0.7 + crossterm.
//!
//! Each complete line is classified as a block (heading, list item, quote,
//! rule, fence or paragraph) and its inline spans (`code`, **bold**,
//! *italic*) are styled. Fenced code is printed verbatim.
use std::io::{self, Write};

use crossterm::QueueableCommand;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use winnow::ascii::{digit1, space0, space1};
use winnow::combinator::{alt, delimited, eof, preceded, repeat, terminated};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::{rest, take, take_till, take_until, take_while};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block<'a> {
    Heading(usize, &'a str),
    Bullet(&'a str, &'a str),
    Numbered(&'a str, &'a str, &'a str),
    Quote(&'a str),
    Rule,
    Fence(&'a str),
    Paragraph(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span<'a> {
    Text(&'a str),
    Code(&'a str),
    Bold(&'a str),
    Italic(&'a str),
}

fn fence<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    preceded((space0, "```"), rest)
        .map(|lang: &str| Block::Fence(lang.trim()))
        .parse_next(i)
}

fn rule<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    (
        space0,
        alt((
            take_while(3.., '-'),
            take_while(3.., '*'),
            take_while(3.., '_'),
        )),
        space0,
        eof,
    )
        .map(|_| Block::Rule)
        .parse_next(i)
}

fn heading<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    let level = terminated(take_while(1..=6, '#'), space1).parse_next(i)?;
    let text = rest.parse_next(i)?;
    Ok(Block::Heading(level.len(), text))
}

fn bullet<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    (space0, alt(("-", "*", "+")), space1, rest)
        .map(|(indent, _, _, text)| Block::Bullet(indent, text))
        .parse_next(i)
}

fn numbered<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    (space0, digit1, ".", space1, rest)
        .map(|(indent, n, _, _, text)| Block::Numbered(indent, n, text))
        .parse_next(i)
}

fn quote<'a>(i: &mut &'a str) -> ModalResult<Block<'a>> {
    preceded((space0, ">", space0), rest)
        .map(Block::Quote)
        .parse_next(i)
}

pub fn classify_line(line: &str) -> Block<'_> {
    let mut input = line;
    alt((fence, rule, heading, bullet, numbered, quote))
        .parse_next(&mut input)
        .unwrap_or(Block::Paragraph(line))
}

fn code_span<'a>(i: &mut &'a str) -> ModalResult<Span<'a>> {
    delimited("`", take_until(1.., "`"), "`")
        .map(Span::Code)
        .parse_next(i)
}

fn bold_span<'a>(i: &mut &'a str) -> ModalResult<Span<'a>> {
    delimited("**", take_until(1.., "**"), "**")
        .map(Span::Bold)
        .parse_next(i)
}

fn italic_span<'a>(i: &mut &'a str) -> ModalResult<Span<'a>> {
    delimited("*", take_till(1.., '*'), "*")
        .map(Span::Italic)
        .parse_next(i)
}

fn plain_span<'a>(i: &mut &'a str) -> ModalResult<Span<'a>> {
    take_till(1.., ['`', '*']).map(Span::Text).parse_next(i)
}

fn stray_span<'a>(i: &mut &'a str) -> ModalResult<Span<'a>> {
    take(1usize).map(Span::Text).parse_next(i)
}

pub fn inline_spans(text: &str) -> Vec<Span<'_>> {
    let mut input = text;
    repeat(
        0..,
        alt((code_span, bold_span, italic_span, plain_span, stray_span)),
    )
    .parse_next(&mut input)
    .unwrap_or_else(|_: winnow::error::ErrMode<winnow::error::ContextError>| {
        vec![Span::Text(text)]
    })
}

/// Renders one line at a time; remembers whether it is inside a code fence.
#[derive(Debug, Default)]
pub struct MarkdownRenderer {
    styled: bool,
    in_code: bool,
}

impl MarkdownRenderer {
    pub fn new(styled: bool) -> Self {
        Self {
            styled,
            in_code: false,
        }
    }

    pub fn reset(&mut self) {
        self.in_code = false;
    }

    pub fn render_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if self.in_code {
            if matches!(classify_line(line), Block::Fence(_)) {
                self.in_code = false;
                return Ok(());
            }
            self.color(out, Color::Green)?;
            out.queue(Print(line))?;
            self.reset_style(out)?;
            return newline(out);
        }

        match classify_line(line) {
            Block::Fence(lang) => {
                self.in_code = true;
                if !lang.is_empty() {
                    self.attr(out, Attribute::Bold)?;
                    out.queue(Print(lang))?;
                    self.reset_style(out)?;
                    newline(out)?;
                }
                Ok(())
            }
            Block::Rule => {
                self.color(out, Color::DarkGrey)?;
                out.queue(Print("━".repeat(40)))?;
                self.reset_style(out)?;
                newline(out)
            }
            Block::Heading(_, text) => {
                self.color(out, Color::Magenta)?;
                self.attr(out, Attribute::Bold)?;
                out.queue(Print(text))?;
                self.reset_style(out)?;
                newline(out)
            }
            Block::Bullet(indent, text) => {
                out.queue(Print(format!("{indent}• ")))?;
                self.inline(text, out)?;
                newline(out)
            }
            Block::Numbered(indent, n, text) => {
                out.queue(Print(format!("{indent}{n}. ")))?;
                self.inline(text, out)?;
                newline(out)
            }
            Block::Quote(text) => {
                self.color(out, Color::DarkGrey)?;
                out.queue(Print("│ "))?;
                self.inline(text, out)?;
                self.reset_style(out)?;
                newline(out)
            }
            Block::Paragraph(text) => {
                self.inline(text, out)?;
                newline(out)
            }
        }
    }

    fn inline(&self, text: &str, out: &mut dyn Write) -> io::Result<()> {
        for span in inline_spans(text) {
            match span {
                Span::Text(t) => {
                    out.queue(Print(t))?;
                }
                Span::Code(t) => {
                    self.color(out, Color::Green)?;
                    out.queue(Print(t))?;
                    self.color(out, Color::Reset)?;
                }
                Span::Bold(t) => {
                    self.attr(out, Attribute::Bold)?;
                    out.queue(Print(t))?;
                    self.attr(out, Attribute::NormalIntensity)?;
                }
                Span::Italic(t) => {
                    self.attr(out, Attribute::Italic)?;
                    out.queue(Print(t))?;
                    self.attr(out, Attribute::NoItalic)?;
                }
            }
        }
        Ok(())
    }

    fn color(&self, out: &mut dyn Write, color: Color) -> io::Result<()> {
        if self.styled {
            out.queue(SetForegroundColor(color))?;
        }
        Ok(())
    }

    fn attr(&self, out: &mut dyn Write, attr: Attribute) -> io::Result<()> {
        if self.styled {
            out.queue(SetAttribute(attr))?;
        }
        Ok(())
    }

    fn reset_style(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.styled {
            out.queue(ResetColor)?;
            out.queue(SetAttribute(Attribute::Reset))?;
        }
        Ok(())
    }
}

fn newline(out: &mut dyn Write) -> io::Result<()> {
    out.queue(Print("\n"))?;
    Ok(())
}
