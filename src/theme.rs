//! ANSI styling for the console and the startup banner.

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const CYAN: &str = "\x1b[36m";
pub const GREEN: &str = "\x1b[32m";
pub const BOLD_CYAN: &str = "\x1b[1;36m";
pub const BOLD_GREEN: &str = "\x1b[1;32m";
pub const BOLD_RED: &str = "\x1b[1;31m";

/// Console labels, with or without color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub styled: bool,
}

impl Theme {
    pub fn new(styled: bool) -> Self {
        Self { styled }
    }

    pub fn plain() -> Self {
        Self { styled: false }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.styled {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    pub fn user_prompt(&self) -> String {
        format!("{} ", self.paint(BOLD_CYAN, "[You]"))
    }

    pub fn assistant_header(&self) -> String {
        self.paint(BOLD_GREEN, "[Assistant]")
    }

    pub fn error_line(&self, message: &str) -> String {
        format!("{} An error occurred: {message}", self.paint(BOLD_RED, "[Error]"))
    }

    pub fn progress_line(&self, agent: &str, query: &str) -> String {
        self.paint(DIM, &format!("→ {agent} agent: {query}"))
    }

    pub fn failure_line(&self, tool: &str, error: &str) -> String {
        self.paint(DIM, &format!("✗ {tool}: {error}"))
    }
}

/// Print the chat startup banner.
pub fn print_startup_banner(provider: &str, model: &str, specialists: &[String]) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "  {BOLD_CYAN}agent-army{RESET} {DIM}v{version}{RESET}  {DIM}·{RESET}  {GREEN}{provider}{RESET} {DIM}/{RESET} {GREEN}{model}{RESET}"
    );
    if specialists.is_empty() {
        println!("  {DIM}no specialists enabled{RESET}");
    } else {
        println!("  {DIM}specialists:{RESET} {BOLD}{}{RESET}", specialists.join(", "));
    }
    println!(
        "  {CYAN}/help{RESET} {DIM}commands{RESET}  {DIM}·{RESET}  {CYAN}/tools{RESET} {DIM}specialists{RESET}  {DIM}·{RESET}  {CYAN}exit{RESET} {DIM}quit{RESET}"
    );
    println!("  {DIM}{}{RESET}", "━".repeat(60));
    println!();
}

/// Strip ANSI escape sequences, e.g. to measure or compare visible text.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' {
            in_escape = true;
        } else if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else {
            out.push(c);
        }
    }
    out
}
