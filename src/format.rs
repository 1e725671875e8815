use std::fmt::{self, Write};

use chrono::{Local, TimeZone};

/// Renders an epoch-millisecond timestamp as `MMM dd, HH:mm` in local time.
pub fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%b %d, %H:%M").to_string(),
        None => "unknown time".to_string(),
    }
}

/// Cuts `text` to `max` characters, appending `...` when anything was dropped.
pub fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

pub fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Line-oriented text builder for tool reports.
#[derive(Debug, Default)]
pub struct Report {
    text: String,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl fmt::Display) {
        // writing into a String cannot fail
        let _ = writeln!(self.text, "{line}");
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    pub fn finish(self) -> String {
        self.text
    }
}
