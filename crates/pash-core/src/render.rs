use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use unicode_width::UnicodeWidthStr;

use crate::annotations::{ItemColors, ItemKind};
use crate::config::Config;
use crate::notes::NoteView;
use crate::settings::{SettingKey, Settings};
use crate::ui::{NoticeLevel, UiEvent};
use crate::weather::WeatherPanel;

const PREVIEW_WIDTH: usize = 60;

/// `color` is the configured preference; output is only painted when the
/// stream it goes to is a terminal, see [`Renderer::for_stream`].
#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self { color: cfg.color }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn colored(&self) -> bool {
        self.color
    }

    /// A renderer that paints only if colour is on and `stream` is a terminal.
    pub fn for_stream<S: IsTerminal>(&self, stream: &S) -> Self {
        Self {
            color: self.color && stream.is_terminal(),
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn write_settings<W: Write>(&self, out: W, settings: &Settings) -> anyhow::Result<()> {
        let headers = vec!["Setting".to_string(), "Value".to_string()];
        let mut rows = Vec::new();

        for key in SettingKey::ALL {
            let value = settings
                .get(key.as_str())
                .map(display_value)
                .unwrap_or_default();
            let value = match key {
                SettingKey::ClientId | SettingKey::ApiKey | SettingKey::WeatherApiKey => {
                    mask_secret(&value)
                }
                _ => value,
            };
            rows.push(vec![self.paint(key.as_str(), "33"), value]);
        }

        // Keys written by newer versions are kept and shown as-is.
        for (name, value) in settings.iter() {
            if SettingKey::from_name(name).is_none() {
                rows.push(vec![self.paint(name, "2"), display_value(value)]);
            }
        }

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn write_notes<W: Write>(
        &self,
        mut out: W,
        notes: &[NoteView],
        colors: &ItemColors,
    ) -> anyhow::Result<()> {
        if notes.is_empty() {
            writeln!(out, "No notes.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Pin".to_string(),
            "Updated".to_string(),
            "Color".to_string(),
            "Note".to_string(),
        ];
        let rows = notes
            .iter()
            .map(|view| {
                let note = &view.note;
                let id = note.id.to_string();
                vec![
                    self.paint(&id, "33"),
                    if note.pinned { "*".to_string() } else { String::new() },
                    note.timestamp
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M")
                        .to_string(),
                    colors
                        .get(ItemKind::Note, &id)
                        .unwrap_or_default()
                        .to_string(),
                    preview(&plain_text(&note.content), PREVIEW_WIDTH),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_panes<W: Write>(&self, out: W, panes: &[String]) -> anyhow::Result<()> {
        let headers = vec!["#".to_string(), "Pane".to_string()];
        let rows = panes
            .iter()
            .enumerate()
            .map(|(idx, pane)| vec![(idx + 1).to_string(), pane.clone()])
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_weather<W: Write>(&self, mut out: W, panel: &WeatherPanel) -> anyhow::Result<()> {
        match panel {
            WeatherPanel::Unavailable(_) => writeln!(out, "{}", self.paint(&panel.to_string(), "31"))?,
            WeatherPanel::Cached { stale: true, .. } => {
                writeln!(out, "{}", self.paint(&panel.to_string(), "33"))?
            }
            _ => writeln!(out, "{panel}")?,
        }
        Ok(())
    }

    /// Writes notices from `events`; everything else is left to the log.
    pub fn write_notices<W: Write>(&self, mut out: W, events: &[UiEvent]) -> anyhow::Result<()> {
        for event in events {
            let UiEvent::Notice(notice) = event else {
                continue;
            };
            let code = match notice.level {
                NoticeLevel::Info => "36",
                NoticeLevel::Success => "32",
                NoticeLevel::Warning => "33",
                NoticeLevel::Error => "31",
            };
            writeln!(out, "{}", self.paint(&notice.message, code))?;
        }
        Ok(())
    }

    pub fn print_notices(&self, events: &[UiEvent]) -> anyhow::Result<()> {
        let stderr = io::stderr();
        self.for_stream(&stderr).write_notices(stderr.lock(), events)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(true) => "on".to_string(),
        serde_json::Value::Bool(false) => "off".to_string(),
        other => other.to_string(),
    }
}

/// Credentials keep their last four characters visible, but only when at
/// least eight characters remain hidden.
fn mask_secret(value: &str) -> String {
    const VISIBLE: usize = 4;
    const MIN_HIDDEN: usize = 8;

    let len = value.chars().count();
    if len == 0 {
        return String::new();
    }
    if len < VISIBLE + MIN_HIDDEN {
        return "********".to_string();
    }
    let tail: String = value
        .chars()
        .rev()
        .take(VISIBLE)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

fn tag_re() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

/// Flattens rich-text note markup to a single line.
pub fn plain_text(content: &str) -> String {
    let stripped = match tag_re() {
        Some(re) => re.replace_all(content, " ").into_owned(),
        None => content.to_string(),
    };
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn preview(text: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

pub fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
