//! Purpose: Render change events and diagnostics for the `pqs` terminal output.
//! Exports: `ColorMode`, `EventFormat`, `EventPrinter`, `paint`, `Tint`.
//! Role: Pure formatting plus a thin stdout writer used by the CLI loop.
//! Invariants: `jsonl` output is one compact JSON document per line, never colored.
//! Invariants: Uncolored `pretty` JSON equals `serde_json::to_string_pretty`.
use clap::ValueEnum;
use pqstream::api::ChangeEvent;
use serde_json::{Map, Value};
use std::io::{self, IsTerminal, Write};

const INDENT: &str = "  ";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EventFormat {
    Jsonl,
    Pretty,
}

#[derive(Copy, Clone, Debug)]
pub enum Tint {
    Red,
    Yellow,
    Cyan,
    Green,
    Magenta,
    Plain,
}

impl Tint {
    fn code(self) -> &'static str {
        match self {
            Tint::Red => "31",
            Tint::Yellow => "33",
            Tint::Cyan => "36",
            Tint::Green => "32",
            Tint::Magenta => "35",
            Tint::Plain => "39",
        }
    }
}

pub fn paint(text: &str, tint: Tint, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }
    format!("\u{1b}[{}m{text}\u{1b}[0m", tint.code())
}

pub struct EventPrinter {
    format: EventFormat,
    use_color: bool,
}

impl EventPrinter {
    pub fn new(format: EventFormat, color: ColorMode) -> Self {
        Self::with_color(format, color.use_color(io::stdout().is_terminal()))
    }

    pub fn with_color(format: EventFormat, use_color: bool) -> Self {
        Self { format, use_color }
    }

    pub fn render(&self, event: &ChangeEvent) -> String {
        match self.format {
            EventFormat::Jsonl => serde_json::to_string(event.as_value())
                .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string()),
            EventFormat::Pretty => {
                let body = PrettyJson::new(self.use_color).render(event.as_value());
                match summary_line(event, self.use_color) {
                    Some(summary) => format!("{summary}\n{body}"),
                    None => body,
                }
            }
        }
    }

    pub fn emit(&self, event: &ChangeEvent) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.render(event))?;
        out.flush()
    }
}

/// `INSERT public.orders` style header for pretty output.
fn summary_line(event: &ChangeEvent, use_color: bool) -> Option<String> {
    let table = event.table()?;
    let qualified = match event.schema() {
        Some(schema) if !schema.is_empty() => format!("{schema}.{table}"),
        _ => table.to_string(),
    };
    let op = event.op().unwrap_or("CHANGE");
    Some(format!(
        "{} {}",
        paint(op, Tint::Magenta, use_color),
        paint(&qualified, Tint::Cyan, use_color)
    ))
}

struct PrettyJson {
    use_color: bool,
    out: String,
}

impl PrettyJson {
    fn new(use_color: bool) -> Self {
        Self {
            use_color,
            out: String::new(),
        }
    }

    fn render(mut self, value: &Value) -> String {
        self.value(value, 0);
        self.out
    }

    fn value(&mut self, value: &Value, depth: usize) {
        match value {
            Value::Null => self.token("null", Tint::Plain),
            Value::Bool(flag) => self.token(if *flag { "true" } else { "false" }, Tint::Magenta),
            Value::Number(num) => self.token(&num.to_string(), Tint::Yellow),
            Value::String(text) => self.token(&quote(text), Tint::Green),
            Value::Array(items) => self.array(items, depth),
            Value::Object(map) => self.object(map, depth),
        }
    }

    fn array(&mut self, items: &[Value], depth: usize) {
        if items.is_empty() {
            self.token("[]", Tint::Plain);
            return;
        }
        self.token("[", Tint::Plain);
        for (idx, item) in items.iter().enumerate() {
            self.newline(depth + 1);
            self.value(item, depth + 1);
            if idx + 1 < items.len() {
                self.token(",", Tint::Plain);
            }
        }
        self.newline(depth);
        self.token("]", Tint::Plain);
    }

    fn object(&mut self, map: &Map<String, Value>, depth: usize) {
        if map.is_empty() {
            self.token("{}", Tint::Plain);
            return;
        }
        self.token("{", Tint::Plain);
        for (idx, (key, value)) in map.iter().enumerate() {
            self.newline(depth + 1);
            self.token(&quote(key), Tint::Cyan);
            self.token(":", Tint::Plain);
            self.out.push(' ');
            self.value(value, depth + 1);
            if idx + 1 < map.len() {
                self.token(",", Tint::Plain);
            }
        }
        self.newline(depth);
        self.token("}", Tint::Plain);
    }

    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
    }

    fn token(&mut self, text: &str, tint: Tint) {
        self.out.push_str(&paint(text, tint, self.use_color));
    }
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}
