//! FILENAME: core/cube-core/src/number_format.rs
//! PURPOSE: Locale-aware display formatting for cube values.
//! CONTEXT: Renderers call `Cell::formatted` which lands here. Numbers are
//! always shown with two decimals and locale digit grouping; the other
//! variants get their locale-specific or fixed textual form.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::value::Value;

// ============================================================================
// LOCALE
// ============================================================================

/// Separators, words and date patterns for one display locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    /// BCP 47 style tag, e.g. "en-US".
    pub tag: String,
    pub decimal_separator: char,
    pub group_separator: char,
    pub yes: String,
    pub no: String,
    /// chrono pattern for dates.
    pub date_format: String,
    /// chrono pattern for timestamps.
    pub timestamp_format: String,
}

impl Locale {
    pub fn en_us() -> Self {
        Locale {
            tag: "en-US".to_string(),
            decimal_separator: '.',
            group_separator: ',',
            yes: "Yes".to_string(),
            no: "No".to_string(),
            date_format: "%m/%d/%Y".to_string(),
            timestamp_format: "%m/%d/%Y %H:%M".to_string(),
        }
    }

    pub fn en_gb() -> Self {
        Locale {
            tag: "en-GB".to_string(),
            date_format: "%d/%m/%Y".to_string(),
            timestamp_format: "%d/%m/%Y %H:%M".to_string(),
            ..Locale::en_us()
        }
    }

    pub fn de_de() -> Self {
        Locale {
            tag: "de-DE".to_string(),
            decimal_separator: ',',
            group_separator: '.',
            yes: "Ja".to_string(),
            no: "Nein".to_string(),
            date_format: "%d.%m.%Y".to_string(),
            timestamp_format: "%d.%m.%Y %H:%M".to_string(),
        }
    }

    pub fn fr_fr() -> Self {
        Locale {
            tag: "fr-FR".to_string(),
            decimal_separator: ',',
            group_separator: '\u{202f}',
            yes: "Oui".to_string(),
            no: "Non".to_string(),
            date_format: "%d/%m/%Y".to_string(),
            timestamp_format: "%d/%m/%Y %H:%M".to_string(),
        }
    }

    /// Looks up a built-in locale. Accepts `en-US`, `en_us`, `de`, ...
    pub fn from_tag(tag: &str) -> Option<Locale> {
        let normalized = tag.trim().replace('_', "-").to_ascii_lowercase();
        match normalized.as_str() {
            "en" | "en-us" => Some(Locale::en_us()),
            "en-gb" => Some(Locale::en_gb()),
            "de" | "de-de" => Some(Locale::de_de()),
            "fr" | "fr-fr" => Some(Locale::fr_fr()),
            _ => None,
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::en_us()
    }
}

// ============================================================================
// FORMAT OPTIONS
// ============================================================================

/// Everything `format_value` needs besides the value itself.
#[derive(Debug, Clone)]
pub struct FormatOptions<'a> {
    pub locale: &'a Locale,
    /// MIME type written into `data:` URIs for byte payloads.
    pub bytes_mime: &'a str,
    /// Convert newlines in text to `<br>`.
    pub html: bool,
}

pub const DEFAULT_BYTES_MIME: &str = "application/octet-stream";

impl<'a> FormatOptions<'a> {
    pub fn new(locale: &'a Locale) -> Self {
        FormatOptions {
            locale,
            bytes_mime: DEFAULT_BYTES_MIME,
            html: true,
        }
    }

    pub fn with_mime(mut self, mime: &'a str) -> Self {
        self.bytes_mime = mime;
        self
    }

    pub fn plain_text(mut self) -> Self {
        self.html = false;
        self
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Formats a value for display.
pub fn format_value(value: &Value, options: &FormatOptions<'_>) -> String {
    let locale = options.locale;
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => format_integer(*i, locale),
        Value::Number(n) => format_fixed(n.0, 2, locale),
        Value::Boolean(b) => {
            if *b {
                locale.yes.clone()
            } else {
                locale.no.clone()
            }
        }
        Value::Date(d) => d.format(&locale.date_format).to_string(),
        Value::Timestamp(ts) => ts.format(&locale.timestamp_format).to_string(),
        Value::Duration(secs) => format_duration(*secs),
        Value::Bytes(bytes) => format!("data:{};base64,{}", options.bytes_mime, STANDARD.encode(bytes)),
        Value::Text(s) => {
            if options.html {
                s.replace("\r\n", "\n").replace('\n', "<br>")
            } else {
                s.clone()
            }
        }
    }
}

/// Format a number with fixed decimal places and locale separators.
pub fn format_fixed(value: f64, decimal_places: usize, locale: &Locale) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = format!("{:.prec$}", value, prec = decimal_places);
    localize(&rounded, locale)
}

/// Integers skip the float round-trip so large values keep every digit.
fn format_integer(value: i64, locale: &Locale) -> String {
    localize(&format!("{}.00", value), locale)
}

/// Rewrites a `-1234.56` style string with locale grouping and decimal marks.
fn localize(s: &str, locale: &Locale) -> String {
    let (integer_part, decimal_part) = match s.split_once('.') {
        Some((i, d)) => (i, Some(d)),
        None => (s, None),
    };

    let negative = integer_part.starts_with('-');
    let digits: Vec<char> = integer_part.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut result = String::new();
    if negative {
        result.push('-');
    }
    let len = digits.len();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(locale.group_separator);
        }
        result.push(*c);
    }

    if let Some(decimal) = decimal_part {
        result.push(locale.decimal_separator);
        result.push_str(decimal);
    }

    result
}

/// `H:MM` rendering of a duration in seconds. Seconds are truncated.
pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total_minutes = seconds.unsigned_abs() / 60;
    format!("{}{}:{:02}", sign, total_minutes / 60, total_minutes % 60)
}
