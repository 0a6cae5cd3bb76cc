//! FILENAME: core/cube-engine/src/literal.rs
//! Restricted literal syntax for tuple-valued wire fields.
//!
//! Grammar (nothing is ever evaluated):
//!   literal := int | float | string | True | False | None | nan | inf
//!            | b'..' | d'YYYY-MM-DD' | ts'YYYY-MM-DDTHH:MM:SS[.fff]' | dur'<secs>'
//!            | '(' [literal (',' literal)* [',']] ')'
//!
//! A parenthesized single literal without a trailing comma is the literal
//! itself; `(x,)` is a one-element tuple.

use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveDateTime};

use cube_core::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Duration(i64),
    Tuple(Vec<Literal>),
}

impl Literal {
    /// The scalar value of this literal, or `None` for tuples.
    pub fn into_value(self) -> Option<Value> {
        Some(match self {
            Literal::Int(i) => Value::Integer(i),
            Literal::Float(f) => Value::number(f),
            Literal::Str(s) => Value::Text(s),
            Literal::Bool(b) => Value::Boolean(b),
            Literal::None => Value::Null,
            Literal::Bytes(b) => Value::Bytes(b),
            Literal::Date(d) => Value::Date(d),
            Literal::Timestamp(ts) => Value::Timestamp(ts),
            Literal::Duration(secs) => Value::Duration(secs),
            Literal::Tuple(_) => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Why a literal failed to parse, with the byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralError {
    pub position: usize,
    pub message: String,
}

impl std::fmt::Display for LiteralError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for LiteralError {}

// ============================================================================
// PARSER
// ============================================================================

/// Parses one complete literal. Surrounding whitespace is allowed.
pub fn parse(input: &str) -> Result<Literal, LiteralError> {
    let mut parser = Parser { input, pos: 0 };
    let literal = parser.literal()?;
    parser.skip_whitespace();
    if parser.pos != input.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(literal)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn literal(&mut self) -> Result<Literal, LiteralError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("expected a literal")),
            Some('(') => self.tuple(),
            Some('\'') | Some('"') => self.string().map(Literal::Str),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.word(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    fn tuple(&mut self) -> Result<Literal, LiteralError> {
        self.bump();
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.bump();
                break;
            }
            items.push(self.literal()?);
            self.skip_whitespace();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(')') => {
                    trailing_comma = false;
                    break;
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Literal::Tuple(items))
    }

    fn number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        if self.rest().starts_with("inf") {
            self.pos += 3;
            let negative = self.input[start..].starts_with('-');
            return Ok(Literal::Float(if negative { f64::NEG_INFINITY } else { f64::INFINITY }));
        }
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '+' || c == '-')
        {
            // A sign only continues the token right after an exponent marker.
            if matches!(self.peek(), Some('+') | Some('-'))
                && !self.input[..self.pos].ends_with(&['e', 'E'][..])
            {
                break;
            }
            self.bump();
        }
        let token: String = self.input[start..self.pos].chars().filter(|c| *c != '_').collect();
        let is_float = token.contains(&['.', 'e', 'E'][..]);
        let parsed = if is_float {
            token.parse::<f64>().map(Literal::Float).ok()
        } else {
            token.parse::<i64>().map(Literal::Int).ok()
        };
        parsed.ok_or_else(|| LiteralError {
            position: start,
            message: format!("invalid number '{}'", token),
        })
    }

    fn word(&mut self) -> Result<Literal, LiteralError> {
        let input = self.input;
        let start = self.pos;
        while self.peek().map_or(false, |c| c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let word = &input[start..self.pos];

        if matches!(self.peek(), Some('\'') | Some('"')) {
            return self.prefixed(word, start);
        }
        match word {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            "nan" => Ok(Literal::Float(f64::NAN)),
            "inf" => Ok(Literal::Float(f64::INFINITY)),
            _ => Err(LiteralError {
                position: start,
                message: format!("unknown name '{}'", word),
            }),
        }
    }

    /// A typed string literal such as `d'2024-01-31'`.
    fn prefixed(&mut self, prefix: &str, start: usize) -> Result<Literal, LiteralError> {
        let fail = |message: String| LiteralError {
            position: start,
            message,
        };
        match prefix {
            "b" => self.bytes().map(Literal::Bytes),
            "d" => {
                let text = self.string()?;
                NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map(Literal::Date)
                    .map_err(|e| fail(format!("invalid date '{}': {}", text, e)))
            }
            "ts" => {
                let text = self.string()?;
                NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
                    .map(Literal::Timestamp)
                    .map_err(|e| fail(format!("invalid timestamp '{}': {}", text, e)))
            }
            "dur" => {
                let text = self.string()?;
                text.trim()
                    .parse::<i64>()
                    .map(Literal::Duration)
                    .map_err(|_| fail(format!("invalid duration '{}'", text)))
            }
            other => Err(fail(format!("unknown literal prefix '{}'", other))),
        }
    }

    /// A quoted string. Escapes: `\\ \' \" \n \r \t \0 \xNN \uNNNN`.
    fn string(&mut self) -> Result<String, LiteralError> {
        let mut out = String::new();
        self.quoted(|part| match part {
            Part::Char(c) => out.push(c),
            Part::Byte(b) => out.push(char::from(b)),
        })?;
        Ok(out)
    }

    /// A quoted byte string: characters must be ASCII, `\xNN` gives any byte.
    fn bytes(&mut self) -> Result<Vec<u8>, LiteralError> {
        let mut out = Vec::new();
        let mut non_ascii = false;
        self.quoted(|part| match part {
            Part::Char(c) if c.is_ascii() => out.push(c as u8),
            Part::Char(_) => non_ascii = true,
            Part::Byte(b) => out.push(b),
        })?;
        if non_ascii {
            return Err(self.error("bytes literal may only contain ASCII characters"));
        }
        Ok(out)
    }

    fn quoted(&mut self, mut emit: impl FnMut(Part)) -> Result<(), LiteralError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quote")),
        };
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(()),
                Some('\\') => match self.bump() {
                    Some('\\') => emit(Part::Char('\\')),
                    Some('\'') => emit(Part::Char('\'')),
                    Some('"') => emit(Part::Char('"')),
                    Some('n') => emit(Part::Char('\n')),
                    Some('r') => emit(Part::Char('\r')),
                    Some('t') => emit(Part::Char('\t')),
                    Some('0') => emit(Part::Byte(0)),
                    Some('x') => {
                        let code = self.hex_digits(2)?;
                        emit(Part::Byte(code as u8));
                    }
                    Some('u') => {
                        let code = self.hex_digits(4)?;
                        let c = char::from_u32(code).ok_or_else(|| self.error("invalid \\u escape"))?;
                        emit(Part::Char(c));
                    }
                    _ => return Err(self.error("invalid escape")),
                },
                Some(c) => emit(Part::Char(c)),
            }
        }
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, LiteralError> {
        let digits = self
            .rest()
            .get(..count)
            .filter(|d| d.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("expected hex digits"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| self.error("expected hex digits"))?;
        self.pos += count;
        Ok(code)
    }
}

enum Part {
    Char(char),
    Byte(u8),
}

// ============================================================================
// ENCODER
// ============================================================================

/// Renders a string literal, single-quoted.
pub fn encode_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out.push('\'');
    out
}

fn encode_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        // Debug output is the shortest text that parses back to the same
        // float, and always carries a '.' or an exponent.
        format!("{:?}", f)
    }
}

/// Renders a scalar value as a literal.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => encode_float(n.0),
        Value::Text(s) => encode_str(s),
        Value::Boolean(true) => "True".to_string(),
        Value::Boolean(false) => "False".to_string(),
        Value::Date(d) => format!("d'{}'", d.format(DATE_FORMAT)),
        Value::Timestamp(ts) => format!("ts'{}'", ts.format(TIMESTAMP_FORMAT)),
        Value::Duration(secs) => format!("dur'{}'", secs),
        Value::Bytes(b) => encode_bytes(b),
    }
}

/// Renders already-encoded items as a tuple; one item gets a trailing comma.
pub fn encode_tuple<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<S> = items.into_iter().collect();
    let joined = items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ");
    if items.len() == 1 {
        format!("({},)", joined)
    } else {
        format!("({})", joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(parse("42").unwrap(), Literal::Int(42));
        assert_eq!(parse("-7").unwrap(), Literal::Int(-7));
        assert_eq!(parse("1.5").unwrap(), Literal::Float(1.5));
        assert_eq!(parse("1e3").unwrap(), Literal::Float(1000.0));
        assert_eq!(parse("2.5e-3").unwrap(), Literal::Float(0.0025));
        assert_eq!(parse("-inf").unwrap(), Literal::Float(f64::NEG_INFINITY));
        assert!(matches!(parse("nan").unwrap(), Literal::Float(f) if f.is_nan()));
        assert_eq!(parse("True").unwrap(), Literal::Bool(true));
        assert_eq!(parse("None").unwrap(), Literal::None);
        assert_eq!(parse(" 'a b' ").unwrap(), Literal::Str("a b".into()));
        assert_eq!(parse(r#""it's""#).unwrap(), Literal::Str("it's".into()));
    }

    #[test]
    fn escapes() {
        assert_eq!(
            parse(r"'a\'b\\c\n\x01é'").unwrap(),
            Literal::Str("a'b\\c\n\u{1}é".into())
        );
        assert_eq!(parse(r"b'a\xff'").unwrap(), Literal::Bytes(vec![b'a', 0xff]));
        assert!(parse(r"'\q'").is_err());
        assert!(parse("b'é'").is_err());
    }

    #[test]
    fn typed_strings() {
        assert_eq!(
            parse("d'2024-02-29'").unwrap(),
            Literal::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 250)
            .unwrap();
        assert_eq!(parse("ts'2024-01-02T03:04:05.250'").unwrap(), Literal::Timestamp(ts));
        assert_eq!(parse("dur'3600'").unwrap(), Literal::Duration(3600));
        assert!(parse("d'2024-13-01'").is_err());
        assert!(parse("x'1'").is_err());
    }

    #[test]
    fn tuples() {
        assert_eq!(parse("()").unwrap(), Literal::Tuple(vec![]));
        assert_eq!(parse("('a',)").unwrap(), Literal::Tuple(vec![Literal::Str("a".into())]));
        assert_eq!(parse("('a')").unwrap(), Literal::Str("a".into()));
        assert_eq!(
            parse("(('amount', 'sum'), 'desc')").unwrap(),
            Literal::Tuple(vec![
                Literal::Tuple(vec![Literal::Str("amount".into()), Literal::Str("sum".into())]),
                Literal::Str("desc".into()),
            ])
        );
    }

    #[test]
    fn nothing_is_evaluated() {
        for input in ["__import__('os')", "1 + 1", "[1]", "{'a': 1}", "('a'", "'open", "1 2"] {
            assert!(parse(input).is_err(), "{} should not parse", input);
        }
    }

    #[test]
    fn encoder_output_parses_back() {
        let values = vec![
            Value::Null,
            Value::Integer(i64::MIN),
            Value::number(0.1),
            Value::number(-0.0),
            Value::number(1e300),
            Value::number(f64::NEG_INFINITY),
            Value::text("quote ' back \\ tab \t bell \u{7}"),
            Value::Boolean(false),
            Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()),
            Value::Duration(-90),
            Value::Bytes(vec![0, b'\'', 200]),
        ];
        for value in values {
            let text = encode_value(&value);
            let parsed = parse(&text).unwrap().into_value().unwrap();
            assert_eq!(parsed, value, "{}", text);
        }
    }

    #[test]
    fn singleton_tuples_keep_their_comma() {
        assert_eq!(encode_tuple(["'a'"]), "('a',)");
        assert_eq!(encode_tuple(["'a'", "1"]), "('a', 1)");
        assert_eq!(encode_tuple(Vec::<String>::new()), "()");
    }
}
