//! Recursive-descent parser for the interpreter's literal syntax.
//!
//! Accepts exactly what `repr()` prints for the supported kinds, plus
//! records of the form `TypeName(field=value, ...)`. Nothing is ever
//! evaluated: anything outside the grammar is an error, and [`decode`]
//! turns that error into [`Value::Opaque`].

use crate::domain::value::{Record, Value};
use thiserror::Error;

/// Deepest container nesting accepted before parsing gives up.
pub const MAX_DEPTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected character {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("unknown name '{name}' at offset {offset}")]
    UnknownName { name: String, offset: usize },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("trailing input at offset {offset}")]
    Trailing { offset: usize },

    #[error("nesting deeper than {MAX_DEPTH} at offset {offset}")]
    TooDeep { offset: usize },
}

/// Parse `text` as a single literal, strictly.
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser::new(text);
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.src.len() {
        return Err(LiteralError::Trailing { offset: parser.pos });
    }
    Ok(value)
}

/// Best-effort decode: the literal if `text` is one, otherwise the text
/// itself as [`Value::Opaque`]. Never fails.
pub fn decode(text: &str) -> Value {
    parse_literal(text.trim()).unwrap_or_else(|_| Value::Opaque(text.to_string()))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn unexpected(&self) -> LiteralError {
        match self.peek() {
            Some(found) => LiteralError::Unexpected {
                found,
                offset: self.pos,
            },
            None => LiteralError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), LiteralError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// Consume `c` (after whitespace) if it is next.
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(LiteralError::TooDeep { offset: self.pos });
        }
        self.depth += 1;
        let value = self.nested_value();
        self.depth -= 1;
        value
    }

    fn nested_value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek().ok_or(LiteralError::UnexpectedEnd)? {
            '\'' | '"' => self.string().map(Value::Str),
            'b' | 'B' if matches!(self.rest()[1..].chars().next(), Some('\'' | '"')) => {
                self.pos += 1;
                self.bytes().map(Value::Bytes)
            }
            '(' => self.paren(String::new()),
            '[' => {
                self.pos += 1;
                self.items(']').map(Value::List)
            }
            '{' => self.brace(),
            '-' | '+' | '0'..='9' | '.' => self.number(),
            c if c.is_alphabetic() || c == '_' => self.named(),
            _ => Err(self.unexpected()),
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn dotted_identifier(&mut self) -> &'a str {
        let start = self.pos;
        loop {
            self.identifier();
            let after_dot = self.rest().strip_prefix('.');
            match after_dot.and_then(|r| r.chars().next()) {
                Some(c) if c.is_alphabetic() || c == '_' => self.pos += 1,
                _ => break,
            }
        }
        &self.src[start..self.pos]
    }

    /// Keywords, the set/frozenset/float constructors, and records.
    fn named(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        let name = self.dotted_identifier();
        match name {
            "None" => return Ok(Value::None),
            "True" => return Ok(Value::Bool(true)),
            "False" => return Ok(Value::Bool(false)),
            "inf" => return Ok(Value::Float(f64::INFINITY)),
            "nan" => return Ok(Value::Float(f64::NAN)),
            _ => {}
        }

        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(LiteralError::UnknownName {
                name: name.to_string(),
                offset: start,
            });
        }

        match name {
            "set" | "frozenset" => {
                self.pos += 1;
                let items = if self.eat(')') {
                    Vec::new()
                } else {
                    let inner = self.value()?;
                    self.expect(')')?;
                    match inner {
                        Value::Set(items) | Value::List(items) | Value::Tuple(items) => items,
                        Value::Dict(entries) if entries.is_empty() => Vec::new(),
                        _ => return Err(LiteralError::Unexpected { found: '(', offset: start }),
                    }
                };
                Ok(if name == "set" {
                    Value::Set(items)
                } else {
                    Value::FrozenSet(items)
                })
            }
            "float" => {
                self.pos += 1;
                self.skip_ws();
                let text = self.string()?;
                self.expect(')')?;
                parse_special_float(&text).ok_or(LiteralError::InvalidNumber { text })
            }
            _ => match self.paren(name.to_string())? {
                value @ Value::Record(_) => Ok(value),
                _ => Err(LiteralError::UnknownName {
                    name: name.to_string(),
                    offset: start,
                }),
            },
        }
    }

    /// Lookahead: does `identifier =` (not `==`) start here?
    fn at_field(&self) -> bool {
        let rest = self.rest().trim_start();
        let ident_len = rest
            .char_indices()
            .find(|&(_, c)| !(c.is_alphanumeric() || c == '_'))
            .map_or(rest.len(), |(i, _)| i);
        if ident_len == 0 || rest.starts_with(|c: char| c.is_ascii_digit()) {
            return false;
        }
        let after = rest[ident_len..].trim_start();
        after.starts_with('=') && !after.starts_with("==")
    }

    /// A parenthesised tuple, or a record when fields follow.
    fn paren(&mut self, type_name: String) -> Result<Value, LiteralError> {
        self.expect('(')?;
        if !self.at_field() {
            if !type_name.is_empty() {
                return Err(self.unexpected());
            }
            return self.tuple();
        }

        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            let field = self.identifier().to_string();
            self.expect('=')?;
            let value = self.value()?;
            fields.push((field, value));
            if self.eat(',') {
                if self.eat(')') {
                    break;
                }
                continue;
            }
            self.expect(')')?;
            break;
        }
        Ok(Value::Record(Record::new(type_name, fields)))
    }

    fn tuple(&mut self) -> Result<Value, LiteralError> {
        if self.eat(')') {
            return Ok(Value::Tuple(Vec::new()));
        }
        let first = self.value()?;
        if self.eat(')') {
            // `(x)` is just a parenthesised x
            return Ok(first);
        }
        self.expect(',')?;
        let mut items = vec![first];
        items.extend(self.items(')')?);
        Ok(Value::Tuple(items))
    }

    /// Comma-separated values up to `close`, trailing comma allowed.
    fn items(&mut self, close: char) -> Result<Vec<Value>, LiteralError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn brace(&mut self) -> Result<Value, LiteralError> {
        self.expect('{')?;
        if self.eat('}') {
            return Ok(Value::Dict(Vec::new()));
        }
        let first = self.value()?;
        if !self.eat(':') {
            let mut items = vec![first];
            if self.eat(',') {
                items.extend(self.items('}')?);
            } else {
                self.expect('}')?;
            }
            return Ok(Value::Set(items));
        }

        let mut entries = vec![(first, self.value()?)];
        loop {
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
            if self.eat('}') {
                break;
            }
            let key = self.value()?;
            self.expect(':')?;
            entries.push((key, self.value()?));
        }
        Ok(Value::Dict(entries))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        let unsigned = self.rest();
        if unsigned.starts_with("inf") || unsigned.starts_with("nan") {
            let negative = self.src[start..].starts_with('-');
            self.pos += 3;
            return Ok(Value::Float(match (&unsigned[..3], negative) {
                ("inf", false) => f64::INFINITY,
                ("inf", true) => f64::NEG_INFINITY,
                _ => f64::NAN,
            }));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-' | '+')) {
                        self.pos += 1;
                    }
                    continue;
                }
                _ => break,
            }
            self.pos += 1;
        }

        let text = &self.src[start..self.pos];
        let cleaned = text.replace('_', "");
        let invalid = || LiteralError::InvalidNumber {
            text: text.to_string(),
        };
        if is_float {
            cleaned.parse::<f64>().map(Value::Float).map_err(|_| invalid())
        } else {
            cleaned.parse::<i64>().map(Value::Int).map_err(|_| invalid())
        }
    }

    fn quote(&mut self) -> Result<char, LiteralError> {
        match self.bump() {
            Some(q @ ('\'' | '"')) => Ok(q),
            Some(found) => Err(LiteralError::Unexpected {
                found,
                offset: self.pos - found.len_utf8(),
            }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<u32, LiteralError> {
        let offset = self.pos;
        let text = self
            .rest()
            .get(..digits)
            .ok_or(LiteralError::InvalidEscape { offset })?;
        let code =
            u32::from_str_radix(text, 16).map_err(|_| LiteralError::InvalidEscape { offset })?;
        self.pos += digits;
        Ok(code)
    }

    fn octal_escape(&mut self, first: char) -> u32 {
        let mut code = first.to_digit(8).unwrap_or(0);
        for _ in 0..2 {
            match self.peek().and_then(|c| c.to_digit(8)) {
                Some(d) => {
                    code = code * 8 + d;
                    self.pos += 1;
                }
                None => break,
            }
        }
        code
    }

    /// Shared escape handling; returns the code point (or byte value).
    fn escape(&mut self, unicode: bool) -> Result<u32, LiteralError> {
        let offset = self.pos;
        let c = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
        Ok(match c {
            '\\' => 0x5c,
            '\'' => 0x27,
            '"' => 0x22,
            'n' => 0x0a,
            'r' => 0x0d,
            't' => 0x09,
            'a' => 0x07,
            'b' => 0x08,
            'f' => 0x0c,
            'v' => 0x0b,
            'x' => self.hex_escape(2)?,
            'u' if unicode => self.hex_escape(4)?,
            'U' if unicode => self.hex_escape(8)?,
            '0'..='7' => self.octal_escape(c),
            _ => return Err(LiteralError::InvalidEscape { offset }),
        })
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.quote()?;
        let mut out = String::new();
        loop {
            match self.bump().ok_or(LiteralError::UnexpectedEnd)? {
                c if c == quote => return Ok(out),
                '\\' => {
                    let offset = self.pos;
                    let code = self.escape(true)?;
                    out.push(char::from_u32(code).ok_or(LiteralError::InvalidEscape { offset })?);
                }
                c => out.push(c),
            }
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, LiteralError> {
        let quote = self.quote()?;
        let mut out = Vec::new();
        loop {
            let offset = self.pos;
            match self.bump().ok_or(LiteralError::UnexpectedEnd)? {
                c if c == quote => return Ok(out),
                '\\' => {
                    let code = self.escape(false)?;
                    let byte =
                        u8::try_from(code).map_err(|_| LiteralError::InvalidEscape { offset })?;
                    out.push(byte);
                }
                c if c.is_ascii() => out.push(c as u8),
                found => return Err(LiteralError::Unexpected { found, offset }),
            }
        }
    }
}

fn parse_special_float(text: &str) -> Option<Value> {
    match text.trim().to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Some(Value::Float(f64::INFINITY)),
        "-inf" | "-infinity" => Some(Value::Float(f64::NEG_INFINITY)),
        "nan" | "+nan" | "-nan" => Some(Value::Float(f64::NAN)),
        other => other.parse::<f64>().ok().map(Value::Float),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::UNAME_FIELDS;
    use proptest::prelude::*;

    #[test]
    fn test_scalars() {
        assert_eq!(parse_literal("None").unwrap(), Value::None);
        assert_eq!(parse_literal(" True ").unwrap(), Value::Bool(true));
        assert_eq!(parse_literal("-42").unwrap(), Value::Int(-42));
        assert_eq!(parse_literal("4.2").unwrap(), Value::Float(4.2));
        assert_eq!(parse_literal("1e+20").unwrap(), Value::Float(1e20));
        assert_eq!(parse_literal("-inf").unwrap(), Value::Float(f64::NEG_INFINITY));
        assert_eq!(parse_literal("float('inf')").unwrap(), Value::Float(f64::INFINITY));
        assert!(matches!(parse_literal("nan").unwrap(), Value::Float(x) if x.is_nan()));
    }

    #[test]
    fn test_strings_and_bytes() {
        assert_eq!(parse_literal(r"'it\'s'").unwrap(), Value::from("it's"));
        assert_eq!(parse_literal(r#""it's""#).unwrap(), Value::from("it's"));
        assert_eq!(parse_literal(r"'é\n'").unwrap(), Value::from("é\n"));
        assert_eq!(parse_literal("''").unwrap(), Value::from(""));
        assert_eq!(
            parse_literal(r"b'\x00\xffHello'").unwrap(),
            Value::Bytes(b"\x00\xffHello".to_vec())
        );
        assert!(parse_literal("b'é'").is_err());
    }

    #[test]
    fn test_containers() {
        assert_eq!(parse_literal("()").unwrap(), Value::Tuple(vec![]));
        assert_eq!(parse_literal("(1,)").unwrap(), Value::Tuple(vec![1.into()]));
        assert_eq!(parse_literal("(1)").unwrap(), Value::Int(1));
        assert_eq!(
            parse_literal("[1, [2, 3]]").unwrap(),
            Value::List(vec![1.into(), Value::List(vec![2.into(), 3.into()])])
        );
        assert_eq!(parse_literal("{}").unwrap(), Value::Dict(vec![]));
        assert_eq!(
            parse_literal("{'b': 2, 'a': 1}").unwrap(),
            Value::Dict(vec![("a".into(), 1.into()), ("b".into(), 2.into())])
        );
        assert_eq!(parse_literal("{2, 1}").unwrap(), Value::Set(vec![1.into(), 2.into()]));
        assert_eq!(parse_literal("set()").unwrap(), Value::Set(vec![]));
        assert_eq!(
            parse_literal("frozenset({1, 2})").unwrap(),
            Value::FrozenSet(vec![1.into(), 2.into()])
        );
        assert_eq!(
            parse_literal("((), {'a': 3})").unwrap(),
            Value::Tuple(vec![Value::Tuple(vec![]), Value::Dict(vec![("a".into(), 3.into())])])
        );
    }

    #[test]
    fn test_records() {
        let value = parse_literal("Point(x=11, y=22)").unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record.type_name(), "Point");
        assert_eq!(record.get("x"), Some(&Value::Int(11)));

        // commas and equals inside nested literals do not split fields
        let value = parse_literal("Msg(text='a=1, b=2', pair=(1, 2))").unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record.get("text"), Some(&Value::from("a=1, b=2")));
        assert_eq!(record.get("pair"), Some(&Value::Tuple(vec![1.into(), 2.into()])));
    }

    #[test]
    fn test_record_fixups() {
        let uname = "(sysname='samd21', nodename='samd21', release='3.0.0', \
                     version='3.0.0 on 2018-07-09', machine='Feather M0 Express')";
        let value = parse_literal(uname).unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record.type_name(), "posix.uname_result");
        assert_eq!(record.field_names().collect::<Vec<_>>(), UNAME_FIELDS);

        let value = parse_literal("(a=1)").unwrap();
        assert_eq!(value.as_record().unwrap().type_name(), "anonymous");

        let value = parse_literal("struct_time(tm_year=2000, tm_mon=1)").unwrap();
        assert_eq!(value.as_record().unwrap().type_name(), "time.struct_time");

        let value = parse_literal("os.stat_result(st_mode=16384)").unwrap();
        assert_eq!(value.as_record().unwrap().type_name(), "os.stat_result");
    }

    #[test]
    fn test_rejects_non_literals() {
        assert!(parse_literal("<function f at 0x20001234>").is_err());
        assert!(parse_literal("__import__('os').remove('x')").is_err());
        assert!(parse_literal("a == b").is_err());
        assert!(parse_literal("Point()").is_err());
        assert!(parse_literal("[1, 2").is_err());
        assert!(parse_literal("1 2").is_err());
        assert!(parse_literal("99999999999999999999").is_err());
    }

    #[test]
    fn test_decode_falls_back_to_opaque() {
        assert_eq!(decode("[1, 2]\r\n"), Value::List(vec![1.into(), 2.into()]));
        assert_eq!(
            decode("<Pin object>"),
            Value::Opaque("<Pin object>".to_string())
        );
    }

    fn nested_lists(depth: usize) -> String {
        format!("{}1{}", "[".repeat(depth), "]".repeat(depth))
    }

    #[test]
    fn test_nesting_limit() {
        assert!(parse_literal(&nested_lists(MAX_DEPTH - 1)).is_ok());
        assert!(matches!(
            parse_literal(&nested_lists(MAX_DEPTH)),
            Err(LiteralError::TooDeep { offset }) if offset == MAX_DEPTH
        ));

        // Far past the limit: an error, not a stack overflow
        let hostile = format!("{}{}", "(".repeat(100_000), "[{".repeat(100_000));
        assert!(matches!(parse_literal(&hostile), Err(LiteralError::TooDeep { .. })));
        assert_eq!(decode(&hostile), Value::Opaque(hostile.clone()));
    }

    fn ident() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,8}".prop_filter("not a keyword", |s| {
            !matches!(s.as_str(), "inf" | "nan" | "set" | "frozenset" | "float")
        })
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::None),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>()
                .prop_filter("nan never equals itself", |x| !x.is_nan())
                .prop_map(Value::Float),
            prop::collection::vec(any::<u8>(), 0..12).prop_map(Value::Bytes),
            any::<String>().prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::vec((inner.clone(), inner.clone()), 0..4).prop_map(Value::Dict),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Set),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::FrozenSet),
                (ident(), prop::collection::vec((ident(), inner), 1..4))
                    .prop_map(|(name, fields)| Value::Record(Record::new(name, fields))),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_literal_roundtrip(value in arb_value()) {
            let text = value.to_string();
            let parsed = parse_literal(&text);
            prop_assert_eq!(parsed, Ok(value), "literal: {}", text);
        }
    }
}
