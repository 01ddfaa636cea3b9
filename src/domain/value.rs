use std::fmt::{self, Write as _};

/// Field names of the interpreter's `os.uname()` result.
pub const UNAME_FIELDS: [&str; 5] = ["sysname", "nodename", "release", "version", "machine"];

/// Type name given to records printed without one.
pub const ANONYMOUS_RECORD: &str = "anonymous";

/// A value decoded from, or encoded into, the interpreter's literal syntax.
///
/// `Display` renders the literal form, which is also what gets pasted into
/// the device as call arguments.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    Record(Record),
    /// Text that is not a literal; kept verbatim.
    Opaque(String),
}

/// A named-tuple-like value: `TypeName(field=value, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Builds a record, normalising the type name of well-known remote types.
    pub fn new(type_name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        let type_name = fixup_type_name(&type_name.into(), &fields);
        Self { type_name, fields }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

fn fixup_type_name(type_name: &str, fields: &[(String, Value)]) -> String {
    if type_name == "struct_time" {
        return "time.struct_time".to_string();
    }
    if fields.len() == UNAME_FIELDS.len()
        && fields.iter().zip(UNAME_FIELDS).all(|((name, _), expected)| name == expected)
    {
        return "posix.uname_result".to_string();
    }
    if type_name.is_empty() {
        return ANONYMOUS_RECORD.to_string();
    }
    type_name.to_string()
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Items of a tuple, list, set or frozen set.
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items)
            | Value::List(items)
            | Value::Set(items)
            | Value::FrozenSet(items) => {
                Some(items)
            }
            _ => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Value::Opaque(_))
    }

    /// Whether the value can be written back as a literal.
    pub fn is_encodable(&self) -> bool {
        match self {
            Value::Opaque(_) => false,
            Value::Tuple(items)
            | Value::List(items)
            | Value::Set(items)
            | Value::FrozenSet(items) => {
                items.iter().all(Value::is_encodable)
            }
            Value::Dict(entries) => entries
                .iter()
                .all(|(k, v)| k.is_encodable() && v.is_encodable()),
            Value::Record(record) => record.fields.iter().all(|(_, v)| v.is_encodable()),
            _ => true,
        }
    }
}

/// Order-insensitive comparison with multiplicity.
fn same_elements<T, F>(left: &[T], right: &[T], eq: F) -> bool
where
    F: Fn(&T, &T) -> bool,
{
    if left.len() != right.len() {
        return false;
    }
    let mut used = vec![false; right.len()];
    left.iter().all(|l| {
        match right
            .iter()
            .enumerate()
            .position(|(i, r)| !used[i] && eq(l, r))
        {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) | (Value::FrozenSet(a), Value::FrozenSet(b)) => {
                same_elements(a, b, |x, y| x == y)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                same_elements(a, b, |(ka, va), (kb, vb)| ka == kb && va == vb)
            }
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

fn write_str_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('\'')?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 || ('\u{7f}'..='\u{9f}').contains(&c) => {
                write!(f, "\\x{:02x}", c as u32)?
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char('\'')
}

fn write_bytes_literal(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("b'")?;
    for &b in bytes {
        match b {
            b'\\' => f.write_str("\\\\")?,
            b'\'' => f.write_str("\\'")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            0x20..=0x7e => f.write_char(b as char)?,
            _ => write!(f, "\\x{:02x}", b)?,
        }
    }
    f.write_char('\'')
}

fn write_float_literal(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("float('nan')")
    } else if x.is_infinite() {
        if x > 0.0 {
            f.write_str("float('inf')")
        } else {
            f.write_str("float('-inf')")
        }
    } else {
        // Debug is the shortest text that parses back to the same bits
        write!(f, "{:?}", x)
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write_float_literal(f, *x),
            Value::Bytes(b) => write_bytes_literal(f, b),
            Value::Str(s) => write_str_literal(f, s),
            Value::Tuple(items) => {
                f.write_char('(')?;
                write_seq(f, items)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Value::List(items) => {
                f.write_char('[')?;
                write_seq(f, items)?;
                f.write_char(']')
            }
            Value::Dict(entries) => {
                f.write_char('{')?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_char('}')
            }
            Value::Set(items) if items.is_empty() => f.write_str("set()"),
            Value::Set(items) => {
                f.write_char('{')?;
                write_seq(f, items)?;
                f.write_char('}')
            }
            Value::FrozenSet(items) if items.is_empty() => f.write_str("frozenset()"),
            Value::FrozenSet(items) => {
                f.write_str("frozenset({")?;
                write_seq(f, items)?;
                f.write_str("})")
            }
            Value::Record(record) => write!(f, "{}", record),
            Value::Opaque(text) => f.write_str(text),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        f.write_char(')')
    }
}

/// Typed view of the device's `os.uname()` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

impl TryFrom<&Value> for Uname {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let record = value
            .as_record()
            .ok_or_else(|| format!("expected a uname record, got {}", value))?;
        let field = |name: &str| -> Result<String, String> {
            record
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("uname record has no text field '{}'", name))
        };
        Ok(Uname {
            sysname: field("sysname")?,
            nodename: field("nodename")?,
            release: field("release")?,
            version: field("version")?,
            machine: field("machine")?,
        })
    }
}
