use crate::domain::value::format_number;
use crate::script::ast::FunctionDef;
use crate::script::interpreter::Scope;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

const MAX_NESTING: usize = 512;

/// A script-visible value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<JsObject>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Host(HostRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Plain,
    Error,
}

#[derive(Debug, Clone)]
pub struct JsObject {
    pub class: ObjectClass,
    pub properties: IndexMap<String, Value>,
}

impl JsObject {
    pub fn new() -> Self {
        Self {
            class: ObjectClass::Plain,
            properties: IndexMap::new(),
        }
    }
}

impl Default for JsObject {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Rc<Scope>,
}

/// A function implemented outside the script: a built-in or a host entry point.
pub struct NativeFunction {
    pub kind: Builtin,
    /// Receiver for bound methods (`arr.map`, `section.addPart`).
    pub this: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Builtin {
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    NumberCtor,
    StringCtor,
    BooleanCtor,
    ArrayCtor,
    ObjectCtor,
    ErrorCtor(ErrorKind),
    Math(MathFn),
    JsonParse,
    JsonStringify,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ObjectFromEntries,
    ObjectFreeze,
    ArrayIsArray,
    ArrayFrom,
    ArrayOf,
    NumberIsInteger,
    NumberIsFinite,
    NumberIsNaN,
    Console(ConsoleLevel),
    ArrayMethod(ArrayMethod),
    StringMethod(StringMethod),
    NumberMethod(NumberMethod),
    HasOwnProperty,
    ToStringMethod,
    /// A host global function, or a host method when `this` is a host reference.
    Host(Rc<str>),
    HostClass(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
            Self::SyntaxError => "SyntaxError",
        }
    }

    pub const ALL: [ErrorKind; 5] = [
        Self::Error,
        Self::TypeError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Sign,
    Sqrt,
    Cbrt,
    Pow,
    Min,
    Max,
    Hypot,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Log,
    Log10,
    Log2,
    Exp,
}

impl MathFn {
    pub const ALL: [(&'static str, MathFn); 23] = [
        ("abs", Self::Abs),
        ("ceil", Self::Ceil),
        ("floor", Self::Floor),
        ("round", Self::Round),
        ("trunc", Self::Trunc),
        ("sign", Self::Sign),
        ("sqrt", Self::Sqrt),
        ("cbrt", Self::Cbrt),
        ("pow", Self::Pow),
        ("min", Self::Min),
        ("max", Self::Max),
        ("hypot", Self::Hypot),
        ("sin", Self::Sin),
        ("cos", Self::Cos),
        ("tan", Self::Tan),
        ("asin", Self::Asin),
        ("acos", Self::Acos),
        ("atan", Self::Atan),
        ("atan2", Self::Atan2),
        ("log", Self::Log),
        ("log10", Self::Log10),
        ("log2", Self::Log2),
        ("exp", Self::Exp),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMethod {
    Push,
    Pop,
    Shift,
    Unshift,
    Slice,
    Splice,
    Concat,
    Join,
    Reverse,
    IndexOf,
    LastIndexOf,
    Includes,
    Find,
    FindIndex,
    Filter,
    Map,
    ForEach,
    Reduce,
    Some,
    Every,
    Sort,
    Flat,
    FlatMap,
    Fill,
    At,
}

impl ArrayMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "push" => Self::Push,
            "pop" => Self::Pop,
            "shift" => Self::Shift,
            "unshift" => Self::Unshift,
            "slice" => Self::Slice,
            "splice" => Self::Splice,
            "concat" => Self::Concat,
            "join" => Self::Join,
            "reverse" => Self::Reverse,
            "indexOf" => Self::IndexOf,
            "lastIndexOf" => Self::LastIndexOf,
            "includes" => Self::Includes,
            "find" => Self::Find,
            "findIndex" => Self::FindIndex,
            "filter" => Self::Filter,
            "map" => Self::Map,
            "forEach" => Self::ForEach,
            "reduce" => Self::Reduce,
            "some" => Self::Some,
            "every" => Self::Every,
            "sort" => Self::Sort,
            "flat" => Self::Flat,
            "flatMap" => Self::FlatMap,
            "fill" => Self::Fill,
            "at" => Self::At,
            _ => return None,
        };
        Some(method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMethod {
    CharAt,
    CharCodeAt,
    IndexOf,
    LastIndexOf,
    Includes,
    StartsWith,
    EndsWith,
    Slice,
    Substring,
    ToUpperCase,
    ToLowerCase,
    Trim,
    TrimStart,
    TrimEnd,
    Split,
    Replace,
    ReplaceAll,
    Repeat,
    PadStart,
    PadEnd,
    Concat,
    At,
}

impl StringMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "charAt" => Self::CharAt,
            "charCodeAt" => Self::CharCodeAt,
            "indexOf" => Self::IndexOf,
            "lastIndexOf" => Self::LastIndexOf,
            "includes" => Self::Includes,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "slice" => Self::Slice,
            "substring" => Self::Substring,
            "toUpperCase" => Self::ToUpperCase,
            "toLowerCase" => Self::ToLowerCase,
            "trim" => Self::Trim,
            "trimStart" => Self::TrimStart,
            "trimEnd" => Self::TrimEnd,
            "split" => Self::Split,
            "replace" => Self::Replace,
            "replaceAll" => Self::ReplaceAll,
            "repeat" => Self::Repeat,
            "padStart" => Self::PadStart,
            "padEnd" => Self::PadEnd,
            "concat" => Self::Concat,
            "at" => Self::At,
            _ => return None,
        };
        Some(method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberMethod {
    ToFixed,
    ToString,
}

/// Opaque handle to an object owned by the host (a section, a dimensions instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRef {
    pub class: &'static str,
    pub id: usize,
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(properties: IndexMap<String, Value>) -> Self {
        Self::Object(Rc::new(RefCell::new(JsObject {
            class: ObjectClass::Plain,
            properties,
        })))
    }

    pub fn object_from<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn error(kind: ErrorKind, message: &str) -> Self {
        let mut properties = IndexMap::new();
        properties.insert("name".to_string(), Value::str(kind.name()));
        properties.insert("message".to_string(), Value::str(message));
        Self::Object(Rc::new(RefCell::new(JsObject {
            class: ObjectClass::Error,
            properties,
        })))
    }

    pub fn native(kind: Builtin, this: Value) -> Self {
        Self::Native(Rc::new(NativeFunction { kind, this }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Native(_))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) | Self::Object(_) | Self::Host(_) => "object",
            Self::Function(_) | Self::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::Str(s) => string_to_number(s),
            Self::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self) -> String {
        let mut visiting = Vec::new();
        self.to_js_string_guarded(&mut visiting)
    }

    fn to_js_string_guarded(&self, visiting: &mut Vec<*const ()>) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.to_string(),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if visiting.contains(&ptr) || visiting.len() >= MAX_NESTING {
                    return String::new();
                }
                visiting.push(ptr);
                let joined = items
                    .borrow()
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_js_string_guarded(visiting)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                visiting.pop();
                joined
            }
            Self::Object(object) => {
                let object = object.borrow();
                if object.class == ObjectClass::Error {
                    let name = object
                        .properties
                        .get("name")
                        .map(|v| v.to_js_string())
                        .unwrap_or_else(|| "Error".to_string());
                    let message = object
                        .properties
                        .get("message")
                        .map(|v| v.to_js_string())
                        .unwrap_or_default();
                    if message.is_empty() {
                        name
                    } else {
                        format!("{}: {}", name, message)
                    }
                } else {
                    "[object Object]".to_string()
                }
            }
            Self::Function(closure) => format!(
                "function {}() {{ [code] }}",
                closure.def.name.as_deref().unwrap_or("")
            ),
            Self::Native(_) => "function () { [native code] }".to_string(),
            Self::Host(host) => format!("[object {}]", host.class),
        }
    }

    pub fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    /// Non-negative integer index, if the value names one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < 4_294_967_295.0 => {
                Some(*n as usize)
            }
            Self::Str(s) => parse_index(s),
            _ => None,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(a, b),
            (Self::Host(a), Self::Host(b)) => a == b,
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::Number(_), Self::Str(_)) | (Self::Str(_), Self::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Self::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Self::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Self::Array(_) | Self::Object(_), Self::Number(_) | Self::Str(_)) => {
                Value::Str(Rc::from(self.to_js_string())).loose_equals(other)
            }
            (Self::Number(_) | Self::Str(_), Self::Array(_) | Self::Object(_)) => {
                self.loose_equals(&Value::Str(Rc::from(other.to_js_string())))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structured form for `JSON.stringify` and object-typed declarations.
    /// `None` for values JSON cannot carry (`undefined`, functions).
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, String> {
        let mut visiting = Vec::new();
        self.to_json_guarded(&mut visiting)
    }

    fn to_json_guarded(
        &self,
        visiting: &mut Vec<*const ()>,
    ) -> Result<Option<serde_json::Value>, String> {
        use serde_json::Value as Json;
        if visiting.len() >= MAX_NESTING {
            return Err("Maximum nesting depth exceeded".to_string());
        }
        let json = match self {
            Self::Undefined | Self::Function(_) | Self::Native(_) => return Ok(None),
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => Json::String(s.to_string()),
            Self::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if visiting.contains(&ptr) {
                    return Err("Converting circular structure to JSON".to_string());
                }
                visiting.push(ptr);
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json_guarded(visiting)?.unwrap_or(Json::Null));
                }
                visiting.pop();
                Json::Array(out)
            }
            Self::Object(object) => {
                let ptr = Rc::as_ptr(object) as *const ();
                if visiting.contains(&ptr) {
                    return Err("Converting circular structure to JSON".to_string());
                }
                visiting.push(ptr);
                let mut out = serde_json::Map::new();
                for (key, value) in ordered_properties(&object.borrow().properties) {
                    if let Some(json) = value.to_json_guarded(visiting)? {
                        out.insert(key.clone(), json);
                    }
                }
                visiting.pop();
                Json::Object(out)
            }
            Self::Host(_) => Json::Object(serde_json::Map::new()),
        };
        Ok(Some(json))
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::str(s),
            Json::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(_) => write!(f, "[{}]", self.to_js_string()),
            Self::Object(_) => match self.to_json() {
                Ok(Some(json)) => write!(f, "{}", json),
                _ => f.write_str("[object Object]"),
            },
            other => f.write_str(&other.to_js_string()),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Canonical array index (`"3"`, not `"03"`).
pub fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Own properties in enumeration order: integer keys ascending, then string keys as inserted.
pub fn ordered_properties(properties: &IndexMap<String, Value>) -> Vec<(&String, &Value)> {
    let integer_key = |key: &str| parse_index(key).filter(|&i| i < u32::MAX as usize);
    let (mut ordered, named): (Vec<_>, Vec<_>) =
        properties.iter().partition(|(key, _)| integer_key(key).is_some());
    ordered.sort_by_key(|(key, _)| integer_key(key));
    ordered.extend(named);
    ordered
}

/// `Number(string)`: whitespace-trimmed decimal, hex/octal/binary literal or `Infinity`.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (-1.0, &trimmed[1..]),
        b'+' => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|n| n as f64)
                .unwrap_or(f64::NAN);
        }
    }
    let valid = unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !valid || !unsigned.bytes().any(|b| b.is_ascii_digit()) {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `parseFloat`: the longest numeric prefix.
pub fn parse_float_prefix(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        return if trimmed.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let mut best = None;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut i = end;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            i += 1;
            if trimmed[..i].parse::<f64>().is_ok() {
                best = Some(i);
            }
        } else if b == b'.' && !seen_dot && !seen_exp {
            seen_dot = true;
            i += 1;
        } else if (b == b'e' || b == b'E') && !seen_exp && best.is_some() {
            seen_exp = true;
            i += 1;
            if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                i += 1;
            }
        } else {
            break;
        }
    }
    best.and_then(|end| trimmed[..end].parse().ok())
        .unwrap_or(f64::NAN)
}

/// `parseInt`: the longest integer prefix in the given radix.
pub fn parse_int_prefix(s: &str, radix: Option<u32>) -> f64 {
    let trimmed = s.trim_start();
    let (sign, mut rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let mut radix = radix.unwrap_or(0);
    if radix == 0 || radix == 16 {
        if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
            rest = hex;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut any = false;
    for c in rest.chars() {
        match c.to_digit(radix) {
            Some(digit) => {
                value = value * radix as f64 + digit as f64;
                any = true;
            }
            None => break,
        }
    }
    if any {
        sign * value
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_conversion_follows_script_rules() {
        assert_eq!(Value::str("  42 ").to_number(), 42.0);
        assert_eq!(Value::str("").to_number(), 0.0);
        assert_eq!(Value::str("0x1f").to_number(), 31.0);
        assert!(Value::str("12px").to_number().is_nan());
        assert!(Value::str("inf").to_number().is_nan());
        assert_eq!(Value::str("-Infinity").to_number(), f64::NEG_INFINITY);
        assert_eq!(Value::Null.to_number(), 0.0);
        assert!(Value::Undefined.to_number().is_nan());
        assert_eq!(Value::array(vec![Value::Number(7.0)]).to_number(), 7.0);
    }

    #[test]
    fn string_conversion() {
        let array = Value::array(vec![Value::Number(1.0), Value::Null, Value::str("x")]);
        assert_eq!(array.to_js_string(), "1,,x");
        assert_eq!(Value::Number(0.1 + 0.2).to_js_string(), "0.30000000000000004");
        assert_eq!(
            Value::error(ErrorKind::TypeError, "bad").to_js_string(),
            "TypeError: bad"
        );
    }

    #[test]
    fn equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::str("20").loose_equals(&Value::Number(20.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn json_conversion_keeps_integers_and_drops_undefined() {
        let value = Value::object_from([
            ("width", Value::Number(20.0)),
            ("ratio", Value::Number(0.5)),
            ("missing", Value::Undefined),
            ("nan", Value::Number(f64::NAN)),
        ]);
        let json = value.to_json().unwrap().unwrap();
        assert_eq!(json.to_string(), r#"{"width":20,"ratio":0.5,"nan":null}"#);
    }

    #[test]
    fn circular_structures_are_rejected() {
        let items = Rc::new(RefCell::new(Vec::new()));
        let array = Value::Array(items.clone());
        items.borrow_mut().push(array.clone());
        assert!(array.to_json().is_err());
    }

    #[test]
    fn numeric_prefixes() {
        assert_eq!(parse_float_prefix("3.5ft"), 3.5);
        assert_eq!(parse_float_prefix("  -2e3x"), -2000.0);
        assert!(parse_float_prefix("abc").is_nan());
        assert_eq!(parse_int_prefix("42.9", None), 42.0);
        assert_eq!(parse_int_prefix("0x10", None), 16.0);
        assert_eq!(parse_int_prefix("101", Some(2)), 5.0);
    }
}
