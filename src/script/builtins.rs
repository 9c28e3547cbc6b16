use crate::script::interpreter::{to_int32, Eval, Interpreter, Scope};
use crate::script::value::*;
use std::rc::Rc;

pub(crate) const MAX_ARRAY_LENGTH: usize = 1 << 24;
pub(crate) const MAX_STRING_LENGTH: usize = 1 << 26;

pub(crate) fn install_globals(scope: &Scope) {
    scope.declare("undefined", Value::Undefined, false);
    scope.declare("NaN", Value::Number(f64::NAN), false);
    scope.declare("Infinity", Value::Number(f64::INFINITY), false);

    let functions = [
        ("parseInt", Builtin::ParseInt),
        ("parseFloat", Builtin::ParseFloat),
        ("isNaN", Builtin::IsNaN),
        ("isFinite", Builtin::IsFinite),
        ("Number", Builtin::NumberCtor),
        ("String", Builtin::StringCtor),
        ("Boolean", Builtin::BooleanCtor),
        ("Array", Builtin::ArrayCtor),
        ("Object", Builtin::ObjectCtor),
    ];
    for (name, kind) in functions {
        scope.declare(name, Value::native(kind, Value::Undefined), true);
    }
    for kind in ErrorKind::ALL {
        scope.declare(kind.name(), Value::native(Builtin::ErrorCtor(kind), Value::Undefined), true);
    }

    let mut math: Vec<(&str, Value)> = vec![
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
        ("LN2", Value::Number(std::f64::consts::LN_2)),
        ("LN10", Value::Number(std::f64::consts::LN_10)),
        ("LOG2E", Value::Number(std::f64::consts::LOG2_E)),
        ("LOG10E", Value::Number(std::f64::consts::LOG10_E)),
        ("SQRT2", Value::Number(std::f64::consts::SQRT_2)),
        ("SQRT1_2", Value::Number(std::f64::consts::FRAC_1_SQRT_2)),
    ];
    for (name, function) in MathFn::ALL {
        math.push((name, Value::native(Builtin::Math(function), Value::Undefined)));
    }
    scope.declare("Math", Value::object_from(math), true);

    scope.declare(
        "JSON",
        Value::object_from([
            ("parse", Value::native(Builtin::JsonParse, Value::Undefined)),
            ("stringify", Value::native(Builtin::JsonStringify, Value::Undefined)),
        ]),
        true,
    );

    scope.declare(
        "console",
        Value::object_from([
            ("log", Value::native(Builtin::Console(ConsoleLevel::Log), Value::Undefined)),
            ("info", Value::native(Builtin::Console(ConsoleLevel::Info), Value::Undefined)),
            ("warn", Value::native(Builtin::Console(ConsoleLevel::Warn), Value::Undefined)),
            ("error", Value::native(Builtin::Console(ConsoleLevel::Error), Value::Undefined)),
            ("debug", Value::native(Builtin::Console(ConsoleLevel::Debug), Value::Undefined)),
        ]),
        true,
    );
}

/// Static members of built-in constructors (`Number.isInteger`, `Object.keys`).
pub(crate) fn static_member(kind: &Builtin, key: &str) -> Option<Value> {
    let native = |kind| Some(Value::native(kind, Value::Undefined));
    match (kind, key) {
        (Builtin::NumberCtor, "isInteger") => native(Builtin::NumberIsInteger),
        (Builtin::NumberCtor, "isFinite") => native(Builtin::NumberIsFinite),
        (Builtin::NumberCtor, "isNaN") => native(Builtin::NumberIsNaN),
        (Builtin::NumberCtor, "parseFloat") => native(Builtin::ParseFloat),
        (Builtin::NumberCtor, "parseInt") => native(Builtin::ParseInt),
        (Builtin::NumberCtor, "MAX_SAFE_INTEGER") => Some(Value::Number(9_007_199_254_740_991.0)),
        (Builtin::NumberCtor, "MIN_SAFE_INTEGER") => Some(Value::Number(-9_007_199_254_740_991.0)),
        (Builtin::NumberCtor, "EPSILON") => Some(Value::Number(f64::EPSILON)),
        (Builtin::NumberCtor, "POSITIVE_INFINITY") => Some(Value::Number(f64::INFINITY)),
        (Builtin::NumberCtor, "NEGATIVE_INFINITY") => Some(Value::Number(f64::NEG_INFINITY)),
        (Builtin::ObjectCtor, "keys") => native(Builtin::ObjectKeys),
        (Builtin::ObjectCtor, "values") => native(Builtin::ObjectValues),
        (Builtin::ObjectCtor, "entries") => native(Builtin::ObjectEntries),
        (Builtin::ObjectCtor, "assign") => native(Builtin::ObjectAssign),
        (Builtin::ObjectCtor, "fromEntries") => native(Builtin::ObjectFromEntries),
        (Builtin::ObjectCtor, "freeze") => native(Builtin::ObjectFreeze),
        (Builtin::ArrayCtor, "isArray") => native(Builtin::ArrayIsArray),
        (Builtin::ArrayCtor, "from") => native(Builtin::ArrayFrom),
        (Builtin::ArrayCtor, "of") => native(Builtin::ArrayOf),
        _ => None,
    }
}

/// Methods every value answers to.
pub(crate) fn common_method(key: &str, this: &Value) -> Value {
    match key {
        "hasOwnProperty" => Value::native(Builtin::HasOwnProperty, this.clone()),
        "toString" => Value::native(Builtin::ToStringMethod, this.clone()),
        _ => Value::Undefined,
    }
}

pub(crate) fn instance_of(value: &Value, constructor: &Builtin) -> bool {
    match (constructor, value) {
        (Builtin::ErrorCtor(kind), Value::Object(object)) => {
            let object = object.borrow();
            object.class == ObjectClass::Error
                && (*kind == ErrorKind::Error
                    || object
                        .properties
                        .get("name")
                        .is_some_and(|name| name.to_js_string() == kind.name()))
        }
        (Builtin::ArrayCtor, Value::Array(_)) => true,
        (Builtin::ObjectCtor, value) => matches!(
            value,
            Value::Object(_) | Value::Array(_) | Value::Function(_) | Value::Native(_) | Value::Host(_)
        ),
        (Builtin::HostClass(class), Value::Host(target)) => target.class == *class,
        _ => false,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Resolves a possibly negative index against `len` (`slice`, `splice`, `at`).
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn chars_value(chars: &[char]) -> Value {
    Value::str(&chars.iter().collect::<String>())
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn rfind_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last = (haystack.len() - needle.len()).min(from);
    (0..=last).rev().find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn math(function: MathFn, args: &[Value]) -> f64 {
    let x = arg(args, 0).to_number();
    match function {
        MathFn::Abs => x.abs(),
        MathFn::Ceil => x.ceil(),
        MathFn::Floor => x.floor(),
        MathFn::Round => {
            if !x.is_finite() {
                return x;
            }
            let floor = x.floor();
            if x - floor >= 0.5 {
                floor + 1.0
            } else {
                floor
            }
        }
        MathFn::Trunc => x.trunc(),
        MathFn::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        MathFn::Sqrt => x.sqrt(),
        MathFn::Cbrt => x.cbrt(),
        MathFn::Pow => {
            let y = arg(args, 1).to_number();
            if y.is_nan() || (x.abs() == 1.0 && y.is_infinite()) {
                f64::NAN
            } else {
                x.powf(y)
            }
        }
        MathFn::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        MathFn::Max => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.max(n)
            }
        }),
        MathFn::Hypot => args.iter().map(Value::to_number).fold(0.0, f64::hypot),
        MathFn::Sin => x.sin(),
        MathFn::Cos => x.cos(),
        MathFn::Tan => x.tan(),
        MathFn::Asin => x.asin(),
        MathFn::Acos => x.acos(),
        MathFn::Atan => x.atan(),
        MathFn::Atan2 => x.atan2(arg(args, 1).to_number()),
        MathFn::Log => x.ln(),
        MathFn::Log10 => x.log10(),
        MathFn::Log2 => x.log2(),
        MathFn::Exp => x.exp(),
    }
}

/// `Number.prototype.toFixed`: rounds the exact binary value, ties away from zero.
pub(crate) fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return crate::domain::value::format_number(n);
    }
    let exact = format!("{:.1100}", n.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut kept: Vec<u8> = int_part.bytes().chain(frac_part.bytes().take(digits)).collect();
    if frac_part.as_bytes().get(digits).is_some_and(|d| *d >= b'5') {
        let mut i = kept.len();
        loop {
            if i == 0 {
                kept.insert(0, b'1');
                break;
            }
            i -= 1;
            if kept[i] == b'9' {
                kept[i] = b'0';
            } else {
                kept[i] += 1;
                break;
            }
        }
    }
    let int_len = kept.len() - digits;
    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    out.push_str(&String::from_utf8_lossy(&kept[..int_len]));
    if digits > 0 {
        out.push('.');
        out.push_str(&String::from_utf8_lossy(&kept[int_len..]));
    }
    out
}

fn to_radix_string(n: f64, radix: u32) -> String {
    if !n.is_finite() || radix == 10 {
        return crate::domain::value::format_number(n);
    }
    let negative = n < 0.0;
    let mut int = n.abs().trunc();
    let mut frac = n.abs().fract();
    let mut digits = Vec::new();
    loop {
        let digit = (int % radix as f64) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        int = (int / radix as f64).trunc();
        if int == 0.0 {
            break;
        }
    }
    let mut out: String = digits.iter().rev().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..52 {
            frac *= radix as f64;
            let digit = frac.trunc() as u32;
            out.push(std::char::from_digit(digit, radix).unwrap_or('0'));
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    if negative {
        out.insert(0, '-');
    }
    out
}

fn console_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => format!("{:?}", other),
    }
}

impl Interpreter<'_> {
    pub(crate) fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>) -> Eval<Value> {
        let value = match &native.kind {
            Builtin::ParseInt => {
                let radix = match arg(&args, 1) {
                    Value::Undefined => None,
                    radix => match to_int32(radix.to_number()) {
                        0 => None,
                        n => Some(n as u32),
                    },
                };
                Value::Number(parse_int_prefix(&arg(&args, 0).to_js_string(), radix))
            }
            Builtin::ParseFloat => Value::Number(parse_float_prefix(&arg(&args, 0).to_js_string())),
            Builtin::IsNaN => Value::Bool(arg(&args, 0).to_number().is_nan()),
            Builtin::IsFinite => Value::Bool(arg(&args, 0).to_number().is_finite()),
            Builtin::NumberCtor => Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)),
            Builtin::StringCtor => Value::str(&args.first().map(Value::to_js_string).unwrap_or_default()),
            Builtin::BooleanCtor => Value::Bool(arg(&args, 0).truthy()),
            Builtin::ArrayCtor => {
                let length = match args.as_slice() {
                    [Value::Number(n)] => Some(*n),
                    _ => None,
                };
                match length {
                    Some(n) if n < 0.0 || n.fract() != 0.0 || n > MAX_ARRAY_LENGTH as f64 => {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                    Some(n) => Value::array(vec![Value::Undefined; n as usize]),
                    None => Value::array(args),
                }
            }
            Builtin::ObjectCtor => match arg(&args, 0) {
                value @ (Value::Object(_) | Value::Array(_)) => value,
                _ => Value::object(Default::default()),
            },
            Builtin::ErrorCtor(kind) => {
                let message = match arg(&args, 0) {
                    Value::Undefined => String::new(),
                    message => message.to_js_string(),
                };
                Value::error(*kind, &message)
            }
            Builtin::Math(function) => Value::Number(math(*function, &args)),
            Builtin::JsonParse => {
                let text = arg(&args, 0).to_js_string();
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(json) => Value::from_json(&json),
                    Err(e) => return self.throw_error(ErrorKind::SyntaxError, format!("JSON.parse: {}", e)),
                }
            }
            Builtin::JsonStringify => self.json_stringify(&args)?,
            Builtin::ObjectKeys => {
                let target = self.object_argument(&args)?;
                let keys = self.enumerate_keys(&target);
                Value::array(keys.iter().map(|key| Value::str(key)).collect())
            }
            Builtin::ObjectValues => {
                let target = self.object_argument(&args)?;
                Value::array(self.own_entries(&target).into_iter().map(|(_, v)| v).collect())
            }
            Builtin::ObjectEntries => {
                let target = self.object_argument(&args)?;
                Value::array(
                    self.own_entries(&target)
                        .into_iter()
                        .map(|(k, v)| Value::array(vec![Value::str(&k), v]))
                        .collect(),
                )
            }
            Builtin::ObjectAssign => {
                let target = self.object_argument(&args)?;
                for source in args.iter().skip(1) {
                    for (key, value) in self.own_entries(source) {
                        self.set_member(&target, &key, value)?;
                    }
                }
                target
            }
            Builtin::ObjectFromEntries => {
                let entries = self.iterate(&arg(&args, 0))?;
                let mut properties = indexmap::IndexMap::new();
                for entry in entries {
                    let pair = self.iterate(&entry)?;
                    properties.insert(arg(&pair, 0).to_property_key(), arg(&pair, 1));
                }
                Value::object(properties)
            }
            Builtin::ObjectFreeze => arg(&args, 0),
            Builtin::ArrayIsArray => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
            Builtin::ArrayFrom => {
                let source = arg(&args, 0);
                let items = match &source {
                    Value::Object(object) => {
                        let length = object
                            .borrow()
                            .properties
                            .get("length")
                            .map(Value::to_number)
                            .unwrap_or(0.0);
                        if !(0.0..=MAX_ARRAY_LENGTH as f64).contains(&length) {
                            return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                        }
                        vec![Value::Undefined; length as usize]
                    }
                    other => self.iterate(other)?,
                };
                let mapper = arg(&args, 1);
                if mapper.is_callable() {
                    let mut mapped = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        mapped.push(self.call_function(&mapper, Value::Undefined, vec![item, Value::Number(index as f64)])?);
                    }
                    Value::array(mapped)
                } else {
                    Value::array(items)
                }
            }
            Builtin::ArrayOf => Value::array(args),
            Builtin::NumberIsInteger => {
                Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0))
            }
            Builtin::NumberIsFinite => Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())),
            Builtin::NumberIsNaN => Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())),
            Builtin::Console(level) => {
                let message = args.iter().map(console_text).collect::<Vec<_>>().join(" ");
                self.host.console(*level, &message);
                Value::Undefined
            }
            Builtin::ArrayMethod(method) => {
                let Value::Array(items) = &native.this else {
                    return self.throw_error(ErrorKind::TypeError, "Array method called on a non-array");
                };
                self.array_method(*method, items.clone(), &native.this, args)?
            }
            Builtin::StringMethod(method) => {
                let text = native.this.to_js_string();
                self.string_method(*method, &text, args)?
            }
            Builtin::NumberMethod(NumberMethod::ToFixed) => {
                let digits = match arg(&args, 0) {
                    Value::Undefined => 0.0,
                    digits => digits.to_number().trunc(),
                };
                if !(0.0..=100.0).contains(&digits) {
                    return self.throw_error(
                        ErrorKind::RangeError,
                        "toFixed() digits argument must be between 0 and 100",
                    );
                }
                Value::str(&to_fixed(native.this.to_number(), digits as usize))
            }
            Builtin::NumberMethod(NumberMethod::ToString) => {
                let radix = match arg(&args, 0) {
                    Value::Undefined => 10,
                    radix => radix.to_number() as u32,
                };
                if !(2..=36).contains(&radix) {
                    return self.throw_error(ErrorKind::RangeError, "toString() radix must be between 2 and 36");
                }
                Value::str(&to_radix_string(native.this.to_number(), radix))
            }
            Builtin::HasOwnProperty => {
                let key = arg(&args, 0).to_property_key();
                Value::Bool(match &native.this {
                    Value::Object(object) => object.borrow().properties.contains_key(&key),
                    Value::Array(items) => parse_index(&key).is_some_and(|i| i < items.borrow().len()),
                    Value::Host(target) => self.host.keys(*target).contains(&key),
                    _ => false,
                })
            }
            Builtin::ToStringMethod => Value::str(&native.this.to_js_string()),
            Builtin::Host(name) => {
                let this = match &native.this {
                    Value::Host(target) => Some(*target),
                    _ => None,
                };
                return self
                    .host
                    .call(name, this, &args)
                    .map_err(|error| self.host_error(error));
            }
            Builtin::HostClass(class) => {
                return self.throw_error(
                    ErrorKind::TypeError,
                    format!("Class constructor {} cannot be invoked without 'new'", class),
                )
            }
        };
        Ok(value)
    }

    fn object_argument(&mut self, args: &[Value]) -> Eval<Value> {
        let target = arg(args, 0);
        if target.is_nullish() {
            return self.throw_error(ErrorKind::TypeError, "Cannot convert undefined or null to object");
        }
        Ok(target)
    }

    fn json_stringify(&mut self, args: &[Value]) -> Eval<Value> {
        use serde::Serialize;

        let json = match arg(args, 0).to_json() {
            Ok(Some(json)) => json,
            Ok(None) => return Ok(Value::Undefined),
            Err(message) => return self.throw_error(ErrorKind::TypeError, message),
        };
        let indent = match arg(args, 2) {
            Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
            Value::Str(s) => s.chars().take(10).collect(),
            _ => String::new(),
        };
        if indent.is_empty() {
            return Ok(Value::str(&json.to_string()));
        }

        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        if let Err(e) = json.serialize(&mut serializer) {
            return self.throw_error(ErrorKind::TypeError, e.to_string());
        }
        Ok(Value::str(&String::from_utf8_lossy(&out)))
    }

    fn callback(&mut self, args: &[Value]) -> Eval<Value> {
        let callback = arg(args, 0);
        if !callback.is_callable() {
            return self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not a function", callback.to_js_string()),
            );
        }
        Ok(callback)
    }

    fn array_method(
        &mut self,
        method: ArrayMethod,
        items: Rc<std::cell::RefCell<Vec<Value>>>,
        this: &Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        let len = items.borrow().len();
        let value = match method {
            ArrayMethod::Push | ArrayMethod::Unshift => {
                if len + args.len() > MAX_ARRAY_LENGTH {
                    return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                }
                let mut items = items.borrow_mut();
                if method == ArrayMethod::Push {
                    items.extend(args);
                } else {
                    items.splice(0..0, args);
                }
                Value::Number(items.len() as f64)
            }
            ArrayMethod::Pop => items.borrow_mut().pop().unwrap_or(Value::Undefined),
            ArrayMethod::Shift => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            ArrayMethod::Slice => {
                let start = relative_index(&arg(&args, 0), len, 0);
                let end = relative_index(&arg(&args, 1), len, len);
                let slice = items.borrow().get(start..end.max(start)).map(<[Value]>::to_vec).unwrap_or_default();
                Value::array(slice)
            }
            ArrayMethod::Splice => {
                let start = relative_index(&arg(&args, 0), len, 0);
                let delete = if args.len() < 2 {
                    len - start
                } else {
                    let n = arg(&args, 1).to_number();
                    let n = if n.is_nan() { 0.0 } else { n.trunc() };
                    n.clamp(0.0, (len - start) as f64) as usize
                };
                let inserted: Vec<Value> = args.into_iter().skip(2).collect();
                if len - delete + inserted.len() > MAX_ARRAY_LENGTH {
                    return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                }
                let removed: Vec<Value> = items.borrow_mut().splice(start..start + delete, inserted).collect();
                Value::array(removed)
            }
            ArrayMethod::Concat => {
                let mut out = items.borrow().clone();
                for item in args {
                    match item {
                        Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                        other => out.push(other),
                    }
                }
                if out.len() > MAX_ARRAY_LENGTH {
                    return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                }
                Value::array(out)
            }
            ArrayMethod::Join => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    separator => separator.to_js_string(),
                };
                let snapshot = items.borrow().clone();
                let mut joined = String::new();
                for (index, item) in snapshot.iter().enumerate() {
                    if index > 0 {
                        joined.push_str(&separator);
                    }
                    if !item.is_nullish() {
                        joined.push_str(&item.to_js_string());
                    }
                    if joined.len() > MAX_STRING_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid string length");
                    }
                    self.tick()?;
                }
                Value::str(&joined)
            }
            ArrayMethod::Reverse => {
                items.borrow_mut().reverse();
                this.clone()
            }
            ArrayMethod::IndexOf => {
                let search = arg(&args, 0);
                let from = relative_index(&arg(&args, 1), len, 0);
                let found = items.borrow().iter().skip(from).position(|item| item.strict_equals(&search));
                Value::Number(found.map(|i| (i + from) as f64).unwrap_or(-1.0))
            }
            ArrayMethod::LastIndexOf => {
                let search = arg(&args, 0);
                let found = items.borrow().iter().rposition(|item| item.strict_equals(&search));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            ArrayMethod::Includes => {
                let search = arg(&args, 0);
                Value::Bool(items.borrow().iter().any(|item| same_value_zero(item, &search)))
            }
            ArrayMethod::Find
            | ArrayMethod::FindIndex
            | ArrayMethod::Filter
            | ArrayMethod::Map
            | ArrayMethod::ForEach
            | ArrayMethod::Some
            | ArrayMethod::Every
            | ArrayMethod::FlatMap => {
                let callback = self.callback(&args)?;
                let mut mapped = Vec::new();
                for index in 0..len {
                    let item = items.borrow().get(index).cloned().unwrap_or(Value::Undefined);
                    let result = self.call_function(
                        &callback,
                        Value::Undefined,
                        vec![item.clone(), Value::Number(index as f64), this.clone()],
                    )?;
                    match method {
                        ArrayMethod::Find if result.truthy() => return Ok(item),
                        ArrayMethod::FindIndex if result.truthy() => return Ok(Value::Number(index as f64)),
                        ArrayMethod::Some if result.truthy() => return Ok(Value::Bool(true)),
                        ArrayMethod::Every if !result.truthy() => return Ok(Value::Bool(false)),
                        ArrayMethod::Filter if result.truthy() => mapped.push(item),
                        ArrayMethod::Map => mapped.push(result),
                        ArrayMethod::FlatMap => match result {
                            Value::Array(inner) => mapped.extend(inner.borrow().iter().cloned()),
                            other => mapped.push(other),
                        },
                        _ => {}
                    }
                    if mapped.len() > MAX_ARRAY_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                }
                match method {
                    ArrayMethod::Find | ArrayMethod::ForEach => Value::Undefined,
                    ArrayMethod::FindIndex => Value::Number(-1.0),
                    ArrayMethod::Some => Value::Bool(false),
                    ArrayMethod::Every => Value::Bool(true),
                    _ => Value::array(mapped),
                }
            }
            ArrayMethod::Reduce => {
                let callback = self.callback(&args)?;
                let mut start = 0;
                let mut accumulator = if args.len() >= 2 {
                    args[1].clone()
                } else {
                    if len == 0 {
                        return self.throw_error(ErrorKind::TypeError, "Reduce of empty array with no initial value");
                    }
                    start = 1;
                    items.borrow()[0].clone()
                };
                for index in start..len {
                    let item = items.borrow().get(index).cloned().unwrap_or(Value::Undefined);
                    accumulator = self.call_function(
                        &callback,
                        Value::Undefined,
                        vec![accumulator, item, Value::Number(index as f64), this.clone()],
                    )?;
                }
                accumulator
            }
            ArrayMethod::Sort => {
                let comparator = match arg(&args, 0) {
                    Value::Undefined => None,
                    comparator if comparator.is_callable() => Some(comparator),
                    _ => {
                        return self.throw_error(
                            ErrorKind::TypeError,
                            "The comparison function must be either a function or undefined",
                        )
                    }
                };
                let snapshot = items.borrow().clone();
                let (defined, undefined): (Vec<Value>, Vec<Value>) =
                    snapshot.into_iter().partition(|item| !matches!(item, Value::Undefined));
                let mut sorted = self.merge_sort(defined, comparator.as_ref())?;
                sorted.extend(undefined);
                *items.borrow_mut() = sorted;
                this.clone()
            }
            ArrayMethod::Flat => {
                let depth = match arg(&args, 0) {
                    Value::Undefined => 1.0,
                    depth => depth.to_number(),
                };
                let snapshot = items.borrow().clone();
                let flat = flatten(snapshot, depth);
                if flat.len() > MAX_ARRAY_LENGTH {
                    return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                }
                Value::array(flat)
            }
            ArrayMethod::Fill => {
                let value = arg(&args, 0);
                let start = relative_index(&arg(&args, 1), len, 0);
                let end = relative_index(&arg(&args, 2), len, len);
                let mut items = items.borrow_mut();
                for slot in items.iter_mut().take(end).skip(start) {
                    *slot = value.clone();
                }
                this.clone()
            }
            ArrayMethod::At => {
                let n = arg(&args, 0).to_number();
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                let index = if n < 0.0 { len as f64 + n } else { n };
                if index < 0.0 {
                    Value::Undefined
                } else {
                    items.borrow().get(index as usize).cloned().unwrap_or(Value::Undefined)
                }
            }
        };
        Ok(value)
    }

    /// Stable merge sort whose comparator may throw.
    fn merge_sort(&mut self, mut items: Vec<Value>, comparator: Option<&Value>) -> Eval<Vec<Value>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, comparator)?;
        let right = self.merge_sort(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
            self.tick()?;
            let order = self.sort_compare(a.clone(), b.clone(), comparator)?;
            if order > 0.0 {
                merged.extend(right.next());
            } else {
                merged.extend(left.next());
            }
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    fn sort_compare(&mut self, a: Value, b: Value, comparator: Option<&Value>) -> Eval<f64> {
        match comparator {
            Some(comparator) => {
                let order = self.call_function(comparator, Value::Undefined, vec![a, b])?.to_number();
                Ok(if order.is_nan() { 0.0 } else { order })
            }
            None => Ok(match a.to_js_string().cmp(&b.to_js_string()) {
                std::cmp::Ordering::Less => -1.0,
                std::cmp::Ordering::Equal => 0.0,
                std::cmp::Ordering::Greater => 1.0,
            }),
        }
    }

    fn string_method(&mut self, method: StringMethod, text: &str, args: Vec<Value>) -> Eval<Value> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let search = || arg(&args, 0).to_js_string().chars().collect::<Vec<char>>();
        let position = |index: usize, default: usize| match arg(&args, index) {
            Value::Undefined => default,
            value => {
                let n = value.to_number();
                if n.is_nan() {
                    0
                } else {
                    n.trunc().clamp(0.0, len as f64) as usize
                }
            }
        };

        let value = match method {
            StringMethod::CharAt => {
                let index = position(0, 0);
                chars.get(index).map(|c| chars_value(&[*c])).unwrap_or_else(|| Value::str(""))
            }
            StringMethod::CharCodeAt => {
                let index = position(0, 0);
                Value::Number(chars.get(index).map(|c| *c as u32 as f64).unwrap_or(f64::NAN))
            }
            StringMethod::IndexOf => {
                let found = find_chars(&chars, &search(), position(1, 0));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            StringMethod::LastIndexOf => {
                let found = rfind_chars(&chars, &search(), position(1, len));
                Value::Number(found.map(|i| i as f64).unwrap_or(-1.0))
            }
            StringMethod::Includes => Value::Bool(find_chars(&chars, &search(), position(1, 0)).is_some()),
            StringMethod::StartsWith => {
                let needle = search();
                let start = position(1, 0);
                Value::Bool(chars[start..].starts_with(&needle))
            }
            StringMethod::EndsWith => {
                let needle = search();
                let end = position(1, len);
                Value::Bool(chars[..end].ends_with(&needle))
            }
            StringMethod::Slice => {
                let start = relative_index(&arg(&args, 0), len, 0);
                let end = relative_index(&arg(&args, 1), len, len);
                chars_value(chars.get(start..end.max(start)).unwrap_or(&[]))
            }
            StringMethod::Substring => {
                let start = position(0, 0);
                let end = position(1, len);
                let (start, end) = if start > end { (end, start) } else { (start, end) };
                chars_value(&chars[start..end])
            }
            StringMethod::ToUpperCase => Value::str(&text.to_uppercase()),
            StringMethod::ToLowerCase => Value::str(&text.to_lowercase()),
            StringMethod::Trim => Value::str(text.trim()),
            StringMethod::TrimStart => Value::str(text.trim_start()),
            StringMethod::TrimEnd => Value::str(text.trim_end()),
            StringMethod::Split => {
                let limit = match arg(&args, 1) {
                    Value::Undefined => usize::MAX,
                    limit => limit.to_number().max(0.0) as usize,
                };
                let separator = match arg(&args, 0) {
                    Value::Undefined => return Ok(Value::array(vec![Value::str(text)].into_iter().take(limit).collect())),
                    separator => separator.to_js_string(),
                };
                let pieces: Box<dyn Iterator<Item = Value> + '_> = if separator.is_empty() {
                    if len.min(limit) > MAX_ARRAY_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                    Box::new(chars.iter().map(|c| chars_value(&[*c])))
                } else {
                    Box::new(text.split(separator.as_str()).map(Value::str))
                };
                let mut parts = Vec::new();
                for piece in pieces.take(limit) {
                    if parts.len() == MAX_ARRAY_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid array length");
                    }
                    self.tick()?;
                    parts.push(piece);
                }
                Value::array(parts)
            }
            StringMethod::Replace | StringMethod::ReplaceAll => {
                let pattern = arg(&args, 0).to_js_string();
                let replacement = arg(&args, 1);
                let mut out = String::new();
                let mut rest = text;
                let mut offset = 0;
                while let Some(found) = rest.find(pattern.as_str()) {
                    out.push_str(&rest[..found]);
                    let replaced = if replacement.is_callable() {
                        let char_offset = text[..offset + found].chars().count();
                        self.call_function(
                            &replacement,
                            Value::Undefined,
                            vec![Value::str(&pattern), Value::Number(char_offset as f64), Value::str(text)],
                        )?
                        .to_js_string()
                    } else {
                        expand_replacement(&replacement.to_js_string(), &pattern)
                    };
                    out.push_str(&replaced);
                    let advance = found + pattern.len();
                    if pattern.is_empty() {
                        // empty pattern matches between every character
                        match rest[advance..].chars().next() {
                            Some(c) => {
                                out.push(c);
                                offset += advance + c.len_utf8();
                                rest = &rest[advance + c.len_utf8()..];
                            }
                            None => {
                                rest = "";
                                break;
                            }
                        }
                    } else {
                        offset += advance;
                        rest = &rest[advance..];
                    }
                    if method == StringMethod::Replace {
                        break;
                    }
                    self.tick()?;
                    if out.len() > MAX_STRING_LENGTH {
                        return self.throw_error(ErrorKind::RangeError, "Invalid string length");
                    }
                }
                out.push_str(rest);
                Value::str(&out)
            }
            StringMethod::Repeat => {
                let count = arg(&args, 0).to_number();
                let count = if count.is_nan() { 0.0 } else { count.trunc() };
                if count < 0.0 || count.is_infinite() {
                    return self.throw_error(ErrorKind::RangeError, format!("Invalid count value: {}", count));
                }
                if text.len() as f64 * count > MAX_STRING_LENGTH as f64 {
                    return self.throw_error(ErrorKind::RangeError, "Invalid string length");
                }
                Value::str(&text.repeat(count as usize))
            }
            StringMethod::PadStart | StringMethod::PadEnd => {
                let target = arg(&args, 0).to_number();
                let target = if target.is_nan() { 0.0 } else { target };
                if target > MAX_STRING_LENGTH as f64 {
                    return self.throw_error(ErrorKind::RangeError, "Invalid string length");
                }
                let filler: Vec<char> = match arg(&args, 1) {
                    Value::Undefined => vec![' '],
                    filler => filler.to_js_string().chars().collect(),
                };
                let missing = (target as usize).saturating_sub(len);
                if missing == 0 || filler.is_empty() {
                    Value::str(text)
                } else {
                    let pad: String = filler.iter().cycle().take(missing).collect();
                    if method == StringMethod::PadStart {
                        Value::str(&format!("{}{}", pad, text))
                    } else {
                        Value::str(&format!("{}{}", text, pad))
                    }
                }
            }
            StringMethod::Concat => {
                let mut out = text.to_string();
                for value in &args {
                    out.push_str(&value.to_js_string());
                }
                if out.len() > MAX_STRING_LENGTH {
                    return self.throw_error(ErrorKind::RangeError, "Invalid string length");
                }
                Value::str(&out)
            }
            StringMethod::At => {
                let n = arg(&args, 0).to_number();
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                let index = if n < 0.0 { len as f64 + n } else { n };
                if index < 0.0 {
                    Value::Undefined
                } else {
                    chars.get(index as usize).map(|c| chars_value(&[*c])).unwrap_or(Value::Undefined)
                }
            }
        };
        Ok(value)
    }
}

/// Expands `$$` and `$&` in a `replace` replacement string.
fn expand_replacement(replacement: &str, matched: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut rest = replacement.chars().peekable();
    while let Some(c) = rest.next() {
        match (c, rest.peek()) {
            ('$', Some('$')) => {
                rest.next();
                out.push('$');
            }
            ('$', Some('&')) => {
                rest.next();
                out.push_str(matched);
            }
            (c, _) => out.push(c),
        }
    }
    out
}

fn flatten(items: Vec<Value>, depth: f64) -> Vec<Value> {
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Array(inner) if depth >= 1.0 => {
                let inner = inner.borrow().clone();
                out.extend(flatten(inner, depth - 1.0));
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{run_script, HostBridge, HostError, HostGlobal, HostRef, Limits, SCRIPT_STACK_SIZE};

    #[derive(Default)]
    struct Capture(Vec<String>);

    impl HostBridge for Capture {
        fn globals(&self) -> Vec<HostGlobal> {
            vec![HostGlobal::Function("emit")]
        }

        fn call(&mut self, _name: &str, _this: Option<HostRef>, args: &[Value]) -> Result<Value, HostError> {
            self.0.push(arg(args, 0).to_js_string());
            Ok(Value::Undefined)
        }

        fn construct(&mut self, class: &str, _args: &[Value]) -> Result<Value, HostError> {
            Err(HostError::type_error(class.to_string()))
        }

        fn get_member(&mut self, _target: HostRef, _key: &str) -> Option<Value> {
            None
        }

        fn console(&mut self, _level: ConsoleLevel, _message: &str) {}
    }

    fn emitted(source: &str) -> Vec<String> {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn(move || {
                let mut host = Capture::default();
                run_script(&source, &mut host, &Limits::default()).unwrap();
                host.0
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn to_fixed_rounds_ties_away_from_zero() {
        assert_eq!(to_fixed(2.5, 0), "3");
        assert_eq!(to_fixed(1.005, 2), "1.00");
        assert_eq!(to_fixed(1.25, 1), "1.3");
        assert_eq!(to_fixed(-1.5, 0), "-2");
        assert_eq!(to_fixed(9.999, 2), "10.00");
        assert_eq!(to_fixed(150.0, 2), "150.00");
        assert_eq!(to_fixed(f64::NAN, 2), "NaN");
    }

    #[test]
    fn math_round_matches_script_semantics() {
        assert_eq!(math(MathFn::Round, &[Value::Number(2.5)]), 3.0);
        assert_eq!(math(MathFn::Round, &[Value::Number(-2.5)]), -2.0);
        assert_eq!(math(MathFn::Round, &[Value::Number(0.49999999999999994)]), 0.0);
        assert!(math(MathFn::Max, &[Value::Number(1.0), Value::str("x")]).is_nan());
        assert_eq!(math(MathFn::Min, &[]), f64::INFINITY);
    }

    #[test]
    fn array_pipeline() {
        let out = emitted(
            "const rows = [3, 1, 2].map(n => n * 10)\nemit(rows.join('|'))\nemit([5, 1, 10].sort().join())\nemit([5, 1, 10].sort((a, b) => a - b).join())\nemit(rows.filter(n => n > 10).reduce((a, b) => a + b, 0))\nemit([[1, 2], [3, [4]]].flat().length)\nemit(rows.includes(20))",
        );
        assert_eq!(out, vec!["30|10|20", "1,10,5", "1,5,10", "50", "4", "true"]);
    }

    #[test]
    fn string_helpers() {
        let out = emitted(
            "emit('2x4x8'.split('x').length)\nemit('abc'.padStart(5, '-'))\nemit('  hi '.trim().toUpperCase())\nemit('a-b-c'.replaceAll('-', '+'))\nemit('studs'.slice(-3))\nemit((12.345).toFixed(1))",
        );
        assert_eq!(out, vec!["3", "--abc", "HI", "a+b+c", "uds", "12.3"]);
    }

    #[test]
    fn large_integers_print_shortest_digits() {
        let out = emitted("emit((123456789012345680000).toString())\nemit(String(2 ** 60))\nemit(`${2 ** 70}`)");
        assert_eq!(out, vec!["123456789012345680000", "1152921504606847000", "1.1805916207174113e+21"]);
    }

    #[test]
    fn replacement_patterns() {
        let out = emitted("emit('$'.replace('$', '$$'))\nemit('a-b'.replace('-', '[$&]'))\nemit('1.2.3'.replaceAll('.', '$$.'))");
        assert_eq!(out, vec!["$", "a[-]b", "1$.2$.3"]);
    }

    #[test]
    fn oversized_split_throws_a_range_error() {
        let out = emitted(
            "const s = 'x'.repeat(20000000)\ntry { s.split('') } catch (e) { emit(e.name) }\nemit(s.split('', 3).join())",
        );
        assert_eq!(out, vec!["RangeError", "x,x,x"]);
    }

    #[test]
    fn json_round_trip_and_object_helpers() {
        let out = emitted(
            "const o = JSON.parse('{\"a\": 1, \"b\": [true, null]}')\nemit(Object.keys(o).join())\nemit(JSON.stringify(o))\nemit(JSON.stringify({ x: 1 }, null, 2))\nemit(Object.entries({ k: 2 })[0].join('='))",
        );
        assert_eq!(out, vec!["a,b", r#"{"a":1,"b":[true,null]}"#, "{\n  \"x\": 1\n}", "k=2"]);
    }

    #[test]
    fn integer_keys_enumerate_first() {
        let out = emitted(
            "emit(Object.keys({ b: 1, a: 2, 1: 3, 0: 4 }).join())\nlet seen = ''\nfor (const k in { z: 1, 10: 2, 2: 3 }) seen += k + ';'\nemit(seen)\nemit(JSON.stringify({ b: 1, 0: 2 }))\nemit(Object.values({ x: 'x', 7: 'seven' }).join())",
        );
        assert_eq!(out, vec!["0,1,b,a", "2;10;z;", r#"{"0":2,"b":1}"#, "seven,x"]);
    }

    #[test]
    fn comparator_errors_propagate() {
        let source = "try { [2, 1].sort(() => { throw new RangeError('nope') }) } catch (e) { emit(e.name) }";
        assert_eq!(emitted(source), vec!["RangeError"]);
    }
}
