use std::fmt;

use crate::{Heap, ObjKind, ObjRef, Object, ObjectError};

/// This represents a YAPL value. Values are small and `Copy`, everything larger lives on the
/// [`Heap`] and is referred to by its handle.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// A boolean value
    Bool(bool),
    /// The absence of a value
    Null,
    /// A double-precision number
    Number(f64),
    /// A heap allocated object
    Obj(ObjRef),
    /// Returned by native functions to signal failure. It never outlives the call.
    Error,
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl PartialEq for Value {
    /// Values of different kinds are never equal. Objects compare by identity, which is also
    /// content equality for strings since all of them are interned.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Error, Self::Error) => true,
            (Self::Bool(v1), Self::Bool(v2)) => v1 == v2,
            (Self::Number(v1), Self::Number(v2)) => v1 == v2,
            (Self::Obj(o1), Self::Obj(o2)) => o1 == o2,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Self::Obj(obj)
    }
}

impl Value {
    /// Return true if this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Return true if this is a number
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// Return the object handle held by this value, if any.
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Self::Obj(obj) => Some(*obj),
            _ => None,
        }
    }

    /// Return the object handle held by this value, or an error naming the expected kind.
    pub fn expect_obj(&self, expected: ObjKind) -> Result<ObjRef, ObjectError> {
        self.as_obj().ok_or(ObjectError::NotAnObject {
            expected,
            found: self.kind_name(),
        })
    }

    /// A short name of this value's kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Null => "null",
            Self::Number(_) => "number",
            Self::Obj(_) => "object",
            Self::Error => "error",
        }
    }

    /// `null`, `false`, zero and the empty string are falsey, everything else is truthy.
    pub fn is_falsey(&self, heap: &Heap) -> bool {
        match self {
            Self::Null | Self::Error => true,
            Self::Bool(b) => !b,
            Self::Number(n) => *n == 0.0,
            Self::Obj(obj) => matches!(heap.get(*obj), Ok(Object::String(s)) if s.is_empty()),
        }
    }

    /// Textual form of the value as written by `print`.
    pub fn display<'h>(&self, heap: &'h Heap) -> ValueDisplay<'h> {
        ValueDisplay {
            value: *self,
            heap,
            quoted: false,
        }
    }

    /// Textual form of the value used by debugging routines, strings are quoted.
    pub fn debug<'h>(&self, heap: &'h Heap) -> ValueDisplay<'h> {
        ValueDisplay {
            value: *self,
            heap,
            quoted: true,
        }
    }
}

/// Helper for displaying a value whose payload lives on the heap.
#[derive(Debug)]
pub struct ValueDisplay<'h> {
    value: Value,
    heap: &'h Heap,
    quoted: bool,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", format_number(n)),
            Value::Error => write!(f, "<error>"),
            Value::Obj(obj) => self.fmt_object(f, obj),
        }
    }
}

impl ValueDisplay<'_> {
    fn fmt_object(&self, f: &mut fmt::Formatter<'_>, obj: ObjRef) -> fmt::Result {
        let object = match self.heap.get(obj) {
            Ok(object) => object,
            Err(_) => return write!(f, "<dangling #{}>", obj.index()),
        };
        match object {
            Object::String(s) if self.quoted => write!(f, "\"{}\"", s.to_str_lossy()),
            Object::String(s) => write!(f, "{}", s.to_str_lossy()),
            Object::Function(fun) => match fun.name {
                Some(name) => write!(f, "<fn {}>", self.heap.str_lossy(name)),
                None => write!(f, "<script>"),
            },
            Object::Native(_) => write!(f, "<native fn>"),
            Object::Upvalue(_) => write!(f, "upvalue"),
            Object::Closure(closure) => self.fmt_object(f, closure.function),
        }
    }
}

/// Format a number the way C's `%.14g` does: 14 significant digits with trailing zeros removed,
/// switching to exponent notation for very small or very large magnitudes.
pub fn format_number(n: f64) -> String {
    const PRECISION: i32 = 14;

    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Rounding can carry into a new digit, so the exponent is taken after rounding.
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        strip_zeros(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
