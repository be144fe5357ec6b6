use std::{borrow::Cow, fmt};

use crate::{Chunk, NativeFn, ObjRef, Value};

/// Discriminant of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    /// An interned string
    String,
    /// A compiled function
    Function,
    /// A host function
    Native,
    /// A captured variable
    Upvalue,
    /// A function paired with its captured variables
    Closure,
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Function => "function",
            Self::Native => "native function",
            Self::Upvalue => "upvalue",
            Self::Closure => "closure",
        };
        write!(f, "{name}")
    }
}

/// Every entity that lives on the heap.
#[derive(Debug)]
pub enum Object {
    /// See [`ObjString`]
    String(ObjString),
    /// See [`ObjFunction`]
    Function(ObjFunction),
    /// See [`ObjNative`]
    Native(ObjNative),
    /// See [`ObjUpvalue`]
    Upvalue(ObjUpvalue),
    /// See [`ObjClosure`]
    Closure(ObjClosure),
}

impl Object {
    /// The object's discriminant.
    pub fn kind(&self) -> ObjKind {
        match self {
            Self::String(_) => ObjKind::String,
            Self::Function(_) => ObjKind::Function,
            Self::Native(_) => ObjKind::Native,
            Self::Upvalue(_) => ObjKind::Upvalue,
            Self::Closure(_) => ObjKind::Closure,
        }
    }
}

/// An immutable byte string with its hash computed once at creation. Strings are only ever
/// created through [`crate::Heap::intern`], so two handles are equal iff their bytes are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjString {
    bytes: Box<[u8]>,
    hash: u32,
}

impl ObjString {
    pub(crate) fn new(bytes: Box<[u8]>, hash: u32) -> Self {
        Self { bytes, hash }
    }

    /// The string's content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The FNV-1a hash of the content.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Return true if the string has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The content as UTF-8, replacing invalid sequences.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// 32-bit FNV-1a.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2166136261;
    const PRIME: u32 = 16777619;

    bytes.iter().fold(OFFSET_BASIS, |hash, &b| {
        (hash ^ b as u32).wrapping_mul(PRIME)
    })
}

/// A function object that holds the bytecode of the function along with other metadata
#[derive(Debug, Default)]
pub struct ObjFunction {
    /// Number of parameters the function has
    pub arity: u8,
    /// Number of variables captured by closures of this function
    pub upvalue_count: usize,
    /// The bytecode chunk of this function
    pub chunk: Chunk,
    /// The name of the function, `None` for the top-level script
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    /// Create a new function of the given name, with its arity set to 0 and an empty chunk
    pub fn new(name: Option<ObjRef>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// A function implemented by the host
#[derive(Clone, Copy)]
pub struct ObjNative {
    /// The name the function is registered under
    pub name: &'static str,
    /// Native function reference
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// A variable captured by a closure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjUpvalue {
    /// The variable still lives on the value stack at this slot
    Open(usize),
    /// The variable has been moved off the stack into the upvalue
    Closed(Value),
}

/// A function that captures its surrounding environment
#[derive(Debug)]
pub struct ObjClosure {
    /// Handle of the underlying [`ObjFunction`]
    pub function: ObjRef,
    /// Handles of the captured [`ObjUpvalue`]s, exactly `upvalue_count` of them
    pub upvalues: Box<[ObjRef]>,
}

impl ObjClosure {
    /// Create a new closure of the function that captures the given upvalues
    pub fn new(function: ObjRef, upvalues: Vec<ObjRef>) -> Self {
        Self {
            function,
            upvalues: upvalues.into_boxed_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(hash_bytes(b""), 2166136261);
        assert_eq!(hash_bytes(b"a"), 0xe40c292c);
        assert_eq!(hash_bytes(b"foobar"), 0xbf9cf968);
    }
}
