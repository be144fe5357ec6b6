//! Ownership of every object created while running a program.
//!
//! Objects live in an arena and are addressed by [`ObjRef`] handles. The arena plays the role of
//! the VM's object list: an object is appended exactly once when allocated and stays until the
//! heap is swept on shutdown. Strings are interned on the way in, so there is a single canonical
//! [`ObjString`] for any byte sequence.

use crate::{
    hash_bytes, HeapError, ObjClosure, ObjFunction, ObjKind, ObjNative, ObjString, ObjUpvalue,
    Object, ObjectError, RuntimeError, Table, Value,
};

/// Handle of an object on the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Position of the object in allocation order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The object arena together with the string intern table.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
    strings: Table,
}

macro_rules! accessors {
    ($($name:ident, $name_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            #[doc = concat!("Borrow the [`", stringify!($ty), "`] behind the handle.")]
            pub fn $name(&self, obj: ObjRef) -> Result<&$ty, ObjectError> {
                match self.get(obj)? {
                    Object::$variant(o) => Ok(o),
                    other => Err(ObjectError::WrongKind {
                        expected: ObjKind::$variant,
                        found: other.kind(),
                    }),
                }
            }

            #[doc = concat!("Mutably borrow the [`", stringify!($ty), "`] behind the handle.")]
            pub fn $name_mut(&mut self, obj: ObjRef) -> Result<&mut $ty, ObjectError> {
                match self.get_mut(obj)? {
                    Object::$variant(o) => Ok(o),
                    other => Err(ObjectError::WrongKind {
                        expected: ObjKind::$variant,
                        found: other.kind(),
                    }),
                }
            }
        )*
    };
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the object onto the heap and return its handle.
    pub fn allocate(&mut self, object: Object) -> Result<ObjRef, HeapError> {
        let index = u32::try_from(self.objects.len()).map_err(|_| HeapError::OutOfMemory)?;
        self.objects
            .try_reserve(1)
            .map_err(|_| HeapError::OutOfMemory)?;
        self.objects.push(object);
        Ok(ObjRef(index))
    }

    /// Number of objects currently owned by the heap.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Return true if the heap owns no object.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over every object in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &Object)> + '_ {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, o)| (ObjRef(i as u32), o))
    }

    /// Borrow the object behind the handle.
    pub fn get(&self, obj: ObjRef) -> Result<&Object, ObjectError> {
        self.objects
            .get(obj.index())
            .ok_or(ObjectError::Dangling(obj.index()))
    }

    /// Mutably borrow the object behind the handle.
    pub fn get_mut(&mut self, obj: ObjRef) -> Result<&mut Object, ObjectError> {
        self.objects
            .get_mut(obj.index())
            .ok_or(ObjectError::Dangling(obj.index()))
    }

    accessors! {
        as_string, as_string_mut => String(ObjString);
        as_function, as_function_mut => Function(ObjFunction);
        as_native, as_native_mut => Native(ObjNative);
        as_upvalue, as_upvalue_mut => Upvalue(ObjUpvalue);
        as_closure, as_closure_mut => Closure(ObjClosure);
    }

    /// Return true if the handle points at a string.
    pub fn is_string(&self, obj: ObjRef) -> bool {
        matches!(self.get(obj), Ok(Object::String(_)))
    }

    /// The string behind the handle as UTF-8, or an empty string if it's not a string.
    pub fn str_lossy(&self, obj: ObjRef) -> String {
        self.as_string(obj)
            .map(|s| s.to_str_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The intern table. Every key is a string on this heap and every value is `null`.
    pub fn strings(&self) -> &Table {
        &self.strings
    }

    /// Return the canonical string with the given content if it has been interned.
    pub fn find_interned(&self, bytes: &[u8]) -> Option<ObjRef> {
        let objects = &self.objects;
        self.strings.find_str(hash_bytes(bytes), |key| {
            matches!(objects.get(key.index()), Some(Object::String(s)) if s.as_bytes() == bytes)
        })
    }

    /// Return the canonical string for the bytes, allocating a copy of them if the content has
    /// not been seen before. The caller's buffer is never retained.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<ObjRef, HeapError> {
        if let Some(existing) = self.find_interned(bytes) {
            return Ok(existing);
        }
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(bytes.len())
            .map_err(|_| HeapError::OutOfMemory)?;
        owned.extend_from_slice(bytes);
        self.insert_string(owned)
    }

    /// Like [`Heap::intern`] but takes ownership of the buffer, which becomes the string's
    /// storage if the content is new.
    pub fn take_string(&mut self, bytes: Vec<u8>) -> Result<ObjRef, HeapError> {
        if let Some(existing) = self.find_interned(&bytes) {
            return Ok(existing);
        }
        self.insert_string(bytes)
    }

    fn insert_string(&mut self, bytes: Vec<u8>) -> Result<ObjRef, HeapError> {
        let hash = hash_bytes(&bytes);
        let string = ObjString::new(bytes.into_boxed_slice(), hash);
        let obj = self.allocate(Object::String(string))?;
        self.strings.set(obj, hash, Value::Null);
        Ok(obj)
    }

    /// Concatenate two strings and return the interned result, which may be a string that
    /// already existed.
    pub fn concat(&mut self, left: ObjRef, right: ObjRef) -> Result<ObjRef, RuntimeError> {
        let lhs = self.as_string(left)?.as_bytes();
        let rhs = self.as_string(right)?.as_bytes();

        let mut buf = Vec::new();
        buf.try_reserve_exact(lhs.len() + rhs.len())
            .map_err(|_| HeapError::OutOfMemory)?;
        buf.resize(lhs.len() + rhs.len(), 0);
        // The right operand is copied in first, each half lands at its final position.
        buf[lhs.len()..].copy_from_slice(rhs);
        buf[..lhs.len()].copy_from_slice(lhs);

        Ok(self.take_string(buf)?)
    }

    /// Release every object and empty the intern table. Returns the number of objects released.
    ///
    /// This runs when the heap is dropped. Handles obtained before the sweep must not be used
    /// afterwards.
    pub fn sweep(&mut self) -> usize {
        let mut freed = [0usize; 5];
        for object in self.objects.drain(..) {
            let kind = match object {
                Object::String(_) => 0,
                Object::Function(_) => 1,
                Object::Native(_) => 2,
                Object::Upvalue(_) => 3,
                Object::Closure(_) => 4,
            };
            freed[kind] += 1;
        }
        self.strings = Table::new();

        let total = freed.iter().sum();
        if total > 0 {
            tracing::debug!(
                total,
                strings = freed[0],
                functions = freed[1],
                natives = freed[2],
                upvalues = freed[3],
                closures = freed[4],
                "swept heap"
            );
        }
        total
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_handle_for_the_same_bytes() {
        let mut heap = Heap::new();
        let a = heap.intern(b"hello").unwrap();
        let b = heap.intern(b"hello").unwrap();
        let c = heap.take_string(b"hello".to_vec()).unwrap();
        let d = heap.intern(b"world").unwrap();

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.strings().len(), 2);
    }

    #[test]
    fn interned_string_carries_its_hash() {
        let mut heap = Heap::new();
        let s = heap.intern(b"abc").unwrap();
        let s = heap.as_string(s).unwrap();
        assert_eq!(s.hash(), hash_bytes(b"abc"));
        assert_eq!(s.as_bytes(), b"abc");
    }

    #[test]
    fn concat_keeps_operand_order_and_interns_the_result() {
        let mut heap = Heap::new();
        let left = heap.intern(b"foo").unwrap();
        let right = heap.intern(b"bar").unwrap();
        let existing = heap.intern(b"foobar").unwrap();

        let joined = heap.concat(left, right).unwrap();
        assert_eq!(joined, existing);
        assert_eq!(heap.as_string(joined).unwrap().as_bytes(), b"foobar");

        let reversed = heap.concat(right, left).unwrap();
        assert_eq!(heap.as_string(reversed).unwrap().as_bytes(), b"barfoo");
    }

    #[test]
    fn concat_rejects_non_strings() {
        let mut heap = Heap::new();
        let s = heap.intern(b"s").unwrap();
        let f = heap
            .allocate(Object::Function(ObjFunction::new(None)))
            .unwrap();
        assert!(matches!(
            heap.concat(s, f),
            Err(RuntimeError::Object(ObjectError::WrongKind {
                expected: ObjKind::String,
                found: ObjKind::Function,
            }))
        ));
    }

    #[test]
    fn accessors_check_the_kind() {
        let mut heap = Heap::new();
        let s = heap.intern(b"s").unwrap();
        assert!(heap.as_string(s).is_ok());
        assert!(heap.as_closure(s).is_err());
        assert!(matches!(
            heap.get(ObjRef(42)),
            Err(ObjectError::Dangling(42))
        ));
    }

    #[test]
    fn sweep_releases_everything() {
        let mut heap = Heap::new();
        heap.intern(b"a").unwrap();
        heap.intern(b"b").unwrap();
        heap.allocate(Object::Upvalue(ObjUpvalue::Closed(Value::Null)))
            .unwrap();

        assert_eq!(heap.sweep(), 3);
        assert!(heap.is_empty());
        assert_eq!(heap.strings().len(), 0);
        assert_eq!(heap.find_interned(b"a"), None);
    }
}
