//! Interned SnuPL/2 types.
//!
//! `TypeCtx` owns every type the compilation ever mentions and hands out
//! `TypeId` handles; equal ids mean the identical type. The context is
//! created once by the driver and threaded through the passes.

use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

/// Structure of a type. `nelem: None` marks an open array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Null,
    Boolean,
    Char,
    Integer,
    Longint,
    Pointer(TypeId),
    Array { nelem: Option<u32>, inner: TypeId },
}

#[derive(Debug)]
pub struct TypeCtx {
    types: Vec<Ty>,
    interned: HashMap<Ty, TypeId>,
}

const NULL: TypeId = TypeId(0);
const BOOLEAN: TypeId = TypeId(1);
const CHAR: TypeId = TypeId(2);
const INTEGER: TypeId = TypeId(3);
const LONGINT: TypeId = TypeId(4);

impl TypeCtx {
    pub fn new() -> Self {
        let mut ctx = Self {
            types: Vec::new(),
            interned: HashMap::new(),
        };
        for t in [Ty::Null, Ty::Boolean, Ty::Char, Ty::Integer, Ty::Longint] {
            let id = TypeId(ctx.types.len() as u32);
            ctx.types.push(t);
            ctx.interned.insert(t, id);
        }
        ctx
    }

    pub fn null(&self) -> TypeId {
        NULL
    }
    pub fn boolean(&self) -> TypeId {
        BOOLEAN
    }
    pub fn char(&self) -> TypeId {
        CHAR
    }
    pub fn integer(&self) -> TypeId {
        INTEGER
    }
    pub fn longint(&self) -> TypeId {
        LONGINT
    }

    fn intern(&mut self, t: Ty) -> TypeId {
        if let Some(&id) = self.interned.get(&t) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(t);
        self.interned.insert(t, id);
        id
    }

    pub fn pointer(&mut self, to: TypeId) -> TypeId {
        self.intern(Ty::Pointer(to))
    }

    pub fn array(&mut self, nelem: Option<u32>, inner: TypeId) -> TypeId {
        self.intern(Ty::Array { nelem, inner })
    }

    pub fn get(&self, id: TypeId) -> Ty {
        self.types[id.0 as usize]
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        matches!(
            self.get(id),
            Ty::Boolean | Ty::Char | Ty::Integer | Ty::Longint | Ty::Pointer(_)
        )
    }

    pub fn is_boolean(&self, id: TypeId) -> bool {
        id == BOOLEAN
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        id == INTEGER
    }

    pub fn is_longint(&self, id: TypeId) -> bool {
        id == LONGINT
    }

    pub fn is_integral(&self, id: TypeId) -> bool {
        id == INTEGER || id == LONGINT
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.get(id), Ty::Array { .. })
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), Ty::Pointer(_))
    }

    /// The pointee of a pointer type, if `id` is one.
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Ty::Pointer(t) => Some(t),
            _ => None,
        }
    }

    /// SnuPL compatibility: identical scalars match; pointers match when
    /// their pointees match, with pointer-to-Null acting as a wildcard;
    /// arrays match when their inner types match and either dimension is
    /// open or both are equal.
    pub fn matches(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Ty::Pointer(x), Ty::Pointer(y)) => {
                x == NULL || y == NULL || self.matches(x, y)
            }
            (Ty::Array { nelem: n, inner: e }, Ty::Array { nelem: m, inner: f }) => {
                self.matches(e, f) && (n == m || n.is_none() || m.is_none())
            }
            _ => false,
        }
    }

    /// Number of array dimensions (0 for non-arrays).
    pub fn ndim(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Ty::Array { inner, .. } => 1 + self.ndim(inner),
            _ => 0,
        }
    }

    /// Element counts per dimension, outermost first.
    pub fn dims(&self, id: TypeId) -> Vec<Option<u32>> {
        let mut dims = Vec::new();
        let mut t = id;
        while let Ty::Array { nelem, inner } = self.get(t) {
            dims.push(nelem);
            t = inner;
        }
        dims
    }

    /// The innermost non-array type of an array.
    pub fn base_type(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Ty::Array { inner, .. } => self.base_type(inner),
            _ => id,
        }
    }

    /// Strip `n` array dimensions.
    pub fn strip_dims(&self, id: TypeId, n: u32) -> Option<TypeId> {
        if n == 0 {
            return Some(id);
        }
        match self.get(id) {
            Ty::Array { inner, .. } => self.strip_dims(inner, n - 1),
            _ => None,
        }
    }

    /// Size of the array header: 4-byte dimension count plus one 4-byte
    /// element count per dimension, padded to 8 when the count is even.
    pub fn header_size(&self, id: TypeId) -> u32 {
        let ndim = self.ndim(id);
        debug_assert!(ndim > 0);
        4 + 4 * ndim + if ndim % 2 == 0 { 4 } else { 0 }
    }

    /// Storage size excluding any array header.
    ///
    /// Panics on open arrays; their extent exists only at run time.
    pub fn data_size(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Ty::Null => 0,
            Ty::Boolean | Ty::Char => 1,
            Ty::Integer => 4,
            Ty::Longint | Ty::Pointer(_) => 8,
            Ty::Array { nelem, inner } => {
                let n = nelem.expect("open array has no compile-time data size");
                n * self.data_size(inner)
            }
        }
    }

    /// Storage size including the array header.
    pub fn size(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Ty::Array { .. } => self.header_size(id) + self.data_size(id),
            _ => self.data_size(id),
        }
    }

    /// Natural alignment.
    pub fn align(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Ty::Null | Ty::Boolean | Ty::Char => 1,
            Ty::Integer => 4,
            Ty::Longint | Ty::Pointer(_) | Ty::Array { .. } => 8,
        }
    }

    /// Human-readable type name for assembly comments and diagnostics.
    pub fn name(&self, id: TypeId) -> String {
        match self.get(id) {
            Ty::Null => "void".to_string(),
            Ty::Boolean => "boolean".to_string(),
            Ty::Char => "char".to_string(),
            Ty::Integer => "integer".to_string(),
            Ty::Longint => "longint".to_string(),
            Ty::Pointer(t) => format!("ptr to {}", self.name(t)),
            Ty::Array { .. } => {
                let mut s = self.name(self.base_type(id));
                for d in self.dims(id) {
                    match d {
                        Some(n) => {
                            let _ = write!(s, "[{}]", n);
                        }
                        None => s.push_str("[]"),
                    }
                }
                s
            }
        }
    }
}

impl Default for TypeCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let mut tc = TypeCtx::new();
        let a = tc.array(Some(10), tc.integer());
        let b = tc.array(Some(10), tc.integer());
        assert_eq!(a, b);
        let pa = tc.pointer(a);
        let pb = tc.pointer(b);
        assert_eq!(pa, pb);
        assert_ne!(a, tc.array(Some(11), tc.integer()));
    }

    #[test]
    fn match_open_dimensions() {
        let mut tc = TypeCtx::new();
        let concrete = tc.array(Some(5), tc.char());
        let open = tc.array(None, tc.char());
        assert!(tc.matches(open, concrete));
        assert!(tc.matches(concrete, open));
        let other = tc.array(Some(5), tc.integer());
        assert!(!tc.matches(concrete, other));
    }

    #[test]
    fn match_pointer_wildcard() {
        let mut tc = TypeCtx::new();
        let arr = tc.array(Some(3), tc.char());
        let parr = tc.pointer(arr);
        let pnull = tc.pointer(tc.null());
        assert!(tc.matches(pnull, parr));
        assert!(tc.matches(parr, pnull));
        let pint = tc.pointer(tc.integer());
        assert!(!tc.matches(parr, pint));
    }

    #[test]
    fn sizes_include_array_header() {
        let mut tc = TypeCtx::new();
        // char[3]: 4 (ndim) + 4 (dim 1) = 8 header, 3 data
        let a = tc.array(Some(3), tc.char());
        assert_eq!(tc.header_size(a), 8);
        assert_eq!(tc.data_size(a), 3);
        assert_eq!(tc.size(a), 11);
        // integer[2][3]: even dim count pads header to 16
        let m = tc.array(Some(3), tc.integer());
        let m = tc.array(Some(2), m);
        assert_eq!(tc.header_size(m), 16);
        assert_eq!(tc.data_size(m), 24);
        assert_eq!(tc.size(m), 40);
    }

    #[test]
    fn dims_are_outermost_first() {
        let mut tc = TypeCtx::new();
        let inner = tc.array(Some(4), tc.integer());
        let outer = tc.array(Some(3), inner);
        assert_eq!(tc.dims(outer), vec![Some(3), Some(4)]);
        assert_eq!(tc.base_type(outer), tc.integer());
        assert_eq!(tc.strip_dims(outer, 1), Some(inner));
        assert_eq!(tc.strip_dims(outer, 2), Some(tc.integer()));
        assert_eq!(tc.strip_dims(outer, 3), None);
    }
}
