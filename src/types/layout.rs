//! Structural layout queries: byte size, alignment and field offsets.

use super::{TypeArena, TypeId, TypeKind};

impl TypeArena {
    /// Byte size of a type. Structs cover `max(offset + size)` over their
    /// fields, rounded up to the struct alignment; an empty struct is one
    /// byte. `void` and the varargs marker are zero-sized.
    pub fn size_of(&self, id: TypeId) -> usize {
        match &self.get(id).kind {
            TypeKind::Void | TypeKind::Varargs => 0,
            TypeKind::Int(bytes) => *bytes as usize,
            TypeKind::Float(bytes) => *bytes as usize,
            TypeKind::Pointer(_) | TypeKind::Function { .. } => 8,
            TypeKind::Struct(fields) => {
                if fields.is_empty() {
                    return 1;
                }
                let mut max = 0;
                for field in fields {
                    let bound = field.offset + self.size_of(field.ty);
                    if max < bound {
                        max = bound;
                    }
                }
                let align = self.align_of(id).max(1);
                max.div_ceil(align) * align
            }
        }
    }

    /// Alignment of a type: its own size for primitives and pointers, the
    /// largest field alignment for structs.
    pub fn align_of(&self, id: TypeId) -> usize {
        match &self.get(id).kind {
            TypeKind::Struct(fields) => fields
                .iter()
                .map(|field| self.align_of(field.ty))
                .max()
                .unwrap_or(1),
            _ => self.size_of(id),
        }
    }

    /// Default offset the next field of `structure` would be placed at:
    /// the running struct size rounded up to the field's alignment.
    pub fn next_field_offset(&self, structure: TypeId, field: TypeId) -> usize {
        let TypeKind::Struct(fields) = &self.get(structure).kind else {
            return 0;
        };
        let mut size = 0;
        for existing in fields {
            let bound = existing.offset + self.size_of(existing.ty);
            if size < bound {
                size = bound;
            }
        }
        let align = self.align_of(field).max(1);
        size.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Field, TypeArena, TypeKind};

    #[test]
    fn test_primitive_sizes() {
        let mut arena = TypeArena::new();
        let void = arena.void_ty();
        let u16 = arena.int_ty(2, true);
        let f64 = arena.float_ty(8);
        let ptr = arena.pointer_to(u16);
        assert_eq!(arena.size_of(void), 0);
        assert_eq!(arena.size_of(u16), 2);
        assert_eq!(arena.size_of(f64), 8);
        assert_eq!(arena.size_of(ptr), 8);
    }

    #[test]
    fn test_struct_layout() {
        let mut arena = TypeArena::new();
        let s32 = arena.int_ty(4, false);
        let u8 = arena.int_ty(1, true);
        let u64 = arena.int_ty(8, true);

        // struct { s32 a; u8 b; u64 c; }
        let st = arena.alloc(TypeKind::Struct(vec![]));
        let offset_a = arena.next_field_offset(st, s32);
        assert_eq!(offset_a, 0);
        arena.push_field(st, "a", s32, offset_a);
        let offset_b = arena.next_field_offset(st, u8);
        assert_eq!(offset_b, 4);
        arena.push_field(st, "b", u8, offset_b);
        let offset_c = arena.next_field_offset(st, u64);
        assert_eq!(offset_c, 8);
        arena.push_field(st, "c", u64, offset_c);

        assert_eq!(arena.align_of(st), 8);
        assert_eq!(arena.size_of(st), 16);
    }

    #[test]
    fn test_empty_struct_is_one_byte() {
        let mut arena = TypeArena::new();
        let st = arena.alloc(TypeKind::Struct(vec![]));
        assert_eq!(arena.size_of(st), 1);
    }

    impl TypeArena {
        fn push_field(&mut self, st: super::TypeId, name: &str, ty: super::TypeId, offset: usize) {
            let TypeKind::Struct(fields) = &mut self.get_mut(st).kind else {
                panic!("not a struct");
            };
            fields.push(Field {
                name: name.into(),
                ty,
                offset,
            });
        }
    }
}
