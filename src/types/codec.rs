//! Compact byte codec for type graphs.
//!
//! Trampolines embed a serialized descriptor of their function type; the call
//! driver deserializes it to rebuild argument views. Cycles are encoded as a
//! `0xFF` marker followed by the 32-bit stream offset of the referenced node.

use std::collections::HashMap;

use super::{Field, TypeArena, TypeId, TypeKind};

const BACKREF: u8 = 0xFF;

fn kind_tag(kind: &TypeKind, unsigned: bool) -> u8 {
    match kind {
        TypeKind::Void => 0,
        TypeKind::Int(1) => 1,
        TypeKind::Int(2) => 2,
        TypeKind::Int(4) => 3,
        TypeKind::Int(_) => 4,
        TypeKind::Float(4) => 5,
        TypeKind::Float(_) => 6,
        TypeKind::Function { .. } => 7,
        TypeKind::Pointer(_) => 8,
        TypeKind::Struct(_) => 9,
        TypeKind::Varargs => {
            let _ = unsigned;
            10
        }
    }
}

impl TypeArena {
    /// Serialize the graph reachable from `id`.
    pub fn serialize(&self, id: TypeId) -> Vec<u8> {
        let mut out = Vec::new();
        let mut visited = HashMap::new();
        self.serialize_inner(id, &mut out, &mut visited);
        out
    }

    fn serialize_inner(&self, id: TypeId, out: &mut Vec<u8>, visited: &mut HashMap<TypeId, u32>) {
        if let Some(offset) = visited.get(&id) {
            out.push(BACKREF);
            out.extend_from_slice(&offset.to_le_bytes());
            return;
        }
        visited.insert(id, out.len() as u32);
        let node = self.get(id);
        let has_name = node.name.is_some();
        out.push(
            kind_tag(&node.kind, node.is_unsigned)
                | ((has_name as u8) << 7)
                | ((node.is_const as u8) << 6)
                | ((node.is_unsigned as u8) << 5),
        );
        if let Some(name) = &node.name {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        match &node.kind {
            TypeKind::Pointer(base) => self.serialize_inner(*base, out, visited),
            TypeKind::Struct(fields) => {
                out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
                for field in fields {
                    out.extend_from_slice(&(field.offset as u32).to_le_bytes());
                    self.serialize_inner(field.ty, out, visited);
                }
            }
            TypeKind::Function { ret, args } => {
                self.serialize_inner(*ret, out, visited);
                out.extend_from_slice(&(args.len() as u32).to_le_bytes());
                for arg in args {
                    self.serialize_inner(*arg, out, visited);
                }
            }
            _ => {}
        }
    }

    /// Deserialize a descriptor produced by [`TypeArena::serialize`].
    ///
    /// Returns `None` on a malformed stream (only reachable if the embedded
    /// descriptor bytes were corrupted).
    pub fn deserialize(&mut self, data: &[u8]) -> Option<TypeId> {
        let mut ptr = 0;
        let mut visited = Vec::new();
        self.deserialize_inner(data, &mut ptr, &mut visited)
    }

    fn deserialize_inner(
        &mut self,
        data: &[u8],
        ptr: &mut usize,
        visited: &mut Vec<(u32, TypeId)>,
    ) -> Option<TypeId> {
        let tag = *data.get(*ptr)?;
        if tag == BACKREF {
            *ptr += 1;
            let offset = u32::from_le_bytes(data.get(*ptr..*ptr + 4)?.try_into().ok()?);
            *ptr += 4;
            return visited
                .iter()
                .find(|(at, _)| *at == offset)
                .map(|(_, id)| *id);
        }
        let at = *ptr as u32;
        *ptr += 1;
        let id = self.alloc(TypeKind::Void);
        visited.push((at, id));
        self.get_mut(id).is_const = (tag >> 6) & 1 == 1;
        self.get_mut(id).is_unsigned = (tag >> 5) & 1 == 1;
        if (tag >> 7) & 1 == 1 {
            let end = data[*ptr..].iter().position(|b| *b == 0)? + *ptr;
            let name = String::from_utf8_lossy(&data[*ptr..end]).into_owned();
            self.get_mut(id).name = Some(name);
            *ptr = end + 1;
        }
        let kind = match tag & 31 {
            0 => TypeKind::Void,
            1 => TypeKind::Int(1),
            2 => TypeKind::Int(2),
            3 => TypeKind::Int(4),
            4 => TypeKind::Int(8),
            5 => TypeKind::Float(4),
            6 => TypeKind::Float(8),
            7 => {
                let ret = self.deserialize_inner(data, ptr, visited)?;
                let count = u32::from_le_bytes(data.get(*ptr..*ptr + 4)?.try_into().ok()?);
                *ptr += 4;
                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    args.push(self.deserialize_inner(data, ptr, visited)?);
                }
                TypeKind::Function { ret, args }
            }
            8 => TypeKind::Pointer(self.deserialize_inner(data, ptr, visited)?),
            9 => {
                let count = u32::from_le_bytes(data.get(*ptr..*ptr + 4)?.try_into().ok()?);
                *ptr += 4;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let offset = u32::from_le_bytes(data.get(*ptr..*ptr + 4)?.try_into().ok()?);
                    *ptr += 4;
                    let ty = self.deserialize_inner(data, ptr, visited)?;
                    let name = self.get(ty).name.clone().unwrap_or_default();
                    fields.push(Field {
                        name,
                        ty,
                        offset: offset as usize,
                    });
                }
                TypeKind::Struct(fields)
            }
            10 => TypeKind::Varargs,
            _ => return None,
        };
        self.get_mut(id).kind = kind;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_function_type() {
        let mut arena = TypeArena::new();
        let f64 = arena.float_ty(8);
        let s32 = arena.int_ty(4, false);
        let a = arena.copy(s32);
        arena.get_mut(a).name = Some("a".into());
        let b = arena.copy(f64);
        arena.get_mut(b).name = Some("b".into());
        let func = arena.alloc(TypeKind::Function {
            ret: f64,
            args: vec![a, b],
        });

        let data = arena.serialize(func);
        let back = arena.deserialize(&data).unwrap();

        let TypeKind::Function { ret, args } = &arena.get(back).kind else {
            panic!("expected function");
        };
        assert!(matches!(arena.get(*ret).kind, TypeKind::Float(8)));
        assert_eq!(args.len(), 2);
        assert_eq!(arena.get(args[0]).name.as_deref(), Some("a"));
        assert!(matches!(arena.get(args[0]).kind, TypeKind::Int(4)));
        assert_eq!(arena.get(args[1]).name.as_deref(), Some("b"));
    }

    #[test]
    fn test_roundtrip_cyclic_struct() {
        let mut arena = TypeArena::new();
        let node = arena.alloc(TypeKind::Struct(vec![]));
        let ptr = arena.alloc(TypeKind::Pointer(node));
        arena.get_mut(ptr).name = Some("next".into());
        let s32 = arena.int_ty(4, false);
        let val = arena.copy(s32);
        arena.get_mut(val).name = Some("value".into());
        arena.get_mut(node).kind = TypeKind::Struct(vec![
            Field {
                name: "value".into(),
                ty: val,
                offset: 0,
            },
            Field {
                name: "next".into(),
                ty: ptr,
                offset: 8,
            },
        ]);

        let data = arena.serialize(node);
        let back = arena.deserialize(&data).unwrap();

        assert_eq!(arena.size_of(back), arena.size_of(node));
        let TypeKind::Struct(fields) = &arena.get(back).kind else {
            panic!("expected struct");
        };
        assert_eq!(fields[1].offset, 8);
        let TypeKind::Pointer(base) = arena.get(fields[1].ty).kind else {
            panic!("expected pointer field");
        };
        // the cycle closes onto the deserialized root
        assert_eq!(base, back);
    }

    #[test]
    fn test_sizes_agree_after_roundtrip() {
        let mut arena = TypeArena::new();
        let u8t = arena.int_ty(1, true);
        let u64t = arena.int_ty(8, true);
        let a = arena.copy(u8t);
        arena.get_mut(a).name = Some("a".into());
        let b = arena.copy(u64t);
        arena.get_mut(b).name = Some("b".into());
        let st = arena.alloc(TypeKind::Struct(vec![
            Field {
                name: "a".into(),
                ty: a,
                offset: 0,
            },
            Field {
                name: "b".into(),
                ty: b,
                offset: 8,
            },
        ]));
        let data = arena.serialize(st);
        let back = arena.deserialize(&data).unwrap();
        assert_eq!(arena.size_of(back), 16);
        assert_eq!(arena.align_of(back), 8);
    }
}
