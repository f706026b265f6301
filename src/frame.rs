//! Stack frames and operand access.
//!
//! The variables of a function live in one heap node, the frame, whose
//! selectors are laid out one variable after another. Operands are resolved
//! to a [`Place`] by walking their accessors over the configuration,
//! isolating every selector on the way.
use crate::data::Data;
use crate::error::{Error, Result};
use crate::fa::{ForestAut, ABP_INDEX};
use crate::label::SelData;
use crate::program::{Accessor, Constant, Fnc, Insn, OperandKind, Operand, Program, VarId};
use crate::registry::Registry;

/// Where an operand's value is read from or written to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Place {
    Selector { root: usize, offset: usize },
    /// A constant, or no operand at all.
    Value(Data),
}

#[derive(Debug, Clone)]
pub struct Frame {
    offsets: Vec<usize>,
    selectors: Vec<SelData>,
}

impl Frame {
    pub fn new(program: &Program, fnc: &Fnc) -> Self {
        let mut offsets = Vec::with_capacity(fnc.vars.len());
        let mut selectors = Vec::new();
        let mut offset = 0;
        for var in &fnc.vars {
            offsets.push(offset);
            selectors.extend(program.selectors(var.ty, offset));
            offset += program.ty(var.ty).size.max(1);
        }
        Self { offsets, selectors }
    }

    pub fn offset(&self, var: VarId) -> usize {
        self.offsets[var.0]
    }

    pub fn selectors(&self) -> &[SelData] {
        &self.selectors
    }

    /// Push a fresh frame with all variables undefined.
    pub fn create(&self, registry: &Registry, fa: &mut ForestAut) -> usize {
        let root = fa.node_create(registry, &self.selectors, None);
        fa.set_var(ABP_INDEX, Data::reference(root));
        root
    }

    /// Pop the frame. Whatever only the frame kept alive becomes garbage.
    pub fn destroy(&self, fa: &mut ForestAut) {
        let root = fa.frame_root();
        fa.node_delete(root);
        fa.set_var(ABP_INDEX, Data::Undef);
    }

    /// Resolve `op` in `fa`, one result per way the access can be concretized.
    pub fn resolve(&self, registry: &Registry, fa: &ForestAut, op: &Operand) -> Result<Vec<(ForestAut, Place)>> {
        let start = match &op.kind {
            OperandKind::Void => Place::Value(Data::Undef),
            OperandKind::Var(v) => Place::Selector {
                root: fa.frame_root(),
                offset: self.offset(*v),
            },
            OperandKind::Cst(c) => {
                if !op.accessors.is_empty() {
                    return Err(Error::not_implemented("access path on a constant"));
                }
                Place::Value(match c {
                    Constant::Int(i) => Data::Int(*i),
                    Constant::Bool(b) => Data::Bool(*b),
                    Constant::Null => Data::NULL,
                    Constant::Fnc(name) => return Err(Error::not_implemented(format!("function pointer {}", name))),
                })
            }
        };

        let mut current = vec![(fa.clone(), start)];
        for accessor in &op.accessors {
            let mut next = Vec::with_capacity(current.len());
            for (fa, place) in current {
                let Place::Selector { root, offset } = place else {
                    return Err(Error::not_implemented("access path on a constant"));
                };
                match accessor {
                    Accessor::Item(k) => next.push((fa, Place::Selector { root, offset: offset + k })),
                    Accessor::Deref => {
                        for fa in fa.isolate(registry, root, offset)? {
                            let target = match fa.read_selector(registry, root, offset) {
                                Data::Ref { root, displ } if displ >= 0 => Place::Selector {
                                    root,
                                    offset: displ as usize,
                                },
                                Data::Ref { .. } => {
                                    return Err(Error::program("dereferencing pointer before the start of a block"))
                                }
                                Data::Int(0) => return Err(Error::program("dereferencing NULL pointer")),
                                Data::Undef => return Err(Error::program("dereferencing undefined pointer")),
                                _ => return Err(Error::program("dereferencing non-pointer value")),
                            };
                            next.push((fa, target));
                        }
                    }
                    Accessor::Ref => return Err(Error::not_implemented("taking the address of a variable")),
                }
            }
            current = next;
        }

        let mut out = Vec::with_capacity(current.len());
        for (fa, place) in current {
            match place {
                Place::Selector { root, offset } => {
                    out.extend(fa.isolate(registry, root, offset)?.into_iter().map(|fa| (fa, place)));
                }
                Place::Value(_) => out.push((fa, place)),
            }
        }
        Ok(out)
    }

    /// Resolve all operands of `insn` (the callee excepted), in order.
    pub fn prepare(&self, registry: &Registry, fa: &ForestAut, insn: &Insn) -> Result<Vec<(ForestAut, Vec<Place>)>> {
        let mut current = vec![(fa.clone(), Vec::with_capacity(insn.operands.len()))];
        for op in &insn.operands {
            let is_callee = matches!(op.kind, OperandKind::Cst(Constant::Fnc(_)));
            let mut next = Vec::with_capacity(current.len());
            for (fa, places) in current {
                if is_callee || op.is_void() {
                    let mut places = places;
                    places.push(Place::Value(Data::Undef));
                    next.push((fa, places));
                    continue;
                }
                for (fa, place) in self.resolve(registry, &fa, op)? {
                    let mut places = places.clone();
                    places.push(place);
                    next.push((fa, places));
                }
            }
            current = next;
        }
        Ok(current)
    }

    pub fn read(registry: &Registry, fa: &ForestAut, place: Place) -> Data {
        match place {
            Place::Selector { root, offset } => fa.read_selector(registry, root, offset),
            Place::Value(data) => data,
        }
    }

    pub fn write(registry: &Registry, fa: &mut ForestAut, place: Place, data: Data) -> Result<()> {
        match place {
            Place::Selector { root, offset } => {
                fa.write_selector(registry, root, offset, data);
                Ok(())
            }
            Place::Value(_) => Err(Error::not_implemented("assignment to a constant")),
        }
    }

    /// Reset a dead variable to undefined.
    pub fn kill(&self, registry: &Registry, program: &Program, fnc: &Fnc, fa: &mut ForestAut, var: VarId) {
        let root = fa.frame_root();
        for sel in program.selectors(fnc.var(var).ty, self.offset(var)) {
            fa.write_selector(registry, root, sel.offset, Data::Undef);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{FncBuilder, ProgramBuilder, TypeRef};

    use test_log::test;

    struct Setup {
        program: Program,
        registry: Registry,
        frame: Frame,
        x: VarId,
        i: VarId,
        ptr: TypeRef,
    }

    fn setup() -> Setup {
        let mut pb = ProgramBuilder::new();
        let node = pb.declare_struct("node");
        let ptr = pb.pointer(node);
        let int = pb.int();
        pb.define_struct(node, 16, &[("next", 0, ptr), ("data", 8, int)]);
        let mut fb = FncBuilder::new("main");
        let i = fb.var("i", pb.int());
        let x = fb.var("x", ptr);
        let b = fb.block("entry");
        fb.push(b, Insn::ret());
        pb.function(fb.build());
        let program = pb.build();
        let frame = Frame::new(&program, program.fnc(0));
        Setup {
            program,
            registry: Registry::new(),
            frame,
            x,
            i,
            ptr,
        }
    }

    #[test]
    fn test_layout() {
        let s = setup();
        assert_eq!(s.frame.offset(s.i), 0);
        assert_eq!(s.frame.offset(s.x), 4);
        let offsets: Vec<usize> = s.frame.selectors().iter().map(|sel| sel.offset).collect();
        assert_eq!(offsets, vec![0, 4]);
    }

    #[test]
    fn test_resolve_field() {
        let s = setup();
        let mut fa = ForestAut::new();
        let frame = s.frame.create(&s.registry, &mut fa);
        let sels = s.program.selectors(s.program.pointee(s.ptr).unwrap(), 0);
        let node = fa.node_create(&s.registry, &sels, None);
        fa.write_selector(&s.registry, frame, 4, Data::reference(node));

        let op = Operand::var(s.x, s.ptr).field(8, TypeRef(1));
        let resolved = s.frame.resolve(&s.registry, &fa, &op).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1, Place::Selector { root: node, offset: 8 });
        assert_eq!(Frame::read(&s.registry, &resolved[0].0, resolved[0].1), Data::Undef);
    }

    #[test]
    fn test_resolve_null() {
        let s = setup();
        let mut fa = ForestAut::new();
        let frame = s.frame.create(&s.registry, &mut fa);
        fa.write_selector(&s.registry, frame, 4, Data::NULL);
        let op = Operand::var(s.x, s.ptr).field(0, s.ptr);
        match s.frame.resolve(&s.registry, &fa, &op) {
            Err(Error::Program(e)) => assert_eq!(e.message, "dereferencing NULL pointer"),
            other => panic!("expected a NULL dereference, got {:?}", other),
        }
    }

    #[test]
    fn test_write_constant_fails() {
        let s = setup();
        let mut fa = ForestAut::new();
        s.frame.create(&s.registry, &mut fa);
        assert!(Frame::write(&s.registry, &mut fa, Place::Value(Data::NULL), Data::Int(1)).is_err());
    }
}
