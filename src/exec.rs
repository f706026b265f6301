//! Abstract semantics of single instructions.
use std::collections::BTreeSet;

use log::trace;
use rand::Rng;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::fa::ForestAut;
use crate::frame::{Frame, Place};
use crate::program::{BinaryOp, Constant, Fnc, Insn, InsnCode, OperandKind, Program, ProgramPoint, TypeKind, UnaryOp};
use crate::registry::Registry;

/// A configuration produced by an instruction, with the point it continues at.
#[derive(Debug, Clone)]
pub struct Successor {
    pub target: ProgramPoint,
    pub config: ForestAut,
}

pub struct Semantics<'a> {
    program: &'a Program,
    registry: &'a Registry,
    fnc: usize,
    frame: &'a Frame,
}

impl<'a> Semantics<'a> {
    pub fn new(program: &'a Program, registry: &'a Registry, fnc: usize, frame: &'a Frame) -> Self {
        Self {
            program,
            registry,
            fnc,
            frame,
        }
    }

    fn function(&self) -> &'a Fnc {
        self.program.fnc(self.fnc)
    }

    /// Resolve the operands of the instruction at `point`.
    pub fn prepare(&self, point: ProgramPoint, fa: &ForestAut) -> Result<Vec<(ForestAut, Vec<Place>)>> {
        let insn = self.program.insn(point);
        self.frame
            .prepare(self.registry, fa, insn)
            .map_err(|e| located(e, insn))
    }

    /// Execute the instruction at `point` on a prepared configuration.
    ///
    /// Program errors carry the location of the instruction.
    pub fn execute<R: Rng>(&self, point: ProgramPoint, fa: &ForestAut, places: &[Place], rng: &mut R) -> Result<Vec<Successor>> {
        let insn = self.program.insn(point);
        trace!("{} {}", insn.loc, self.function().describe_insn(insn));
        self.dispatch(point, insn, fa, places, rng)
            .map_err(|e| located(e, insn))
    }

    fn dispatch<R: Rng>(&self, point: ProgramPoint, insn: &Insn, fa: &ForestAut, places: &[Place], rng: &mut R) -> Result<Vec<Successor>> {
        let registry = self.registry;
        let read = |i: usize| Frame::read(registry, fa, places[i]);

        let (results, target) = match insn.code {
            InsnCode::Unop(UnaryOp::Assign) => {
                let mut fa = fa.clone();
                let value = self.assigned_value(insn, &mut fa, read(1))?;
                Frame::write(registry, &mut fa, places[0], value)?;
                (vec![fa], point.next())
            }
            InsnCode::Unop(op) => {
                let values = unop(op, read(1))?;
                (self.write_each(fa, places[0], values)?, point.next())
            }
            InsnCode::Binop(op) => {
                let values = binop(op, read(1), read(2), rng)?;
                (self.write_each(fa, places[0], values)?, point.next())
            }
            InsnCode::Call => {
                let name = match &insn.operands[1].kind {
                    OperandKind::Cst(Constant::Fnc(name)) => name.as_str(),
                    _ => return Err(Error::not_implemented("indirect call")),
                };
                let mut fa = fa.clone();
                match name {
                    "malloc" => {
                        let size = match read(2) {
                            Data::Int(size) if size >= 0 => size as usize,
                            other => return Err(Error::not_implemented(format!("allocation of size {}", other))),
                        };
                        Frame::write(registry, &mut fa, places[0], Data::Void(size))?;
                    }
                    "free" => match read(2) {
                        Data::Ref { root, displ: 0 } => fa.node_delete(root),
                        Data::Ref { .. } => {
                            return Err(Error::program("releasing a pointer which points inside the block"))
                        }
                        _ => return Err(Error::program("releasing non-pointer value")),
                    },
                    "__nondet" | "__VERIFIER_nondet_int" => {
                        Frame::write(registry, &mut fa, places[0], Data::Unknown)?;
                    }
                    other => return Err(Error::not_implemented(format!("call to {}", other))),
                }
                (vec![fa], point.next())
            }
            InsnCode::Ret => {
                let mut fa = fa.clone();
                self.frame.destroy(&mut fa);
                fa.normalize(registry, &BTreeSet::new())?;
                return Ok(Vec::new());
            }
            InsnCode::Jmp => (vec![fa.clone()], ProgramPoint::block_start(self.fnc, insn.targets[0])),
            InsnCode::Cond => {
                let taken = match read(0) {
                    Data::Bool(b) => b,
                    _ => return Err(Error::program("non boolean condition argument")),
                };
                let target = insn.targets[if taken { 0 } else { 1 }];
                (vec![fa.clone()], ProgramPoint::block_start(self.fnc, target))
            }
            InsnCode::Abort => return Err(Error::not_implemented("abort")),
        };

        let mut successors = Vec::with_capacity(results.len());
        for mut config in results {
            for &var in &insn.kills {
                self.frame.kill(registry, self.program, self.function(), &mut config, var);
            }
            successors.push(Successor { target, config });
        }
        Ok(successors)
    }

    /// Value stored by an assignment. A fresh untyped block assigned to a
    /// pointer to a struct becomes a new node of that struct.
    fn assigned_value(&self, insn: &Insn, fa: &mut ForestAut, value: Data) -> Result<Data> {
        let Data::Void(size) = value else {
            return Ok(value);
        };
        let dst = &insn.operands[0];
        let Some(pointee) = self.program.pointee(dst.ty) else {
            return Ok(value);
        };
        let ty = self.program.ty(pointee);
        if !matches!(ty.kind, TypeKind::Struct(_)) {
            return Ok(value);
        }
        if ty.size != size {
            return Err(Error::program("allocated block's size mismatch"));
        }
        let type_info = self.registry.lookup_type(&self.program.type_name(pointee))?;
        let selectors = self.program.selectors(pointee, 0);
        let root = fa.node_create(self.registry, &selectors, Some(type_info));
        Ok(Data::reference(root))
    }

    fn write_each(&self, fa: &ForestAut, place: Place, values: Vec<Data>) -> Result<Vec<ForestAut>> {
        values
            .into_iter()
            .map(|v| {
                let mut fa = fa.clone();
                Frame::write(self.registry, &mut fa, place, v)?;
                Ok(fa)
            })
            .collect()
    }
}

fn located(e: Error, insn: &Insn) -> Error {
    match e {
        Error::Program(p) => Error::Program(p.at(&insn.loc)),
        other => other,
    }
}

fn unop(op: UnaryOp, value: Data) -> Result<Vec<Data>> {
    Ok(match (op, value) {
        (UnaryOp::TruthNot, Data::Bool(b)) => vec![Data::Bool(!b)],
        (UnaryOp::TruthNot, Data::Int(i)) => vec![Data::Bool(i == 0)],
        (UnaryOp::TruthNot, Data::Ref { .. }) => vec![Data::Bool(false)],
        (UnaryOp::TruthNot, v) if v.is_unknown_or_undef() => vec![Data::Bool(false), Data::Bool(true)],
        (UnaryOp::BitNot, Data::Int(i)) => vec![Data::Int(!i)],
        (UnaryOp::Minus, Data::Int(i)) => vec![Data::Int(i.wrapping_neg())],
        (UnaryOp::BitNot | UnaryOp::Minus, Data::Unknown) => vec![Data::Unknown],
        (op, v) => return Err(Error::not_implemented(format!("{:?} of {}", op, v))),
    })
}

/// Both truth values, in random order.
fn both<R: Rng>(rng: &mut R) -> Vec<Data> {
    if rng.random_bool(0.5) {
        vec![Data::Bool(false), Data::Bool(true)]
    } else {
        vec![Data::Bool(true), Data::Bool(false)]
    }
}

fn binop<R: Rng>(op: BinaryOp, a: Data, b: Data, rng: &mut R) -> Result<Vec<Data>> {
    let unknown = a.is_unknown_or_undef() || b.is_unknown_or_undef();
    Ok(match op {
        BinaryOp::Eq | BinaryOp::Ne if unknown => both(rng),
        BinaryOp::Eq => vec![Data::Bool(a == b)],
        BinaryOp::Ne => vec![Data::Bool(a != b)],
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (a, b) {
            (Data::Int(x), Data::Int(y)) => vec![Data::Bool(match op {
                BinaryOp::Lt => x < y,
                BinaryOp::Le => x <= y,
                BinaryOp::Gt => x > y,
                _ => x >= y,
            })],
            _ if unknown => both(rng),
            _ => return Err(Error::not_implemented(format!("comparison {} {} {}", a, op, b))),
        },
        // Integers are only tracked as zero or positive.
        BinaryOp::Plus => match (a, b) {
            (Data::Int(x), Data::Int(y)) => vec![Data::Int(if x.saturating_add(y) > 0 { 1 } else { 0 })],
            _ if unknown => vec![Data::Unknown],
            _ => return Err(Error::not_implemented(format!("{} {} {}", a, op, b))),
        },
        BinaryOp::PointerPlus => match (a, b) {
            (Data::Ref { root, displ }, Data::Int(i)) => match displ.checked_add(i) {
                Some(displ) => vec![Data::Ref { root, displ }],
                None => return Err(Error::program("pointer arithmetic overflow")),
            },
            _ => return Err(Error::program("pointer arithmetic on non-pointer value")),
        },
        BinaryOp::And | BinaryOp::Or => match (a, b) {
            (Data::Bool(x), Data::Bool(y)) => vec![Data::Bool(if op == BinaryOp::And { x && y } else { x || y })],
            _ if unknown => both(rng),
            _ => return Err(Error::not_implemented(format!("{} {} {}", a, op, b))),
        },
        BinaryOp::Minus | BinaryOp::Mult => return Err(Error::not_implemented(format!("{} {} {}", a, op, b))),
    })
}
