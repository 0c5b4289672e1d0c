use crate::spec::arch::{RegId, Word};
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use strum_macros::{Display, EnumIter};

/// Second input of a two-input instruction: an immediate (already
/// two's-complement encoded, or minifloat bits) or a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Imm(Word),
    Reg(RegId),
}

/// A memory operand: an absolute byte-word address or a register
/// holding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemRef {
    Addr(u64),
    Reg(RegId),
}

/// A branch target: a label already resolved to a line index, or a
/// register holding one (extension form, range-checked at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Line(usize),
    Reg(RegId),
}

/// An IRQ number or I/O port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sel {
    Imm(u64),
    Reg(RegId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Always,
    Eq,
    Ne,
    Gt,
    Lt,
}

/// One executable record. Every instruction shape the table below can
/// produce is a variant here; `step()` dispatches by plain match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Ldr { rd: RegId, src: MemRef },
    Str { src: Src, dst: MemRef },

    Mov { rd: RegId, op2: Src },
    Mvn { rd: RegId, op2: Src },
    Neg { rd: RegId, op2: Src },

    Add { rd: RegId, rn: RegId, op2: Src },
    Sub { rd: RegId, rn: RegId, op2: Src },
    Mul { rd: RegId, rn: RegId, op2: Src },
    Div { rd: RegId, rn: RegId, op2: Src },
    Mod { rd: RegId, rn: RegId, op2: Src },
    And { rd: RegId, rn: RegId, op2: Src },
    Orr { rd: RegId, rn: RegId, op2: Src },
    Eor { rd: RegId, rn: RegId, op2: Src },
    Lsl { rd: RegId, rn: RegId, op2: Src },
    Lsr { rd: RegId, rn: RegId, op2: Src },

    Cmp { rn: RegId, op2: Src },
    Branch { cond: Cond, target: Target },
    Halt,

    Int { irq: Sel },
    Iret,
    Mivt { irq: Sel, line: usize },

    In { rd: RegId, port: Sel },
    Out { rd: RegId, port: Sel },

    FAdd { rd: RegId, rn: RegId, op2: Src },
    FSub { rd: RegId, rn: RegId, op2: Src },
    FMul { rd: RegId, rn: RegId, op2: Src },
    FDiv { rd: RegId, rn: RegId, op2: Src },
    FCmp { rn: RegId, op2: Src },

    FTrunc { rd: RegId, op2: Src },
    FRound { rd: RegId, op2: Src },
    FRoundAway { rd: RegId, op2: Src },
    FFloor { rd: RegId, op2: Src },
    FCeil { rd: RegId, op2: Src },
    FExp { rd: RegId, op2: Src },
    FLog { rd: RegId, op2: Src },
}

/// The operand categories an overload signature can ask for. `LabelId`
/// is matched by a bare identifier token and resolved to a line index
/// before the record is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum OperandKind {
    #[strum(serialize = "decimal")]
    Decimal,
    #[strum(serialize = "floating")]
    Floating,
    #[strum(serialize = "register")]
    Register,
    #[strum(serialize = "address")]
    Address,
    #[strum(serialize = "label identifier")]
    LabelId,
}

/// A fully resolved operand value, as handed to an overload's record
/// builder by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(Word),
    Reg(RegId),
    Addr(u64),
    Line(usize),
}

fn reg(o: Operand) -> RegId {
    match o {
        Operand::Reg(r) => r,
        _ => unreachable!(),
    }
}

fn src(o: Operand) -> Src {
    match o {
        Operand::Imm(v) => Src::Imm(v),
        Operand::Reg(r) => Src::Reg(r),
        _ => unreachable!(),
    }
}

fn memref(o: Operand) -> MemRef {
    match o {
        Operand::Addr(a) => MemRef::Addr(a),
        Operand::Reg(r) => MemRef::Reg(r),
        _ => unreachable!(),
    }
}

fn target(o: Operand) -> Target {
    match o {
        Operand::Line(l) => Target::Line(l),
        Operand::Reg(r) => Target::Reg(r),
        _ => unreachable!(),
    }
}

fn sel(o: Operand) -> Sel {
    match o {
        Operand::Addr(n) => Sel::Imm(n),
        Operand::Reg(r) => Sel::Reg(r),
        _ => unreachable!(),
    }
}

fn line(o: Operand) -> usize {
    match o {
        Operand::Line(l) => l,
        _ => unreachable!(),
    }
}

type Builder = fn(&[Operand]) -> Op;

pub struct Overload {
    sig: &'static [OperandKind],
    ext: bool,
    build: Builder,
}

impl Overload {
    pub const fn new(sig: &'static [OperandKind], ext: bool, build: Builder) -> Overload {
        Overload { sig, ext, build }
    }

    pub fn sig(&self) -> &'static [OperandKind] {
        self.sig
    }

    pub fn is_ext(&self) -> bool {
        self.ext
    }

    pub fn build(&self, operands: &[Operand]) -> Op {
        assert_eq!(operands.len(), self.sig.len());
        (self.build)(operands)
    }
}

pub struct OpcodeDef {
    name: &'static str,
    overloads: Vec<Overload>,
}

impl OpcodeDef {
    /// Panics if the overload set is ambiguous: every overload must
    /// have the same arity, and no two may share a signature. Running
    /// this at table construction is what guarantees `resolve` has at
    /// most one answer.
    pub fn new(name: &'static str, overloads: Vec<Overload>) -> OpcodeDef {
        for (a, b) in overloads.iter().tuple_combinations() {
            assert_eq!(
                a.sig.len(),
                b.sig.len(),
                "opcode '{}': overloads of differing arity",
                name
            );
            assert_ne!(a.sig, b.sig, "opcode '{}': ambiguous overloads", name);
        }

        OpcodeDef { name, overloads }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn arity(&self) -> usize {
        self.overloads.first().map_or(0, |ov| ov.sig.len())
    }

    pub fn resolve(&self, kinds: &[OperandKind]) -> Option<&Overload> {
        self.overloads.iter().find(|ov| ov.sig == kinds)
    }

    /// Resolve like `resolve`, but on failure report the first operand
    /// position at which no overload could accept the given kind.
    pub fn select(&self, kinds: &[OperandKind]) -> Result<&Overload, usize> {
        let mut candidates: Vec<&Overload> = self.overloads.iter().collect();
        for (pos, kind) in kinds.iter().enumerate() {
            candidates.retain(|ov| ov.sig.get(pos) == Some(kind));
            if candidates.is_empty() {
                return Err(pos);
            }
        }

        // Equal arity plus signature uniqueness leave exactly one.
        Ok(candidates[0])
    }

    /// The kinds accepted at one operand position, in declaration
    /// order, for "expected X or Y" diagnostics.
    pub fn expected_at(&self, pos: usize) -> Vec<OperandKind> {
        self.overloads
            .iter()
            .filter_map(|ov| ov.sig.get(pos).copied())
            .unique()
            .collect()
    }
}

use OperandKind as K;

fn triadic(ext: bool, build: Builder) -> Vec<Overload> {
    vec![
        Overload::new(&[K::Register, K::Register, K::Register], ext, build),
        Overload::new(&[K::Register, K::Register, K::Decimal], ext, build),
    ]
}

fn ftriadic(build: Builder) -> Vec<Overload> {
    vec![
        Overload::new(&[K::Register, K::Register, K::Register], true, build),
        Overload::new(&[K::Register, K::Register, K::Floating], true, build),
    ]
}

fn funary(build: Builder) -> Vec<Overload> {
    vec![
        Overload::new(&[K::Register, K::Register], true, build),
        Overload::new(&[K::Register, K::Floating], true, build),
    ]
}

fn branch_pair(label: Builder, register: Builder) -> Vec<Overload> {
    vec![
        Overload::new(&[K::LabelId], false, label),
        Overload::new(&[K::Register], true, register),
    ]
}

fn build_table() -> HashMap<&'static str, OpcodeDef> {
    let defs = vec![
        OpcodeDef::new(
            "ldr",
            vec![
                Overload::new(&[K::Register, K::Address], false, |o| Op::Ldr {
                    rd: reg(o[0]),
                    src: memref(o[1]),
                }),
                Overload::new(&[K::Register, K::Register], true, |o| Op::Ldr {
                    rd: reg(o[0]),
                    src: memref(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "str",
            vec![
                Overload::new(&[K::Register, K::Address], false, |o| Op::Str {
                    src: src(o[0]),
                    dst: memref(o[1]),
                }),
                Overload::new(&[K::Decimal, K::Address], true, |o| Op::Str {
                    src: src(o[0]),
                    dst: memref(o[1]),
                }),
                Overload::new(&[K::Register, K::Register], true, |o| Op::Str {
                    src: src(o[0]),
                    dst: memref(o[1]),
                }),
                Overload::new(&[K::Decimal, K::Register], true, |o| Op::Str {
                    src: src(o[0]),
                    dst: memref(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "mov",
            vec![
                Overload::new(&[K::Register, K::Register], false, |o| Op::Mov {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Decimal], false, |o| Op::Mov {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Floating], true, |o| Op::Mov {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "mvn",
            vec![
                Overload::new(&[K::Register, K::Register], false, |o| Op::Mvn {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Decimal], false, |o| Op::Mvn {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "neg",
            vec![
                Overload::new(&[K::Register, K::Register], true, |o| Op::Neg {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Decimal], true, |o| Op::Neg {
                    rd: reg(o[0]),
                    op2: src(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "add",
            triadic(false, |o| Op::Add {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "sub",
            triadic(false, |o| Op::Sub {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "mul",
            triadic(true, |o| Op::Mul {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "div",
            triadic(true, |o| Op::Div {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "mod",
            triadic(true, |o| Op::Mod {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "and",
            triadic(false, |o| Op::And {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "orr",
            triadic(false, |o| Op::Orr {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "eor",
            triadic(false, |o| Op::Eor {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "lsl",
            triadic(false, |o| Op::Lsl {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "lsr",
            triadic(false, |o| Op::Lsr {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "cmp",
            vec![
                Overload::new(&[K::Register, K::Register], false, |o| Op::Cmp {
                    rn: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Decimal], false, |o| Op::Cmp {
                    rn: reg(o[0]),
                    op2: src(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "b",
            branch_pair(
                |o| Op::Branch {
                    cond: Cond::Always,
                    target: target(o[0]),
                },
                |o| Op::Branch {
                    cond: Cond::Always,
                    target: target(o[0]),
                },
            ),
        ),
        OpcodeDef::new(
            "beq",
            branch_pair(
                |o| Op::Branch {
                    cond: Cond::Eq,
                    target: target(o[0]),
                },
                |o| Op::Branch {
                    cond: Cond::Eq,
                    target: target(o[0]),
                },
            ),
        ),
        OpcodeDef::new(
            "bne",
            branch_pair(
                |o| Op::Branch {
                    cond: Cond::Ne,
                    target: target(o[0]),
                },
                |o| Op::Branch {
                    cond: Cond::Ne,
                    target: target(o[0]),
                },
            ),
        ),
        OpcodeDef::new(
            "bgt",
            branch_pair(
                |o| Op::Branch {
                    cond: Cond::Gt,
                    target: target(o[0]),
                },
                |o| Op::Branch {
                    cond: Cond::Gt,
                    target: target(o[0]),
                },
            ),
        ),
        OpcodeDef::new(
            "blt",
            branch_pair(
                |o| Op::Branch {
                    cond: Cond::Lt,
                    target: target(o[0]),
                },
                |o| Op::Branch {
                    cond: Cond::Lt,
                    target: target(o[0]),
                },
            ),
        ),
        OpcodeDef::new("halt", vec![Overload::new(&[], false, |_| Op::Halt)]),
        OpcodeDef::new(
            "int",
            vec![
                Overload::new(&[K::Address], true, |o| Op::Int { irq: sel(o[0]) }),
                Overload::new(&[K::Register], true, |o| Op::Int { irq: sel(o[0]) }),
            ],
        ),
        OpcodeDef::new("iret", vec![Overload::new(&[], true, |_| Op::Iret)]),
        OpcodeDef::new(
            "mivt",
            vec![
                Overload::new(&[K::Address, K::LabelId], true, |o| Op::Mivt {
                    irq: sel(o[0]),
                    line: line(o[1]),
                }),
                Overload::new(&[K::Register, K::LabelId], true, |o| Op::Mivt {
                    irq: sel(o[0]),
                    line: line(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "in",
            vec![
                Overload::new(&[K::Register, K::Address], true, |o| Op::In {
                    rd: reg(o[0]),
                    port: sel(o[1]),
                }),
                Overload::new(&[K::Register, K::Register], true, |o| Op::In {
                    rd: reg(o[0]),
                    port: sel(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "out",
            vec![
                Overload::new(&[K::Register, K::Address], true, |o| Op::Out {
                    rd: reg(o[0]),
                    port: sel(o[1]),
                }),
                Overload::new(&[K::Register, K::Register], true, |o| Op::Out {
                    rd: reg(o[0]),
                    port: sel(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "fadd",
            ftriadic(|o| Op::FAdd {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "fsub",
            ftriadic(|o| Op::FSub {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "fmul",
            ftriadic(|o| Op::FMul {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "fdiv",
            ftriadic(|o| Op::FDiv {
                rd: reg(o[0]),
                rn: reg(o[1]),
                op2: src(o[2]),
            }),
        ),
        OpcodeDef::new(
            "fcmp",
            vec![
                Overload::new(&[K::Register, K::Register], true, |o| Op::FCmp {
                    rn: reg(o[0]),
                    op2: src(o[1]),
                }),
                Overload::new(&[K::Register, K::Floating], true, |o| Op::FCmp {
                    rn: reg(o[0]),
                    op2: src(o[1]),
                }),
            ],
        ),
        OpcodeDef::new(
            "ftrn",
            funary(|o| Op::FTrunc {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "frnd",
            funary(|o| Op::FRound {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "fraz",
            funary(|o| Op::FRoundAway {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "fflr",
            funary(|o| Op::FFloor {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "fcei",
            funary(|o| Op::FCeil {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "fexp",
            funary(|o| Op::FExp {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
        OpcodeDef::new(
            "flog",
            funary(|o| Op::FLog {
                rd: reg(o[0]),
                op2: src(o[1]),
            }),
        ),
    ];

    defs.into_iter().map(|def| (def.name, def)).collect()
}

static OPCODES: Lazy<HashMap<&'static str, OpcodeDef>> = Lazy::new(build_table);

/// Case-insensitive mnemonic lookup in the process-wide table.
pub fn lookup(mnemonic: &str) -> Option<&'static OpcodeDef> {
    OPCODES.get(mnemonic.to_ascii_lowercase().as_str())
}
