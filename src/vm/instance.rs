//! The machine itself: registers, memory, flags, the interrupt
//! machinery and the instruction dispatch loop.

use crate::assembler::{self, Timings};
use crate::spec::arch::{ArchParams, RegId, Word, IRQ_SLOTS, NUM_REGS};
use crate::spec::isa::{Cond, MemRef, Op, Sel, Src, Target};
use crate::vm::alu;
use crate::vm::float::Fpu;
use crate::vm::io::{self, Ioc, OutputHandler};
use crate::vm::types::LogLevel;
use bitflags::bitflags;
use num_traits::FromPrimitive;
use static_assertions::const_assert;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::{self, Display};

bitflags! {
    pub struct Flags: u8 {
        const ZERO = 0b0001;
        const SIGN = 0b0010;
        const HALT = 0b0100;
        /// Suppress the program counter increment this step, set by
        /// taken branches and by IRET.
        const BLAST = 0b1000;
    }
}

/// Execution state saved when an interrupt service routine is entered
/// and restored by IRET. Its presence is what marks the machine as
/// being inside an ISR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IsrFrame {
    pc: usize,
    zero: bool,
    sign: bool,
}

/// The fault IRQ numbers, at the top of the vector table. A fault with
/// no handler installed aborts the machine, except for I/O exceptions,
/// which are droppable like ordinary interrupts.
#[allow(non_local_definitions)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, strum_macros::Display,
)]
pub enum Fault {
    #[strum(serialize = "division by zero")]
    DivisionByZero = 122,
    #[strum(serialize = "page fault")]
    PageFault = 123,
    #[strum(serialize = "general protection fault")]
    GeneralProtectionFault = 124,
    #[strum(serialize = "invalid arithmetic")]
    InvalidArithmetic = 125,
    #[strum(serialize = "I/O exception")]
    IoException = 126,
}

const_assert!((Fault::IoException as usize) < IRQ_SLOTS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum State {
    Running,
    Halted,
    Aborted,
}

#[derive(Debug, Clone, Default)]
struct Program {
    /// One slot per source line; `None` for blank and label-only lines.
    records: Vec<Option<Op>>,
    lines: Vec<String>,
}

#[derive(Debug)]
pub struct Vm {
    log_level: LogLevel,
    arch: ArchParams,
    extensions: bool,
    fpu: Fpu,

    program: Program,

    regs: [Word; NUM_REGS],
    mem: Vec<u8>,
    pc: usize,
    flags: Flags,

    saved: Option<IsrFrame>,
    ivt: [Option<usize>; IRQ_SLOTS],
    irq_queue: VecDeque<u8>,
    ioc: Ioc,

    total_steps: u64,
    fatal: Option<Fault>,
}

impl Vm {
    pub fn new(log_level: LogLevel, arch: ArchParams, extensions: bool) -> Vm {
        Vm {
            log_level,
            arch,
            extensions,
            fpu: Fpu::new(arch.bytes_per_word),

            program: Program::default(),

            regs: [0; NUM_REGS],
            mem: vec![0; arch.mem_bytes()],
            pc: 0,
            flags: Flags::HALT,

            saved: None,
            ivt: [None; IRQ_SLOTS],
            irq_queue: VecDeque::new(),
            ioc: Ioc::new(),

            total_steps: 0,
            fatal: None,
        }
    }

    pub fn arch(&self) -> &ArchParams {
        &self.arch
    }

    pub fn fpu(&self) -> &Fpu {
        &self.fpu
    }

    pub fn reg(&self, r: RegId) -> Word {
        self.regs[r as usize]
    }

    pub fn set_reg(&mut self, r: RegId, val: Word) {
        self.regs[r as usize] = val & self.arch.uint_max;
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn fatal_fault(&self) -> Option<Fault> {
        self.fatal
    }

    pub fn record(&self, line: usize) -> Option<&Op> {
        self.program.records.get(line).and_then(Option::as_ref)
    }

    pub fn line(&self, line: usize) -> Option<&str> {
        self.program.lines.get(line).map(String::as_str)
    }

    pub fn program_len(&self) -> usize {
        self.program.records.len()
    }

    pub fn state(&self) -> State {
        if self.fatal.is_some() {
            State::Aborted
        } else if self.flags.contains(Flags::HALT) {
            State::Halted
        } else {
            State::Running
        }
    }

    /// Build a fresh program from source and reset the machine. On
    /// failure the previous program (and machine state) is untouched.
    pub fn compile(&mut self, source: &str) -> Result<Timings, assembler::Error> {
        let (records, timings) = assembler::assemble(source, &self.arch, self.extensions)?;
        self.program = Program {
            records,
            lines: source.lines().map(str::to_owned).collect(),
        };
        self.reset();
        Ok(timings)
    }

    /// Zero all execution state. Port registrations and handlers
    /// survive; buffered port input does not.
    pub fn reset(&mut self) {
        self.regs = [0; NUM_REGS];
        self.mem = vec![0; self.arch.mem_bytes()];
        self.pc = 0;
        self.flags = Flags::empty();
        self.saved = None;
        self.ivt = [None; IRQ_SLOTS];
        self.irq_queue.clear();
        self.ioc.clear_input();
        self.total_steps = 0;
        self.fatal = None;

        if self.program.records.is_empty() {
            self.flags.insert(Flags::HALT);
        }
    }

    pub fn io_register(&mut self, port: u64, handler: Option<OutputHandler>) -> Result<(), io::Error> {
        self.ioc.register(port, handler)
    }

    pub fn io_input_push(&mut self, port: u64, value: Word) -> Result<(), io::Error> {
        self.ioc.push_input(port, value & self.arch.uint_max)
    }

    /// Queue an interrupt from outside the machine, e.g. a device
    /// signalling buffered input. Numbers past the vector table are
    /// ignored.
    pub fn raise_irq(&mut self, irq: u8) {
        if (irq as usize) < IRQ_SLOTS {
            self.irq_queue.push_back(irq);
        }
    }

    pub fn pending_irqs(&self) -> impl Iterator<Item = u8> + '_ {
        self.irq_queue.iter().copied()
    }

    pub fn in_isr(&self) -> bool {
        self.saved.is_some()
    }

    /// Read the word stored big-endian at word address `addr`, or
    /// `None` when the address is past the configured word count.
    pub fn mem_word(&self, addr: u64) -> Option<Word> {
        if addr >= self.arch.mem_words {
            return None;
        }

        let bpw = self.arch.bytes_per_word as usize;
        let base = addr as usize * bpw;
        let mut v = 0;
        for b in 0..bpw {
            v = (v << 8) | self.mem[base + b] as Word;
        }
        Some(v)
    }

    fn mem_store(&mut self, addr: u64, val: Word) -> bool {
        if addr >= self.arch.mem_words {
            return false;
        }

        let bpw = self.arch.bytes_per_word as usize;
        let base = addr as usize * bpw;
        for b in 0..bpw {
            self.mem[base + b] = (val >> (8 * (bpw - 1 - b))) as u8;
        }
        true
    }

    fn raise(&mut self, fault: Fault) {
        if self.log_level.internals {
            println!("!> fault: {}", fault);
        }
        self.irq_queue.push_back(fault as u8);
    }

    fn src_val(&self, op2: Src) -> Word {
        match op2 {
            Src::Imm(v) => v,
            Src::Reg(r) => self.regs[r as usize],
        }
    }

    fn memref_addr(&self, mr: MemRef) -> u64 {
        match mr {
            MemRef::Addr(a) => a,
            MemRef::Reg(r) => self.regs[r as usize],
        }
    }

    fn sel_val(&self, sel: Sel) -> u64 {
        match sel {
            Sel::Imm(n) => n,
            Sel::Reg(r) => self.regs[r as usize],
        }
    }

    fn set_cmp_flags(&mut self, zero: bool, sign: bool) {
        self.flags.set(Flags::ZERO, zero);
        self.flags.set(Flags::SIGN, sign);
    }

    fn cond_holds(&self, cond: Cond) -> bool {
        let (zero, sign) = (
            self.flags.contains(Flags::ZERO),
            self.flags.contains(Flags::SIGN),
        );
        match cond {
            Cond::Always => true,
            Cond::Eq => zero,
            Cond::Ne => !zero,
            Cond::Gt => !zero && !sign,
            Cond::Lt => sign,
        }
    }

    /// Advance the machine by one instruction. The sequence is: execute
    /// the record under the program counter, advance it (unless a
    /// branch already moved it), vector one pending interrupt when not
    /// inside an ISR, then halt if the counter ran off the program.
    pub fn step(&mut self) -> State {
        if self.state() != State::Running {
            return self.state();
        }

        if let Some(op) = self.program.records.get(self.pc).copied().flatten() {
            self.exec(op);
        }
        self.total_steps += 1;

        if self.flags.contains(Flags::HALT) {
            return self.state();
        }

        if !self.flags.contains(Flags::BLAST) {
            self.pc += 1;
        }
        self.flags.remove(Flags::BLAST);

        if self.saved.is_none() {
            if let Some(irq) = self.irq_queue.pop_front() {
                self.vector(irq);
            }
        }

        if self.pc >= self.program.records.len() {
            self.flags.insert(Flags::HALT);
        }

        if self.log_level.internals {
            println!("{}", self);
        }

        self.state()
    }

    fn vector(&mut self, irq: u8) {
        match self.ivt[irq as usize] {
            Some(line) => {
                if self.log_level.internals {
                    println!("<- IRQ {} vectored to line {}", irq, line);
                }
                self.saved = Some(IsrFrame {
                    pc: self.pc,
                    zero: self.flags.contains(Flags::ZERO),
                    sign: self.flags.contains(Flags::SIGN),
                });
                self.pc = line;
            }
            None => match Fault::from_u8(irq) {
                Some(Fault::IoException) | None => {
                    if self.log_level.internals {
                        println!("<- IRQ {} dropped (no handler)", irq);
                    }
                }
                Some(fault) => {
                    self.fatal = Some(fault);
                    self.flags.insert(Flags::HALT);
                }
            },
        }
    }

    fn exec(&mut self, op: Op) {
        let n = self.arch.word_len;

        match op {
            Op::Ldr { rd, src } => {
                let addr = self.memref_addr(src);
                match self.mem_word(addr) {
                    Some(v) => self.regs[rd as usize] = v,
                    None => {
                        self.regs[rd as usize] = 0;
                        self.raise(Fault::PageFault);
                    }
                }
            }
            Op::Str { src, dst } => {
                let val = self.src_val(src);
                let addr = self.memref_addr(dst);
                if !self.mem_store(addr, val) {
                    self.raise(Fault::PageFault);
                }
            }

            Op::Mov { rd, op2 } => {
                self.regs[rd as usize] = self.src_val(op2) & self.arch.uint_max
            }
            Op::Mvn { rd, op2 } => self.regs[rd as usize] = alu::not(self.src_val(op2), n),
            Op::Neg { rd, op2 } => self.regs[rd as usize] = alu::negate(self.src_val(op2), n),

            Op::Add { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::add(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Sub { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::sub(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Mul { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::mul(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Div { rd, rn, op2 } => {
                match alu::div_rem(self.regs[rn as usize], self.src_val(op2), n) {
                    Some((q, _)) => self.regs[rd as usize] = q,
                    None => self.raise(Fault::DivisionByZero),
                }
            }
            Op::Mod { rd, rn, op2 } => {
                match alu::div_rem(self.regs[rn as usize], self.src_val(op2), n) {
                    Some((_, r)) => self.regs[rd as usize] = r,
                    None => self.raise(Fault::DivisionByZero),
                }
            }
            Op::And { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::and(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Orr { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::or(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Eor { rd, rn, op2 } => {
                self.regs[rd as usize] = alu::xor(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Lsl { rd, rn, op2 } => {
                self.regs[rd as usize] =
                    alu::shift_left(self.regs[rn as usize], self.src_val(op2), n)
            }
            Op::Lsr { rd, rn, op2 } => {
                self.regs[rd as usize] =
                    alu::shift_right(self.regs[rn as usize], self.src_val(op2), n)
            }

            Op::Cmp { rn, op2 } => {
                let diff =
                    alu::to_signed(self.regs[rn as usize], n) - alu::to_signed(self.src_val(op2), n);
                self.set_cmp_flags(diff == 0, diff < 0);
            }
            Op::Branch { cond, target } => {
                if self.cond_holds(cond) {
                    // Register targets must be valid both as a signed
                    // word and as a line index.
                    let (line, in_range) = match target {
                        Target::Line(l) => (l, true),
                        Target::Reg(r) => {
                            let v = self.regs[r as usize];
                            (v as usize, v <= self.arch.int_max as Word)
                        }
                    };
                    if !in_range || line >= self.program.records.len() {
                        self.raise(Fault::GeneralProtectionFault);
                    } else {
                        self.pc = line;
                        self.flags.insert(Flags::BLAST);
                    }
                }
            }
            Op::Halt => {
                self.flags.insert(Flags::HALT);
            }

            Op::Int { irq } => {
                let irq = self.sel_val(irq);
                if irq >= IRQ_SLOTS as u64 {
                    self.raise(Fault::GeneralProtectionFault);
                } else {
                    if self.log_level.internals {
                        println!("-> INT {}", irq);
                    }
                    self.irq_queue.push_back(irq as u8);
                }
            }
            Op::Iret => match self.saved.take() {
                Some(frame) => {
                    self.pc = frame.pc;
                    self.set_cmp_flags(frame.zero, frame.sign);
                    self.flags.insert(Flags::BLAST);
                }
                None => self.raise(Fault::GeneralProtectionFault),
            },
            Op::Mivt { irq, line } => {
                let irq = self.sel_val(irq);
                if irq >= IRQ_SLOTS as u64 {
                    self.raise(Fault::GeneralProtectionFault);
                } else {
                    self.ivt[irq as usize] = Some(line);
                }
            }

            Op::In { rd, port } => {
                let port = self.sel_val(port);
                match self.ioc.pop_input(port) {
                    Ok(v) => self.regs[rd as usize] = v & self.arch.uint_max,
                    Err(_) => self.raise(Fault::IoException),
                }
            }
            Op::Out { rd, port } => {
                let port = self.sel_val(port);
                let val = self.regs[rd as usize];
                if self.ioc.write(port, val).is_err() {
                    self.raise(Fault::GeneralProtectionFault);
                }
            }

            Op::FAdd { rd, rn, op2 } => {
                self.regs[rd as usize] = self.fpu.add(self.regs[rn as usize], self.src_val(op2))
            }
            Op::FSub { rd, rn, op2 } => {
                self.regs[rd as usize] = self.fpu.sub(self.regs[rn as usize], self.src_val(op2))
            }
            Op::FMul { rd, rn, op2 } => {
                self.regs[rd as usize] = self.fpu.mul(self.regs[rn as usize], self.src_val(op2))
            }
            Op::FDiv { rd, rn, op2 } => {
                self.regs[rd as usize] = self.fpu.div(self.regs[rn as usize], self.src_val(op2))
            }
            Op::FCmp { rn, op2 } => {
                match self.fpu.compare(self.regs[rn as usize], self.src_val(op2)) {
                    Some(ord) => {
                        self.set_cmp_flags(ord == Ordering::Equal, ord == Ordering::Less)
                    }
                    None => self.raise(Fault::InvalidArithmetic),
                }
            }

            Op::FTrunc { rd, op2 } => {
                self.regs[rd as usize] = self.fpu.truncate(self.src_val(op2))
            }
            Op::FRound { rd, op2 } => self.regs[rd as usize] = self.fpu.round(self.src_val(op2)),
            Op::FRoundAway { rd, op2 } => {
                self.regs[rd as usize] = self.fpu.round_away(self.src_val(op2))
            }
            Op::FFloor { rd, op2 } => self.regs[rd as usize] = self.fpu.floor(self.src_val(op2)),
            Op::FCeil { rd, op2 } => self.regs[rd as usize] = self.fpu.ceil(self.src_val(op2)),
            Op::FExp { rd, op2 } => self.regs[rd as usize] = self.fpu.exp2(self.src_val(op2)),
            Op::FLog { rd, op2 } => self.regs[rd as usize] = self.fpu.log2(self.src_val(op2)),
        }
    }
}

impl Display for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "STATE: {}, STEPS: {}, PC: {}, FLAGS: Z={} S={}{}",
            self.state(),
            self.total_steps,
            self.pc,
            self.flags.contains(Flags::ZERO) as u8,
            self.flags.contains(Flags::SIGN) as u8,
            if self.in_isr() { " (in ISR)" } else { "" },
        )?;
        if let Some(fault) = self.fatal {
            writeln!(f, "FATAL: {}", fault)?;
        }
        for (n, chunk) in self.regs.chunks(5).enumerate() {
            let cells: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, v)| format!("R{:<2} {:>10}", n * 5 + i, v))
                .collect();
            writeln!(f, "{}", cells.join("  "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine(records: Vec<Op>) -> Vm {
        machine_with(ArchParams::new(1, 256).unwrap(), records)
    }

    fn machine_with(arch: ArchParams, records: Vec<Op>) -> Vm {
        let mut vm = Vm::new(LogLevel::silent(), arch, true);
        vm.program = Program {
            records: records.into_iter().map(Some).collect(),
            lines: vec![],
        };
        vm.reset();
        vm
    }

    fn run(vm: &mut Vm) -> State {
        for _ in 0..10_000 {
            match vm.step() {
                State::Running => (),
                state => return state,
            }
        }
        panic!("machine did not settle");
    }

    #[test]
    fn empty_program_is_halted() {
        let mut vm = machine(vec![]);
        assert_eq!(vm.state(), State::Halted);
        assert_eq!(vm.step(), State::Halted);
        assert_eq!(vm.total_steps(), 0);
    }

    #[test]
    fn mov_and_halt() {
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(7),
            },
            Op::Mov {
                rd: 1,
                op2: Src::Reg(0),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 7);
        assert_eq!(vm.reg(1), 7);
        assert_eq!(vm.total_steps(), 3);
    }

    #[test]
    fn running_off_the_end_halts() {
        let mut vm = machine(vec![Op::Mov {
            rd: 0,
            op2: Src::Imm(1),
        }]);
        assert_eq!(vm.step(), State::Halted);
        assert_eq!(vm.reg(0), 1);
    }

    #[test]
    fn arithmetic_wraps_to_word_length() {
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(200),
            },
            Op::Add {
                rd: 1,
                rn: 0,
                op2: Src::Imm(100),
            },
            Op::Halt,
        ]);
        run(&mut vm);
        assert_eq!(vm.reg(1), 44);
    }

    #[test]
    fn cmp_sets_flags() {
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(5),
            },
            Op::Cmp {
                rn: 0,
                op2: Src::Imm(5),
            },
            Op::Halt,
        ]);
        run(&mut vm);
        assert!(vm.flags().contains(Flags::ZERO));
        assert!(!vm.flags().contains(Flags::SIGN));
    }

    #[test]
    fn cmp_is_signed() {
        // 255 is -1 at 8 bits, so it compares below 1.
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(255),
            },
            Op::Cmp {
                rn: 0,
                op2: Src::Imm(1),
            },
            Op::Halt,
        ]);
        run(&mut vm);
        assert!(vm.flags().contains(Flags::SIGN));
    }

    #[test]
    fn taken_branch_suppresses_increment() {
        // Loop: R0 counts down from 3 to 0.
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(3),
            },
            Op::Sub {
                rd: 0,
                rn: 0,
                op2: Src::Imm(1),
            },
            Op::Cmp {
                rn: 0,
                op2: Src::Imm(0),
            },
            Op::Branch {
                cond: Cond::Ne,
                target: Target::Line(1),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 0);
        assert_eq!(vm.total_steps(), 1 + 3 * 3 + 1);
    }

    #[test]
    fn register_branch_past_signed_maximum_faults() {
        // 200 is a valid line in a 250-line program, but it is not a
        // valid signed 8-bit value.
        let mut records = vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(200),
            },
            Op::Branch {
                cond: Cond::Always,
                target: Target::Reg(0),
            },
        ];
        records.resize(250, Op::Halt);
        let mut vm = machine(records);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::GeneralProtectionFault));
    }

    #[test]
    fn register_branch_out_of_range_faults() {
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(100),
            },
            Op::Branch {
                cond: Cond::Always,
                target: Target::Reg(0),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::GeneralProtectionFault));
    }

    #[test]
    fn memory_is_big_endian() {
        let arch = ArchParams::new(2, 128).unwrap();
        let mut vm = machine_with(
            arch,
            vec![
                Op::Mov {
                    rd: 0,
                    op2: Src::Imm(0x1234),
                },
                Op::Str {
                    src: Src::Reg(0),
                    dst: MemRef::Addr(10),
                },
                Op::Ldr {
                    rd: 1,
                    src: MemRef::Addr(10),
                },
                Op::Halt,
            ],
        );
        run(&mut vm);
        assert_eq!(vm.reg(1), 0x1234);
        assert_eq!(vm.mem_word(10), Some(0x1234));
        // Word address 10 occupies bytes 20-21, high byte first.
        assert_eq!(vm.mem[20], 0x12);
        assert_eq!(vm.mem[21], 0x34);
    }

    #[test]
    fn addresses_count_words_not_bytes() {
        // 128 two-byte words: address 127 is the last word, 200 is
        // past the end even though byte 200 exists.
        let arch = ArchParams::new(2, 128).unwrap();
        let mut vm = machine_with(
            arch,
            vec![
                Op::Ldr {
                    rd: 0,
                    src: MemRef::Addr(200),
                },
                Op::Halt,
            ],
        );
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::PageFault));

        let mut vm = machine_with(
            arch,
            vec![
                Op::Str {
                    src: Src::Imm(9),
                    dst: MemRef::Addr(127),
                },
                Op::Halt,
            ],
        );
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.mem_word(127), Some(9));
    }

    #[test]
    fn unhandled_page_fault_aborts() {
        let mut vm = machine(vec![
            Op::Ldr {
                rd: 0,
                src: MemRef::Addr(9999),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::PageFault));
        assert_eq!(vm.reg(0), 0);
    }

    #[test]
    fn handled_page_fault_runs_the_isr() {
        // ISR at line 3 sets R1 and returns; the faulting load yields 0.
        let mut vm = machine(vec![
            Op::Mivt {
                irq: Sel::Imm(Fault::PageFault as u64),
                line: 3,
            },
            Op::Str {
                src: Src::Imm(1),
                dst: MemRef::Addr(9999),
            },
            Op::Halt,
            Op::Mov {
                rd: 1,
                op2: Src::Imm(42),
            },
            Op::Iret,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(1), 42);
        assert_eq!(vm.fatal_fault(), None);
    }

    #[test]
    fn division_by_zero_faults() {
        let mut vm = machine(vec![
            Op::Div {
                rd: 0,
                rn: 1,
                op2: Src::Imm(0),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::DivisionByZero));
    }

    #[test]
    fn software_interrupt_flow() {
        // MIVT 5 -> ISR; INT 5; ISR adds 10 to R0 and returns. The
        // frame must restore flags and resume after the INT.
        let mut vm = machine(vec![
            Op::Mivt {
                irq: Sel::Imm(5),
                line: 5,
            },
            Op::Mov {
                rd: 0,
                op2: Src::Imm(1),
            },
            Op::Int { irq: Sel::Imm(5) },
            Op::Add {
                rd: 0,
                rn: 0,
                op2: Src::Imm(100),
            },
            Op::Halt,
            Op::Add {
                rd: 0,
                rn: 0,
                op2: Src::Imm(10),
            },
            Op::Iret,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 111);
    }

    #[test]
    fn interrupts_defer_while_in_isr() {
        // The ISR raises the same IRQ again; the nested request must
        // wait for IRET before vectoring.
        let mut vm = machine(vec![
            Op::Mivt {
                irq: Sel::Imm(3),
                line: 4,
            },
            Op::Int { irq: Sel::Imm(3) },
            Op::Mov {
                rd: 2,
                op2: Src::Imm(9),
            },
            Op::Halt,
            Op::Add {
                rd: 0,
                rn: 0,
                op2: Src::Imm(1),
            },
            Op::Cmp {
                rn: 0,
                op2: Src::Imm(1),
            },
            Op::Branch {
                cond: Cond::Ne,
                target: Target::Line(8),
            },
            Op::Int { irq: Sel::Imm(3) },
            Op::Iret,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 2);
        assert_eq!(vm.reg(2), 9);
    }

    #[test]
    fn int_with_bad_irq_number_faults() {
        let mut vm = machine(vec![Op::Int { irq: Sel::Imm(200) }, Op::Halt]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::GeneralProtectionFault));
    }

    #[test]
    fn iret_outside_isr_faults() {
        let mut vm = machine(vec![Op::Iret, Op::Halt]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::GeneralProtectionFault));
    }

    #[test]
    fn unhandled_ordinary_irq_is_dropped() {
        let mut vm = machine(vec![
            Op::Int { irq: Sel::Imm(40) },
            Op::Mov {
                rd: 0,
                op2: Src::Imm(1),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 1);
    }

    #[test]
    fn port_io_round_trip() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut vm = machine(vec![
            Op::In {
                rd: 0,
                port: Sel::Imm(2),
            },
            Op::Add {
                rd: 0,
                rn: 0,
                op2: Src::Imm(1),
            },
            Op::Out {
                rd: 0,
                port: Sel::Imm(3),
            },
            Op::Halt,
        ]);
        vm.io_register(2, None).unwrap();
        vm.io_register(3, Some(Box::new(move |v| sink.borrow_mut().push(v))))
            .unwrap();
        vm.io_input_push(2, 41).unwrap();

        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(*seen.borrow(), vec![42]);
    }

    #[test]
    fn in_with_no_input_is_an_io_exception() {
        // No handler for the exception either, but I/O exceptions are
        // droppable, so the machine still halts cleanly.
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(7),
            },
            Op::In {
                rd: 0,
                port: Sel::Imm(2),
            },
            Op::Halt,
        ]);
        vm.io_register(2, None).unwrap();
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 7);
    }

    #[test]
    fn in_from_out_of_range_port_is_droppable() {
        let mut vm = machine(vec![
            Op::Mov {
                rd: 0,
                op2: Src::Imm(7),
            },
            Op::In {
                rd: 0,
                port: Sel::Imm(500),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(0), 7);
    }

    #[test]
    fn out_to_unregistered_port_faults() {
        let mut vm = machine(vec![
            Op::Out {
                rd: 0,
                port: Sel::Imm(9),
            },
            Op::Halt,
        ]);
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::GeneralProtectionFault));
    }

    #[test]
    fn float_ops_use_the_word_sized_format() {
        let arch = ArchParams::new(2, 128).unwrap();
        let mut vm = machine_with(arch, vec![Op::Halt]);
        let f = *vm.fpu();
        vm.program = Program {
            records: vec![
                Some(Op::Mov {
                    rd: 0,
                    op2: Src::Imm(f.encode(1.5)),
                }),
                Some(Op::FAdd {
                    rd: 1,
                    rn: 0,
                    op2: Src::Imm(f.encode(2.25)),
                }),
                Some(Op::FTrunc {
                    rd: 2,
                    op2: Src::Reg(1),
                }),
                Some(Op::Halt),
            ],
            lines: vec![],
        };
        vm.reset();
        assert_eq!(run(&mut vm), State::Halted);
        assert_eq!(vm.reg(1), f.encode(3.75));
        assert_eq!(vm.reg(2), f.encode(3.0));
    }

    #[test]
    fn fcmp_nan_is_invalid_arithmetic() {
        let arch = ArchParams::new(2, 128).unwrap();
        let mut vm = machine_with(arch, vec![Op::Halt]);
        let nan = vm.fpu().nan();
        vm.program = Program {
            records: vec![
                Some(Op::FCmp {
                    rn: 0,
                    op2: Src::Imm(nan),
                }),
                Some(Op::Halt),
            ],
            lines: vec![],
        };
        vm.reset();
        assert_eq!(run(&mut vm), State::Aborted);
        assert_eq!(vm.fatal_fault(), Some(Fault::InvalidArithmetic));
    }

    #[test]
    fn reset_keeps_port_registrations() {
        let mut vm = machine(vec![Op::Halt]);
        vm.io_register(1, None).unwrap();
        vm.io_input_push(1, 5).unwrap();
        vm.reset();
        // Registration survives, buffered input does not.
        assert_eq!(vm.io_register(1, None), Err(io::Error::PortInUse(1)));
        vm.io_input_push(1, 6).unwrap();
    }
}
