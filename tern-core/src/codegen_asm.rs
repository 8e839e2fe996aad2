//! x86-64 backend: AT&T assembly for the System V ABI.
//!
//! Values occupy 8-byte words. Ints are kept sign-extended from 32 bits,
//! so arithmetic runs on the low halves and is widened again with
//! `movslq`. Temporaries live in callee-saved registers or in frame
//! slots below the saved registers; `%rax`, `%rcx` and `%rdx` are
//! scratch. Runtime functions are external `__tern_*` symbols and the
//! program starts at the global `tern_main`.

use std::collections::{BTreeMap, HashMap};

use crate::builtins::Builtin;
use crate::dataflow::{Liveness, definition, uses};
use crate::error::CoreError;
use crate::mir::{
    BinaryOp, BlockId, Callee, CompilationUnit, Condition, Function, Instruction, Operand,
    Statement, VarId,
};

pub const WORD_BYTES: u32 = 8;
pub const ENTRY_SYMBOL: &str = "tern_main";

const ARGUMENT_REGISTERS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Rbx,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    /// Registers handed out by the allocator. All are callee-saved, so
    /// values survive calls without extra saves.
    pub const ALLOCATABLE: [Register; 5] = [
        Register::Rbx,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Rbx => "%rbx",
            Register::R12 => "%r12",
            Register::R13 => "%r13",
            Register::R14 => "%r14",
            Register::R15 => "%r15",
        }
    }
}

/// Where a temporary lives for the whole function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Home {
    Register(Register),
    /// Frame slot number, counted from the first slot below the saved
    /// registers.
    Spill(u32),
}

/// Smallest range of linear instruction indices covering every point
/// where a temporary is defined, read or live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    pub var: VarId,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub homes: HashMap<VarId, Home>,
    pub spill_slots: u32,
}

impl Allocation {
    pub fn home(&self, var: VarId) -> Option<Home> {
        self.homes.get(&var).copied()
    }

    /// Callee-saved registers the prologue must preserve, in push order.
    pub fn used_registers(&self) -> Vec<Register> {
        let mut used: Vec<Register> = self
            .homes
            .values()
            .filter_map(|home| match home {
                Home::Register(register) => Some(*register),
                Home::Spill(_) => None,
            })
            .collect();
        used.sort();
        used.dedup();
        used
    }
}

pub fn live_intervals(liveness: &Liveness, parameters: &[VarId]) -> Vec<LiveInterval> {
    fn touch(ranges: &mut BTreeMap<VarId, (usize, usize)>, var: VarId, index: usize) {
        let range = ranges.entry(var).or_insert((index, index));
        range.0 = range.0.min(index);
        range.1 = range.1.max(index);
    }

    let mut ranges = BTreeMap::new();
    for parameter in parameters {
        touch(&mut ranges, *parameter, 0);
    }
    for (index, instruction) in liveness.instructions.iter().enumerate() {
        for var in uses(instruction) {
            touch(&mut ranges, var, index);
        }
        if let Some(var) = definition(instruction) {
            touch(&mut ranges, var, index);
        }
        for var in liveness.live_out(index) {
            touch(&mut ranges, *var, index);
        }
    }
    ranges
        .into_iter()
        .map(|(var, (start, end))| LiveInterval { var, start, end })
        .collect()
}

/// Linear-scan allocation. When every register is taken, the interval
/// ending last is spilled.
pub fn allocate_registers(function: &Function) -> Result<Allocation, CoreError> {
    let liveness = Liveness::compute(function)?;
    let mut intervals = live_intervals(&liveness, &function.parameters);
    intervals.sort_by_key(|interval| (interval.start, interval.var));

    let mut allocation = Allocation::default();
    let mut active: Vec<(LiveInterval, Register)> = Vec::new();
    let mut free: Vec<Register> = Register::ALLOCATABLE.iter().rev().copied().collect();
    for interval in intervals {
        active.retain(|(other, register)| {
            if other.end < interval.start {
                free.push(*register);
                false
            } else {
                true
            }
        });
        if let Some(register) = free.pop() {
            allocation.homes.insert(interval.var, Home::Register(register));
            active.push((interval, register));
            continue;
        }
        let victim = active
            .iter()
            .enumerate()
            .max_by_key(|(_, (other, _))| other.end)
            .map(|(index, _)| index);
        let slot = allocation.spill_slots;
        allocation.spill_slots += 1;
        match victim {
            Some(index) if active[index].0.end > interval.end => {
                let (spilled, register) = active.remove(index);
                allocation.homes.insert(spilled.var, Home::Spill(slot));
                allocation.homes.insert(interval.var, Home::Register(register));
                active.push((interval, register));
            }
            _ => {
                allocation.homes.insert(interval.var, Home::Spill(slot));
            }
        }
    }
    Ok(allocation)
}

/// Assembler-safe spelling of a MIR function name.
pub fn symbol(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn string_label(index: usize) -> String {
    format!(".Lstr{index}")
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{byte:03o}")),
        }
    }
    escaped
}

pub fn emit_assembly(unit: &CompilationUnit) -> Result<String, CoreError> {
    unit.validate()?;
    let mut out = String::new();
    out.push_str("    .text\n");
    for (index, function) in unit.functions.iter().enumerate() {
        let allocation = allocate_registers(function)?;
        tracing::trace!(
            function = %function.name,
            spills = allocation.spill_slots,
            "allocated registers"
        );
        FunctionEmitter::new(unit, index, function, allocation, &mut out).emit()?;
    }
    if let Some(entry) = &unit.entry {
        if unit.function(entry).is_none() {
            return Err(CoreError::MissingEntryPoint(entry.clone()));
        }
        out.push_str(&format!("\n    .globl {ENTRY_SYMBOL}\n{ENTRY_SYMBOL}:\n"));
        out.push_str(&format!("    jmp {}\n", symbol(entry)));
    }
    if !unit.strings.is_empty() {
        out.push_str("\n    .section .rodata\n");
        for (index, string) in unit.strings.iter().enumerate() {
            out.push_str("    .balign 8\n");
            out.push_str(&format!("{}:\n", string_label(index)));
            out.push_str("    .long 0\n");
            out.push_str(&format!("    .long {}\n", string.len()));
            out.push_str(&format!("    .ascii \"{}\"\n", escape(string)));
        }
    }
    out.push_str("\n    .section .note.GNU-stack,\"\",@progbits\n");
    tracing::debug!(bytes = out.len(), "emitted assembly");
    Ok(out)
}

struct FunctionEmitter<'a> {
    unit: &'a CompilationUnit,
    index: usize,
    function: &'a Function,
    allocation: Allocation,
    saved: Vec<Register>,
    out: &'a mut String,
    local_labels: usize,
}

impl<'a> FunctionEmitter<'a> {
    fn new(
        unit: &'a CompilationUnit,
        index: usize,
        function: &'a Function,
        allocation: Allocation,
        out: &'a mut String,
    ) -> Self {
        let saved = allocation.used_registers();
        FunctionEmitter {
            unit,
            index,
            function,
            allocation,
            saved,
            out,
            local_labels: 0,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push_str("    ");
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn label(&mut self, label: &str) {
        self.out.push_str(label);
        self.out.push_str(":\n");
    }

    fn block_label(&self, block: BlockId) -> String {
        format!(".L{}_bb{}", self.index, block.0)
    }

    fn fresh_label(&mut self) -> String {
        let label = format!(".L{}_local{}", self.index, self.local_labels);
        self.local_labels += 1;
        label
    }

    fn malformed(&self, message: impl Into<String>) -> CoreError {
        CoreError::malformed(&self.function.name, message)
    }

    fn slot_address(&self, slot: u32) -> String {
        let offset = WORD_BYTES as usize * (self.saved.len() + slot as usize + 1);
        format!("-{offset}(%rbp)")
    }

    fn home(&self, var: VarId) -> Result<String, CoreError> {
        match self.allocation.home(var) {
            Some(Home::Register(register)) => Ok(register.name().to_string()),
            Some(Home::Spill(slot)) => Ok(self.slot_address(slot)),
            None => Err(self.malformed(format!("{var} was not allocated"))),
        }
    }

    fn load(&mut self, operand: &Operand, register: &str) -> Result<(), CoreError> {
        match operand {
            Operand::Const(value) => self.line(format!("movq ${value}, {register}")),
            Operand::Var(var) => {
                let home = self.home(*var)?;
                self.line(format!("movq {home}, {register}"));
            }
            Operand::Str(id) => {
                if self.unit.string(*id).is_none() {
                    return Err(self.malformed(format!("unknown string #{}", id.0)));
                }
                self.line(format!("leaq {}(%rip), {register}", string_label(id.0 as usize)));
            }
            Operand::Function(name) => {
                if self.unit.function(name).is_none() {
                    return Err(self.malformed(format!("unknown function `{name}`")));
                }
                self.line(format!("leaq {}(%rip), {register}", symbol(name)));
            }
        }
        Ok(())
    }

    fn store(&mut self, register: &str, var: VarId) -> Result<(), CoreError> {
        let home = self.home(var)?;
        self.line(format!("movq {register}, {home}"));
        Ok(())
    }

    fn emit(mut self) -> Result<(), CoreError> {
        let name = symbol(&self.function.name);
        self.out.push('\n');
        self.label(&name);
        self.prologue()?;
        for instruction in self.function.linearize() {
            self.instruction(&instruction)?;
        }
        Ok(())
    }

    fn prologue(&mut self) -> Result<(), CoreError> {
        self.line("pushq %rbp");
        self.line("movq %rsp, %rbp");
        for register in self.saved.clone() {
            self.line(format!("pushq {}", register.name()));
        }
        let mut frame = WORD_BYTES as usize * self.allocation.spill_slots as usize;
        if (frame + WORD_BYTES as usize * self.saved.len()) % 16 != 0 {
            frame += WORD_BYTES as usize;
        }
        if frame > 0 {
            self.line(format!("subq ${frame}, %rsp"));
        }
        for (position, parameter) in self.function.parameters.clone().into_iter().enumerate() {
            if self.allocation.home(parameter).is_none() {
                continue;
            }
            match ARGUMENT_REGISTERS.get(position) {
                Some(register) => self.store(register, parameter)?,
                None => {
                    let offset = 16 + WORD_BYTES as usize * (position - ARGUMENT_REGISTERS.len());
                    self.line(format!("movq {offset}(%rbp), %rax"));
                    self.store("%rax", parameter)?;
                }
            }
        }
        Ok(())
    }

    fn epilogue(&mut self) {
        if self.saved.is_empty() {
            self.line("movq %rbp, %rsp");
        } else {
            let offset = WORD_BYTES as usize * self.saved.len();
            self.line(format!("leaq -{offset}(%rbp), %rsp"));
        }
        for register in self.saved.clone().into_iter().rev() {
            self.line(format!("popq {}", register.name()));
        }
        self.line("popq %rbp");
        self.line("ret");
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<(), CoreError> {
        match instruction {
            Instruction::Label(block) => {
                let label = self.block_label(*block);
                self.label(&label);
            }
            Instruction::Statement(statement) => self.statement(statement)?,
            Instruction::Jump(target) => {
                let label = self.block_label(*target);
                self.line(format!("jmp {label}"));
            }
            Instruction::Branch { condition, target } => {
                let label = self.block_label(*target);
                match condition {
                    Condition::One => self.line(format!("jmp {label}")),
                    Condition::Zero => {}
                    Condition::Compare { op, lhs, rhs } => {
                        let suffix = condition_suffix(*op)
                            .ok_or_else(|| self.malformed(format!("`{}` is not a comparison", op.symbol())))?;
                        self.load(lhs, "%rax")?;
                        self.load(rhs, "%rcx")?;
                        self.line("cmpq %rcx, %rax");
                        self.line(format!("j{suffix} {label}"));
                    }
                }
            }
            Instruction::Return(value) => {
                self.load(value, "%rax")?;
                self.epilogue();
            }
            Instruction::Unreachable => self.line("ud2"),
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), CoreError> {
        match statement {
            Statement::Move { dest, value } => {
                self.load(value, "%rax")?;
                self.store("%rax", *dest)
            }
            Statement::Binary { dest, op, lhs, rhs } => {
                self.load(lhs, "%rax")?;
                self.load(rhs, "%rcx")?;
                self.binary(*op);
                self.store("%rax", *dest)
            }
            Statement::Load { dest, base, offset } => {
                self.load(base, "%rax")?;
                self.line(format!("movq {}(%rax), %rax", offset * WORD_BYTES));
                self.store("%rax", *dest)
            }
            Statement::Store {
                base,
                offset,
                value,
            } => {
                self.load(base, "%rax")?;
                self.load(value, "%rcx")?;
                self.line(format!("movq %rcx, {}(%rax)", offset * WORD_BYTES));
                Ok(())
            }
            Statement::Alloc { dest, words } => {
                self.line(format!("movq ${}, %rdi", words * WORD_BYTES));
                self.line(format!("call {}", Builtin::Malloc.native_symbol()));
                self.store("%rax", *dest)
            }
            Statement::Call {
                dest,
                callee,
                arguments,
            } => {
                self.call(callee, arguments)?;
                self.store("%rax", *dest)
            }
        }
    }

    fn call(&mut self, callee: &Callee, arguments: &[Operand]) -> Result<(), CoreError> {
        let (in_registers, on_stack) =
            arguments.split_at(arguments.len().min(ARGUMENT_REGISTERS.len()));
        // Keep %rsp 16-byte aligned at the call.
        let padding = on_stack.len() % 2;
        if padding == 1 {
            self.line("subq $8, %rsp");
        }
        for argument in on_stack.iter().rev() {
            self.load(argument, "%rax")?;
            self.line("pushq %rax");
        }
        for (argument, register) in in_registers.iter().zip(ARGUMENT_REGISTERS) {
            self.load(argument, register)?;
        }
        match callee {
            Callee::Direct(name) => {
                if self.unit.function(name).is_none() {
                    return Err(self.malformed(format!("unknown function `{name}`")));
                }
                self.line(format!("call {}", symbol(name)));
            }
            Callee::Builtin(builtin) => self.line(format!("call {}", builtin.native_symbol())),
            Callee::Indirect(code) => {
                self.load(code, "%rax")?;
                self.line("call *%rax");
            }
        }
        let popped = WORD_BYTES as usize * (on_stack.len() + padding);
        if popped > 0 {
            self.line(format!("addq ${popped}, %rsp"));
        }
        Ok(())
    }

    /// `%rax = %rax op %rcx`
    fn binary(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => {
                self.line("addl %ecx, %eax");
                self.line("movslq %eax, %rax");
            }
            BinaryOp::Sub => {
                self.line("subl %ecx, %eax");
                self.line("movslq %eax, %rax");
            }
            BinaryOp::Mul => {
                self.line("imull %ecx, %eax");
                self.line("movslq %eax, %rax");
            }
            BinaryOp::Div | BinaryOp::Mod => {
                // `idivl` faults on MIN / -1; the result wraps instead.
                let general = self.fresh_label();
                let done = self.fresh_label();
                self.line("cmpl $-1, %ecx");
                self.line(format!("jne {general}"));
                if op == BinaryOp::Div {
                    self.line("negl %eax");
                } else {
                    self.line("xorl %eax, %eax");
                }
                self.line(format!("jmp {done}"));
                self.label(&general);
                self.line("cltd");
                self.line("idivl %ecx");
                if op == BinaryOp::Mod {
                    self.line("movl %edx, %eax");
                }
                self.label(&done);
                self.line("movslq %eax, %rax");
            }
            BinaryOp::Xor => self.line("xorq %rcx, %rax"),
            comparison => {
                let suffix = condition_suffix(comparison).unwrap_or("e");
                self.line("cmpq %rcx, %rax");
                self.line(format!("set{suffix} %al"));
                self.line("movzbq %al, %rax");
            }
        }
    }
}

fn condition_suffix(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Lt => Some("l"),
        BinaryOp::Le => Some("le"),
        BinaryOp::Gt => Some("g"),
        BinaryOp::Ge => Some("ge"),
        BinaryOp::Eq => Some("e"),
        BinaryOp::Ne => Some("ne"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::optimizer::test_support::lower;
    use crate::optimizer::{OptimizerConfig, optimize};

    const PRESSURE: &str = "class Main {
  function f(a: int, b: int, c: int, d: int, e: int, g: int, h: int, i: int): int =
    a * b + c * d + e * g + h * i + a + b + c + d + e + g + h + i
  function main(): int = Main.f(1, 2, 3, 4, 5, 6, 7, 8) / Main.f(8, 7, 6, 5, 4, 3, 2, 1)
}";

    fn assert_no_shared_registers(function: &Function) {
        let allocation = allocate_registers(function).expect("allocate");
        let liveness = Liveness::compute(function).expect("liveness");
        for index in 0..liveness.instructions.len() {
            let mut taken = HashSet::new();
            for var in liveness.live_out(index) {
                if let Some(Home::Register(register)) = allocation.home(*var) {
                    assert!(
                        taken.insert(register),
                        "{} is shared after instruction {index} of {}",
                        register.name(),
                        function.name
                    );
                }
            }
        }
    }

    #[test]
    fn simultaneously_live_values_never_share_a_register() {
        let unit = lower(PRESSURE);
        for function in &unit.functions {
            assert_no_shared_registers(function);
        }
        let optimized = optimize(unit, OptimizerConfig::default()).expect("optimize");
        for function in &optimized.functions {
            assert_no_shared_registers(function);
        }
    }

    #[test]
    fn register_pressure_spills_to_the_frame() {
        let unit = lower(PRESSURE);
        let f = unit.function("_Main_f").expect("f");
        let allocation = allocate_registers(f).expect("allocate");
        assert!(allocation.spill_slots > 0);
        assert_eq!(allocation.used_registers().len(), Register::ALLOCATABLE.len());
        let assembly = emit_assembly(&unit).expect("emit");
        assert!(assembly.contains("(%rbp)"));
        // Seventh and eighth arguments travel on the stack.
        assert!(assembly.contains("movq 16(%rbp), %rax"));
        assert!(assembly.contains("movq 24(%rbp), %rax"));
    }

    #[test]
    fn functions_get_frames_labels_and_an_entry_wrapper() {
        let unit = lower(
            "class Main {
  function main(): unit = Builtins.println(\"hi \\\"there\\\"\")
}",
        );
        let assembly = emit_assembly(&unit).expect("emit");
        assert!(assembly.contains("\n_Main_main:\n    pushq %rbp\n    movq %rsp, %rbp\n"));
        assert!(assembly.contains(".L0_bb0:"));
        assert!(assembly.contains("call __tern_println"));
        assert!(assembly.contains("popq %rbp\n    ret\n"));
        assert!(assembly.contains("    .globl tern_main\ntern_main:\n    jmp _Main_main\n"));
        assert!(assembly.contains("    .long 10\n    .ascii \"hi \\\"there\\\"\"\n"));
    }

    #[test]
    fn division_wraps_instead_of_faulting() {
        let unit = lower(
            "class Main {
  function div(a: int, b: int): int = a / b
  function main(): int = Main.div(5, 2)
}",
        );
        let assembly = emit_assembly(&unit).expect("emit");
        assert!(assembly.contains("cmpl $-1, %ecx"));
        assert!(assembly.contains("negl %eax"));
        assert!(assembly.contains("idivl %ecx"));
        assert!(assembly.contains("call __tern_panic"));
    }

    #[test]
    fn symbols_keep_only_assembler_safe_characters() {
        assert_eq!(symbol("_Main_main.lambda0"), "_Main_main.lambda0");
        assert_eq!(symbol("_a$b_C_f"), "_a_b_C_f");
    }
}
