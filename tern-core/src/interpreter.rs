//! Reference evaluator for MIR.
//!
//! Runs a [`CompilationUnit`] directly: a growable word heap backs
//! records, strings live in a side table addressed by handle, and
//! `println` output is captured. Calls use an explicit frame stack, so
//! deep recursion in the evaluated program cannot overflow the host.

use std::collections::HashMap;

use crate::builtins::{Builtin, DIVISION_BY_ZERO, conversion_failure, parse_int};
use crate::error::CoreError;
use crate::mir::{
    BlockId, Callee, CompilationUnit, Condition, Operand, Statement, Terminator, VarId,
};

pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;
pub const DEFAULT_DEPTH_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(i32),
    Panicked(String),
    StepLimitExceeded,
    StackOverflow,
}

/// Observable behaviour of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub stdout: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub steps: u64,
    pub depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            steps: DEFAULT_STEP_LIMIT,
            depth: DEFAULT_DEPTH_LIMIT,
        }
    }
}

pub fn evaluate(unit: &CompilationUnit, entry: &str) -> Result<Evaluation, CoreError> {
    evaluate_with_limits(unit, entry, Limits::default())
}

pub fn evaluate_with_limits(
    unit: &CompilationUnit,
    entry: &str,
    limits: Limits,
) -> Result<Evaluation, CoreError> {
    unit.validate()?;
    let mut machine = Machine::new(unit);
    let outcome = machine.run(entry, limits)?;
    tracing::trace!(steps = machine.steps, ?outcome, "evaluation finished");
    Ok(Evaluation {
        stdout: machine.stdout,
        outcome,
    })
}

struct Frame {
    function: usize,
    values: HashMap<VarId, i32>,
    /// Index into the function's `blocks`.
    block: usize,
    statement: usize,
    /// Caller temporary receiving the result.
    return_to: Option<VarId>,
}

enum Step {
    Continue,
    Call {
        dest: VarId,
        function: usize,
        arguments: Vec<i32>,
    },
    Return(i32),
    Panic(String),
}

struct Machine<'u> {
    unit: &'u CompilationUnit,
    block_indices: Vec<HashMap<BlockId, usize>>,
    function_ids: HashMap<&'u str, usize>,
    heap: Vec<i32>,
    strings: Vec<String>,
    stdout: String,
    steps: u64,
}

impl<'u> Machine<'u> {
    fn new(unit: &'u CompilationUnit) -> Self {
        Machine {
            unit,
            block_indices: unit
                .functions
                .iter()
                .map(|f| f.blocks.iter().enumerate().map(|(i, b)| (b.id, i)).collect())
                .collect(),
            function_ids: unit
                .functions
                .iter()
                .enumerate()
                .map(|(i, f)| (f.name.as_str(), i))
                .collect(),
            // Address 0 stays unused so no record lives at null.
            heap: vec![0],
            strings: unit.strings.clone(),
            stdout: String::new(),
            steps: 0,
        }
    }

    fn frame(&self, function: usize, arguments: Vec<i32>, return_to: Option<VarId>) -> Result<Frame, CoreError> {
        let definition = &self.unit.functions[function];
        if definition.parameters.len() != arguments.len() {
            return Err(CoreError::malformed(
                &definition.name,
                format!(
                    "called with {} arguments, expects {}",
                    arguments.len(),
                    definition.parameters.len()
                ),
            ));
        }
        Ok(Frame {
            function,
            values: definition.parameters.iter().copied().zip(arguments).collect(),
            block: self.block_index(function, definition.entry)?,
            statement: 0,
            return_to,
        })
    }

    fn block_index(&self, function: usize, block: BlockId) -> Result<usize, CoreError> {
        self.block_indices[function].get(&block).copied().ok_or_else(|| {
            CoreError::malformed(
                &self.unit.functions[function].name,
                format!("jump to undefined block {block}"),
            )
        })
    }

    fn run(&mut self, entry: &str, limits: Limits) -> Result<Outcome, CoreError> {
        let entry = *self
            .function_ids
            .get(entry)
            .ok_or_else(|| CoreError::MissingEntryPoint(entry.to_string()))?;
        let mut stack = vec![self.frame(entry, Vec::new(), None)?];
        loop {
            self.steps += 1;
            if self.steps > limits.steps {
                return Ok(Outcome::StepLimitExceeded);
            }
            let Some(frame) = stack.last_mut() else {
                return Err(CoreError::malformed("<evaluator>", "empty call stack"));
            };
            match self.step(frame)? {
                Step::Continue => {}
                Step::Call {
                    dest,
                    function,
                    arguments,
                } => {
                    if stack.len() >= limits.depth {
                        return Ok(Outcome::StackOverflow);
                    }
                    let callee = self.frame(function, arguments, Some(dest))?;
                    stack.push(callee);
                }
                Step::Return(value) => {
                    let finished = stack.pop();
                    match (stack.last_mut(), finished.and_then(|f| f.return_to)) {
                        (Some(caller), Some(dest)) => {
                            caller.values.insert(dest, value);
                        }
                        _ => return Ok(Outcome::Returned(value)),
                    }
                }
                Step::Panic(message) => return Ok(Outcome::Panicked(message)),
            }
        }
    }

    fn step(&mut self, frame: &mut Frame) -> Result<Step, CoreError> {
        let unit = self.unit;
        let function = &unit.functions[frame.function];
        let block = &function.blocks[frame.block];
        if let Some(statement) = block.statements.get(frame.statement) {
            frame.statement += 1;
            return self.statement(frame, statement);
        }
        let target = match &block.terminator {
            Terminator::Jump(target) => *target,
            Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => {
                if self.condition(frame, condition)? {
                    *if_true
                } else {
                    *if_false
                }
            }
            Terminator::Return(value) => return Ok(Step::Return(self.operand(frame, value)?)),
            Terminator::Unreachable => {
                return Err(CoreError::malformed(
                    &function.name,
                    format!("{} reached its unreachable terminator", block.id),
                ));
            }
        };
        frame.block = self.block_index(frame.function, target)?;
        frame.statement = 0;
        Ok(Step::Continue)
    }

    fn operand(&self, frame: &Frame, operand: &Operand) -> Result<i32, CoreError> {
        match operand {
            Operand::Const(value) => Ok(*value),
            Operand::Var(var) => frame.values.get(var).copied().ok_or_else(|| {
                CoreError::malformed(
                    &self.unit.functions[frame.function].name,
                    format!("{var} is read before it is written"),
                )
            }),
            Operand::Str(id) => Ok(id.0 as i32),
            Operand::Function(name) => self
                .function_ids
                .get(name.as_str())
                .map(|id| *id as i32)
                .ok_or_else(|| CoreError::malformed("<evaluator>", format!("unknown function `{name}`"))),
        }
    }

    fn operands(&self, frame: &Frame, operands: &[Operand]) -> Result<Vec<i32>, CoreError> {
        operands.iter().map(|o| self.operand(frame, o)).collect()
    }

    fn condition(&self, frame: &Frame, condition: &Condition) -> Result<bool, CoreError> {
        match condition {
            Condition::One => Ok(true),
            Condition::Zero => Ok(false),
            Condition::Compare { op, lhs, rhs } => {
                let lhs = self.operand(frame, lhs)?;
                let rhs = self.operand(frame, rhs)?;
                Ok(op.evaluate(lhs, rhs).is_some_and(|v| v != 0))
            }
        }
    }

    fn address(&self, frame: &Frame, base: &Operand, offset: u32) -> Result<usize, CoreError> {
        let base = self.operand(frame, base)?;
        let address = base as u32 as usize + offset as usize;
        if base <= 0 || address >= self.heap.len() {
            return Err(CoreError::malformed(
                &self.unit.functions[frame.function].name,
                format!("memory access out of bounds at {base}[{offset}]"),
            ));
        }
        Ok(address)
    }

    fn allocate(&mut self, words: usize) -> i32 {
        let address = self.heap.len();
        self.heap.resize(address + words, 0);
        address as i32
    }

    fn statement(&mut self, frame: &mut Frame, statement: &Statement) -> Result<Step, CoreError> {
        match statement {
            Statement::Move { dest, value } => {
                let value = self.operand(frame, value)?;
                frame.values.insert(*dest, value);
            }
            Statement::Binary { dest, op, lhs, rhs } => {
                let lhs = self.operand(frame, lhs)?;
                let rhs = self.operand(frame, rhs)?;
                match op.evaluate(lhs, rhs) {
                    Some(value) => {
                        frame.values.insert(*dest, value);
                    }
                    None => return Ok(Step::Panic(DIVISION_BY_ZERO.to_string())),
                }
            }
            Statement::Load { dest, base, offset } => {
                let address = self.address(frame, base, *offset)?;
                frame.values.insert(*dest, self.heap[address]);
            }
            Statement::Store {
                base,
                offset,
                value,
            } => {
                let address = self.address(frame, base, *offset)?;
                self.heap[address] = self.operand(frame, value)?;
            }
            Statement::Alloc { dest, words } => {
                let address = self.allocate(*words as usize);
                frame.values.insert(*dest, address);
            }
            Statement::Call {
                dest,
                callee,
                arguments,
            } => {
                let arguments = self.operands(frame, arguments)?;
                let function = match callee {
                    Callee::Direct(name) => *self.function_ids.get(name.as_str()).ok_or_else(|| {
                        CoreError::malformed("<evaluator>", format!("unknown function `{name}`"))
                    })?,
                    Callee::Indirect(target) => {
                        let target = self.operand(frame, target)?;
                        usize::try_from(target)
                            .ok()
                            .filter(|t| *t < self.unit.functions.len())
                            .ok_or_else(|| {
                                CoreError::malformed(
                                    &self.unit.functions[frame.function].name,
                                    format!("indirect call through invalid code pointer {target}"),
                                )
                            })?
                    }
                    Callee::Builtin(builtin) => {
                        return match self.builtin(*builtin, &arguments)? {
                            Ok(value) => {
                                frame.values.insert(*dest, value);
                                Ok(Step::Continue)
                            }
                            Err(message) => Ok(Step::Panic(message)),
                        };
                    }
                };
                return Ok(Step::Call {
                    dest: *dest,
                    function,
                    arguments,
                });
            }
        }
        Ok(Step::Continue)
    }

    fn string(&self, handle: i32) -> Result<&str, CoreError> {
        usize::try_from(handle)
            .ok()
            .and_then(|h| self.strings.get(h))
            .map(String::as_str)
            .ok_or_else(|| CoreError::malformed("<evaluator>", format!("invalid string handle {handle}")))
    }

    fn intern(&mut self, value: String) -> i32 {
        self.strings.push(value);
        (self.strings.len() - 1) as i32
    }

    /// The inner `Err` is a runtime panic.
    fn builtin(&mut self, builtin: Builtin, arguments: &[i32]) -> Result<Result<i32, String>, CoreError> {
        if arguments.len() != builtin.arity() {
            return Err(CoreError::malformed(
                "<evaluator>",
                format!("builtin `{}` called with {} arguments", builtin.name(), arguments.len()),
            ));
        }
        Ok(match builtin {
            Builtin::Println => {
                let line = self.string(arguments[0])?.to_string();
                self.stdout.push_str(&line);
                self.stdout.push('\n');
                Ok(0)
            }
            Builtin::Panic => Err(self.string(arguments[0])?.to_string()),
            Builtin::StringConcat => {
                let joined = format!("{}{}", self.string(arguments[0])?, self.string(arguments[1])?);
                Ok(self.intern(joined))
            }
            Builtin::IntToString => Ok(self.intern(arguments[0].to_string())),
            Builtin::StringToInt => {
                let text = self.string(arguments[0])?;
                parse_int(text).ok_or_else(|| conversion_failure(text))
            }
            Builtin::Malloc => {
                let words = (arguments[0].max(0) as usize).div_ceil(4);
                Ok(self.allocate(words))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{BinaryOp, Function};

    fn unit_with(functions: Vec<Function>, strings: Vec<&str>) -> CompilationUnit {
        CompilationUnit {
            strings: strings.into_iter().map(String::from).collect(),
            functions,
            entry: None,
        }
    }

    #[test]
    fn prints_and_returns() {
        let mut main = Function::new("main", 0);
        let printed = main.fresh_var();
        let number = main.fresh_var();
        let joined = main.fresh_var();
        main.blocks[0].statements = vec![
            Statement::Call {
                dest: number,
                callee: Callee::Builtin(Builtin::IntToString),
                arguments: vec![Operand::Const(-5)],
            },
            Statement::Call {
                dest: joined,
                callee: Callee::Builtin(Builtin::StringConcat),
                arguments: vec![Operand::Str(crate::mir::StringId(0)), Operand::Var(number)],
            },
            Statement::Call {
                dest: printed,
                callee: Callee::Builtin(Builtin::Println),
                arguments: vec![Operand::Var(joined)],
            },
        ];
        main.blocks[0].terminator = Terminator::Return(Operand::Const(3));
        let evaluation = evaluate(&unit_with(vec![main], vec!["n="]), "main").expect("evaluate");
        assert_eq!(evaluation.stdout, "n=-5\n");
        assert_eq!(evaluation.outcome, Outcome::Returned(3));
    }

    #[test]
    fn division_by_zero_panics() {
        let mut main = Function::new("main", 0);
        let quotient = main.fresh_var();
        main.blocks[0].statements = vec![Statement::Binary {
            dest: quotient,
            op: BinaryOp::Div,
            lhs: Operand::Const(1),
            rhs: Operand::Const(0),
        }];
        let evaluation = evaluate(&unit_with(vec![main], vec![]), "main").expect("evaluate");
        assert_eq!(evaluation.outcome, Outcome::Panicked(DIVISION_BY_ZERO.to_string()));
    }

    #[test]
    fn malformed_numbers_panic() {
        let mut main = Function::new("main", 0);
        let parsed = main.fresh_var();
        main.blocks[0].statements = vec![Statement::Call {
            dest: parsed,
            callee: Callee::Builtin(Builtin::StringToInt),
            arguments: vec![Operand::Str(crate::mir::StringId(0))],
        }];
        let evaluation = evaluate(&unit_with(vec![main], vec!["12a"]), "main").expect("evaluate");
        assert_eq!(evaluation.outcome, Outcome::Panicked(conversion_failure("12a")));
    }

    #[test]
    fn records_and_indirect_calls() {
        // twice(x) = x + x, called through a closure record.
        let mut twice = Function::new("twice", 2);
        let doubled = twice.fresh_var();
        let x = Operand::Var(twice.parameters[1]);
        twice.blocks[0].statements = vec![Statement::Binary {
            dest: doubled,
            op: BinaryOp::Add,
            lhs: x.clone(),
            rhs: x,
        }];
        twice.blocks[0].terminator = Terminator::Return(Operand::Var(doubled));

        let mut main = Function::new("main", 0);
        let record = main.fresh_var();
        let code = main.fresh_var();
        let result = main.fresh_var();
        main.blocks[0].statements = vec![
            Statement::Alloc { dest: record, words: 2 },
            Statement::Store {
                base: Operand::Var(record),
                offset: 0,
                value: Operand::Function("twice".into()),
            },
            Statement::Load {
                dest: code,
                base: Operand::Var(record),
                offset: 0,
            },
            Statement::Call {
                dest: result,
                callee: Callee::Indirect(Operand::Var(code)),
                arguments: vec![Operand::Const(0), Operand::Const(21)],
            },
        ];
        main.blocks[0].terminator = Terminator::Return(Operand::Var(result));
        let evaluation = evaluate(&unit_with(vec![main, twice], vec![]), "main").expect("evaluate");
        assert_eq!(evaluation.outcome, Outcome::Returned(42));
    }

    #[test]
    fn runaway_loops_hit_the_step_limit() {
        let mut main = Function::new("main", 0);
        main.blocks[0].terminator = Terminator::Jump(main.entry);
        let evaluation = evaluate_with_limits(
            &unit_with(vec![main], vec![]),
            "main",
            Limits { steps: 1_000, depth: 10 },
        )
        .expect("evaluate");
        assert_eq!(evaluation.outcome, Outcome::StepLimitExceeded);
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let mut main = Function::new("main", 0);
        let result = main.fresh_var();
        main.blocks[0].statements = vec![Statement::Call {
            dest: result,
            callee: Callee::Direct("main".into()),
            arguments: Vec::new(),
        }];
        let evaluation = evaluate_with_limits(
            &unit_with(vec![main], vec![]),
            "main",
            Limits { steps: 1_000_000, depth: 64 },
        )
        .expect("evaluate");
        assert_eq!(evaluation.outcome, Outcome::StackOverflow);
    }

    #[test]
    fn missing_entry_is_an_error() {
        let error = evaluate(&unit_with(vec![], vec![]), "main").expect_err("missing");
        assert!(matches!(error, CoreError::MissingEntryPoint(_)));
    }
}
