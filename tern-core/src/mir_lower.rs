//! HIR → MIR.
//!
//! Every intermediate value gets a fresh temporary. `if` becomes a
//! branch into two blocks that meet in a join block through a shared
//! result temporary; records become an `Alloc` followed by stores.
//! Divisions whose divisor is not a known non-zero constant get an
//! explicit zero test that panics.

use crate::builtins::{Builtin, DIVISION_BY_ZERO};
use crate::error::CoreError;
use crate::hir::{HirCallee, HirExpr, HirFunction, HirProgram};
use crate::mir::{
    BasicBlock, BinaryOp, Callee, CompilationUnit, Condition, Function, Operand, Statement,
    Terminator,
};

pub fn lower_program(program: &HirProgram) -> Result<CompilationUnit, CoreError> {
    let mut unit = CompilationUnit {
        entry: program.main_function.clone(),
        ..CompilationUnit::default()
    };
    for function in &program.functions {
        let lowered = FunctionBuilder::lower(&mut unit, function)?;
        unit.functions.push(lowered);
    }
    unit.validate()?;
    tracing::debug!(
        functions = unit.functions.len(),
        strings = unit.strings.len(),
        "lowered to MIR"
    );
    Ok(unit)
}

struct FunctionBuilder<'u> {
    unit: &'u mut CompilationUnit,
    function: Function,
    /// Index into `function.blocks` of the block being filled.
    current: usize,
    scope: Vec<(String, Operand)>,
}

impl<'u> FunctionBuilder<'u> {
    fn lower(unit: &'u mut CompilationUnit, source: &HirFunction) -> Result<Function, CoreError> {
        let function = Function::new(source.name.clone(), source.parameters.len());
        let scope = source
            .parameters
            .iter()
            .cloned()
            .zip(function.parameters.iter().map(|p| Operand::Var(*p)))
            .collect();
        let mut builder = FunctionBuilder {
            unit,
            function,
            current: 0,
            scope,
        };
        let result = builder.expression(&source.body)?;
        builder.terminate(Terminator::Return(result));
        Ok(builder.function)
    }

    fn new_block(&mut self) -> usize {
        let id = self.function.fresh_block();
        self.function.blocks.push(BasicBlock {
            id,
            statements: Vec::new(),
            terminator: Terminator::Unreachable,
        });
        self.function.blocks.len() - 1
    }

    fn emit(&mut self, statement: Statement) {
        self.function.blocks[self.current].statements.push(statement);
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.blocks[self.current].terminator = terminator;
    }

    fn block_id(&self, index: usize) -> crate::mir::BlockId {
        self.function.blocks[index].id
    }

    fn lookup(&self, name: &str) -> Result<Operand, CoreError> {
        self.scope
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, operand)| operand.clone())
            .ok_or_else(|| {
                CoreError::malformed(&self.function.name, format!("unbound variable `{name}`"))
            })
    }

    fn call(&mut self, callee: Callee, arguments: Vec<Operand>) -> Operand {
        let dest = self.function.fresh_var();
        self.emit(Statement::Call {
            dest,
            callee,
            arguments,
        });
        Operand::Var(dest)
    }

    fn operands(&mut self, expressions: &[HirExpr]) -> Result<Vec<Operand>, CoreError> {
        expressions.iter().map(|e| self.expression(e)).collect()
    }

    fn expression(&mut self, expression: &HirExpr) -> Result<Operand, CoreError> {
        match expression {
            HirExpr::Int(value) => Ok(Operand::Const(*value)),
            HirExpr::String(value) => Ok(Operand::Str(self.unit.intern(value))),
            HirExpr::Variable(name) => self.lookup(name),
            HirExpr::Binary { op, lhs, rhs } => {
                let lhs = self.expression(lhs)?;
                let rhs = self.expression(rhs)?;
                if matches!(op, BinaryOp::Div | BinaryOp::Mod)
                    && !matches!(rhs, Operand::Const(value) if value != 0)
                {
                    self.guard_division(&rhs);
                }
                let dest = self.function.fresh_var();
                self.emit(Statement::Binary {
                    dest,
                    op: *op,
                    lhs,
                    rhs,
                });
                Ok(Operand::Var(dest))
            }
            HirExpr::Call { callee, arguments } => match callee {
                HirCallee::Function(name) => {
                    let arguments = self.operands(arguments)?;
                    Ok(self.call(Callee::Direct(name.clone()), arguments))
                }
                HirCallee::Builtin(builtin) => {
                    let arguments = self.operands(arguments)?;
                    Ok(self.call(Callee::Builtin(*builtin), arguments))
                }
                HirCallee::Closure(closure) => {
                    let closure = self.expression(closure)?;
                    let mut lowered = Vec::with_capacity(arguments.len() + 1);
                    let code = self.function.fresh_var();
                    self.emit(Statement::Load {
                        dest: code,
                        base: closure.clone(),
                        offset: 0,
                    });
                    let context = self.function.fresh_var();
                    self.emit(Statement::Load {
                        dest: context,
                        base: closure,
                        offset: 1,
                    });
                    lowered.push(Operand::Var(context));
                    lowered.extend(self.operands(arguments)?);
                    Ok(self.call(Callee::Indirect(Operand::Var(code)), lowered))
                }
            },
            HirExpr::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.condition(condition)?;
                let then_block = self.new_block();
                let else_block = self.new_block();
                let join_block = self.new_block();
                let result = self.function.fresh_var();
                self.terminate(Terminator::Branch {
                    condition,
                    if_true: self.block_id(then_block),
                    if_false: self.block_id(else_block),
                });
                for (block, branch) in [(then_block, then_branch), (else_block, else_branch)] {
                    self.current = block;
                    let value = self.expression(branch)?;
                    self.emit(Statement::Move {
                        dest: result,
                        value,
                    });
                    self.terminate(Terminator::Jump(self.block_id(join_block)));
                }
                self.current = join_block;
                Ok(Operand::Var(result))
            }
            HirExpr::Let { name, value, body } => {
                let value = self.expression(value)?;
                self.scope.push((name.clone(), value));
                let result = self.expression(body);
                self.scope.pop();
                result
            }
            HirExpr::StructInit { fields, .. } => {
                let values = self.operands(fields)?;
                let dest = self.function.fresh_var();
                self.emit(Statement::Alloc {
                    dest,
                    words: values.len() as u32,
                });
                for (offset, value) in values.into_iter().enumerate() {
                    self.emit(Statement::Store {
                        base: Operand::Var(dest),
                        offset: offset as u32,
                        value,
                    });
                }
                Ok(Operand::Var(dest))
            }
            HirExpr::Index { pointer, index } => {
                let base = self.expression(pointer)?;
                let dest = self.function.fresh_var();
                self.emit(Statement::Load {
                    dest,
                    base,
                    offset: *index as u32,
                });
                Ok(Operand::Var(dest))
            }
            HirExpr::Closure { function, context } => {
                let context = self.expression(context)?;
                let dest = self.function.fresh_var();
                self.emit(Statement::Alloc { dest, words: 2 });
                self.emit(Statement::Store {
                    base: Operand::Var(dest),
                    offset: 0,
                    value: Operand::Function(function.clone()),
                });
                self.emit(Statement::Store {
                    base: Operand::Var(dest),
                    offset: 1,
                    value: context,
                });
                Ok(Operand::Var(dest))
            }
        }
    }

    /// Comparisons branch directly; any other value is tested against 0.
    fn condition(&mut self, condition: &HirExpr) -> Result<Condition, CoreError> {
        if let HirExpr::Binary { op, lhs, rhs } = condition {
            if op.is_comparison() {
                let lhs = self.expression(lhs)?;
                let rhs = self.expression(rhs)?;
                return Ok(Condition::Compare { op: *op, lhs, rhs });
            }
        }
        let value = self.expression(condition)?;
        Ok(Condition::truthy(value))
    }

    fn guard_division(&mut self, divisor: &Operand) {
        let panic_block = self.new_block();
        let continue_block = self.new_block();
        self.terminate(Terminator::Branch {
            condition: Condition::Compare {
                op: BinaryOp::Eq,
                lhs: divisor.clone(),
                rhs: Operand::Const(0),
            },
            if_true: self.block_id(panic_block),
            if_false: self.block_id(continue_block),
        });
        self.current = panic_block;
        let message = Operand::Str(self.unit.intern(DIVISION_BY_ZERO));
        self.call(Callee::Builtin(Builtin::Panic), vec![message]);
        self.terminate(Terminator::Unreachable);
        self.current = continue_block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirFunction;

    fn program(functions: Vec<HirFunction>) -> HirProgram {
        HirProgram {
            type_definitions: Vec::new(),
            functions,
            main_function: None,
        }
    }

    fn var(name: &str) -> HirExpr {
        HirExpr::Variable(name.to_string())
    }

    #[test]
    fn conditions_on_comparisons_branch_directly() {
        let body = HirExpr::if_else(
            HirExpr::binary(BinaryOp::Lt, var("n"), HirExpr::Int(0)),
            HirExpr::Int(1),
            HirExpr::Int(2),
        );
        let unit = lower_program(&program(vec![HirFunction {
            name: "f".into(),
            parameters: vec!["n".into()],
            body,
        }]))
        .expect("lower");
        let function = unit.function("f").expect("f");
        let entry = function.block(function.entry).expect("entry");
        assert!(entry.statements.is_empty());
        assert!(matches!(
            entry.terminator,
            Terminator::Branch {
                condition: Condition::Compare { op: BinaryOp::Lt, .. },
                ..
            }
        ));
        assert_eq!(function.blocks.len(), 4);
    }

    #[test]
    fn variable_divisors_are_guarded() {
        let body = HirExpr::binary(BinaryOp::Div, HirExpr::Int(10), var("d"));
        let unit = lower_program(&program(vec![HirFunction {
            name: "f".into(),
            parameters: vec!["d".into()],
            body,
        }]))
        .expect("lower");
        let function = unit.function("f").expect("f");
        assert!(function.blocks.iter().any(|b| b.terminator == Terminator::Unreachable
            && matches!(
                b.statements.as_slice(),
                [Statement::Call { callee: Callee::Builtin(Builtin::Panic), .. }]
            )));
        assert_eq!(unit.strings, vec![DIVISION_BY_ZERO.to_string()]);
    }

    #[test]
    fn constant_divisors_are_not_guarded() {
        let body = HirExpr::binary(BinaryOp::Mod, var("x"), HirExpr::Int(3));
        let unit = lower_program(&program(vec![HirFunction {
            name: "f".into(),
            parameters: vec!["x".into()],
            body,
        }]))
        .expect("lower");
        assert_eq!(unit.function("f").expect("f").blocks.len(), 1);
    }

    #[test]
    fn closure_calls_pass_the_context_first() {
        let closure = HirExpr::Closure {
            function: "g".into(),
            context: Box::new(HirExpr::Int(7)),
        };
        let main = HirFunction {
            name: "main".into(),
            parameters: Vec::new(),
            body: HirExpr::Call {
                callee: HirCallee::Closure(Box::new(closure)),
                arguments: vec![HirExpr::Int(1)],
            },
        };
        let g = HirFunction {
            name: "g".into(),
            parameters: vec!["$context".into(), "x".into()],
            body: HirExpr::binary(BinaryOp::Add, var("$context"), var("x")),
        };
        let unit = lower_program(&program(vec![main, g])).expect("lower");
        let main = unit.function("main").expect("main");
        let statements = &main.blocks[0].statements;
        let Some(Statement::Call {
            callee: Callee::Indirect(_),
            arguments,
            ..
        }) = statements.last()
        else {
            panic!("expected an indirect call, got {main}");
        };
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[1], Operand::Const(1));
    }

    #[test]
    fn unbound_variables_are_malformed() {
        let error = lower_program(&program(vec![HirFunction {
            name: "f".into(),
            parameters: Vec::new(),
            body: var("missing"),
        }]))
        .expect_err("unbound");
        assert!(matches!(error, CoreError::MalformedIr { .. }));
    }
}
