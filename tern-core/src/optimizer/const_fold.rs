//! Constant folding and propagation.
//!
//! A temporary written exactly once with a constant is replaced by that
//! constant everywhere. Binary operations on two constants are folded,
//! except divisions by zero, which must still panic at run time.
//! Comparisons on constants turn branch conditions into `One`/`Zero`.

use std::collections::HashMap;

use super::{FunctionPass, definition_counts};
use crate::error::CoreError;
use crate::mir::{Condition, Function, Operand, Statement, Terminator, VarId};

pub struct ConstantFolding;

impl FunctionPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let counts = definition_counts(function);
        let mut changed = false;
        loop {
            let mut constants: HashMap<VarId, i32> = HashMap::new();
            for block in &function.blocks {
                for statement in &block.statements {
                    if let Statement::Move {
                        dest,
                        value: Operand::Const(value),
                    } = statement
                    {
                        if counts.get(dest) == Some(&1) {
                            constants.insert(*dest, *value);
                        }
                    }
                }
            }

            let mut round = false;
            for block in &mut function.blocks {
                for statement in &mut block.statements {
                    for operand in statement.operands_mut() {
                        round |= substitute(operand, &constants);
                    }
                    if let Statement::Binary {
                        dest,
                        op,
                        lhs: Operand::Const(lhs),
                        rhs: Operand::Const(rhs),
                    } = statement
                    {
                        if let Some(value) = op.evaluate(*lhs, *rhs) {
                            *statement = Statement::Move {
                                dest: *dest,
                                value: Operand::Const(value),
                            };
                            round = true;
                        }
                    }
                }
                for operand in block.terminator.operands_mut() {
                    round |= substitute(operand, &constants);
                }
                if let Terminator::Branch { condition, .. } = &mut block.terminator {
                    if let Condition::Compare {
                        op,
                        lhs: Operand::Const(lhs),
                        rhs: Operand::Const(rhs),
                    } = condition
                    {
                        *condition = match op.evaluate(*lhs, *rhs) {
                            Some(0) => Condition::Zero,
                            _ => Condition::One,
                        };
                        round = true;
                    }
                }
            }
            if !round {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

fn substitute(operand: &mut Operand, constants: &HashMap<VarId, i32>) -> bool {
    if let Operand::Var(var) = operand {
        if let Some(value) = constants.get(var) {
            *operand = Operand::Const(*value);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{BinaryOp, BlockId, Callee};
    use crate::builtins::Builtin;

    #[test]
    fn folds_chains_and_branches() {
        let mut function = Function::new("f", 0);
        let a = function.fresh_var();
        let b = function.fresh_var();
        let then_block = function.fresh_block();
        function.blocks[0].statements = vec![
            Statement::Move {
                dest: a,
                value: Operand::Const(6),
            },
            Statement::Binary {
                dest: b,
                op: BinaryOp::Mul,
                lhs: Operand::Var(a),
                rhs: Operand::Const(7),
            },
        ];
        function.blocks[0].terminator = Terminator::Branch {
            condition: Condition::Compare {
                op: BinaryOp::Gt,
                lhs: Operand::Var(b),
                rhs: Operand::Const(40),
            },
            if_true: then_block,
            if_false: then_block,
        };
        function.blocks.push(crate::mir::BasicBlock {
            id: then_block,
            statements: Vec::new(),
            terminator: Terminator::Return(Operand::Var(b)),
        });
        assert!(ConstantFolding.run(&mut function).expect("fold"));
        assert_eq!(
            function.blocks[0].statements[1],
            Statement::Move {
                dest: b,
                value: Operand::Const(42)
            }
        );
        assert!(matches!(
            function.blocks[0].terminator,
            Terminator::Branch {
                condition: Condition::One,
                ..
            }
        ));
        assert_eq!(
            function.block(BlockId(1)).expect("block").terminator,
            Terminator::Return(Operand::Const(42))
        );
        assert!(!ConstantFolding.run(&mut function).expect("fold"));
    }

    #[test]
    fn keeps_divisions_by_zero_and_reassigned_temporaries() {
        let mut function = Function::new("f", 0);
        let a = function.fresh_var();
        let q = function.fresh_var();
        let p = function.fresh_var();
        function.blocks[0].statements = vec![
            Statement::Move {
                dest: a,
                value: Operand::Const(1),
            },
            Statement::Move {
                dest: a,
                value: Operand::Const(2),
            },
            Statement::Binary {
                dest: q,
                op: BinaryOp::Div,
                lhs: Operand::Const(1),
                rhs: Operand::Const(0),
            },
            Statement::Call {
                dest: p,
                callee: Callee::Builtin(Builtin::IntToString),
                arguments: vec![Operand::Var(a)],
            },
        ];
        assert!(!ConstantFolding.run(&mut function).expect("fold"));
    }
}
