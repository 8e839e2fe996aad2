//! Block-local common-subexpression elimination.
//!
//! Within one block, a repeated binary operation or load is replaced by
//! a copy of the earlier result. Remembered loads are forgotten at every
//! store and call, and any entry mentioning a temporary is forgotten when
//! that temporary is written again.

use super::FunctionPass;
use crate::error::CoreError;
use crate::mir::{BinaryOp, Function, Operand, Statement, VarId};

pub struct CommonSubexpressions;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Key {
    Binary(BinaryOp, Operand, Operand),
    Load(Operand, u32),
}

impl Key {
    fn of(statement: &Statement) -> Option<Key> {
        match statement {
            Statement::Binary { op, lhs, rhs, .. } => {
                Some(Key::Binary(*op, lhs.clone(), rhs.clone()))
            }
            Statement::Load { base, offset, .. } => Some(Key::Load(base.clone(), *offset)),
            _ => None,
        }
    }

    fn matches(&self, other: &Key) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Key::Binary(op, lhs, rhs), Key::Binary(other_op, other_lhs, other_rhs)) => {
                op == other_op && op.is_commutative() && lhs == other_rhs && rhs == other_lhs
            }
            _ => false,
        }
    }

    fn mentions(&self, var: VarId) -> bool {
        let operand = Operand::Var(var);
        match self {
            Key::Binary(_, lhs, rhs) => *lhs == operand || *rhs == operand,
            Key::Load(base, _) => *base == operand,
        }
    }
}

impl FunctionPass for CommonSubexpressions {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let mut changed = false;
        for block in &mut function.blocks {
            let mut available: Vec<(Key, VarId)> = Vec::new();
            for statement in &mut block.statements {
                let key = Key::of(statement);
                let dest = statement.dest();
                if let (Some(key), Some(dest)) = (&key, dest) {
                    if let Some((_, earlier)) = available.iter().find(|(k, _)| k.matches(key)) {
                        if *earlier != dest {
                            *statement = Statement::Move {
                                dest,
                                value: Operand::Var(*earlier),
                            };
                            changed = true;
                        }
                    }
                }
                if matches!(statement, Statement::Store { .. } | Statement::Call { .. }) {
                    available.retain(|(k, _)| !matches!(k, Key::Load(..)));
                }
                if let Some(dest) = dest {
                    available.retain(|(k, v)| *v != dest && !k.mentions(dest));
                    if let (Some(key), Statement::Binary { .. } | Statement::Load { .. }) =
                        (key, &*statement)
                    {
                        if !key.mentions(dest) {
                            available.push((key, dest));
                        }
                    }
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::mir::{Callee, Terminator};

    #[test]
    fn reuses_commuted_arithmetic() {
        let mut function = Function::new("f", 2);
        let (x, y) = (function.parameters[0], function.parameters[1]);
        let a = function.fresh_var();
        let b = function.fresh_var();
        function.blocks[0].statements = vec![
            Statement::Binary {
                dest: a,
                op: BinaryOp::Add,
                lhs: Operand::Var(x),
                rhs: Operand::Var(y),
            },
            Statement::Binary {
                dest: b,
                op: BinaryOp::Add,
                lhs: Operand::Var(y),
                rhs: Operand::Var(x),
            },
        ];
        function.blocks[0].terminator = Terminator::Return(Operand::Var(b));
        assert!(CommonSubexpressions.run(&mut function).expect("cse"));
        assert_eq!(
            function.blocks[0].statements[1],
            Statement::Move {
                dest: b,
                value: Operand::Var(a)
            }
        );
    }

    #[test]
    fn loads_do_not_survive_stores_or_calls() {
        let mut function = Function::new("f", 1);
        let record = Operand::Var(function.parameters[0]);
        let first = function.fresh_var();
        let second = function.fresh_var();
        let third = function.fresh_var();
        let ignored = function.fresh_var();
        function.blocks[0].statements = vec![
            Statement::Load {
                dest: first,
                base: record.clone(),
                offset: 0,
            },
            Statement::Store {
                base: record.clone(),
                offset: 0,
                value: Operand::Const(1),
            },
            Statement::Load {
                dest: second,
                base: record.clone(),
                offset: 0,
            },
            Statement::Call {
                dest: ignored,
                callee: Callee::Builtin(Builtin::Println),
                arguments: vec![Operand::Const(0)],
            },
            Statement::Load {
                dest: third,
                base: record,
                offset: 0,
            },
        ];
        assert!(!CommonSubexpressions.run(&mut function).expect("cse"));
    }

    #[test]
    fn redefinitions_invalidate_expressions() {
        let mut function = Function::new("f", 1);
        let x = function.parameters[0];
        let a = function.fresh_var();
        let b = function.fresh_var();
        function.blocks[0].statements = vec![
            Statement::Binary {
                dest: a,
                op: BinaryOp::Mul,
                lhs: Operand::Var(x),
                rhs: Operand::Const(2),
            },
            Statement::Move {
                dest: x,
                value: Operand::Const(5),
            },
            Statement::Binary {
                dest: b,
                op: BinaryOp::Mul,
                lhs: Operand::Var(x),
                rhs: Operand::Const(2),
            },
        ];
        assert!(!CommonSubexpressions.run(&mut function).expect("cse"));
    }
}
