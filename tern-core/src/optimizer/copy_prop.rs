//! Copy propagation.
//!
//! `dest = value` lets uses of `dest` read `value` directly when `dest`
//! is written exactly once and `value` cannot change in between: a
//! constant address, or a temporary that is itself written once.

use std::collections::HashMap;

use super::{FunctionPass, definition_counts};
use crate::error::CoreError;
use crate::mir::{Function, Operand, Statement, VarId};

pub struct CopyPropagation;

impl FunctionPass for CopyPropagation {
    fn name(&self) -> &'static str {
        "copy-prop"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let counts = definition_counts(function);
        let single = |var: &VarId| counts.get(var) == Some(&1);

        let mut copies: HashMap<VarId, Operand> = HashMap::new();
        for block in &function.blocks {
            for statement in &block.statements {
                if let Statement::Move { dest, value } = statement {
                    let stable = match value {
                        Operand::Var(source) => single(source) && source != dest,
                        Operand::Str(_) | Operand::Function(_) => true,
                        // Constants belong to constant folding.
                        Operand::Const(_) => false,
                    };
                    if stable && single(dest) {
                        copies.insert(*dest, value.clone());
                    }
                }
            }
        }
        if copies.is_empty() {
            return Ok(false);
        }

        let resolve = |operand: &Operand| -> Option<Operand> {
            let mut current = operand.clone();
            let mut hops = 0;
            while let Operand::Var(var) = &current {
                match copies.get(var) {
                    Some(next) if hops <= copies.len() => {
                        current = next.clone();
                        hops += 1;
                    }
                    _ => break,
                }
            }
            (hops > 0).then_some(current)
        };

        let mut changed = false;
        for block in &mut function.blocks {
            for statement in &mut block.statements {
                for operand in statement.operands_mut() {
                    if let Some(replacement) = resolve(operand) {
                        *operand = replacement;
                        changed = true;
                    }
                }
            }
            for operand in block.terminator.operands_mut() {
                if let Some(replacement) = resolve(operand) {
                    *operand = replacement;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}
