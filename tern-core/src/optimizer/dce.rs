//! Dead-code elimination.
//!
//! Removes side-effect-free statements whose result is not live and
//! self-copies. Removal can kill further definitions, so the pass loops
//! to its own fixpoint and running it twice is the same as once.

use std::collections::HashSet;

use super::FunctionPass;
use crate::dataflow::Liveness;
use crate::error::CoreError;
use crate::mir::{BlockId, Function, Operand, Statement};

pub struct DeadCode;

impl FunctionPass for DeadCode {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let mut changed = false;
        loop {
            let liveness = Liveness::compute(function)?;
            let mut dead: HashSet<(BlockId, usize)> = HashSet::new();
            for (index, position) in liveness.statement_positions().into_iter().enumerate() {
                let Some((block, statement_index)) = position else {
                    continue;
                };
                let Some(statement) = function
                    .block(block)
                    .and_then(|b| b.statements.get(statement_index))
                else {
                    continue;
                };
                let self_copy = matches!(
                    statement,
                    Statement::Move { dest, value: Operand::Var(source) } if dest == source
                );
                let unused = statement
                    .dest()
                    .is_some_and(|dest| !liveness.live_out(index).contains(&dest));
                if self_copy || (unused && !statement.has_side_effects()) {
                    dead.insert((block, statement_index));
                }
            }
            if dead.is_empty() {
                return Ok(changed);
            }
            for block in &mut function.blocks {
                let id = block.id;
                let mut index = 0;
                block.statements.retain(|_| {
                    let keep = !dead.contains(&(id, index));
                    index += 1;
                    keep
                });
            }
            changed = true;
        }
    }
}
