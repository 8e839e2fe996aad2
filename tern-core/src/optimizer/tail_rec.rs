//! Self tail calls become jumps back to the entry block.
//!
//! A call is in tail position when every instruction after it, following
//! jumps through the control-flow graph, only copies its result around
//! and then returns it.

use std::collections::HashSet;

use super::FunctionPass;
use crate::cfg::ControlFlowGraph;
use crate::dataflow::statement_positions;
use crate::error::CoreError;
use crate::mir::{BlockId, Callee, Function, Instruction, Operand, Statement, Terminator, VarId};

pub struct TailRecursion;

impl FunctionPass for TailRecursion {
    fn name(&self) -> &'static str {
        "tail-rec"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let sites = tail_calls(function)?;
        for (block, index) in &sites {
            let parameters = function.parameters.clone();
            let temporaries: Vec<VarId> = parameters.iter().map(|_| function.fresh_var()).collect();
            let entry = function.entry;
            let Some(block) = function.block_mut(*block) else {
                continue;
            };
            let Some(Statement::Call { arguments, .. }) = block.statements.get(*index).cloned() else {
                continue;
            };
            block.statements.truncate(*index);
            // Arguments may read parameters, so copy through temporaries.
            for (temporary, argument) in temporaries.iter().zip(arguments) {
                block.statements.push(Statement::Move {
                    dest: *temporary,
                    value: argument,
                });
            }
            for (parameter, temporary) in parameters.iter().zip(&temporaries) {
                block.statements.push(Statement::Move {
                    dest: *parameter,
                    value: Operand::Var(*temporary),
                });
            }
            block.terminator = Terminator::Jump(entry);
        }
        if !sites.is_empty() {
            tracing::trace!(function = %function.name, calls = sites.len(), "tail calls turned into jumps");
        }
        Ok(!sites.is_empty())
    }
}

/// Self calls in tail position, as `(block, statement index)`.
pub fn tail_calls(function: &Function) -> Result<Vec<(BlockId, usize)>, CoreError> {
    let instructions = function.linearize();
    let cfg = ControlFlowGraph::build(&instructions)?;
    let positions = statement_positions(&instructions);
    let mut sites = Vec::new();
    for (index, instruction) in instructions.iter().enumerate() {
        let Instruction::Statement(Statement::Call {
            dest,
            callee: Callee::Direct(name),
            arguments,
        }) = instruction
        else {
            continue;
        };
        if *name != function.name || arguments.len() != function.parameters.len() {
            continue;
        }
        if cfg.node_of(index).is_none() {
            continue;
        }
        if returns_unchanged(&instructions, &cfg, index, *dest) {
            if let Some(position) = positions[index] {
                sites.push(position);
            }
        }
    }
    Ok(sites)
}

fn returns_unchanged(
    instructions: &[Instruction],
    cfg: &ControlFlowGraph<BlockId>,
    call: usize,
    result: VarId,
) -> bool {
    let mut carriers = HashSet::from([result]);
    let mut visited = HashSet::new();
    let mut index = call + 1;
    loop {
        match instructions.get(index) {
            Some(Instruction::Label(_)) => index += 1,
            Some(Instruction::Statement(Statement::Move {
                dest,
                value: Operand::Var(source),
            })) if carriers.contains(source) => {
                carriers.insert(*dest);
                index += 1;
            }
            Some(Instruction::Jump(target)) => {
                let Some(node) = cfg.node_by_label(*target) else {
                    return false;
                };
                if !visited.insert(node) {
                    return false;
                }
                index = cfg.nodes()[node].range.start;
            }
            Some(Instruction::Return(Operand::Var(value))) => return carriers.contains(value),
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Limits, Outcome, evaluate_with_limits};
    use crate::optimizer::test_support::{lower, run};
    use crate::optimizer::Pass;

    const SUM: &str = "class Main {
  function sum(n: int, acc: int): int = if n == 0 then acc else Main.sum(n - 1, acc + n)
  function main(): int = Main.sum(200000, 0)
}";

    #[test]
    fn finds_tail_calls_through_join_blocks() {
        let unit = lower(SUM);
        let sum = unit.function("_Main_sum").expect("sum");
        assert_eq!(tail_calls(sum).expect("analysis").len(), 1);
    }

    #[test]
    fn ignores_calls_whose_result_is_used() {
        let unit = lower(
            "class Main {
  function fact(n: int): int = if n <= 1 then 1 else n * Main.fact(n - 1)
  function main(): int = Main.fact(5)
}",
        );
        let fact = unit.function("_Main_fact").expect("fact");
        assert!(tail_calls(fact).expect("analysis").is_empty());
    }

    #[test]
    fn deep_tail_recursion_runs_as_a_loop() {
        let unit = lower(SUM);
        let limits = Limits {
            steps: 50_000_000,
            depth: 10_000,
        };
        let entry = unit.entry.clone().expect("entry");
        let before = evaluate_with_limits(&unit, &entry, limits).expect("evaluate");
        assert_eq!(before.outcome, Outcome::StackOverflow);

        let looped = TailRecursion.transform(unit).expect("tail-rec");
        assert!(looped.changed);
        let expected = (1..=200_000i32).fold(0i32, |acc, n| acc.wrapping_add(n));
        let after = evaluate_with_limits(&looped.unit, &entry, limits).expect("evaluate");
        assert_eq!(after.outcome, Outcome::Returned(expected));
        assert_eq!(run(&looped.unit).outcome, Outcome::Returned(expected));
    }
}
