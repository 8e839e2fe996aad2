//! Inlining of small non-recursive callees.

use std::collections::{HashMap, HashSet};

use super::{Pass, PassOutcome};
use crate::error::CoreError;
use crate::mir::{
    BasicBlock, BlockId, Callee, CompilationUnit, Function, Operand, Statement, Terminator, VarId,
};

pub struct Inliner {
    /// Largest callee size, see [`Function::size`].
    pub budget: usize,
}

impl Pass for Inliner {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn transform(&self, mut unit: CompilationUnit) -> Result<PassOutcome, CoreError> {
        let calls = call_graph(&unit);
        let candidates: HashMap<String, Function> = unit
            .functions
            .iter()
            .filter(|f| f.size() <= self.budget && !reaches(&calls, &f.name, &f.name))
            .map(|f| (f.name.clone(), f.clone()))
            .collect();
        if candidates.is_empty() {
            return Ok(PassOutcome {
                unit,
                changed: false,
            });
        }

        let mut changed = false;
        for function in &mut unit.functions {
            // Blocks holding the caller's own code; copied callee bodies
            // wait for the next iteration.
            let mut worklist: Vec<BlockId> = function.blocks.iter().map(|b| b.id).collect();
            while let Some(id) = worklist.pop() {
                if let Some((index, callee)) = find_site(function, id, &candidates) {
                    let continuation = inline_call(function, id, index, callee)?;
                    worklist.push(continuation);
                    changed = true;
                    tracing::trace!(caller = %function.name, callee = %callee.name, "inlined call");
                }
            }
        }
        Ok(PassOutcome { unit, changed })
    }
}

fn find_site<'c>(
    function: &Function,
    block: BlockId,
    candidates: &'c HashMap<String, Function>,
) -> Option<(usize, &'c Function)> {
    function
        .block(block)?
        .statements
        .iter()
        .enumerate()
        .find_map(|(index, statement)| match statement {
            Statement::Call {
                callee: Callee::Direct(name),
                ..
            } if *name != function.name => candidates.get(name).map(|c| (index, c)),
            _ => None,
        })
}

fn call_graph(unit: &CompilationUnit) -> HashMap<&str, HashSet<&str>> {
    unit.functions
        .iter()
        .map(|function| {
            let callees = function
                .blocks
                .iter()
                .flat_map(|b| b.statements.iter())
                .filter_map(|s| match s {
                    Statement::Call {
                        callee: Callee::Direct(name),
                        ..
                    } => Some(name.as_str()),
                    _ => None,
                })
                .collect();
            (function.name.as_str(), callees)
        })
        .collect()
}

/// Whether `to` is reachable from `from` through at least one call.
fn reaches(calls: &HashMap<&str, HashSet<&str>>, from: &str, to: &str) -> bool {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = calls.get(from).into_iter().flatten().copied().collect();
    while let Some(name) = stack.pop() {
        if name == to {
            return true;
        }
        if seen.insert(name) {
            stack.extend(calls.get(name).into_iter().flatten().copied());
        }
    }
    false
}

fn rename(vars: &mut HashMap<VarId, VarId>, function: &mut Function, var: VarId) -> VarId {
    *vars.entry(var).or_insert_with(|| function.fresh_var())
}

/// Replace the call at `block[index]` by a copy of `callee`'s body and
/// return the block holding the code after the call.
fn inline_call(
    function: &mut Function,
    block: BlockId,
    index: usize,
    callee: &Function,
) -> Result<BlockId, CoreError> {
    let continuation = function.fresh_block();
    let mut vars: HashMap<VarId, VarId> = HashMap::new();
    let mut blocks: HashMap<BlockId, BlockId> = HashMap::new();
    for source in &callee.blocks {
        blocks.insert(source.id, function.fresh_block());
    }

    let caller = function
        .block_mut(block)
        .ok_or_else(|| CoreError::malformed("<inline>", format!("missing block {block}")))?;
    let tail = caller.statements.split_off(index + 1);
    let Some(Statement::Call {
        dest, arguments, ..
    }) = caller.statements.pop()
    else {
        return Err(CoreError::malformed("<inline>", "inline site is not a call"));
    };
    let terminator = std::mem::replace(&mut caller.terminator, Terminator::Unreachable);

    let mut prologue = Vec::with_capacity(arguments.len());
    for (parameter, argument) in callee.parameters.iter().zip(arguments) {
        prologue.push(Statement::Move {
            dest: rename(&mut vars, function, *parameter),
            value: argument,
        });
    }
    let callee_entry = blocks[&callee.entry];
    if let Some(caller) = function.block_mut(block) {
        caller.statements.extend(prologue);
        caller.terminator = Terminator::Jump(callee_entry);
    }

    for source in &callee.blocks {
        let mut copy = source.clone();
        copy.id = blocks[&source.id];
        for statement in &mut copy.statements {
            for operand in statement.operands_mut() {
                if let Operand::Var(var) = operand {
                    *var = rename(&mut vars, function, *var);
                }
            }
            if let Some(old) = statement.dest() {
                let new = rename(&mut vars, function, old);
                set_dest(statement, new);
            }
        }
        for operand in copy.terminator.operands_mut() {
            if let Operand::Var(var) = operand {
                *var = rename(&mut vars, function, *var);
            }
        }
        copy.terminator = match copy.terminator {
            Terminator::Return(value) => {
                copy.statements.push(Statement::Move { dest, value });
                Terminator::Jump(continuation)
            }
            Terminator::Jump(target) => Terminator::Jump(blocks[&target]),
            Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => Terminator::Branch {
                condition,
                if_true: blocks[&if_true],
                if_false: blocks[&if_false],
            },
            Terminator::Unreachable => Terminator::Unreachable,
        };
        function.blocks.push(copy);
    }
    function.blocks.push(BasicBlock {
        id: continuation,
        statements: tail,
        terminator,
    });
    Ok(continuation)
}

fn set_dest(statement: &mut Statement, new: VarId) {
    match statement {
        Statement::Move { dest, .. }
        | Statement::Binary { dest, .. }
        | Statement::Load { dest, .. }
        | Statement::Alloc { dest, .. }
        | Statement::Call { dest, .. } => *dest = new,
        Statement::Store { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::test_support::{lower, run};

    #[test]
    fn inlines_leaves_and_keeps_behaviour() {
        let unit = lower(
            "class Main {
  function add(a: int, b: int): int = if a > b then a - b else a + b
  function main(): int = Main.add(2, 3) * Main.add(5, 1)
}",
        );
        let before = run(&unit);
        let outcome = Inliner { budget: 32 }.transform(unit).expect("inline");
        assert!(outcome.changed);
        outcome.unit.validate().expect("valid");
        let main = outcome.unit.function("_Main_main").expect("main");
        assert!(!main.blocks.iter().flat_map(|b| &b.statements).any(|s| matches!(
            s,
            Statement::Call { callee: Callee::Direct(_), .. }
        )));
        assert_eq!(run(&outcome.unit), before);
    }

    #[test]
    fn never_inlines_recursive_functions() {
        let unit = lower(
            "class Main {
  function even(n: int): bool = if n == 0 then true else Main.odd(n - 1)
  function odd(n: int): bool = if n == 0 then false else Main.even(n - 1)
  function main(): bool = Main.even(10)
}",
        );
        let outcome = Inliner { budget: 100 }.transform(unit).expect("inline");
        assert!(!outcome.changed);
    }
}
