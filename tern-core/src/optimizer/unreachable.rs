//! Control-flow cleanup: constant branches become jumps, empty jump
//! blocks are bypassed, straight-line chains are merged and blocks no
//! longer reachable from the entry are dropped.

use std::collections::{HashMap, HashSet};

use super::FunctionPass;
use crate::error::CoreError;
use crate::mir::{BlockId, Condition, Function, Terminator};

pub struct UnreachableBlocks;

impl FunctionPass for UnreachableBlocks {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn run(&self, function: &mut Function) -> Result<bool, CoreError> {
        let mut changed = simplify_branches(function);
        changed |= bypass_empty_blocks(function);
        changed |= merge_chains(function);
        changed |= remove_unreachable(function);
        Ok(changed)
    }
}

fn simplify_branches(function: &mut Function) -> bool {
    let mut changed = false;
    for block in &mut function.blocks {
        if let Terminator::Branch {
            condition,
            if_true,
            if_false,
        } = &block.terminator
        {
            let target = match condition {
                Condition::One => Some(*if_true),
                Condition::Zero => Some(*if_false),
                Condition::Compare { .. } if if_true == if_false => Some(*if_true),
                Condition::Compare { .. } => None,
            };
            if let Some(target) = target {
                block.terminator = Terminator::Jump(target);
                changed = true;
            }
        }
    }
    changed
}

/// Follow chains of blocks that do nothing but jump.
fn bypass_empty_blocks(function: &mut Function) -> bool {
    let forwards: HashMap<BlockId, BlockId> = function
        .blocks
        .iter()
        .filter_map(|b| match b.terminator {
            Terminator::Jump(target) if b.statements.is_empty() && target != b.id => {
                Some((b.id, target))
            }
            _ => None,
        })
        .collect();
    let resolve = |mut id: BlockId| {
        let mut seen = HashSet::new();
        while let Some(next) = forwards.get(&id) {
            if !seen.insert(id) {
                break;
            }
            id = *next;
        }
        id
    };

    let mut changed = false;
    let entry = resolve(function.entry);
    if entry != function.entry {
        function.entry = entry;
        changed = true;
    }
    for block in &mut function.blocks {
        for target in block.terminator.successors() {
            let resolved = resolve(target);
            if resolved != target {
                block.terminator.retarget(target, resolved);
                changed = true;
            }
        }
    }
    changed
}

fn predecessor_counts(function: &Function) -> HashMap<BlockId, usize> {
    let mut counts = HashMap::new();
    for block in &function.blocks {
        for target in block.terminator.successors() {
            *counts.entry(target).or_insert(0) += 1;
        }
    }
    counts
}

fn merge_chains(function: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let counts = predecessor_counts(function);
        let candidate = function.blocks.iter().find_map(|block| match block.terminator {
            Terminator::Jump(target)
                if target != block.id
                    && target != function.entry
                    && counts.get(&target) == Some(&1) =>
            {
                Some((block.id, target))
            }
            _ => None,
        });
        let Some((first, second)) = candidate else {
            return changed;
        };
        let Some(index) = function.blocks.iter().position(|b| b.id == second) else {
            return changed;
        };
        let absorbed = function.blocks.remove(index);
        if let Some(block) = function.block_mut(first) {
            block.statements.extend(absorbed.statements);
            block.terminator = absorbed.terminator;
        }
        changed = true;
    }
}

fn remove_unreachable(function: &mut Function) -> bool {
    let mut reachable = HashSet::new();
    let mut stack = vec![function.entry];
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(block) = function.block(id) {
            stack.extend(block.terminator.successors());
        }
    }
    let before = function.blocks.len();
    function.blocks.retain(|b| reachable.contains(&b.id));
    function.blocks.len() != before
}
