//! Control-flow graphs over linear instruction sequences.
//!
//! The builder splits at every label and after every jump, branch,
//! return or trap. Nodes unreachable from the first instruction are
//! dropped, so every node of a built graph is reachable from the entry.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Range;

use crate::error::CoreError;
use crate::mir::{BlockId, Instruction};

/// What the builder needs to know about an instruction.
pub trait FlowInstruction {
    type Label: Copy + Eq + Hash + fmt::Display;

    /// The label this instruction defines, if it is a label.
    fn label(&self) -> Option<Self::Label>;

    /// Labels control may jump to from here.
    fn jump_targets(&self) -> Vec<Self::Label>;

    /// Whether control may continue with the next instruction.
    fn falls_through(&self) -> bool;

    /// Whether a node ends after this instruction.
    fn ends_block(&self) -> bool {
        !self.falls_through() || !self.jump_targets().is_empty()
    }
}

impl FlowInstruction for Instruction {
    type Label = BlockId;

    fn label(&self) -> Option<BlockId> {
        match self {
            Instruction::Label(id) => Some(*id),
            _ => None,
        }
    }

    fn jump_targets(&self) -> Vec<BlockId> {
        match self {
            Instruction::Jump(target) | Instruction::Branch { target, .. } => vec![*target],
            _ => Vec::new(),
        }
    }

    fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Jump(_) | Instruction::Return(_) | Instruction::Unreachable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgNode<L> {
    pub id: usize,
    /// Label of the first instruction, if it is one.
    pub label: Option<L>,
    /// Instructions of the node, as indices into the built sequence.
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph<L> {
    nodes: Vec<CfgNode<L>>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl<L: Copy + Eq + Hash + fmt::Display> ControlFlowGraph<L> {
    pub fn build<T>(instructions: &[T]) -> Result<Self, CoreError>
    where
        T: FlowInstruction<Label = L>,
    {
        let mut ranges: Vec<Range<usize>> = Vec::new();
        let mut start = 0;
        for (index, instruction) in instructions.iter().enumerate() {
            if instruction.label().is_some() && index > start {
                ranges.push(start..index);
                start = index;
            }
            if instruction.ends_block() {
                ranges.push(start..index + 1);
                start = index + 1;
            }
        }
        if start < instructions.len() {
            ranges.push(start..instructions.len());
        }

        let mut by_label = HashMap::new();
        for (node, range) in ranges.iter().enumerate() {
            if let Some(label) = instructions[range.start].label() {
                by_label.insert(label, node);
            }
        }

        let mut successors: Vec<Vec<usize>> = Vec::with_capacity(ranges.len());
        for (node, range) in ranges.iter().enumerate() {
            let last = &instructions[range.end - 1];
            let mut targets = Vec::new();
            for label in last.jump_targets() {
                let target = by_label.get(&label).copied().ok_or_else(|| {
                    CoreError::malformed("<cfg>", format!("jump to undefined label {label}"))
                })?;
                targets.push(target);
            }
            if last.falls_through() && node + 1 < ranges.len() && !targets.contains(&(node + 1)) {
                targets.push(node + 1);
            }
            successors.push(targets);
        }

        // Keep only nodes reachable from the first one, in order.
        let mut reachable = vec![false; ranges.len()];
        let mut stack: Vec<usize> = if ranges.is_empty() { Vec::new() } else { vec![0] };
        while let Some(node) = stack.pop() {
            if std::mem::replace(&mut reachable[node], true) {
                continue;
            }
            stack.extend(successors[node].iter().copied().filter(|s| !reachable[*s]));
        }
        let mut renumbered = vec![usize::MAX; ranges.len()];
        let mut nodes = Vec::new();
        for (old, range) in ranges.into_iter().enumerate() {
            if reachable[old] {
                renumbered[old] = nodes.len();
                nodes.push(CfgNode {
                    id: nodes.len(),
                    label: instructions[range.start].label(),
                    range,
                });
            }
        }
        let successors: Vec<Vec<usize>> = successors
            .into_iter()
            .enumerate()
            .filter(|(old, _)| reachable[*old])
            .map(|(_, targets)| targets.into_iter().map(|t| renumbered[t]).collect())
            .collect();
        let mut predecessors = vec![Vec::new(); nodes.len()];
        for (node, targets) in successors.iter().enumerate() {
            for target in targets {
                predecessors[*target].push(node);
            }
        }
        Ok(ControlFlowGraph {
            nodes,
            successors,
            predecessors,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then_some(0)
    }

    pub fn nodes(&self) -> &[CfgNode<L>] {
        &self.nodes
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    pub fn predecessors(&self, node: usize) -> &[usize] {
        &self.predecessors[node]
    }

    pub fn node_by_label(&self, label: L) -> Option<usize> {
        self.nodes.iter().position(|n| n.label == Some(label))
    }

    /// Node holding the instruction at `index`, if it is reachable.
    pub fn node_of(&self, index: usize) -> Option<usize> {
        self.nodes.iter().position(|n| n.range.contains(&index))
    }
}
