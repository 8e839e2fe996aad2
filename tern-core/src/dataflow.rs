//! Liveness analysis over linearized MIR.

use std::collections::BTreeSet;

use crate::cfg::ControlFlowGraph;
use crate::error::CoreError;
use crate::mir::{BlockId, Function, Instruction, VarId};

pub(crate) fn uses(instruction: &Instruction) -> Vec<VarId> {
    match instruction {
        Instruction::Statement(statement) => statement.uses(),
        Instruction::Branch { condition, .. } => condition
            .operands()
            .into_iter()
            .filter_map(|o| o.as_var())
            .collect(),
        Instruction::Return(value) => value.as_var().into_iter().collect(),
        Instruction::Label(_) | Instruction::Jump(_) | Instruction::Unreachable => Vec::new(),
    }
}

pub(crate) fn definition(instruction: &Instruction) -> Option<VarId> {
    match instruction {
        Instruction::Statement(statement) => statement.dest(),
        _ => None,
    }
}

/// Variables live after each instruction of a function's linear form.
#[derive(Debug, Clone)]
pub struct Liveness {
    pub instructions: Vec<Instruction>,
    pub cfg: ControlFlowGraph<BlockId>,
    live_out: Vec<BTreeSet<VarId>>,
    live_in_entry: BTreeSet<VarId>,
}

impl Liveness {
    pub fn compute(function: &Function) -> Result<Liveness, CoreError> {
        let instructions = function.linearize();
        let cfg = ControlFlowGraph::build(&instructions)?;

        let mut gen_sets = Vec::with_capacity(cfg.len());
        let mut kill_sets = Vec::with_capacity(cfg.len());
        for node in cfg.nodes() {
            let mut generated = BTreeSet::new();
            let mut killed = BTreeSet::new();
            for instruction in &instructions[node.range.clone()] {
                for var in uses(instruction) {
                    if !killed.contains(&var) {
                        generated.insert(var);
                    }
                }
                if let Some(var) = definition(instruction) {
                    killed.insert(var);
                }
            }
            gen_sets.push(generated);
            kill_sets.push(killed);
        }

        let mut live_in: Vec<BTreeSet<VarId>> = vec![BTreeSet::new(); cfg.len()];
        let mut node_out: Vec<BTreeSet<VarId>> = vec![BTreeSet::new(); cfg.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for node in (0..cfg.len()).rev() {
                let out: BTreeSet<VarId> = cfg
                    .successors(node)
                    .iter()
                    .flat_map(|s| live_in[*s].iter().copied())
                    .collect();
                let mut input: BTreeSet<VarId> =
                    out.difference(&kill_sets[node]).copied().collect();
                input.extend(gen_sets[node].iter().copied());
                if input != live_in[node] || out != node_out[node] {
                    live_in[node] = input;
                    node_out[node] = out;
                    changed = true;
                }
            }
        }

        let mut live_out = vec![BTreeSet::new(); instructions.len()];
        for (node, data) in cfg.nodes().iter().enumerate() {
            let mut live = node_out[node].clone();
            for index in data.range.clone().rev() {
                live_out[index] = live.clone();
                if let Some(var) = definition(&instructions[index]) {
                    live.remove(&var);
                }
                live.extend(uses(&instructions[index]));
            }
        }

        let live_in_entry = cfg.entry().map(|e| live_in[e].clone()).unwrap_or_default();
        Ok(Liveness {
            instructions,
            cfg,
            live_out,
            live_in_entry,
        })
    }

    /// Variables live right after instruction `index`. Instructions in
    /// unreachable code have nothing live.
    pub fn live_out(&self, index: usize) -> &BTreeSet<VarId> {
        &self.live_out[index]
    }

    /// Variables read before being written on some path from the entry.
    pub fn live_in_entry(&self) -> &BTreeSet<VarId> {
        &self.live_in_entry
    }

    /// Location in the MIR of each linear statement instruction as
    /// `(block, statement index)`.
    pub fn statement_positions(&self) -> Vec<Option<(BlockId, usize)>> {
        statement_positions(&self.instructions)
    }
}

pub fn statement_positions(instructions: &[Instruction]) -> Vec<Option<(BlockId, usize)>> {
    let mut current = None;
    let mut count = 0;
    instructions
        .iter()
        .map(|instruction| match instruction {
            Instruction::Label(id) => {
                current = Some(*id);
                count = 0;
                None
            }
            Instruction::Statement(_) => {
                let position = current.map(|block| (block, count));
                count += 1;
                position
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{BasicBlock, BinaryOp, Condition, Operand, Statement, Terminator};

    /// `f(n) { i = 0; loop: if i < n { i = i + 1; goto loop } return i }`
    fn counting_loop() -> Function {
        let mut function = Function::new("count", 1);
        let n = function.parameters[0];
        let i = function.fresh_var();
        let head = function.fresh_block();
        let body = function.fresh_block();
        let exit = function.fresh_block();
        function.blocks[0].statements.push(Statement::Move {
            dest: i,
            value: Operand::Const(0),
        });
        function.blocks[0].terminator = Terminator::Jump(head);
        function.blocks.push(BasicBlock {
            id: head,
            statements: Vec::new(),
            terminator: Terminator::Branch {
                condition: Condition::Compare {
                    op: BinaryOp::Lt,
                    lhs: Operand::Var(i),
                    rhs: Operand::Var(n),
                },
                if_true: body,
                if_false: exit,
            },
        });
        function.blocks.push(BasicBlock {
            id: body,
            statements: vec![Statement::Binary {
                dest: i,
                op: BinaryOp::Add,
                lhs: Operand::Var(i),
                rhs: Operand::Const(1),
            }],
            terminator: Terminator::Jump(head),
        });
        function.blocks.push(BasicBlock {
            id: exit,
            statements: Vec::new(),
            terminator: Terminator::Return(Operand::Var(i)),
        });
        function
    }

    #[test]
    fn values_stay_live_around_loops() {
        let function = counting_loop();
        let liveness = Liveness::compute(&function).expect("liveness");
        let n = function.parameters[0];
        let positions = liveness.statement_positions();
        let increment = positions
            .iter()
            .position(|p| *p == Some((BlockId(2), 0)))
            .expect("increment");
        assert!(liveness.live_out(increment).contains(&n));
        assert!(liveness.live_out(increment).contains(&VarId(1)));
        assert_eq!(liveness.live_in_entry(), &BTreeSet::from([n]));
    }

    #[test]
    fn dead_definitions_are_not_live() {
        let mut function = Function::new("f", 0);
        let dead = function.fresh_var();
        function.blocks[0].statements.push(Statement::Move {
            dest: dead,
            value: Operand::Const(3),
        });
        let liveness = Liveness::compute(&function).expect("liveness");
        assert!(liveness.live_out(1).is_empty());
    }
}
