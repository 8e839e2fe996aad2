//! Mid-level intermediate representation (MIR).
//!
//! A function is an arena of basic blocks addressed by [`BlockId`].
//! Values are 32-bit words held in virtual temporaries ([`VarId`]); ints,
//! bools (0/1), unit (0) and heap pointers all share that
//! representation. Memory offsets are counted in words; each emitter
//! picks its own word size.

use std::fmt;

use crate::builtins::Builtin;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Index into [`CompilationUnit::strings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StringId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Const(i32),
    Var(VarId),
    /// Address of a pooled string constant.
    Str(StringId),
    /// Address of a function, used as a closure code pointer.
    Function(String),
}

impl Operand {
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            Operand::Var(var) => Some(*var),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<i32> {
        match self {
            Operand::Const(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(value) => write!(f, "{value}"),
            Operand::Var(var) => write!(f, "{var}"),
            Operand::Str(id) => write!(f, "str#{}", id.0),
            Operand::Function(name) => write!(f, "@{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Xor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Xor => "^",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Xor
        )
    }

    /// The comparison that holds exactly when `self` does not.
    pub fn complement(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Ge => BinaryOp::Lt,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            _ => return None,
        })
    }

    /// 32-bit wrapping semantics. `None` for division or modulo by zero,
    /// which panics at runtime.
    pub fn evaluate(self, lhs: i32, rhs: i32) -> Option<i32> {
        Some(match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
            BinaryOp::Mod => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_rem(rhs)
            }
            BinaryOp::Lt => i32::from(lhs < rhs),
            BinaryOp::Le => i32::from(lhs <= rhs),
            BinaryOp::Gt => i32::from(lhs > rhs),
            BinaryOp::Ge => i32::from(lhs >= rhs),
            BinaryOp::Eq => i32::from(lhs == rhs),
            BinaryOp::Ne => i32::from(lhs != rhs),
            BinaryOp::Xor => lhs ^ rhs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    Direct(String),
    Indirect(Operand),
    Builtin(Builtin),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Direct(name) => write!(f, "{name}"),
            Callee::Indirect(operand) => write!(f, "*{operand}"),
            Callee::Builtin(builtin) => write!(f, "builtin.{}", builtin.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Move {
        dest: VarId,
        value: Operand,
    },
    Binary {
        dest: VarId,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// `dest = base[offset]`, offset in words.
    Load {
        dest: VarId,
        base: Operand,
        offset: u32,
    },
    Store {
        base: Operand,
        offset: u32,
        value: Operand,
    },
    Alloc {
        dest: VarId,
        words: u32,
    },
    Call {
        dest: VarId,
        callee: Callee,
        arguments: Vec<Operand>,
    },
}

impl Statement {
    pub fn dest(&self) -> Option<VarId> {
        match self {
            Statement::Move { dest, .. }
            | Statement::Binary { dest, .. }
            | Statement::Load { dest, .. }
            | Statement::Alloc { dest, .. }
            | Statement::Call { dest, .. } => Some(*dest),
            Statement::Store { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Statement::Move { value, .. } => vec![value],
            Statement::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Statement::Load { base, .. } => vec![base],
            Statement::Store { base, value, .. } => vec![base, value],
            Statement::Alloc { .. } => Vec::new(),
            Statement::Call {
                callee, arguments, ..
            } => {
                let mut operands: Vec<&Operand> = Vec::new();
                if let Callee::Indirect(target) = callee {
                    operands.push(target);
                }
                operands.extend(arguments.iter());
                operands
            }
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Statement::Move { value, .. } => vec![value],
            Statement::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Statement::Load { base, .. } => vec![base],
            Statement::Store { base, value, .. } => vec![base, value],
            Statement::Alloc { .. } => Vec::new(),
            Statement::Call {
                callee, arguments, ..
            } => {
                let mut operands: Vec<&mut Operand> = Vec::new();
                if let Callee::Indirect(target) = callee {
                    operands.push(target);
                }
                operands.extend(arguments.iter_mut());
                operands
            }
        }
    }

    pub fn uses(&self) -> Vec<VarId> {
        self.operands().into_iter().filter_map(Operand::as_var).collect()
    }

    /// Whether removing the statement (when its result is unused) could
    /// change observable behaviour.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Statement::Move { .. } | Statement::Load { .. } | Statement::Alloc { .. } => false,
            Statement::Binary { op, rhs, .. } => {
                matches!(op, BinaryOp::Div | BinaryOp::Mod)
                    && !matches!(rhs, Operand::Const(value) if *value != 0)
            }
            Statement::Store { .. } => true,
            Statement::Call { callee, .. } => match callee {
                Callee::Builtin(builtin) => !builtin.is_pure(),
                _ => true,
            },
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Move { dest, value } => write!(f, "{dest} = {value}"),
            Statement::Binary { dest, op, lhs, rhs } => {
                write!(f, "{dest} = {lhs} {} {rhs}", op.symbol())
            }
            Statement::Load { dest, base, offset } => write!(f, "{dest} = {base}[{offset}]"),
            Statement::Store {
                base,
                offset,
                value,
            } => write!(f, "{base}[{offset}] = {value}"),
            Statement::Alloc { dest, words } => write!(f, "{dest} = alloc {words}"),
            Statement::Call {
                dest,
                callee,
                arguments,
            } => {
                write!(f, "{dest} = call {callee}(")?;
                for (index, argument) in arguments.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Branch condition. `One` always holds and `Zero` never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    One,
    Zero,
    Compare {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
}

impl Condition {
    /// Test of a boolean word.
    pub fn truthy(value: Operand) -> Condition {
        Condition::Compare {
            op: BinaryOp::Ne,
            lhs: value,
            rhs: Operand::Const(0),
        }
    }

    /// The condition for the fall-through side of a branch, or `None`
    /// when a `Compare` carries an operator that is not a comparison.
    pub fn invert(&self) -> Option<Condition> {
        Some(match self {
            Condition::One => Condition::Zero,
            Condition::Zero => Condition::One,
            Condition::Compare { op, lhs, rhs } => Condition::Compare {
                op: op.complement()?,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
        })
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Condition::One | Condition::Zero => Vec::new(),
            Condition::Compare { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Condition::One | Condition::Zero => Vec::new(),
            Condition::Compare { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::One => f.write_str("1"),
            Condition::Zero => f.write_str("0"),
            Condition::Compare { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        condition: Condition,
        if_true: BlockId,
        if_false: BlockId,
    },
    Return(Operand),
    /// Control never gets here (e.g. after a runtime panic).
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                if_true, if_false, ..
            } => {
                if if_true == if_false {
                    vec![*if_true]
                } else {
                    vec![*if_true, *if_false]
                }
            }
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Terminator::Branch { condition, .. } => condition.operands(),
            Terminator::Return(value) => vec![value],
            Terminator::Jump(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::Branch { condition, .. } => condition.operands_mut(),
            Terminator::Return(value) => vec![value],
            Terminator::Jump(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn uses(&self) -> Vec<VarId> {
        self.operands().into_iter().filter_map(Operand::as_var).collect()
    }

    /// Redirect every edge to `from` towards `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let swap = |id: &mut BlockId| {
            if *id == from {
                *id = to;
            }
        };
        match self {
            Terminator::Jump(target) => swap(target),
            Terminator::Branch {
                if_true, if_false, ..
            } => {
                swap(if_true);
                swap(if_false);
            }
            Terminator::Return(_) | Terminator::Unreachable => {}
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "jump {target}"),
            Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => write!(f, "branch {condition} ? {if_true} : {if_false}"),
            Terminator::Return(value) => write!(f, "return {value}"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<VarId>,
    /// Blocks in layout order; the entry block need not be first.
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub next_var: u32,
    pub next_block: u32,
}

impl Function {
    /// A function with `parameter_count` parameters and an empty entry
    /// block returning 0.
    pub fn new(name: impl Into<String>, parameter_count: usize) -> Self {
        let mut function = Function {
            name: name.into(),
            parameters: Vec::with_capacity(parameter_count),
            blocks: Vec::new(),
            entry: BlockId(0),
            next_var: 0,
            next_block: 0,
        };
        for _ in 0..parameter_count {
            let parameter = function.fresh_var();
            function.parameters.push(parameter);
        }
        let entry = function.fresh_block();
        function.entry = entry;
        function.blocks.push(BasicBlock {
            id: entry,
            statements: Vec::new(),
            terminator: Terminator::Return(Operand::Const(0)),
        });
        function
    }

    pub fn fresh_var(&mut self) -> VarId {
        let var = VarId(self.next_var);
        self.next_var += 1;
        var
    }

    pub fn fresh_block(&mut self) -> BlockId {
        let block = BlockId(self.next_block);
        self.next_block += 1;
        block
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Number of statements plus terminators; the inliner's size measure.
    pub fn size(&self) -> usize {
        self.blocks.iter().map(|b| b.statements.len() + 1).sum()
    }

    /// Check the structural invariants: unique block ids, an existing
    /// entry and no dangling jump targets.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut ids = std::collections::HashSet::new();
        for block in &self.blocks {
            if !ids.insert(block.id) {
                return Err(CoreError::malformed(
                    &self.name,
                    format!("block {} is defined twice", block.id),
                ));
            }
        }
        if !ids.contains(&self.entry) {
            return Err(CoreError::malformed(
                &self.name,
                format!("entry block {} does not exist", self.entry),
            ));
        }
        for block in &self.blocks {
            for target in block.terminator.successors() {
                if !ids.contains(&target) {
                    return Err(CoreError::malformed(
                        &self.name,
                        format!("{} jumps to undefined block {target}", block.id),
                    ));
                }
            }
            if let Terminator::Branch {
                condition: Condition::Compare { op, .. },
                ..
            } = &block.terminator
                && op.complement().is_none()
            {
                return Err(CoreError::malformed(
                    &self.name,
                    format!("{} branches on `{}`, which is not a comparison", block.id, op.symbol()),
                ));
            }
        }
        Ok(())
    }

    /// Flatten into a label/jump instruction sequence, entry first.
    ///
    /// Branches whose false side is the next block fall through; when
    /// only the true side is next, the condition is inverted.
    pub fn linearize(&self) -> Vec<Instruction> {
        let mut order: Vec<&BasicBlock> = Vec::with_capacity(self.blocks.len());
        if let Some(entry) = self.block(self.entry) {
            order.push(entry);
        }
        order.extend(self.blocks.iter().filter(|b| b.id != self.entry));

        let mut instructions = Vec::new();
        for (index, block) in order.iter().enumerate() {
            let next = order.get(index + 1).map(|b| b.id);
            instructions.push(Instruction::Label(block.id));
            instructions.extend(block.statements.iter().cloned().map(Instruction::Statement));
            match &block.terminator {
                Terminator::Jump(target) => {
                    if Some(*target) != next {
                        instructions.push(Instruction::Jump(*target));
                    }
                }
                Terminator::Branch {
                    condition,
                    if_true,
                    if_false,
                } => {
                    if Some(*if_false) == next {
                        instructions.push(Instruction::Branch {
                            condition: condition.clone(),
                            target: *if_true,
                        });
                    } else if Some(*if_true) == next
                        && let Some(inverted) = condition.invert()
                    {
                        instructions.push(Instruction::Branch {
                            condition: inverted,
                            target: *if_false,
                        });
                    } else {
                        instructions.push(Instruction::Branch {
                            condition: condition.clone(),
                            target: *if_true,
                        });
                        instructions.push(Instruction::Jump(*if_false));
                    }
                }
                Terminator::Return(value) => instructions.push(Instruction::Return(value.clone())),
                Terminator::Unreachable => instructions.push(Instruction::Unreachable),
            }
        }
        instructions
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{parameter}")?;
        }
        writeln!(f, ") entry {} {{", self.entry)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for statement in &block.statements {
                writeln!(f, "  {statement}")?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }
        f.write_str("}")
    }
}

/// Linear form of a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Label(BlockId),
    Statement(Statement),
    Jump(BlockId),
    /// Jumps when the condition holds, falls through otherwise.
    Branch {
        condition: Condition,
        target: BlockId,
    },
    Return(Operand),
    Unreachable,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(id) => write!(f, "{id}:"),
            Instruction::Statement(statement) => write!(f, "  {statement}"),
            Instruction::Jump(target) => write!(f, "  jump {target}"),
            Instruction::Branch { condition, target } => {
                write!(f, "  if {condition} jump {target}")
            }
            Instruction::Return(value) => write!(f, "  return {value}"),
            Instruction::Unreachable => f.write_str("  unreachable"),
        }
    }
}

/// The whole program: a string pool plus functions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationUnit {
    pub strings: Vec<String>,
    pub functions: Vec<Function>,
    /// Function exported as `main`.
    pub entry: Option<String>,
}

impl CompilationUnit {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn intern(&mut self, value: &str) -> StringId {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return StringId(index as u32);
        }
        self.strings.push(value.to_string());
        StringId((self.strings.len() - 1) as u32)
    }

    pub fn string(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(String::as_str)
    }

    /// Validate every function and every cross-function reference.
    pub fn validate(&self) -> Result<(), CoreError> {
        let names: std::collections::HashSet<&str> =
            self.functions.iter().map(|f| f.name.as_str()).collect();
        if names.len() != self.functions.len() {
            return Err(CoreError::malformed("<unit>", "duplicate function names"));
        }
        if let Some(entry) = &self.entry {
            if !names.contains(entry.as_str()) {
                return Err(CoreError::MissingEntryPoint(entry.clone()));
            }
        }
        for function in &self.functions {
            function.validate()?;
            for block in &function.blocks {
                let mut operands: Vec<&Operand> = block
                    .statements
                    .iter()
                    .flat_map(Statement::operands)
                    .collect();
                operands.extend(block.terminator.operands());
                for statement in &block.statements {
                    if let Statement::Call {
                        callee: Callee::Direct(name),
                        ..
                    } = statement
                    {
                        if !names.contains(name.as_str()) {
                            return Err(CoreError::malformed(
                                &function.name,
                                format!("call to unknown function `{name}`"),
                            ));
                        }
                    }
                }
                for operand in operands {
                    match operand {
                        Operand::Function(name) if !names.contains(name.as_str()) => {
                            return Err(CoreError::malformed(
                                &function.name,
                                format!("reference to unknown function `{name}`"),
                            ));
                        }
                        Operand::Str(id) if self.string(*id).is_none() => {
                            return Err(CoreError::malformed(
                                &function.name,
                                format!("reference to unknown string #{}", id.0),
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, string) in self.strings.iter().enumerate() {
            writeln!(f, "str#{index} = {string:?}")?;
        }
        for function in &self.functions {
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comparisons() -> Vec<Condition> {
        [
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::Eq,
            BinaryOp::Ne,
        ]
        .into_iter()
        .map(|op| Condition::Compare {
            op,
            lhs: Operand::Var(VarId(0)),
            rhs: Operand::Const(3),
        })
        .collect()
    }

    #[test]
    fn inversion_is_an_involution() {
        assert_eq!(Condition::One.invert(), Some(Condition::Zero));
        assert_eq!(Condition::Zero.invert(), Some(Condition::One));
        for condition in comparisons() {
            let inverted = condition.invert().expect("comparison");
            assert_ne!(inverted, condition);
            assert_eq!(inverted.invert(), Some(condition));
        }
    }

    #[test]
    fn inversion_is_the_complement() {
        for condition in comparisons() {
            let Condition::Compare { op, .. } = &condition else {
                unreachable!()
            };
            let Some(Condition::Compare { op: inverted, .. }) = condition.invert() else {
                unreachable!()
            };
            for lhs in [-2, 3, 7] {
                assert_ne!(op.evaluate(lhs, 3), inverted.evaluate(lhs, 3));
            }
        }
    }

    #[test]
    fn arithmetic_wraps_and_division_by_zero_is_undefined() {
        assert_eq!(BinaryOp::Add.evaluate(i32::MAX, 1), Some(i32::MIN));
        assert_eq!(BinaryOp::Div.evaluate(i32::MIN, -1), Some(i32::MIN));
        assert_eq!(BinaryOp::Mod.evaluate(i32::MIN, -1), Some(0));
        assert_eq!(BinaryOp::Div.evaluate(1, 0), None);
    }

    #[test]
    fn linearize_inverts_for_fall_through() {
        let mut function = Function::new("f", 1);
        let then_block = function.fresh_block();
        let else_block = function.fresh_block();
        let parameter = Operand::Var(function.parameters[0]);
        function.blocks[0].terminator = Terminator::Branch {
            condition: Condition::Compare {
                op: BinaryOp::Lt,
                lhs: parameter.clone(),
                rhs: Operand::Const(0),
            },
            if_true: then_block,
            if_false: else_block,
        };
        function.blocks.push(BasicBlock {
            id: then_block,
            statements: Vec::new(),
            terminator: Terminator::Return(Operand::Const(1)),
        });
        function.blocks.push(BasicBlock {
            id: else_block,
            statements: Vec::new(),
            terminator: Terminator::Return(Operand::Const(2)),
        });
        assert!(function.validate().is_ok());
        let linear = function.linearize();
        assert_eq!(
            linear[1],
            Instruction::Branch {
                condition: Condition::Compare {
                    op: BinaryOp::Ge,
                    lhs: parameter,
                    rhs: Operand::Const(0),
                },
                target: else_block,
            }
        );
    }

    fn branch_on(op: BinaryOp) -> Function {
        let mut function = Function::new("f", 1);
        let then_block = function.fresh_block();
        let else_block = function.fresh_block();
        function.blocks[0].terminator = Terminator::Branch {
            condition: Condition::Compare {
                op,
                lhs: Operand::Var(function.parameters[0]),
                rhs: Operand::Const(1),
            },
            if_true: then_block,
            if_false: else_block,
        };
        for (id, value) in [(then_block, 1), (else_block, 2)] {
            function.blocks.push(BasicBlock {
                id,
                statements: Vec::new(),
                terminator: Terminator::Return(Operand::Const(value)),
            });
        }
        function
    }

    #[test]
    fn arithmetic_operators_do_not_invert() {
        for op in [BinaryOp::Add, BinaryOp::Xor, BinaryOp::Mod] {
            let condition = Condition::Compare {
                op,
                lhs: Operand::Var(VarId(0)),
                rhs: Operand::Const(1),
            };
            assert_eq!(condition.invert(), None);
        }
    }

    #[test]
    fn validation_rejects_branches_on_arithmetic() {
        let error = branch_on(BinaryOp::Xor).validate().expect_err("xor branch");
        assert!(matches!(error, CoreError::MalformedIr { .. }));
        assert!(branch_on(BinaryOp::Ne).validate().is_ok());
    }

    #[test]
    fn linearize_keeps_uninvertible_branches_explicit() {
        let function = branch_on(BinaryOp::Add);
        let linear = function.linearize();
        let then_block = function.blocks[1].id;
        let else_block = function.blocks[2].id;
        assert!(matches!(
            &linear[1],
            Instruction::Branch { condition: Condition::Compare { op: BinaryOp::Add, .. }, target }
                if *target == then_block
        ));
        assert_eq!(linear[2], Instruction::Jump(else_block));
    }

    #[test]
    fn validation_rejects_dangling_targets() {
        let mut function = Function::new("f", 0);
        function.blocks[0].terminator = Terminator::Jump(BlockId(9));
        let error = function.validate().expect_err("dangling");
        assert!(matches!(error, CoreError::MalformedIr { .. }));
    }
}
