//! WASM backend.
//!
//! Translates MIR into a module using the `wasm-encoder` crate. Every
//! value is an `i32`; records are word arrays in linear memory and
//! closures are called through per-arity dispatch functions that compare
//! the code pointer (a function index) against every function whose
//! address is taken.
//!
//! Control flow is rebuilt from the block graph with the dominator-tree
//! method: a `loop` opens at every back-edge target, and a `block` is
//! opened around a node for each of its dominator-tree children that has
//! several forward predecessors. Irreducible graphs are rejected.
//!
//! Module contract:
//! - imports `env.memory` and the functions of [`IMPORT_NAMESPACE`];
//! - pooled strings are stored from [`STRING_BASE`] as a zero word, the
//!   byte length at `+4` and the bytes at `+8`;
//! - exports `main` and `__heap_base`, the first free address.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    Function as WasmFunction, FunctionSection, ImportSection, Instruction, MemArg, MemoryType,
    Module, TypeSection, ValType,
};

use crate::builtins::{Builtin, IMPORT_NAMESPACE};
use crate::error::CoreError;
use crate::mir::{
    BinaryOp, BlockId, Callee, CompilationUnit, Condition, Function, Operand, Statement,
    Terminator, VarId,
};

pub const STRING_BASE: u32 = 16;
pub const WORD_BYTES: u32 = 4;
pub const HEAP_BASE_EXPORT: &str = "__heap_base";
pub const MAIN_EXPORT: &str = "main";

/// Offsets of pooled strings and the first address after them.
pub fn string_layout(strings: &[String]) -> (Vec<u32>, Vec<u8>, u32) {
    let mut offsets = Vec::with_capacity(strings.len());
    let mut bytes = Vec::new();
    for string in strings {
        offsets.push(STRING_BASE + bytes.len() as u32);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(string.len() as u32).to_le_bytes());
        bytes.extend_from_slice(string.as_bytes());
        while bytes.len() % WORD_BYTES as usize != 0 {
            bytes.push(0);
        }
    }
    let end = STRING_BASE + bytes.len() as u32;
    (offsets, bytes, end.next_multiple_of(8))
}

struct Types {
    section: TypeSection,
    by_arity: BTreeMap<usize, u32>,
}

impl Types {
    fn new() -> Self {
        Types {
            section: TypeSection::new(),
            by_arity: BTreeMap::new(),
        }
    }

    /// `(i32 × arity) -> i32`
    fn of_arity(&mut self, arity: usize) -> u32 {
        if let Some(index) = self.by_arity.get(&arity) {
            return *index;
        }
        let index = self.section.len();
        self.section
            .ty()
            .function(vec![ValType::I32; arity], [ValType::I32]);
        self.by_arity.insert(arity, index);
        index
    }
}

struct Layout {
    string_offsets: Vec<u32>,
    functions: HashMap<String, u32>,
    dispatchers: BTreeMap<usize, u32>,
}

fn builtin_index(builtin: Builtin) -> u32 {
    Builtin::ALL.iter().position(|b| *b == builtin).unwrap_or(0) as u32
}

pub fn emit_wasm(unit: &CompilationUnit) -> Result<Vec<u8>, CoreError> {
    unit.validate()?;
    let (string_offsets, data, heap_base) = string_layout(&unit.strings);

    let mut types = Types::new();
    let mut imports = ImportSection::new();
    imports.import(
        "env",
        "memory",
        EntityType::Memory(MemoryType {
            minimum: 1,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        }),
    );
    for builtin in Builtin::ALL {
        let ty = types.of_arity(builtin.arity());
        imports.import(IMPORT_NAMESPACE, builtin.name(), EntityType::Function(ty));
    }

    let imported = Builtin::ALL.len() as u32;
    let functions: HashMap<String, u32> = unit
        .functions
        .iter()
        .enumerate()
        .map(|(index, f)| (f.name.clone(), imported + index as u32))
        .collect();

    let mut arities = BTreeSet::new();
    let mut address_taken = BTreeSet::new();
    for function in &unit.functions {
        for block in &function.blocks {
            for statement in &block.statements {
                if let Statement::Call {
                    callee: Callee::Indirect(_),
                    arguments,
                    ..
                } = statement
                {
                    arities.insert(arguments.len());
                }
                for operand in statement.operands() {
                    if let Operand::Function(name) = operand {
                        address_taken.insert(name.clone());
                    }
                }
            }
        }
    }
    let mut next_index = imported + unit.functions.len() as u32;
    let dispatchers: BTreeMap<usize, u32> = arities
        .iter()
        .map(|arity| {
            let index = next_index;
            next_index += 1;
            (*arity, index)
        })
        .collect();
    let heap_base_index = next_index;

    let layout = Layout {
        string_offsets,
        functions,
        dispatchers,
    };

    let mut function_section = FunctionSection::new();
    let mut code = CodeSection::new();
    for function in &unit.functions {
        function_section.function(types.of_arity(function.parameters.len()));
        let body = FunctionEmitter::new(function, &layout)?.emit()?;
        code.function(&body);
    }
    for (arity, _) in &layout.dispatchers {
        function_section.function(types.of_arity(arity + 1));
        let candidates: Vec<(u32, usize)> = unit
            .functions
            .iter()
            .filter(|f| address_taken.contains(&f.name) && f.parameters.len() == *arity)
            .map(|f| (layout.functions[&f.name], f.parameters.len()))
            .collect();
        code.function(&dispatcher(*arity, &candidates));
    }
    function_section.function(types.of_arity(0));
    let mut heap_base_body = WasmFunction::new(Vec::new());
    heap_base_body.instruction(&Instruction::I32Const(heap_base as i32));
    heap_base_body.instruction(&Instruction::End);
    code.function(&heap_base_body);

    let mut exports = ExportSection::new();
    if let Some(entry) = &unit.entry {
        let function = unit
            .function(entry)
            .ok_or_else(|| CoreError::MissingEntryPoint(entry.clone()))?;
        if !function.parameters.is_empty() {
            return Err(CoreError::malformed(entry, "entry point takes parameters"));
        }
        exports.export(MAIN_EXPORT, ExportKind::Func, layout.functions[entry]);
    }
    exports.export(HEAP_BASE_EXPORT, ExportKind::Func, heap_base_index);

    let mut data_section = DataSection::new();
    if !data.is_empty() {
        data_section.active(0, &ConstExpr::i32_const(STRING_BASE as i32), data);
    }

    let mut module = Module::new();
    module.section(&types.section);
    module.section(&imports);
    module.section(&function_section);
    module.section(&exports);
    module.section(&code);
    if !data_section.is_empty() {
        module.section(&data_section);
    }
    let bytes = module.finish();
    tracing::debug!(bytes = bytes.len(), heap_base, "emitted wasm module");
    Ok(bytes)
}

/// `dispatch(code, args...)` calls the function whose index is `code`.
fn dispatcher(arity: usize, candidates: &[(u32, usize)]) -> WasmFunction {
    let mut body = WasmFunction::new(Vec::new());
    for (index, _) in candidates {
        body.instruction(&Instruction::LocalGet(0));
        body.instruction(&Instruction::I32Const(*index as i32));
        body.instruction(&Instruction::I32Eq);
        body.instruction(&Instruction::If(BlockType::Empty));
        for argument in 0..arity {
            body.instruction(&Instruction::LocalGet(argument as u32 + 1));
        }
        body.instruction(&Instruction::Call(*index));
        body.instruction(&Instruction::Return);
        body.instruction(&Instruction::End);
    }
    body.instruction(&Instruction::Unreachable);
    body.instruction(&Instruction::End);
    body
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    IfThenElse,
    LoopHeadedBy(BlockId),
    BlockFollowedBy(BlockId),
}

struct FunctionEmitter<'a> {
    function: &'a Function,
    layout: &'a Layout,
    body: WasmFunction,
    locals: HashMap<VarId, u32>,
    rpo: HashMap<BlockId, usize>,
    children: HashMap<BlockId, Vec<BlockId>>,
    merge_nodes: HashSet<BlockId>,
    loop_headers: HashSet<BlockId>,
}

impl<'a> FunctionEmitter<'a> {
    fn new(function: &'a Function, layout: &'a Layout) -> Result<Self, CoreError> {
        let mut locals = HashMap::new();
        for (index, parameter) in function.parameters.iter().enumerate() {
            locals.insert(*parameter, index as u32);
        }
        let mut others = BTreeSet::new();
        for block in &function.blocks {
            for statement in &block.statements {
                others.extend(statement.dest());
                others.extend(statement.uses());
            }
            others.extend(block.terminator.uses());
        }
        let mut count = 0u32;
        for var in others {
            if !locals.contains_key(&var) {
                locals.insert(var, function.parameters.len() as u32 + count);
                count += 1;
            }
        }
        let body = WasmFunction::new(if count > 0 {
            vec![(count, ValType::I32)]
        } else {
            Vec::new()
        });

        let order = reverse_postorder(function);
        let rpo: HashMap<BlockId, usize> =
            order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut predecessors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in &order {
            if let Some(data) = function.block(*block) {
                for successor in data.terminator.successors() {
                    predecessors.entry(successor).or_default().push(*block);
                }
            }
        }
        let idom = dominators(&order, &rpo, &predecessors);

        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in order.iter().skip(1) {
            children.entry(order[idom[rpo[block]]]).or_default().push(*block);
        }
        let mut merge_nodes = HashSet::new();
        let mut loop_headers = HashSet::new();
        for block in &order {
            let mut forward = 0;
            for predecessor in predecessors.get(block).into_iter().flatten() {
                if rpo[predecessor] >= rpo[block] {
                    if !dominates(&idom, rpo[block], rpo[predecessor]) {
                        return Err(CoreError::malformed(
                            &function.name,
                            format!("irreducible control flow into {block}"),
                        ));
                    }
                    loop_headers.insert(*block);
                } else {
                    forward += 1;
                }
            }
            if forward >= 2 {
                merge_nodes.insert(*block);
            }
        }

        Ok(FunctionEmitter {
            function,
            layout,
            body,
            locals,
            rpo,
            children,
            merge_nodes,
            loop_headers,
        })
    }

    fn emit(mut self) -> Result<WasmFunction, CoreError> {
        let mut context = Vec::new();
        self.do_tree(self.function.entry, &mut context)?;
        self.body.instruction(&Instruction::Unreachable);
        self.body.instruction(&Instruction::End);
        Ok(self.body)
    }

    fn malformed(&self, message: impl Into<String>) -> CoreError {
        CoreError::malformed(&self.function.name, message)
    }

    fn do_tree(&mut self, block: BlockId, context: &mut Vec<Context>) -> Result<(), CoreError> {
        let mut merges: Vec<BlockId> = self
            .children
            .get(&block)
            .into_iter()
            .flatten()
            .copied()
            .filter(|child| self.merge_nodes.contains(child))
            .collect();
        // The outermost block is followed by the latest merge child.
        merges.sort_by_key(|child| std::cmp::Reverse(self.rpo[child]));
        if self.loop_headers.contains(&block) {
            self.body.instruction(&Instruction::Loop(BlockType::Empty));
            context.push(Context::LoopHeadedBy(block));
            self.node_within(block, &merges, context)?;
            context.pop();
            self.body.instruction(&Instruction::End);
            Ok(())
        } else {
            self.node_within(block, &merges, context)
        }
    }

    fn node_within(
        &mut self,
        block: BlockId,
        merges: &[BlockId],
        context: &mut Vec<Context>,
    ) -> Result<(), CoreError> {
        if let Some((follower, inner)) = merges.split_first() {
            self.body.instruction(&Instruction::Block(BlockType::Empty));
            context.push(Context::BlockFollowedBy(*follower));
            self.node_within(block, inner, context)?;
            context.pop();
            self.body.instruction(&Instruction::End);
            return self.do_tree(*follower, context);
        }

        let data = self
            .function
            .block(block)
            .ok_or_else(|| self.malformed(format!("missing block {block}")))?;
        for statement in &data.statements {
            self.statement(statement)?;
        }
        match &data.terminator {
            Terminator::Jump(target) => self.branch(block, *target, context),
            Terminator::Branch {
                condition,
                if_true,
                if_false,
            } => {
                self.condition(condition)?;
                self.body.instruction(&Instruction::If(BlockType::Empty));
                context.push(Context::IfThenElse);
                self.branch(block, *if_true, context)?;
                self.body.instruction(&Instruction::Else);
                self.branch(block, *if_false, context)?;
                context.pop();
                self.body.instruction(&Instruction::End);
                Ok(())
            }
            Terminator::Return(value) => {
                self.operand(value)?;
                self.body.instruction(&Instruction::Return);
                Ok(())
            }
            Terminator::Unreachable => {
                self.body.instruction(&Instruction::Unreachable);
                Ok(())
            }
        }
    }

    fn branch(&mut self, source: BlockId, target: BlockId, context: &mut Vec<Context>) -> Result<(), CoreError> {
        let wanted = if self.rpo[&target] <= self.rpo[&source] {
            Context::LoopHeadedBy(target)
        } else if self.merge_nodes.contains(&target) {
            Context::BlockFollowedBy(target)
        } else {
            return self.do_tree(target, context);
        };
        let depth = context
            .iter()
            .rev()
            .position(|c| *c == wanted)
            .ok_or_else(|| self.malformed(format!("no enclosing label for {target}")))?;
        self.body.instruction(&Instruction::Br(depth as u32));
        Ok(())
    }

    fn local(&self, var: VarId) -> Result<u32, CoreError> {
        self.locals
            .get(&var)
            .copied()
            .ok_or_else(|| self.malformed(format!("{var} has no local")))
    }

    fn operand(&mut self, operand: &Operand) -> Result<(), CoreError> {
        let instruction = match operand {
            Operand::Const(value) => Instruction::I32Const(*value),
            Operand::Var(var) => Instruction::LocalGet(self.local(*var)?),
            Operand::Str(id) => {
                let offset = self
                    .layout
                    .string_offsets
                    .get(id.0 as usize)
                    .ok_or_else(|| self.malformed(format!("unknown string #{}", id.0)))?;
                Instruction::I32Const(*offset as i32)
            }
            Operand::Function(name) => {
                let index = self
                    .layout
                    .functions
                    .get(name)
                    .ok_or_else(|| self.malformed(format!("unknown function `{name}`")))?;
                Instruction::I32Const(*index as i32)
            }
        };
        self.body.instruction(&instruction);
        Ok(())
    }

    fn condition(&mut self, condition: &Condition) -> Result<(), CoreError> {
        match condition {
            Condition::One => {
                self.body.instruction(&Instruction::I32Const(1));
            }
            Condition::Zero => {
                self.body.instruction(&Instruction::I32Const(0));
            }
            Condition::Compare { op, lhs, rhs } => {
                self.operand(lhs)?;
                self.operand(rhs)?;
                self.body.instruction(&binary_instruction(*op));
            }
        }
        Ok(())
    }

    fn memarg(offset: u32) -> MemArg {
        MemArg {
            offset: u64::from(offset * WORD_BYTES),
            align: 2,
            memory_index: 0,
        }
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), CoreError> {
        match statement {
            Statement::Move { dest, value } => {
                self.operand(value)?;
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
            Statement::Binary {
                dest,
                op: BinaryOp::Div,
                lhs,
                rhs,
            } => {
                // `i32.div_s` traps on MIN / -1, which wraps to MIN here.
                match rhs {
                    Operand::Const(-1) => {
                        self.body.instruction(&Instruction::I32Const(0));
                        self.operand(lhs)?;
                        self.body.instruction(&Instruction::I32Sub);
                    }
                    Operand::Const(_) => {
                        self.operand(lhs)?;
                        self.operand(rhs)?;
                        self.body.instruction(&Instruction::I32DivS);
                    }
                    _ => {
                        self.operand(rhs)?;
                        self.body.instruction(&Instruction::I32Const(-1));
                        self.body.instruction(&Instruction::I32Eq);
                        self.body
                            .instruction(&Instruction::If(BlockType::Result(ValType::I32)));
                        self.body.instruction(&Instruction::I32Const(0));
                        self.operand(lhs)?;
                        self.body.instruction(&Instruction::I32Sub);
                        self.body.instruction(&Instruction::Else);
                        self.operand(lhs)?;
                        self.operand(rhs)?;
                        self.body.instruction(&Instruction::I32DivS);
                        self.body.instruction(&Instruction::End);
                    }
                }
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
            Statement::Binary { dest, op, lhs, rhs } => {
                self.operand(lhs)?;
                self.operand(rhs)?;
                self.body.instruction(&binary_instruction(*op));
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
            Statement::Load { dest, base, offset } => {
                self.operand(base)?;
                self.body.instruction(&Instruction::I32Load(Self::memarg(*offset)));
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
            Statement::Store {
                base,
                offset,
                value,
            } => {
                self.operand(base)?;
                self.operand(value)?;
                self.body.instruction(&Instruction::I32Store(Self::memarg(*offset)));
            }
            Statement::Alloc { dest, words } => {
                self.body
                    .instruction(&Instruction::I32Const((words * WORD_BYTES) as i32));
                self.body
                    .instruction(&Instruction::Call(builtin_index(Builtin::Malloc)));
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
            Statement::Call {
                dest,
                callee,
                arguments,
            } => {
                let index = match callee {
                    Callee::Direct(name) => *self
                        .layout
                        .functions
                        .get(name)
                        .ok_or_else(|| self.malformed(format!("unknown function `{name}`")))?,
                    Callee::Builtin(builtin) => builtin_index(*builtin),
                    Callee::Indirect(code) => {
                        self.operand(code)?;
                        *self
                            .layout
                            .dispatchers
                            .get(&arguments.len())
                            .ok_or_else(|| self.malformed("missing dispatcher"))?
                    }
                };
                for argument in arguments {
                    self.operand(argument)?;
                }
                self.body.instruction(&Instruction::Call(index));
                self.body.instruction(&Instruction::LocalSet(self.local(*dest)?));
            }
        }
        Ok(())
    }
}

fn binary_instruction(op: BinaryOp) -> Instruction<'static> {
    match op {
        BinaryOp::Add => Instruction::I32Add,
        BinaryOp::Sub => Instruction::I32Sub,
        BinaryOp::Mul => Instruction::I32Mul,
        BinaryOp::Div => Instruction::I32DivS,
        // `i32.rem_s` yields 0 for MIN % -1 instead of trapping.
        BinaryOp::Mod => Instruction::I32RemS,
        BinaryOp::Lt => Instruction::I32LtS,
        BinaryOp::Le => Instruction::I32LeS,
        BinaryOp::Gt => Instruction::I32GtS,
        BinaryOp::Ge => Instruction::I32GeS,
        BinaryOp::Eq => Instruction::I32Eq,
        BinaryOp::Ne => Instruction::I32Ne,
        BinaryOp::Xor => Instruction::I32Xor,
    }
}

/// Blocks reachable from the entry in reverse postorder.
fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut postorder = Vec::new();
    // (block, successors still to visit)
    let mut stack: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
    let successors = |id: BlockId| -> Vec<BlockId> {
        let mut next = function
            .block(id)
            .map(|b| b.terminator.successors())
            .unwrap_or_default();
        next.reverse();
        next
    };
    visited.insert(function.entry);
    stack.push((function.entry, successors(function.entry)));
    while let Some((block, pending)) = stack.last_mut() {
        let block = *block;
        match pending.pop() {
            Some(next) => {
                if visited.insert(next) {
                    stack.push((next, successors(next)));
                }
            }
            None => {
                postorder.push(block);
                stack.pop();
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Immediate dominators as reverse-postorder indices (Cooper, Harvey
/// and Kennedy). The entry is its own dominator.
fn dominators(
    order: &[BlockId],
    rpo: &HashMap<BlockId, usize>,
    predecessors: &HashMap<BlockId, Vec<BlockId>>,
) -> Vec<usize> {
    const UNDEFINED: usize = usize::MAX;
    let mut idom = vec![UNDEFINED; order.len()];
    if order.is_empty() {
        return idom;
    }
    idom[0] = 0;
    let mut changed = true;
    while changed {
        changed = false;
        for (index, block) in order.iter().enumerate().skip(1) {
            let mut new_idom = UNDEFINED;
            for predecessor in predecessors.get(block).into_iter().flatten() {
                let p = rpo[predecessor];
                if idom[p] == UNDEFINED {
                    continue;
                }
                new_idom = if new_idom == UNDEFINED {
                    p
                } else {
                    let (mut a, mut b) = (p, new_idom);
                    while a != b {
                        while a > b {
                            a = idom[a];
                        }
                        while b > a {
                            b = idom[b];
                        }
                    }
                    a
                };
            }
            if new_idom != UNDEFINED && idom[index] != new_idom {
                idom[index] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

fn dominates(idom: &[usize], dominator: usize, mut node: usize) -> bool {
    loop {
        if node == dominator {
            return true;
        }
        if node == 0 {
            return false;
        }
        node = idom[node];
    }
}
