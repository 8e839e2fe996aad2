//! High-level intermediate representation (HIR).
//!
//! HIR is the typed AST with every class-level construct resolved:
//! methods are plain functions taking `this` first, constructors are
//! record allocations, matches are tag tests, and lambdas are top-level
//! functions paired with an explicit capture record. Every value is a
//! single word, so no type information is kept.

use std::fmt;

use crate::builtins::Builtin;
use crate::mir::BinaryOp;

#[derive(Debug, Clone, PartialEq)]
pub enum HirCallee {
    Function(String),
    /// A closure record `[code, context]`; the code receives the context
    /// as its first argument.
    Closure(Box<HirExpr>),
    Builtin(Builtin),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HirExpr {
    Int(i32),
    String(String),
    Variable(String),
    Binary {
        op: BinaryOp,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    Call {
        callee: HirCallee,
        arguments: Vec<HirExpr>,
    },
    IfElse {
        condition: Box<HirExpr>,
        then_branch: Box<HirExpr>,
        else_branch: Box<HirExpr>,
    },
    Let {
        name: String,
        value: Box<HirExpr>,
        body: Box<HirExpr>,
    },
    /// Allocate a record of `fields.len()` words.
    StructInit {
        type_name: String,
        fields: Vec<HirExpr>,
    },
    /// Word `index` of a record.
    Index {
        pointer: Box<HirExpr>,
        index: usize,
    },
    Closure {
        function: String,
        context: Box<HirExpr>,
    },
}

impl HirExpr {
    pub fn binary(op: BinaryOp, lhs: HirExpr, rhs: HirExpr) -> HirExpr {
        HirExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn index(pointer: HirExpr, index: usize) -> HirExpr {
        HirExpr::Index {
            pointer: Box::new(pointer),
            index,
        }
    }

    pub fn let_in(name: impl Into<String>, value: HirExpr, body: HirExpr) -> HirExpr {
        HirExpr::Let {
            name: name.into(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn if_else(condition: HirExpr, then_branch: HirExpr, else_branch: HirExpr) -> HirExpr {
        HirExpr::IfElse {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }
}

/// Layout of a heap record, kept for dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HirTypeDefinition {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirFunction {
    pub name: String,
    pub parameters: Vec<String>,
    pub body: HirExpr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HirProgram {
    pub type_definitions: Vec<HirTypeDefinition>,
    pub functions: Vec<HirFunction>,
    pub main_function: Option<String>,
}

impl HirProgram {
    pub fn function(&self, name: &str) -> Option<&HirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for HirCallee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HirCallee::Function(name) => f.write_str(name),
            HirCallee::Closure(closure) => write!(f, "({closure})"),
            HirCallee::Builtin(builtin) => write!(f, "builtin.{}", builtin.name()),
        }
    }
}

impl fmt::Display for HirExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HirExpr::Int(value) => write!(f, "{value}"),
            HirExpr::String(value) => write!(f, "{value:?}"),
            HirExpr::Variable(name) => f.write_str(name),
            HirExpr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            HirExpr::Call { callee, arguments } => {
                write!(f, "{callee}(")?;
                write_list(f, arguments)?;
                f.write_str(")")
            }
            HirExpr::IfElse {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "(if {condition} then {then_branch} else {else_branch})"),
            HirExpr::Let { name, value, body } => write!(f, "(let {name} = {value} in {body})"),
            HirExpr::StructInit { type_name, fields } => {
                write!(f, "{type_name}{{")?;
                write_list(f, fields)?;
                f.write_str("}")
            }
            HirExpr::Index { pointer, index } => write!(f, "{pointer}[{index}]"),
            HirExpr::Closure { function, context } => write!(f, "closure({function}, {context})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[HirExpr]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for HirProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for definition in &self.type_definitions {
            writeln!(f, "record {} {{ {} }}", definition.name, definition.fields.join(", "))?;
        }
        for function in &self.functions {
            writeln!(
                f,
                "function {}({}) = {}",
                function.name,
                function.parameters.join(", "),
                function.body
            )?;
        }
        Ok(())
    }
}
