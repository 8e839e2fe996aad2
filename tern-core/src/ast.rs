//! Source-level syntax tree.
//!
//! The same tree is used before and after type checking: the parser
//! fills every `ty` slot with `Type::Unknown`, and the checker returns a
//! new tree with resolved types (and resolved member indices).

use crate::span::{Location, ModuleReference};
use crate::types::Type;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id {
    pub location: Location,
    pub name: String,
}

impl Id {
    pub fn new(location: Location, name: impl Into<String>) -> Self {
        Id {
            location,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub imports: Vec<ModuleImport>,
    pub classes: Vec<ClassDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImport {
    pub location: Location,
    pub imported_members: Vec<Id>,
    pub imported_module: ModuleReference,
    pub imported_module_location: Location,
}

/// A type written in source, with the range it was written at.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub location: Location,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDefinition {
    pub location: Location,
    pub is_public: bool,
    pub name: Id,
    pub type_parameters: Vec<Id>,
    pub type_definition: Option<TypeDefinition>,
    pub members: Vec<ClassMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefinition {
    Struct {
        location: Location,
        fields: Vec<FieldDefinition>,
    },
    Enum {
        location: Location,
        variants: Vec<VariantDefinition>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: Id,
    pub annotation: Annotation,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDefinition {
    pub name: Id,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: Id,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    pub location: Location,
    pub is_public: bool,
    pub is_method: bool,
    pub name: Id,
    pub type_parameters: Vec<Id>,
    pub parameters: Vec<Parameter>,
    pub return_type: Annotation,
    pub body: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub location: Location,
    pub ty: Type,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i32),
    Bool(bool),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Not => "!",
            UnaryOperator::Neg => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Concat,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Concat => "::",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        }
    }

    /// Binding strength; higher binds tighter. All operators are
    /// left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 7,
            BinaryOperator::Add | BinaryOperator::Sub => 6,
            BinaryOperator::Concat => 5,
            BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => 4,
            BinaryOperator::Eq | BinaryOperator::Ne => 3,
            BinaryOperator::And => 2,
            BinaryOperator::Or => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Literal),
    This,
    Variable(String),
    /// `Class.member`, referring to a class function. `type_arguments`
    /// is filled by the checker for generic functions.
    ClassFunction {
        module: ModuleReference,
        class_name: Id,
        function_name: Id,
        type_arguments: Vec<Type>,
    },
    FieldAccess {
        object: Box<Expression>,
        field_name: Id,
        field_order: usize,
    },
    MethodAccess {
        object: Box<Expression>,
        method_name: Id,
        type_arguments: Vec<Type>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    IfElse {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
    Match {
        scrutinee: Box<Expression>,
        cases: Vec<MatchCase>,
    },
    Lambda {
        parameters: Vec<LambdaParameter>,
        body: Box<Expression>,
    },
    Block {
        statements: Vec<Statement>,
        result: Option<Box<Expression>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaParameter {
    pub name: Id,
    pub annotation: Option<Annotation>,
    /// Resolved by the checker from the annotation or the expected type.
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub location: Location,
    pub tag: Id,
    pub tag_order: usize,
    /// `None` for the `_` binding.
    pub binding: Option<Id>,
    pub binding_type: Type,
    pub body: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub location: Location,
    pub pattern: Pattern,
    pub annotation: Option<Annotation>,
    pub assigned: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Id(Id),
    Wildcard(Location),
    Object {
        location: Location,
        destructured: Vec<ObjectPatternItem>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatternItem {
    pub field: Id,
    pub field_order: usize,
    pub alias: Option<Id>,
    pub ty: Type,
}

impl ObjectPatternItem {
    /// The local name this item binds.
    pub fn binding(&self) -> &Id {
        self.alias.as_ref().unwrap_or(&self.field)
    }
}

impl Expression {
    pub fn new(location: Location, kind: ExpressionKind) -> Self {
        Expression {
            location,
            ty: Type::Unknown,
            kind,
        }
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::This
            | ExpressionKind::Variable(_)
            | ExpressionKind::ClassFunction { .. } => Vec::new(),
            ExpressionKind::FieldAccess { object, .. }
            | ExpressionKind::MethodAccess { object, .. } => vec![object],
            ExpressionKind::Unary { operand, .. } => vec![operand],
            ExpressionKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExpressionKind::Call { callee, arguments } => {
                let mut children: Vec<&Expression> = vec![callee];
                children.extend(arguments.iter());
                children
            }
            ExpressionKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => vec![condition, then_branch, else_branch],
            ExpressionKind::Match { scrutinee, cases } => {
                let mut children: Vec<&Expression> = vec![scrutinee];
                children.extend(cases.iter().map(|case| &case.body));
                children
            }
            ExpressionKind::Lambda { body, .. } => vec![body],
            ExpressionKind::Block { statements, result } => {
                let mut children: Vec<&Expression> =
                    statements.iter().map(|s| &s.assigned).collect();
                if let Some(result) = result {
                    children.push(result);
                }
                children
            }
        }
    }
}

impl Module {
    pub fn find_class(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.iter().find(|class| class.name.name == name)
    }
}
