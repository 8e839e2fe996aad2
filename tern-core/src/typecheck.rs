//! Body phase of type checking.
//!
//! Expressions are checked bidirectionally: every routine receives the
//! type the context expects (or `Unknown`) and returns a rebuilt
//! expression with its own type filled in. Generic calls are solved
//! from the expected return type first, then from ordinary arguments,
//! and lambdas without annotations last.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ast::{
    Annotation, BinaryOperator, ClassDefinition, ClassMember, Expression, ExpressionKind, Id,
    LambdaParameter, Literal, MatchCase, Module, ObjectPatternItem, Pattern, Statement,
    UnaryOperator,
};
use crate::diagnostic::{Diagnostics, ErrorKind};
use crate::interface::{
    ClassInterface, ClassTable, GlobalInterface, TypeResolver, build_global_interface,
};
use crate::span::{Location, ModuleReference};
use crate::types::{FunctionType, Type, is_assignable, least_common_supertype, solve};

/// Result of checking a set of modules.
#[derive(Debug, Clone)]
pub struct TypeCheckOutput {
    pub modules: BTreeMap<ModuleReference, Module>,
    pub interface: GlobalInterface,
    pub diagnostics: Diagnostics,
}

/// Check all modules. Always returns typed modules; problems end up in
/// `diagnostics`.
pub fn type_check(modules: &BTreeMap<ModuleReference, Module>) -> TypeCheckOutput {
    let mut diagnostics = Diagnostics::new();
    let table = ClassTable::build(modules);
    let interface = build_global_interface(modules, &table, &mut diagnostics);
    let mut checked = BTreeMap::new();
    for (reference, module) in modules {
        let typed = check_module(reference, module, &interface, &table, &mut diagnostics);
        checked.insert(reference.clone(), typed);
    }
    tracing::debug!(
        modules = checked.len(),
        diagnostics = diagnostics.len(),
        "type checking finished"
    );
    TypeCheckOutput {
        modules: checked,
        interface,
        diagnostics,
    }
}

fn check_module(
    reference: &ModuleReference,
    module: &Module,
    interface: &GlobalInterface,
    table: &ClassTable,
    diagnostics: &mut Diagnostics,
) -> Module {
    let empty = BTreeMap::new();
    let imports = interface
        .modules
        .get(reference)
        .map_or(&empty, |m| &m.imports);
    let mut seen_classes = BTreeSet::new();
    let mut classes = Vec::with_capacity(module.classes.len());
    for class in &module.classes {
        let first = seen_classes.insert(class.name.name.clone());
        let class_interface = interface.class(reference, &class.name.name);
        match class_interface {
            Some(class_interface) if first => {
                classes.push(check_class(
                    reference,
                    class,
                    class_interface,
                    interface,
                    TypeResolver {
                        table,
                        module: reference,
                        imports,
                    },
                    diagnostics,
                ));
            }
            _ => classes.push(class.clone()),
        }
    }
    Module {
        imports: module.imports.clone(),
        classes,
    }
}

fn check_class(
    reference: &ModuleReference,
    class: &ClassDefinition,
    class_interface: &ClassInterface,
    interface: &GlobalInterface,
    resolver: TypeResolver<'_>,
    diagnostics: &mut Diagnostics,
) -> ClassDefinition {
    let mut seen = BTreeSet::new();
    let members = class
        .members
        .iter()
        .map(|member| {
            let signature = if member.is_method {
                class_interface.method(&member.name.name)
            } else {
                class_interface.function(&member.name.name)
            };
            // Duplicates were reported by the interface phase.
            match signature {
                Some(signature)
                    if seen.insert(member.name.name.clone())
                        && signature.location == member.location =>
                {
                    let mut type_parameters: BTreeSet<String> =
                        signature.type_parameters.iter().cloned().collect();
                    if member.is_method {
                        type_parameters.extend(class_interface.type_parameters.iter().cloned());
                    }
                    let mut checker = Checker {
                        interface,
                        resolver: &resolver,
                        module: reference,
                        class: class_interface,
                        this_type: member.is_method.then(|| class_interface.self_type()),
                        type_parameters,
                        scopes: vec![HashMap::new()],
                        diagnostics: &mut *diagnostics,
                    };
                    for (parameter, ty) in member.parameters.iter().zip(&signature.parameters) {
                        checker.bind(&parameter.name, ty.clone());
                    }
                    let body = checker.check(&member.body, &signature.return_type);
                    let mut typed = member.clone();
                    for (parameter, ty) in typed.parameters.iter_mut().zip(&signature.parameters) {
                        parameter.annotation.ty = ty.clone();
                    }
                    typed.return_type.ty = signature.return_type.clone();
                    typed.body = body;
                    typed
                }
                _ => member.clone(),
            }
        })
        .collect::<Vec<ClassMember>>();
    ClassDefinition {
        members,
        ..class.clone()
    }
}

struct Checker<'a> {
    interface: &'a GlobalInterface,
    resolver: &'a TypeResolver<'a>,
    module: &'a ModuleReference,
    class: &'a ClassInterface,
    this_type: Option<Type>,
    type_parameters: BTreeSet<String>,
    scopes: Vec<HashMap<String, Type>>,
    diagnostics: &'a mut Diagnostics,
}

enum CalleeKind {
    ClassFunction {
        module: ModuleReference,
        class_name: Id,
        function_name: Id,
    },
    Method {
        object: Box<Expression>,
        method_name: Id,
    },
}

/// A function-valued member whose type parameters are not yet solved.
struct GenericCallee {
    location: Location,
    kind: CalleeKind,
    type_parameters: Vec<String>,
    function_type: FunctionType,
}

impl GenericCallee {
    fn into_expression(self, type_arguments: Vec<Type>, ty: Type) -> Expression {
        let kind = match self.kind {
            CalleeKind::ClassFunction {
                module,
                class_name,
                function_name,
            } => ExpressionKind::ClassFunction {
                module,
                class_name,
                function_name,
                type_arguments,
            },
            CalleeKind::Method {
                object,
                method_name,
            } => ExpressionKind::MethodAccess {
                object,
                method_name,
                type_arguments,
            },
        };
        Expression {
            location: self.location,
            ty,
            kind,
        }
    }
}

enum Resolved {
    Generic(GenericCallee),
    Done(Expression),
}

impl Checker<'_> {
    fn error(&mut self, kind: ErrorKind, location: Location, message: impl Into<String>) {
        self.diagnostics.report(kind, self.module, location, message);
    }

    fn expect_assignable(&mut self, actual: &Type, expected: &Type, location: Location) {
        if !is_assignable(actual, expected) {
            self.error(
                ErrorKind::TypeMismatch,
                location,
                format!("Expected `{expected}`, found `{actual}`."),
            );
        }
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn bind(&mut self, id: &Id, ty: Type) {
        if id.name.is_empty() {
            return;
        }
        if self.lookup(&id.name).is_some() {
            self.error(
                ErrorKind::Collision,
                id.location,
                format!("Name `{}` collides with a previously defined name.", id.name),
            );
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(id.name.clone(), ty);
        }
    }

    fn resolve_annotation(&mut self, annotation: &Annotation) -> Type {
        self.resolver.resolve(
            &annotation.ty,
            annotation.location,
            &self.type_parameters,
            self.diagnostics,
        )
    }

    fn is_current_class(&self, class: &ClassInterface) -> bool {
        class.module == *self.module && class.name == self.class.name
    }

    /// Check `expression` against `expected`, reporting a mismatch.
    fn check(&mut self, expression: &Expression, expected: &Type) -> Expression {
        let typed = self.infer(expression, expected);
        self.expect_assignable(&typed.ty, expected, typed.location);
        typed
    }

    /// The type of several branches checked against `hint`.
    fn merge(&self, types: &[Type], hint: &Type) -> Type {
        let mut merged: Option<Type> = None;
        for ty in types {
            merged = match merged {
                None => Some(ty.clone()),
                Some(current) => least_common_supertype(&current, ty).or(Some(current)),
            };
        }
        match merged {
            Some(ty) if hint.is_unknown() || is_assignable(&ty, hint) => ty,
            Some(_) => hint.clone(),
            None => hint.clone(),
        }
    }

    fn infer(&mut self, expression: &Expression, hint: &Type) -> Expression {
        let location = expression.location;
        let (kind, ty) = match &expression.kind {
            ExpressionKind::Literal(literal) => {
                let ty = match literal {
                    Literal::Int(_) => Type::INT,
                    Literal::Bool(_) => Type::BOOL,
                    Literal::String(_) => Type::STRING,
                };
                (expression.kind.clone(), ty)
            }
            ExpressionKind::This => match &self.this_type {
                Some(ty) => (ExpressionKind::This, ty.clone()),
                None => {
                    self.error(
                        ErrorKind::UnresolvedName,
                        location,
                        "`this` is only available in methods.",
                    );
                    (ExpressionKind::This, Type::Unknown)
                }
            },
            ExpressionKind::Variable(name) => match self.lookup(name) {
                Some(ty) => (expression.kind.clone(), ty.clone()),
                None => {
                    self.error(
                        ErrorKind::UnresolvedName,
                        location,
                        format!("Name `{name}` is not resolved."),
                    );
                    (expression.kind.clone(), Type::Unknown)
                }
            },
            ExpressionKind::ClassFunction {
                class_name,
                function_name,
                ..
            } => {
                return match self.class_function(location, class_name, function_name) {
                    Resolved::Generic(callee) => self.instantiate_value(callee, hint),
                    Resolved::Done(expression) => expression,
                };
            }
            ExpressionKind::FieldAccess {
                object, field_name, ..
            }
            | ExpressionKind::MethodAccess {
                object,
                method_name: field_name,
                ..
            } => {
                return match self.member_access(location, object, field_name) {
                    Resolved::Generic(callee) => self.instantiate_value(callee, hint),
                    Resolved::Done(expression) => expression,
                };
            }
            ExpressionKind::Unary { operator, operand } => {
                let required = match operator {
                    UnaryOperator::Not => Type::BOOL,
                    UnaryOperator::Neg => Type::INT,
                };
                let operand = self.check(operand, &required);
                (
                    ExpressionKind::Unary {
                        operator: *operator,
                        operand: Box::new(operand),
                    },
                    required,
                )
            }
            ExpressionKind::Binary { operator, lhs, rhs } => self.binary(*operator, lhs, rhs),
            ExpressionKind::Call { callee, arguments } => {
                return self.call(location, callee, arguments, hint);
            }
            ExpressionKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.check(condition, &Type::BOOL);
                let (then_branch, else_branch, ty) = if hint.is_unknown() {
                    let then_branch = self.infer(then_branch, &Type::Unknown);
                    let else_branch = self.check(else_branch, &then_branch.ty);
                    let ty = least_common_supertype(&then_branch.ty, &else_branch.ty)
                        .unwrap_or_else(|| then_branch.ty.clone());
                    (then_branch, else_branch, ty)
                } else {
                    let then_branch = self.check(then_branch, hint);
                    let else_branch = self.check(else_branch, hint);
                    let ty = self.merge(&[then_branch.ty.clone(), else_branch.ty.clone()], hint);
                    (then_branch, else_branch, ty)
                };
                (
                    ExpressionKind::IfElse {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    ty,
                )
            }
            ExpressionKind::Match { scrutinee, cases } => {
                return self.match_expression(location, scrutinee, cases, hint);
            }
            ExpressionKind::Lambda { parameters, body } => {
                return self.lambda(location, parameters, body, hint);
            }
            ExpressionKind::Block { statements, result } => {
                return self.block(location, statements, result.as_deref(), hint);
            }
        };
        Expression { location, ty, kind }
    }

    fn binary(
        &mut self,
        operator: BinaryOperator,
        lhs: &Expression,
        rhs: &Expression,
    ) -> (ExpressionKind, Type) {
        let (lhs, rhs, ty) = match operator {
            BinaryOperator::Mul
            | BinaryOperator::Div
            | BinaryOperator::Mod
            | BinaryOperator::Add
            | BinaryOperator::Sub => (self.check(lhs, &Type::INT), self.check(rhs, &Type::INT), Type::INT),
            BinaryOperator::Concat => (
                self.check(lhs, &Type::STRING),
                self.check(rhs, &Type::STRING),
                Type::STRING,
            ),
            BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
                (self.check(lhs, &Type::INT), self.check(rhs, &Type::INT), Type::BOOL)
            }
            BinaryOperator::And | BinaryOperator::Or => (
                self.check(lhs, &Type::BOOL),
                self.check(rhs, &Type::BOOL),
                Type::BOOL,
            ),
            BinaryOperator::Eq | BinaryOperator::Ne => {
                let lhs = self.infer(lhs, &Type::Unknown);
                let comparable = matches!(lhs.ty, Type::Unknown)
                    || lhs.ty == Type::INT
                    || lhs.ty == Type::BOOL;
                if !comparable {
                    self.error(
                        ErrorKind::TypeMismatch,
                        lhs.location,
                        format!("Expected `int` or `bool`, found `{}`.", lhs.ty),
                    );
                }
                let expected = if comparable { lhs.ty.clone() } else { Type::Unknown };
                let rhs = self.check(rhs, &expected);
                (lhs, rhs, Type::BOOL)
            }
        };
        (
            ExpressionKind::Binary {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    fn class_function(&mut self, location: Location, class_name: &Id, function_name: &Id) -> Resolved {
        let unresolved = |module: ModuleReference| {
            Resolved::Done(Expression {
                location,
                ty: Type::Unknown,
                kind: ExpressionKind::ClassFunction {
                    module,
                    class_name: class_name.clone(),
                    function_name: function_name.clone(),
                    type_arguments: Vec::new(),
                },
            })
        };
        let interface = self.interface;
        let Some(class) = interface.resolve_class(self.module, &class_name.name) else {
            self.error(
                ErrorKind::UnresolvedName,
                class_name.location,
                format!("Class `{}` is not resolved.", class_name.name),
            );
            return unresolved(self.module.clone());
        };
        if function_name.name.is_empty() {
            return unresolved(class.module.clone());
        }
        let Some(signature) = class.function(&function_name.name) else {
            self.error(
                ErrorKind::UnresolvedName,
                function_name.location,
                format!("Class `{}` has no function `{}`.", class.name, function_name.name),
            );
            return unresolved(class.module.clone());
        };
        if !signature.is_public && !self.is_current_class(class) {
            self.error(
                ErrorKind::UnresolvedName,
                function_name.location,
                format!("Function `{}.{}` is private.", class.name, function_name.name),
            );
            return unresolved(class.module.clone());
        }
        Resolved::Generic(GenericCallee {
            location,
            kind: CalleeKind::ClassFunction {
                module: class.module.clone(),
                class_name: class_name.clone(),
                function_name: function_name.clone(),
            },
            type_parameters: signature.type_parameters.clone(),
            function_type: signature.function_type(),
        })
    }

    fn member_access(&mut self, location: Location, object: &Expression, name: &Id) -> Resolved {
        let object = self.infer(object, &Type::Unknown);
        let fallback = |object: Expression| {
            Resolved::Done(Expression {
                location,
                ty: Type::Unknown,
                kind: ExpressionKind::FieldAccess {
                    object: Box::new(object),
                    field_name: name.clone(),
                    field_order: 0,
                },
            })
        };
        if name.name.is_empty() {
            return fallback(object);
        }
        let nominal = match &object.ty {
            Type::Unknown => None,
            Type::Nominal(nominal) => Some(nominal.clone()),
            other => {
                self.error(
                    ErrorKind::UnresolvedName,
                    name.location,
                    format!("`{other}` has no member `{}`.", name.name),
                );
                None
            }
        };
        let Some(nominal) = nominal else {
            return fallback(object);
        };
        let interface = self.interface;
        let Some(class) = interface.class(&nominal.module, &nominal.name) else {
            return fallback(object);
        };
        let substitution = class.instantiation(&nominal.type_arguments);
        if let Some((field_order, field)) = class.field(&name.name) {
            if !field.is_public && !self.is_current_class(class) {
                self.error(
                    ErrorKind::UnresolvedName,
                    name.location,
                    format!("Field `{}` of `{}` is private.", name.name, class.name),
                );
                return fallback(object);
            }
            return Resolved::Done(Expression {
                location,
                ty: field.ty.substitute(&substitution),
                kind: ExpressionKind::FieldAccess {
                    object: Box::new(object),
                    field_name: name.clone(),
                    field_order,
                },
            });
        }
        if let Some(method) = class.method(&name.name) {
            if !method.is_public && !self.is_current_class(class) {
                self.error(
                    ErrorKind::UnresolvedName,
                    name.location,
                    format!("Method `{}` of `{}` is private.", name.name, class.name),
                );
                return fallback(object);
            }
            let function_type = match Type::Function(method.function_type()).substitute(&substitution) {
                Type::Function(function_type) => function_type,
                _ => method.function_type(),
            };
            return Resolved::Generic(GenericCallee {
                location,
                kind: CalleeKind::Method {
                    object: Box::new(object),
                    method_name: name.clone(),
                },
                type_parameters: method.type_parameters.clone(),
                function_type,
            });
        }
        self.error(
            ErrorKind::UnresolvedName,
            name.location,
            format!("`{}` has no member `{}`.", object.ty, name.name),
        );
        fallback(object)
    }

    /// Bind every unsolved parameter, reporting the ones without enough
    /// context, and return the arguments in declaration order.
    fn finish_solution(
        &mut self,
        location: Location,
        type_parameters: &[String],
        solution: &mut HashMap<String, Type>,
    ) -> Vec<Type> {
        let missing: Vec<&str> = type_parameters
            .iter()
            .filter(|p| !solution.contains_key(*p))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            self.error(
                ErrorKind::InsufficientTypeInferenceContext,
                location,
                format!(
                    "There is not enough context to infer type argument(s) {}.",
                    missing.join(", ")
                ),
            );
            for name in missing {
                solution.insert(name.to_string(), Type::Unknown);
            }
        }
        type_parameters
            .iter()
            .map(|p| solution.get(p).cloned().unwrap_or(Type::Unknown))
            .collect()
    }

    /// A generic member used as a value, not called.
    fn instantiate_value(&mut self, callee: GenericCallee, hint: &Type) -> Expression {
        let unsolved: BTreeSet<String> = callee.type_parameters.iter().cloned().collect();
        let mut solution = HashMap::new();
        let generic = Type::Function(callee.function_type.clone());
        if !unsolved.is_empty() {
            solve(&generic, hint, &unsolved, &mut solution);
        }
        let type_parameters = callee.type_parameters.clone();
        let type_arguments = self.finish_solution(callee.location, &type_parameters, &mut solution);
        let ty = generic.substitute(&solution);
        callee.into_expression(type_arguments, ty)
    }

    /// `parameter` with solved parameters substituted and unsolved ones
    /// replaced by `Unknown`.
    fn partial_hint(
        parameter: &Type,
        unsolved: &BTreeSet<String>,
        solution: &HashMap<String, Type>,
    ) -> Type {
        let mut substitution = solution.clone();
        for name in unsolved {
            substitution.entry(name.clone()).or_insert(Type::Unknown);
        }
        parameter.substitute(&substitution)
    }

    fn call(
        &mut self,
        location: Location,
        callee: &Expression,
        arguments: &[Expression],
        hint: &Type,
    ) -> Expression {
        let resolved = match &callee.kind {
            ExpressionKind::ClassFunction {
                class_name,
                function_name,
                ..
            } => self.class_function(callee.location, class_name, function_name),
            ExpressionKind::FieldAccess {
                object, field_name, ..
            } => self.member_access(callee.location, object, field_name),
            _ => Resolved::Done(self.infer(callee, &Type::Unknown)),
        };
        let callee = match resolved {
            Resolved::Generic(generic) => return self.generic_call(location, generic, arguments, hint),
            Resolved::Done(callee) => callee,
        };
        let (arguments, ty) = match callee.ty.clone() {
            Type::Function(function) => {
                let arguments = if arguments.len() == function.parameters.len() {
                    arguments
                        .iter()
                        .zip(&function.parameters)
                        .map(|(argument, parameter)| self.check(argument, parameter))
                        .collect()
                } else {
                    self.report_arity(location, function.parameters.len(), arguments.len());
                    self.infer_all(arguments)
                };
                (arguments, *function.return_type)
            }
            Type::Unknown => (self.infer_all(arguments), Type::Unknown),
            other => {
                self.error(
                    ErrorKind::TypeMismatch,
                    callee.location,
                    format!("Expected a function, found `{other}`."),
                );
                (self.infer_all(arguments), Type::Unknown)
            }
        };
        Expression {
            location,
            ty,
            kind: ExpressionKind::Call {
                callee: Box::new(callee),
                arguments,
            },
        }
    }

    fn report_arity(&mut self, location: Location, expected: usize, found: usize) {
        self.error(
            ErrorKind::ArityMismatch,
            location,
            format!("Expected {expected} argument(s), found {found}."),
        );
    }

    fn infer_all(&mut self, expressions: &[Expression]) -> Vec<Expression> {
        expressions
            .iter()
            .map(|e| self.infer(e, &Type::Unknown))
            .collect()
    }

    fn generic_call(
        &mut self,
        location: Location,
        callee: GenericCallee,
        arguments: &[Expression],
        hint: &Type,
    ) -> Expression {
        let unsolved: BTreeSet<String> = callee.type_parameters.iter().cloned().collect();
        let mut solution: HashMap<String, Type> = HashMap::new();
        let parameters = callee.function_type.parameters.clone();

        if arguments.len() != parameters.len() {
            self.report_arity(location, parameters.len(), arguments.len());
            let arguments = self.infer_all(arguments);
            for name in &unsolved {
                solution.insert(name.clone(), Type::Unknown);
            }
            let instantiated = Type::Function(callee.function_type.clone()).substitute(&solution);
            let ty = instantiated
                .as_function()
                .map_or(Type::Unknown, |f| (*f.return_type).clone());
            let type_arguments = vec![Type::Unknown; callee.type_parameters.len()];
            return Expression {
                location,
                ty,
                kind: ExpressionKind::Call {
                    callee: Box::new(callee.into_expression(type_arguments, instantiated)),
                    arguments,
                },
            };
        }

        if !unsolved.is_empty() {
            solve(&callee.function_type.return_type, hint, &unsolved, &mut solution);
        }
        let mut typed: Vec<Option<Expression>> = vec![None; arguments.len()];
        for deferred_pass in [false, true] {
            for (index, argument) in arguments.iter().enumerate() {
                if needs_context(argument) != deferred_pass {
                    continue;
                }
                let parameter = &parameters[index];
                let argument_hint = Self::partial_hint(parameter, &unsolved, &solution);
                let typed_argument = self.infer(argument, &argument_hint);
                if !unsolved.is_empty() {
                    solve(parameter, &typed_argument.ty, &unsolved, &mut solution);
                }
                typed[index] = Some(typed_argument);
            }
        }

        let type_parameters = callee.type_parameters.clone();
        let type_arguments = self.finish_solution(location, &type_parameters, &mut solution);
        let instantiated = Type::Function(callee.function_type.clone()).substitute(&solution);
        let (instantiated_parameters, return_type) = match &instantiated {
            Type::Function(function) => (function.parameters.clone(), (*function.return_type).clone()),
            _ => (parameters.clone(), Type::Unknown),
        };
        let arguments: Vec<Expression> = typed.into_iter().flatten().collect();
        for (argument, parameter) in arguments.iter().zip(&instantiated_parameters) {
            self.expect_assignable(&argument.ty, parameter, argument.location);
        }
        Expression {
            location,
            ty: return_type,
            kind: ExpressionKind::Call {
                callee: Box::new(callee.into_expression(type_arguments, instantiated)),
                arguments,
            },
        }
    }

    fn match_expression(
        &mut self,
        location: Location,
        scrutinee: &Expression,
        cases: &[MatchCase],
        hint: &Type,
    ) -> Expression {
        let scrutinee = self.infer(scrutinee, &Type::Unknown);
        let interface = self.interface;
        let mut variants = None;
        match &scrutinee.ty {
            Type::Unknown => {}
            Type::Nominal(nominal) => {
                if let Some(class) = interface.class(&nominal.module, &nominal.name) {
                    match class.variants() {
                        None => self.error(
                            ErrorKind::TypeMismatch,
                            scrutinee.location,
                            format!("Expected an enum class, found `{}`.", scrutinee.ty),
                        ),
                        Some(_) if class.module != *self.module => self.error(
                            ErrorKind::IllegalOtherClassMatch,
                            scrutinee.location,
                            format!(
                                "Cannot match on `{}` outside of module `{}`.",
                                class.name, class.module
                            ),
                        ),
                        Some(list) => {
                            variants = Some((list, class.instantiation(&nominal.type_arguments)));
                        }
                    }
                }
            }
            other => self.error(
                ErrorKind::TypeMismatch,
                scrutinee.location,
                format!("Expected an enum class, found `{other}`."),
            ),
        }

        let mut covered = BTreeSet::new();
        let mut typed_cases = Vec::with_capacity(cases.len());
        let mut first_type: Option<Type> = None;
        for case in cases {
            let (tag_order, binding_type) = match &variants {
                Some((list, substitution)) => {
                    match list.iter().enumerate().find(|(_, v)| v.name == case.tag.name) {
                        Some((order, variant)) => (order, variant.ty.substitute(substitution)),
                        None => {
                            self.error(
                                ErrorKind::UnresolvedName,
                                case.tag.location,
                                format!("`{}` has no tag `{}`.", scrutinee.ty, case.tag.name),
                            );
                            (0, Type::Unknown)
                        }
                    }
                }
                None => (0, Type::Unknown),
            };
            if !covered.insert(case.tag.name.clone()) {
                self.error(
                    ErrorKind::Collision,
                    case.tag.location,
                    format!("Tag `{}` is matched more than once.", case.tag.name),
                );
            }
            self.scopes.push(HashMap::new());
            if let Some(binding) = &case.binding {
                self.bind(binding, binding_type.clone());
            }
            let body = if !hint.is_unknown() {
                self.check(&case.body, hint)
            } else if let Some(first) = &first_type {
                let first = first.clone();
                self.check(&case.body, &first)
            } else {
                self.infer(&case.body, &Type::Unknown)
            };
            self.scopes.pop();
            if first_type.is_none() {
                first_type = Some(body.ty.clone());
            }
            typed_cases.push(MatchCase {
                location: case.location,
                tag: case.tag.clone(),
                tag_order,
                binding: case.binding.clone(),
                binding_type,
                body,
            });
        }

        if let Some((list, _)) = &variants {
            let missing: Vec<&str> = list
                .iter()
                .filter(|v| !covered.contains(&v.name))
                .map(|v| v.name.as_str())
                .collect();
            if !missing.is_empty() {
                self.error(
                    ErrorKind::NonExhaustiveMatch,
                    location,
                    format!("Missing tags: {}.", missing.join(", ")),
                );
            }
        }

        let types: Vec<Type> = typed_cases.iter().map(|c| c.body.ty.clone()).collect();
        let ty = self.merge(&types, hint);
        Expression {
            location,
            ty,
            kind: ExpressionKind::Match {
                scrutinee: Box::new(scrutinee),
                cases: typed_cases,
            },
        }
    }

    fn lambda(
        &mut self,
        location: Location,
        parameters: &[LambdaParameter],
        body: &Expression,
        hint: &Type,
    ) -> Expression {
        let hinted = hint
            .as_function()
            .filter(|f| f.parameters.len() == parameters.len())
            .cloned();
        self.scopes.push(HashMap::new());
        let mut typed_parameters = Vec::with_capacity(parameters.len());
        for (index, parameter) in parameters.iter().enumerate() {
            let ty = match &parameter.annotation {
                Some(annotation) => self.resolve_annotation(annotation),
                None => match hinted.as_ref().map(|f| &f.parameters[index]) {
                    Some(ty) if !ty.is_unknown() => ty.clone(),
                    _ => {
                        self.error(
                            ErrorKind::InsufficientTypeInferenceContext,
                            parameter.name.location,
                            format!("Cannot infer the type of parameter `{}`.", parameter.name.name),
                        );
                        Type::Unknown
                    }
                },
            };
            self.bind(&parameter.name, ty.clone());
            typed_parameters.push(LambdaParameter {
                name: parameter.name.clone(),
                annotation: parameter.annotation.clone(),
                ty,
            });
        }
        let expected_return = hinted.map_or(Type::Unknown, |f| *f.return_type);
        let body = if expected_return.is_unknown() {
            self.infer(body, &Type::Unknown)
        } else {
            self.check(body, &expected_return)
        };
        self.scopes.pop();
        let return_type = self.merge(std::slice::from_ref(&body.ty), &expected_return);
        let ty = Type::function(
            typed_parameters.iter().map(|p| p.ty.clone()).collect(),
            return_type,
        );
        Expression {
            location,
            ty,
            kind: ExpressionKind::Lambda {
                parameters: typed_parameters,
                body: Box::new(body),
            },
        }
    }

    fn block(
        &mut self,
        location: Location,
        statements: &[Statement],
        result: Option<&Expression>,
        hint: &Type,
    ) -> Expression {
        self.scopes.push(HashMap::new());
        let mut typed_statements = Vec::with_capacity(statements.len());
        for statement in statements {
            let annotated = statement
                .annotation
                .as_ref()
                .map(|annotation| self.resolve_annotation(annotation));
            let assigned = match &annotated {
                Some(ty) => self.check(&statement.assigned, ty),
                None => self.infer(&statement.assigned, &Type::Unknown),
            };
            let declared = annotated.clone().unwrap_or_else(|| assigned.ty.clone());
            let pattern = self.bind_pattern(&statement.pattern, &declared);
            typed_statements.push(Statement {
                location: statement.location,
                pattern,
                annotation: statement.annotation.clone().map(|annotation| Annotation {
                    ty: declared.clone(),
                    ..annotation
                }),
                assigned,
            });
        }
        let result = result.map(|result| Box::new(self.infer(result, hint)));
        self.scopes.pop();
        let ty = result.as_ref().map_or(Type::UNIT, |r| r.ty.clone());
        Expression {
            location,
            ty,
            kind: ExpressionKind::Block {
                statements: typed_statements,
                result,
            },
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, ty: &Type) -> Pattern {
        match pattern {
            Pattern::Id(id) => {
                self.bind(id, ty.clone());
                pattern.clone()
            }
            Pattern::Wildcard(_) => pattern.clone(),
            Pattern::Object {
                location,
                destructured,
            } => {
                let interface = self.interface;
                let class = match ty {
                    Type::Nominal(nominal) => interface
                        .class(&nominal.module, &nominal.name)
                        .filter(|class| class.is_struct())
                        .map(|class| (class, class.instantiation(&nominal.type_arguments))),
                    _ => None,
                };
                if class.is_none() && !ty.is_unknown() {
                    self.error(
                        ErrorKind::TypeMismatch,
                        *location,
                        format!("Expected a struct class, found `{ty}`."),
                    );
                }
                let mut items = Vec::with_capacity(destructured.len());
                for item in destructured {
                    let (field_order, field_type) = match &class {
                        Some((class, substitution)) => match class.field(&item.field.name) {
                            Some((order, field)) if field.is_public || self.is_current_class(class) => {
                                (order, field.ty.substitute(substitution))
                            }
                            Some(_) => {
                                self.error(
                                    ErrorKind::UnresolvedName,
                                    item.field.location,
                                    format!("Field `{}` of `{}` is private.", item.field.name, class.name),
                                );
                                (0, Type::Unknown)
                            }
                            None => {
                                self.error(
                                    ErrorKind::UnresolvedName,
                                    item.field.location,
                                    format!("`{}` has no field `{}`.", class.name, item.field.name),
                                );
                                (0, Type::Unknown)
                            }
                        },
                        None => (0, Type::Unknown),
                    };
                    self.bind(item.binding(), field_type.clone());
                    items.push(ObjectPatternItem {
                        field: item.field.clone(),
                        field_order,
                        alias: item.alias.clone(),
                        ty: field_type,
                    });
                }
                Pattern::Object {
                    location: *location,
                    destructured: items,
                }
            }
        }
    }
}

/// Arguments typed only after every other argument has been seen:
/// lambdas with at least one unannotated parameter.
fn needs_context(argument: &Expression) -> bool {
    match &argument.kind {
        ExpressionKind::Lambda { parameters, .. } => {
            parameters.iter().any(|p| p.annotation.is_none())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn check_sources(sources: &[(&str, &str)]) -> TypeCheckOutput {
        let mut diagnostics = Diagnostics::new();
        let modules: BTreeMap<_, _> = sources
            .iter()
            .map(|(name, source)| {
                let reference = ModuleReference::from_dotted(name);
                let module = parse_module(&reference, source, &mut diagnostics);
                (reference, module)
            })
            .collect();
        assert!(diagnostics.is_empty(), "{diagnostics}");
        type_check(&modules)
    }

    fn kinds(source: &str) -> Vec<ErrorKind> {
        check_sources(&[("", source)])
            .diagnostics
            .iter()
            .map(|d| d.kind)
            .collect()
    }

    const OPTION: &str = "class Opt<T>(None(unit), Some(T)) {
  function <T> unwrapOr(o: Opt<T>, d: T): T = match (o) { | None _ -> d | Some v -> v }
  method isSome(): bool = match (this) { | None _ -> false | Some _ -> true }
}
";

    #[test]
    fn reports_a_single_mismatch_for_a_wrong_return() {
        let output = check_sources(&[("", "class Main { function main(): int = \"haha\" }")]);
        assert_eq!(output.diagnostics.len(), 1, "{}", output.diagnostics);
        let diagnostic = output.diagnostics.iter().next().expect("diagnostic");
        assert_eq!(diagnostic.kind, ErrorKind::TypeMismatch);
        assert_eq!(diagnostic.message, "Expected `int`, found `string`.");
    }

    #[test]
    fn infers_generic_calls() {
        let source = format!(
            "{OPTION}class Main {{ function main(): int = Opt.unwrapOr(Opt.Some(3), 4) }}"
        );
        let output = check_sources(&[("", &source)]);
        assert!(output.diagnostics.is_empty(), "{}", output.diagnostics);
        let main = &output.modules[&ModuleReference::root()].classes[1].members[0];
        let ExpressionKind::Call { callee, .. } = &main.body.kind else {
            panic!("expected a call, found {:?}", main.body.kind);
        };
        let ExpressionKind::ClassFunction { type_arguments, .. } = &callee.kind else {
            panic!("expected a class function");
        };
        assert_eq!(type_arguments, &vec![Type::INT]);
    }

    #[test]
    fn infers_lambda_parameters_from_context() {
        let source = "class Main {
  function <A, B> apply(f: (A) -> B, x: A): B = f(x)
  function main(): int = Main.apply((x) -> x + 1, 2)
}";
        assert!(kinds(source).is_empty());
    }

    #[test]
    fn methods_resolve_through_field_syntax() {
        let source = format!(
            "{OPTION}class Main {{ function main(): bool = Opt.Some(true).isSome() }}"
        );
        let output = check_sources(&[("", &source)]);
        assert!(output.diagnostics.is_empty(), "{}", output.diagnostics);
    }

    #[test]
    fn requires_context_for_unsolved_type_arguments() {
        assert_eq!(
            kinds("class Main { function main(): unit = { val x = Builtins.panic(\"no\"); } }"),
            vec![ErrorKind::InsufficientTypeInferenceContext]
        );
        assert_eq!(
            kinds("class Main { function main(): unit = { val f = (x) -> x; } }"),
            vec![ErrorKind::InsufficientTypeInferenceContext]
        );
    }

    #[test]
    fn reports_non_exhaustive_and_foreign_matches() {
        let source = format!(
            "{OPTION}class Main {{ function f(o: Opt<int>): int = match (o) {{ | Some v -> v }} }}"
        );
        let output = check_sources(&[("", &source)]);
        let kinds: Vec<_> = output.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::NonExhaustiveMatch]);

        let output = check_sources(&[
            ("opt", OPTION),
            (
                "main",
                "import { Opt } from opt\nclass Main { function f(o: Opt<int>): int = match (o) { | None _ -> 0 | Some v -> v } }",
            ),
        ]);
        let kinds: Vec<_> = output.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::IllegalOtherClassMatch]);
    }

    #[test]
    fn enforces_privacy_outside_the_class() {
        let source = "class A(private val x: int) { method get(): int = this.x }
class B { function f(a: A): int = a.x }";
        assert_eq!(kinds(source), vec![ErrorKind::UnresolvedName]);
    }

    #[test]
    fn rejects_shadowing() {
        assert_eq!(
            kinds("class A { function f(x: int): int = { val x = 1; x } }"),
            vec![ErrorKind::Collision]
        );
    }

    #[test]
    fn rejects_this_in_functions_and_unknown_names() {
        assert_eq!(
            kinds("class A { function f(): int = this }"),
            vec![ErrorKind::UnresolvedName]
        );
        assert_eq!(
            kinds("class A { function f(): int = y }"),
            vec![ErrorKind::UnresolvedName]
        );
    }

    #[test]
    fn reports_arity_mismatches() {
        assert_eq!(
            kinds("class A { function g(a: int): int = a function f(): int = A.g(1, 2) }"),
            vec![ErrorKind::ArityMismatch]
        );
    }

    #[test]
    fn destructures_structs() {
        let source = "class P(val x: int, val y: int) {}
class Main { function f(p: P): int = { val { x, y as z } = p; x + z } }";
        assert!(kinds(source).is_empty());
    }

    #[test]
    fn if_branches_are_checked_once() {
        assert_eq!(
            kinds("class A { function f(b: bool): int = if b then 1 else \"x\" }"),
            vec![ErrorKind::TypeMismatch]
        );
    }
}
