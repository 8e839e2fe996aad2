//! Typed AST → HIR.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{
    BinaryOperator, ClassDefinition, ClassMember, Expression, ExpressionKind, LambdaParameter,
    Literal, MatchCase, Module, Pattern, Statement, TypeDefinition, UnaryOperator,
};
use crate::builtins::{BUILTINS_CLASS, Builtin};
use crate::error::CoreError;
use crate::hir::{HirCallee, HirExpr, HirFunction, HirProgram, HirTypeDefinition};
use crate::interface::{GlobalInterface, STRUCT_CONSTRUCTOR, TypeDefinitionInfo};
use crate::mir::BinaryOp;
use crate::span::ModuleReference;
use crate::types::Type;

/// Name of the class the entry point lives in.
pub const MAIN_CLASS: &str = "Main";
pub const MAIN_FUNCTION: &str = "main";

const CONTEXT: &str = "$context";
const THIS: &str = "this";

/// Symbol of a class member. Generated functions append `.suffix`,
/// which no source identifier can contain.
pub fn function_name(module: &ModuleReference, class: &str, member: &str) -> String {
    if module.is_root() {
        format!("_{class}_{member}")
    } else {
        format!("_{}_{class}_{member}", module.encoded())
    }
}

/// Name of the heap record laid out for a class.
pub fn record_name(module: &ModuleReference, class: &str) -> String {
    if module.is_root() {
        format!("_{class}")
    } else {
        format!("_{}_{class}", module.encoded())
    }
}

/// Lower checked modules. The input must be free of diagnostics; any
/// leftover placeholder type is reported as malformed IR.
pub fn lower_program(
    modules: &BTreeMap<ModuleReference, Module>,
    interface: &GlobalInterface,
) -> Result<HirProgram, CoreError> {
    let mut lowering = ProgramLowering {
        interface,
        program: HirProgram::default(),
        wrappers: BTreeSet::new(),
    };
    for (reference, module) in modules {
        for class in &module.classes {
            lowering.class(reference, class)?;
        }
    }
    lowering.program.main_function = modules.iter().find_map(|(reference, module)| {
        let class = module.find_class(MAIN_CLASS)?;
        class
            .members
            .iter()
            .any(|m| !m.is_method && m.name.name == MAIN_FUNCTION && m.parameters.is_empty())
            .then(|| function_name(reference, MAIN_CLASS, MAIN_FUNCTION))
    });
    tracing::debug!(
        functions = lowering.program.functions.len(),
        "lowered to HIR"
    );
    Ok(lowering.program)
}

struct ProgramLowering<'a> {
    interface: &'a GlobalInterface,
    program: HirProgram,
    wrappers: BTreeSet<String>,
}

impl ProgramLowering<'_> {
    fn class(&mut self, module: &ModuleReference, class: &ClassDefinition) -> Result<(), CoreError> {
        let record = record_name(module, &class.name.name);
        match &class.type_definition {
            Some(TypeDefinition::Struct { fields, .. }) => {
                self.program.type_definitions.push(HirTypeDefinition {
                    name: record,
                    fields: fields.iter().map(|f| f.name.name.clone()).collect(),
                });
            }
            Some(TypeDefinition::Enum { .. }) => {
                self.program.type_definitions.push(HirTypeDefinition {
                    name: record,
                    fields: vec!["tag".to_string(), "payload".to_string()],
                });
            }
            None => {}
        }
        for member in &class.members {
            self.member(module, &class.name.name, member)?;
        }
        Ok(())
    }

    fn member(
        &mut self,
        module: &ModuleReference,
        class: &str,
        member: &ClassMember,
    ) -> Result<(), CoreError> {
        let name = function_name(module, class, &member.name.name);
        let mut parameters = Vec::with_capacity(member.parameters.len() + 1);
        if member.is_method {
            parameters.push(THIS.to_string());
        }
        parameters.extend(member.parameters.iter().map(|p| p.name.name.clone()));
        let body = FunctionLowering::new(self, name.clone()).expression(&member.body)?;
        self.program.functions.push(HirFunction {
            name,
            parameters,
            body,
        });
        Ok(())
    }

    /// Direct use of a class function, inlining constructors.
    fn call_class_function(
        &self,
        current: &str,
        module: &ModuleReference,
        class: &str,
        function: &str,
        mut arguments: Vec<HirExpr>,
    ) -> Result<HirExpr, CoreError> {
        if *module == ModuleReference::builtins() && class == BUILTINS_CLASS {
            let builtin = Builtin::from_member(function).ok_or_else(|| {
                CoreError::malformed(current, format!("unknown builtin `{function}`"))
            })?;
            return Ok(HirExpr::Call {
                callee: HirCallee::Builtin(builtin),
                arguments,
            });
        }
        let interface = self
            .interface
            .class(module, class)
            .ok_or_else(|| CoreError::malformed(current, format!("unknown class `{class}`")))?;
        let record = record_name(module, class);
        match &interface.type_definition {
            Some(TypeDefinitionInfo::Struct(_)) if function == STRUCT_CONSTRUCTOR => {
                Ok(HirExpr::StructInit {
                    type_name: record,
                    fields: arguments,
                })
            }
            Some(TypeDefinitionInfo::Enum(variants))
                if variants.iter().any(|v| v.name == function) =>
            {
                let tag = variants.iter().position(|v| v.name == function).unwrap_or(0);
                let payload = arguments.pop().unwrap_or(HirExpr::Int(0));
                Ok(HirExpr::StructInit {
                    type_name: record,
                    fields: vec![HirExpr::Int(tag as i32), payload],
                })
            }
            _ => Ok(HirExpr::Call {
                callee: HirCallee::Function(function_name(module, class, function)),
                arguments,
            }),
        }
    }

    /// A class function used as a value: a closure over a generated
    /// wrapper that ignores its context.
    fn function_value(
        &mut self,
        current: &str,
        module: &ModuleReference,
        class: &str,
        function: &str,
    ) -> Result<HirExpr, CoreError> {
        let wrapper = format!("{}.value", function_name(module, class, function));
        if self.wrappers.insert(wrapper.clone()) {
            let arity = self
                .interface
                .class(module, class)
                .and_then(|c| c.function(function))
                .map(|f| f.parameters.len())
                .ok_or_else(|| {
                    CoreError::malformed(current, format!("unknown function `{class}.{function}`"))
                })?;
            let names: Vec<String> = (0..arity).map(|i| format!("$argument{i}")).collect();
            let arguments = names.iter().map(|n| HirExpr::Variable(n.clone())).collect();
            let body = self.call_class_function(current, module, class, function, arguments)?;
            let mut parameters = vec![CONTEXT.to_string()];
            parameters.extend(names);
            self.program.functions.push(HirFunction {
                name: wrapper.clone(),
                parameters,
                body,
            });
        }
        Ok(HirExpr::Closure {
            function: wrapper,
            context: Box::new(HirExpr::Int(0)),
        })
    }
}

struct FunctionLowering<'p, 'a> {
    program: &'p mut ProgramLowering<'a>,
    name: String,
    counter: usize,
}

impl<'p, 'a> FunctionLowering<'p, 'a> {
    fn new(program: &'p mut ProgramLowering<'a>, name: String) -> Self {
        FunctionLowering {
            program,
            name,
            counter: 0,
        }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("${prefix}{}", self.counter);
        self.counter += 1;
        name
    }

    fn method_name(&self, object: &Expression, method: &str) -> Result<String, CoreError> {
        match &object.ty {
            Type::Nominal(nominal) => Ok(function_name(&nominal.module, &nominal.name, method)),
            other => Err(CoreError::malformed(
                &self.name,
                format!("method `{method}` accessed on `{other}`"),
            )),
        }
    }

    fn expressions(&mut self, expressions: &[Expression]) -> Result<Vec<HirExpr>, CoreError> {
        expressions.iter().map(|e| self.expression(e)).collect()
    }

    fn expression(&mut self, expression: &Expression) -> Result<HirExpr, CoreError> {
        Ok(match &expression.kind {
            ExpressionKind::Literal(Literal::Int(value)) => HirExpr::Int(*value),
            ExpressionKind::Literal(Literal::Bool(value)) => HirExpr::Int(i32::from(*value)),
            ExpressionKind::Literal(Literal::String(value)) => HirExpr::String(value.clone()),
            ExpressionKind::This => HirExpr::Variable(THIS.to_string()),
            ExpressionKind::Variable(name) => HirExpr::Variable(name.clone()),
            ExpressionKind::ClassFunction {
                module,
                class_name,
                function_name,
                ..
            } => {
                let current = self.name.clone();
                self.program
                    .function_value(&current, module, &class_name.name, &function_name.name)?
            }
            ExpressionKind::FieldAccess {
                object,
                field_order,
                ..
            } => HirExpr::index(self.expression(object)?, *field_order),
            ExpressionKind::MethodAccess {
                object,
                method_name,
                ..
            } => {
                // Methods take `this` first, so the object is the context.
                let function = self.method_name(object, &method_name.name)?;
                HirExpr::Closure {
                    function,
                    context: Box::new(self.expression(object)?),
                }
            }
            ExpressionKind::Unary { operator, operand } => {
                let operand = self.expression(operand)?;
                match operator {
                    UnaryOperator::Not => HirExpr::binary(BinaryOp::Xor, operand, HirExpr::Int(1)),
                    UnaryOperator::Neg => HirExpr::binary(BinaryOp::Sub, HirExpr::Int(0), operand),
                }
            }
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs = self.expression(lhs)?;
                let rhs = self.expression(rhs)?;
                binary(*operator, lhs, rhs)
            }
            ExpressionKind::Call { callee, arguments } => self.call(callee, arguments)?,
            ExpressionKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => HirExpr::if_else(
                self.expression(condition)?,
                self.expression(then_branch)?,
                self.expression(else_branch)?,
            ),
            ExpressionKind::Match { scrutinee, cases } => self.match_expression(scrutinee, cases)?,
            ExpressionKind::Lambda { parameters, body } => self.lambda(parameters, body)?,
            ExpressionKind::Block { statements, result } => {
                self.block(statements, result.as_deref())?
            }
        })
    }

    fn call(&mut self, callee: &Expression, arguments: &[Expression]) -> Result<HirExpr, CoreError> {
        match &callee.kind {
            ExpressionKind::ClassFunction {
                module,
                class_name,
                function_name,
                ..
            } => {
                let arguments = self.expressions(arguments)?;
                self.program.call_class_function(
                    &self.name,
                    module,
                    &class_name.name,
                    &function_name.name,
                    arguments,
                )
            }
            ExpressionKind::MethodAccess {
                object,
                method_name,
                ..
            } => {
                let function = self.method_name(object, &method_name.name)?;
                let mut lowered = vec![self.expression(object)?];
                lowered.extend(self.expressions(arguments)?);
                Ok(HirExpr::Call {
                    callee: HirCallee::Function(function),
                    arguments: lowered,
                })
            }
            _ => {
                let closure = self.expression(callee)?;
                Ok(HirExpr::Call {
                    callee: HirCallee::Closure(Box::new(closure)),
                    arguments: self.expressions(arguments)?,
                })
            }
        }
    }

    fn match_expression(
        &mut self,
        scrutinee: &Expression,
        cases: &[MatchCase],
    ) -> Result<HirExpr, CoreError> {
        let scrutinee = self.expression(scrutinee)?;
        let value = self.fresh("match");
        let tag = self.fresh("tag");
        let mut bodies = Vec::with_capacity(cases.len());
        for case in cases {
            let body = self.expression(&case.body)?;
            let body = match &case.binding {
                Some(binding) => HirExpr::let_in(
                    binding.name.clone(),
                    HirExpr::index(HirExpr::Variable(value.clone()), 1),
                    body,
                ),
                None => body,
            };
            bodies.push((case.tag_order, body));
        }
        let mut chain = match bodies.pop() {
            Some((_, last)) => last,
            None => HirExpr::Int(0),
        };
        while let Some((order, body)) = bodies.pop() {
            let test = HirExpr::binary(
                BinaryOp::Eq,
                HirExpr::Variable(tag.clone()),
                HirExpr::Int(order as i32),
            );
            chain = HirExpr::if_else(test, body, chain);
        }
        Ok(HirExpr::let_in(
            value.clone(),
            scrutinee,
            HirExpr::let_in(tag, HirExpr::index(HirExpr::Variable(value), 0), chain),
        ))
    }

    fn lambda(
        &mut self,
        parameters: &[LambdaParameter],
        body: &Expression,
    ) -> Result<HirExpr, CoreError> {
        let name = format!("{}.lambda{}", self.name, self.counter);
        self.counter += 1;
        let bound: BTreeSet<String> = parameters.iter().map(|p| p.name.name.clone()).collect();
        let mut captures = BTreeSet::new();
        free_variables(body, &bound, &mut captures);
        let captures: Vec<String> = captures.into_iter().collect();

        let inner = FunctionLowering::new(&mut *self.program, name.clone()).expression(body)?;
        let body = captures
            .iter()
            .enumerate()
            .rev()
            .fold(inner, |body, (index, capture)| {
                HirExpr::let_in(
                    capture.clone(),
                    HirExpr::index(HirExpr::Variable(CONTEXT.to_string()), index),
                    body,
                )
            });
        let mut lambda_parameters = vec![CONTEXT.to_string()];
        lambda_parameters.extend(parameters.iter().map(|p| p.name.name.clone()));
        self.program.program.functions.push(HirFunction {
            name: name.clone(),
            parameters: lambda_parameters,
            body,
        });

        let context = if captures.is_empty() {
            HirExpr::Int(0)
        } else {
            let record = format!("{name}.context");
            self.program.program.type_definitions.push(HirTypeDefinition {
                name: record.clone(),
                fields: captures.clone(),
            });
            HirExpr::StructInit {
                type_name: record,
                fields: captures.into_iter().map(HirExpr::Variable).collect(),
            }
        };
        Ok(HirExpr::Closure {
            function: name,
            context: Box::new(context),
        })
    }

    fn block(&mut self, statements: &[Statement], result: Option<&Expression>) -> Result<HirExpr, CoreError> {
        let mut bindings: Vec<(String, HirExpr)> = Vec::new();
        for statement in statements {
            let value = self.expression(&statement.assigned)?;
            match &statement.pattern {
                Pattern::Id(id) => bindings.push((id.name.clone(), value)),
                Pattern::Wildcard(_) => {
                    let name = self.fresh("unused");
                    bindings.push((name, value));
                }
                Pattern::Object { destructured, .. } => {
                    let record = self.fresh("destructured");
                    bindings.push((record.clone(), value));
                    for item in destructured {
                        bindings.push((
                            item.binding().name.clone(),
                            HirExpr::index(HirExpr::Variable(record.clone()), item.field_order),
                        ));
                    }
                }
            }
        }
        let mut body = match result {
            Some(result) => self.expression(result)?,
            None => HirExpr::Int(0),
        };
        while let Some((name, value)) = bindings.pop() {
            body = HirExpr::let_in(name, value, body);
        }
        Ok(body)
    }
}

fn binary(operator: BinaryOperator, lhs: HirExpr, rhs: HirExpr) -> HirExpr {
    let op = match operator {
        BinaryOperator::Mul => BinaryOp::Mul,
        BinaryOperator::Div => BinaryOp::Div,
        BinaryOperator::Mod => BinaryOp::Mod,
        BinaryOperator::Add => BinaryOp::Add,
        BinaryOperator::Sub => BinaryOp::Sub,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::Le => BinaryOp::Le,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::Ge => BinaryOp::Ge,
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::Ne => BinaryOp::Ne,
        BinaryOperator::Concat => {
            return HirExpr::Call {
                callee: HirCallee::Builtin(Builtin::StringConcat),
                arguments: vec![lhs, rhs],
            };
        }
        BinaryOperator::And => return HirExpr::if_else(lhs, rhs, HirExpr::Int(0)),
        BinaryOperator::Or => return HirExpr::if_else(lhs, HirExpr::Int(1), rhs),
    };
    HirExpr::binary(op, lhs, rhs)
}

/// Names used in `expression` but not bound inside it or in `bound`.
/// `this` counts as a name.
fn free_variables(expression: &Expression, bound: &BTreeSet<String>, free: &mut BTreeSet<String>) {
    match &expression.kind {
        ExpressionKind::This => {
            if !bound.contains(THIS) {
                free.insert(THIS.to_string());
            }
        }
        ExpressionKind::Variable(name) => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        ExpressionKind::Lambda { parameters, body } => {
            let mut inner = bound.clone();
            inner.extend(parameters.iter().map(|p| p.name.name.clone()));
            free_variables(body, &inner, free);
        }
        ExpressionKind::Match { scrutinee, cases } => {
            free_variables(scrutinee, bound, free);
            for case in cases {
                let mut inner = bound.clone();
                if let Some(binding) = &case.binding {
                    inner.insert(binding.name.clone());
                }
                free_variables(&case.body, &inner, free);
            }
        }
        ExpressionKind::Block { statements, result } => {
            let mut inner = bound.clone();
            for statement in statements {
                free_variables(&statement.assigned, &inner, free);
                match &statement.pattern {
                    Pattern::Id(id) => {
                        inner.insert(id.name.clone());
                    }
                    Pattern::Wildcard(_) => {}
                    Pattern::Object { destructured, .. } => {
                        inner.extend(destructured.iter().map(|item| item.binding().name.clone()));
                    }
                }
            }
            if let Some(result) = result {
                free_variables(result, &inner, free);
            }
        }
        _ => {
            for child in expression.children() {
                free_variables(child, bound, free);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostics;
    use crate::parser::parse_module;
    use crate::typecheck::type_check;

    fn lower(source: &str) -> HirProgram {
        let module = ModuleReference::root();
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_module(&module, source, &mut diagnostics);
        let mut modules = BTreeMap::new();
        modules.insert(module, parsed);
        let checked = type_check(&modules);
        assert!(diagnostics.is_empty() && checked.diagnostics.is_empty(), "{}", checked.diagnostics);
        lower_program(&checked.modules, &checked.interface).expect("lowering")
    }

    #[test]
    fn methods_become_direct_calls_with_this_first() {
        let program = lower(
            "class P(val x: int) { method get(): int = this.x }
class Main { function main(): int = P.init(4).get() }",
        );
        assert_eq!(program.main_function.as_deref(), Some("_Main_main"));
        let get = program.function("_P_get").expect("method");
        assert_eq!(get.parameters, vec!["this".to_string()]);
        assert_eq!(get.body, HirExpr::index(HirExpr::Variable("this".into()), 0));
        let main = program.function("_Main_main").expect("main");
        assert_eq!(
            main.body,
            HirExpr::Call {
                callee: HirCallee::Function("_P_get".into()),
                arguments: vec![HirExpr::StructInit {
                    type_name: "_P".into(),
                    fields: vec![HirExpr::Int(4)],
                }],
            }
        );
    }

    #[test]
    fn lambdas_capture_free_variables_in_a_record() {
        let program = lower(
            "class Main { function main(): int = { val a = 1; val f = (x: int) -> x + a; f(2) } }",
        );
        let lambda = program.function("_Main_main.lambda0").expect("lambda");
        assert_eq!(lambda.parameters, vec!["$context".to_string(), "x".to_string()]);
        assert_eq!(
            lambda.body,
            HirExpr::let_in(
                "a",
                HirExpr::index(HirExpr::Variable("$context".into()), 0),
                HirExpr::binary(BinaryOp::Add, HirExpr::Variable("x".into()), HirExpr::Variable("a".into())),
            )
        );
        let main = program.function("_Main_main").expect("main").body.to_string();
        assert!(main.contains("closure(_Main_main.lambda0, _Main_main.lambda0.context{a})"), "{main}");
    }

    #[test]
    fn matches_become_tag_tests() {
        let program = lower(
            "class O(N(unit), S(int)) { function get(o: O): int = match (o) { | N _ -> 0 | S v -> v } }",
        );
        let get = program.function("_O_get").expect("get");
        assert_eq!(
            get.body.to_string(),
            "(let $match0 = o in (let $tag1 = $match0[0] in (if ($tag1 == 0) then 0 else (let v = $match0[1] in v))))"
        );
    }

    #[test]
    fn class_functions_as_values_get_wrappers() {
        let program = lower(
            "class Main {
  function inc(x: int): int = x + 1
  function apply(f: (int) -> int): int = f(1)
  function main(): int = Main.apply(Main.inc)
}",
        );
        let wrapper = program.function("_Main_inc.value").expect("wrapper");
        assert_eq!(wrapper.parameters, vec!["$context".to_string(), "$argument0".to_string()]);
    }
}
