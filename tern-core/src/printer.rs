//! Canonical source printer and formatter.

use crate::ast::{
    ClassDefinition, ClassMember, Expression, ExpressionKind, Literal, Module, Pattern,
    TypeDefinition,
};
use crate::diagnostic::Diagnostics;
use crate::parser::parse_module;
use crate::span::ModuleReference;

const INDENT: usize = 2;

/// Binding strength of postfix expressions and primaries.
const POSTFIX: u8 = 9;
const UNARY: u8 = 8;

/// Reformat a source file. Sources with syntax errors come back
/// unchanged.
///
/// The output is printed from the syntax tree, which does not keep
/// comments, so a formatted file has none.
pub fn format_source(source: &str) -> String {
    let mut diagnostics = Diagnostics::new();
    let module = parse_module(&ModuleReference::root(), source, &mut diagnostics);
    if !diagnostics.is_empty() {
        return source.to_string();
    }
    print_module(&module)
}

pub fn print_module(module: &Module) -> String {
    let mut printer = Printer::new();
    printer.module(module);
    printer.output
}

pub fn print_expression(expression: &Expression) -> String {
    let mut printer = Printer::new();
    printer.expression(expression);
    printer.output
}

struct Printer {
    output: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Printer {
            output: String::new(),
            indent: 0,
        }
    }

    fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn newline(&mut self) {
        self.output.push('\n');
        for _ in 0..self.indent {
            self.output.push(' ');
        }
    }

    fn module(&mut self, module: &Module) {
        for import in &module.imports {
            let names: Vec<&str> = import
                .imported_members
                .iter()
                .map(|m| m.name.as_str())
                .collect();
            self.write(&format!(
                "import {{ {} }} from {}\n",
                names.join(", "),
                import.imported_module
            ));
        }
        for (index, class) in module.classes.iter().enumerate() {
            if index > 0 || !module.imports.is_empty() {
                self.write("\n");
            }
            self.class(class);
            self.write("\n");
        }
    }

    fn class(&mut self, class: &ClassDefinition) {
        if !class.is_public {
            self.write("private ");
        }
        self.write("class ");
        self.write(&class.name.name);
        self.type_parameters(class.type_parameters.iter().map(|p| p.name.as_str()));
        match &class.type_definition {
            Some(TypeDefinition::Struct { fields, .. }) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|field| {
                        format!(
                            "{}val {}: {}",
                            if field.is_public { "" } else { "private " },
                            field.name.name,
                            field.annotation.ty
                        )
                    })
                    .collect();
                self.write(&format!("({})", fields.join(", ")));
            }
            Some(TypeDefinition::Enum { variants, .. }) => {
                let variants: Vec<String> = variants
                    .iter()
                    .map(|variant| format!("{}({})", variant.name.name, variant.annotation.ty))
                    .collect();
                self.write(&format!("({})", variants.join(", ")));
            }
            None => {}
        }
        if class.members.is_empty() {
            return;
        }
        self.write(" {");
        self.indent += INDENT;
        for (index, member) in class.members.iter().enumerate() {
            if index > 0 {
                self.write("\n");
            }
            self.newline();
            self.member(member);
        }
        self.indent -= INDENT;
        self.newline();
        self.write("}");
    }

    fn type_parameters<'a>(&mut self, names: impl Iterator<Item = &'a str>) {
        let names: Vec<&str> = names.collect();
        if !names.is_empty() {
            self.write(&format!("<{}>", names.join(", ")));
        }
    }

    fn member(&mut self, member: &ClassMember) {
        if !member.is_public {
            self.write("private ");
        }
        self.write(if member.is_method { "method " } else { "function " });
        if !member.type_parameters.is_empty() {
            self.type_parameters(member.type_parameters.iter().map(|p| p.name.as_str()));
            self.write(" ");
        }
        let parameters: Vec<String> = member
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name.name, p.annotation.ty))
            .collect();
        self.write(&format!(
            "{}({}): {} = ",
            member.name.name,
            parameters.join(", "),
            member.return_type.ty
        ));
        self.expression(&member.body);
    }

    fn operand(&mut self, expression: &Expression, parenthesize: bool) {
        if parenthesize {
            self.write("(");
            self.expression(expression);
            self.write(")");
        } else {
            self.expression(expression);
        }
    }

    fn expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Literal(literal) => self.literal(literal),
            ExpressionKind::This => self.write("this"),
            ExpressionKind::Variable(name) => self.write(name),
            ExpressionKind::ClassFunction {
                class_name,
                function_name,
                ..
            } => self.write(&format!("{}.{}", class_name.name, function_name.name)),
            ExpressionKind::FieldAccess {
                object,
                field_name: name,
                ..
            }
            | ExpressionKind::MethodAccess {
                object,
                method_name: name,
                ..
            } => {
                self.operand(object, binding_power(object) < POSTFIX);
                self.write(".");
                self.write(&name.name);
            }
            ExpressionKind::Unary { operator, operand } => {
                self.write(operator.symbol());
                self.operand(operand, binding_power(operand) < UNARY);
            }
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let precedence = operator.precedence();
                self.operand(lhs, binding_power(lhs) < precedence);
                self.write(&format!(" {} ", operator.symbol()));
                self.operand(rhs, binding_power(rhs) <= precedence);
            }
            ExpressionKind::Call { callee, arguments } => {
                self.operand(callee, binding_power(callee) < POSTFIX);
                self.write("(");
                for (index, argument) in arguments.iter().enumerate() {
                    if index > 0 {
                        self.write(", ");
                    }
                    self.expression(argument);
                }
                self.write(")");
            }
            ExpressionKind::IfElse {
                condition,
                then_branch,
                else_branch,
            } => {
                self.write("if ");
                self.expression(condition);
                self.write(" then ");
                self.expression(then_branch);
                self.write(" else ");
                self.expression(else_branch);
            }
            ExpressionKind::Match { scrutinee, cases } => {
                self.write("match (");
                self.expression(scrutinee);
                self.write(") {");
                self.indent += INDENT;
                for case in cases {
                    self.newline();
                    let binding = case.binding.as_ref().map_or("_", |b| b.name.as_str());
                    self.write(&format!("| {} {} -> ", case.tag.name, binding));
                    self.expression(&case.body);
                }
                self.indent -= INDENT;
                self.newline();
                self.write("}");
            }
            ExpressionKind::Lambda { parameters, body } => {
                let parameters: Vec<String> = parameters
                    .iter()
                    .map(|p| match &p.annotation {
                        Some(annotation) => format!("{}: {}", p.name.name, annotation.ty),
                        None => p.name.name.clone(),
                    })
                    .collect();
                self.write(&format!("({}) -> ", parameters.join(", ")));
                self.expression(body);
            }
            ExpressionKind::Block { statements, result } => {
                if statements.is_empty() && result.is_none() {
                    self.write("{}");
                    return;
                }
                self.write("{");
                self.indent += INDENT;
                for statement in statements {
                    self.newline();
                    self.write("val ");
                    self.pattern(&statement.pattern);
                    if let Some(annotation) = &statement.annotation {
                        self.write(&format!(": {}", annotation.ty));
                    }
                    self.write(" = ");
                    self.expression(&statement.assigned);
                    self.write(";");
                }
                if let Some(result) = result {
                    self.newline();
                    self.expression(result);
                }
                self.indent -= INDENT;
                self.newline();
                self.write("}");
            }
        }
    }

    fn literal(&mut self, literal: &Literal) {
        match literal {
            // The lexer reads magnitudes, so `i32::MIN` only arises from
            // the wrapping literal `2147483648`.
            Literal::Int(value) if *value == i32::MIN => self.write("2147483648"),
            Literal::Int(value) => self.write(&value.to_string()),
            Literal::Bool(value) => self.write(if *value { "true" } else { "false" }),
            Literal::String(value) => {
                self.write("\"");
                for c in value.chars() {
                    match c {
                        '"' => self.write("\\\""),
                        '\\' => self.write("\\\\"),
                        '\n' => self.write("\\n"),
                        '\t' => self.write("\\t"),
                        '\r' => self.write("\\r"),
                        '\0' => self.write("\\0"),
                        c => self.output.push(c),
                    }
                }
                self.write("\"");
            }
        }
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Id(id) => self.write(&id.name),
            Pattern::Wildcard(_) => self.write("_"),
            Pattern::Object { destructured, .. } => {
                let items: Vec<String> = destructured
                    .iter()
                    .map(|item| match &item.alias {
                        Some(alias) => format!("{} as {}", item.field.name, alias.name),
                        None => item.field.name.clone(),
                    })
                    .collect();
                self.write(&format!("{{ {} }}", items.join(", ")));
            }
        }
    }
}

fn binding_power(expression: &Expression) -> u8 {
    match &expression.kind {
        ExpressionKind::Binary { operator, .. } => operator.precedence(),
        ExpressionKind::Unary { .. } => UNARY,
        ExpressionKind::IfElse { .. }
        | ExpressionKind::Match { .. }
        | ExpressionKind::Lambda { .. } => 0,
        _ => POSTFIX,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::typecheck::type_check;

    #[test]
    fn formats_empty_class_without_braces() {
        assert_eq!(format_source("class  Foo {}"), "class Foo\n");
    }

    #[test]
    fn leaves_malformed_sources_untouched() {
        assert_eq!(format_source("class"), "class");
    }

    #[test]
    fn formatting_strips_comments() {
        let formatted = format_source(
            "class Main { /* c */ function main(): int = 1 // tail\n}",
        );
        assert_eq!(formatted, "class Main {\n  function main(): int = 1\n}\n");
    }

    #[test]
    fn parenthesizes_by_precedence() {
        let formatted = format_source(
            "class A { function f(a: int, b: int): int = (a + b) * (a - (b - 1)) - -(a) }",
        );
        assert_eq!(
            formatted,
            "class A {\n  function f(a: int, b: int): int = (a + b) * (a - (b - 1)) - -a\n}\n"
        );
    }

    #[test]
    fn prints_blocks_and_matches() {
        let formatted = format_source(
            "class O<T>(N(unit), S(T)) { method g(d: T): T = match (this) { | N _ -> d | S v -> { val x: T = v; x } } }",
        );
        let expected = "class O<T>(N(unit), S(T)) {
  method g(d: T): T = match (this) {
    | N _ -> d
    | S v -> {
      val x: T = v;
      x
    }
  }
}
";
        assert_eq!(formatted, expected);
    }

    #[test]
    fn printing_a_checked_module_is_a_fixpoint() {
        let source = "import { Other } from other
class Main(private val count: int) {
  function <T> id(v: T): T = v

  method run(f: (int) -> int): int = (if this.count > 0 then f else (x) -> x)(Main.id(2)) :: \"\" == \"\"

  function main(): unit = Builtins.println(\"a\\\"b\" :: Builtins.intToString(2147483648))
}
";
        let first = format_source(source);
        let module = ModuleReference::root();
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_module(&module, &first, &mut diagnostics);
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let mut modules = BTreeMap::new();
        modules.insert(module.clone(), parsed);
        let checked = type_check(&modules);
        assert_eq!(print_module(&checked.modules[&module]), first);
    }
}
