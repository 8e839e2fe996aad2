//! Recursive-descent parser with error recovery.
//!
//! `parse_module` always returns a module. Syntax problems are appended
//! to the diagnostic set and the parser resynchronizes at the next
//! member or class boundary.

use crate::ast::{
    Annotation, BinaryOperator, ClassDefinition, ClassMember, Expression, ExpressionKind,
    FieldDefinition, Id, LambdaParameter, Literal, MatchCase, Module, ModuleImport,
    ObjectPatternItem, Parameter, Pattern, Statement, TypeDefinition, UnaryOperator,
    VariantDefinition,
};
use crate::diagnostic::{Diagnostics, ErrorKind};
use crate::lexer::{Token, TokenKind, lex};
use crate::span::{Location, ModuleReference, Position};
use crate::types::Type;

pub fn parse_module(
    module: &ModuleReference,
    source: &str,
    diagnostics: &mut Diagnostics,
) -> Module {
    let tokens = lex(module, source, diagnostics);
    let mut parser = Parser {
        module,
        tokens,
        position: 0,
        diagnostics,
    };
    parser.module()
}

/// Parse a standalone expression; used by tests and tooling.
pub fn parse_expression(
    module: &ModuleReference,
    source: &str,
    diagnostics: &mut Diagnostics,
) -> Expression {
    let tokens = lex(module, source, diagnostics);
    let mut parser = Parser {
        module,
        tokens,
        position: 0,
        diagnostics,
    };
    let expression = parser.expression();
    if !parser.at(&TokenKind::Eof) {
        parser.unexpected("end of input");
    }
    expression
}

struct Parser<'a> {
    module: &'a ModuleReference,
    tokens: Vec<Token>,
    position: usize,
    diagnostics: &'a mut Diagnostics,
}

impl Parser<'_> {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        let index = self.position.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn previous_end(&self) -> Position {
        if self.position == 0 {
            return Position::default();
        }
        self.tokens[self.position - 1].location.end
    }

    fn location_from(&self, start: Position) -> Location {
        let end = self.previous_end().max(start);
        Location::new(start, end)
    }

    fn error(&mut self, location: Location, message: impl Into<String>) {
        self.diagnostics
            .report(ErrorKind::SyntaxError, self.module, location, message);
    }

    fn unexpected(&mut self, expected: &str) {
        let token = self.peek().clone();
        self.error(
            token.location,
            format!("Expected {expected}, found {}.", token.kind.describe()),
        );
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.eat(&kind) {
            return true;
        }
        self.unexpected(&kind.describe());
        false
    }

    fn identifier(&mut self) -> Option<Id> {
        let token = self.peek().clone();
        if let TokenKind::Ident(name) = token.kind {
            self.advance();
            Some(Id::new(token.location, name))
        } else {
            self.unexpected("an identifier");
            None
        }
    }

    /// Identifier or a zero-width placeholder id at the current position.
    fn identifier_or_missing(&mut self) -> Id {
        match self.identifier() {
            Some(id) => id,
            None => {
                let at = self.previous_end();
                Id::new(Location::new(at, at), "")
            }
        }
    }

    fn comma_separated<T>(
        &mut self,
        close: &TokenKind,
        mut item: impl FnMut(&mut Self) -> Option<T>,
    ) -> Vec<T> {
        let mut items = Vec::new();
        if self.at(close) {
            return items;
        }
        loop {
            let before = self.position;
            if let Some(value) = item(self) {
                items.push(value);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            if self.position == before {
                break;
            }
        }
        items
    }

    // ------------------------------------------------------------------
    // Module structure
    // ------------------------------------------------------------------

    fn module(&mut self) -> Module {
        let mut imports = Vec::new();
        while self.at(&TokenKind::Import) {
            if let Some(import) = self.import() {
                imports.push(import);
            }
        }
        let mut classes = Vec::new();
        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::Class) || self.at(&TokenKind::Private) {
                if let Some(class) = self.class() {
                    classes.push(class);
                }
            } else {
                self.unexpected("`class`");
                self.advance();
                while !matches!(
                    self.peek().kind,
                    TokenKind::Class | TokenKind::Private | TokenKind::Eof
                ) {
                    self.advance();
                }
            }
        }
        Module { imports, classes }
    }

    fn import(&mut self) -> Option<ModuleImport> {
        let start = self.advance().location.start;
        self.expect(TokenKind::LBrace);
        let imported_members =
            self.comma_separated(&TokenKind::RBrace, |parser| parser.identifier());
        self.expect(TokenKind::RBrace);
        self.expect(TokenKind::From);
        let module_start = self.peek().location.start;
        let mut segments = Vec::new();
        if let Some(first) = self.identifier() {
            segments.push(first.name);
            while self.eat(&TokenKind::Dot) {
                segments.push(self.identifier_or_missing().name);
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(ModuleImport {
            location: self.location_from(start),
            imported_members,
            imported_module: ModuleReference::new(segments),
            imported_module_location: self.location_from(module_start),
        })
    }

    fn type_parameters(&mut self) -> Vec<Id> {
        if !self.eat(&TokenKind::Lt) {
            return Vec::new();
        }
        let parameters = self.comma_separated(&TokenKind::Gt, |parser| parser.identifier());
        self.expect(TokenKind::Gt);
        parameters
    }

    fn class(&mut self) -> Option<ClassDefinition> {
        let start = self.peek().location.start;
        let is_public = !self.eat(&TokenKind::Private);
        if !self.expect(TokenKind::Class) {
            self.advance();
            return None;
        }
        let name = self.identifier()?;
        let type_parameters = self.type_parameters();
        let type_definition = if self.at(&TokenKind::LParen) {
            Some(self.type_definition())
        } else {
            None
        };
        let mut members = Vec::new();
        if self.eat(&TokenKind::LBrace) {
            while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
                if self.at(&TokenKind::Class) {
                    break;
                }
                let before = self.position;
                if let Some(member) = self.member() {
                    members.push(member);
                }
                if self.position == before {
                    self.advance();
                }
            }
            self.expect(TokenKind::RBrace);
        }
        Some(ClassDefinition {
            location: self.location_from(start),
            is_public,
            name,
            type_parameters,
            type_definition,
            members,
        })
    }

    fn type_definition(&mut self) -> TypeDefinition {
        let start = self.advance().location.start;
        let is_struct = matches!(
            self.peek().kind,
            TokenKind::Val | TokenKind::Private | TokenKind::RParen
        );
        let definition = if is_struct {
            let fields = self.comma_separated(&TokenKind::RParen, |parser| {
                let is_public = !parser.eat(&TokenKind::Private);
                parser.expect(TokenKind::Val);
                let name = parser.identifier()?;
                parser.expect(TokenKind::Colon);
                let annotation = parser.annotation();
                Some(FieldDefinition {
                    name,
                    annotation,
                    is_public,
                })
            });
            self.expect(TokenKind::RParen);
            TypeDefinition::Struct {
                location: self.location_from(start),
                fields,
            }
        } else {
            let variants = self.comma_separated(&TokenKind::RParen, |parser| {
                let name = parser.identifier()?;
                parser.expect(TokenKind::LParen);
                let annotation = parser.annotation();
                parser.expect(TokenKind::RParen);
                Some(VariantDefinition { name, annotation })
            });
            self.expect(TokenKind::RParen);
            TypeDefinition::Enum {
                location: self.location_from(start),
                variants,
            }
        };
        definition
    }

    fn member(&mut self) -> Option<ClassMember> {
        let start = self.peek().location.start;
        let is_public = !self.eat(&TokenKind::Private);
        let is_method = match self.peek().kind {
            TokenKind::Function => false,
            TokenKind::Method => true,
            _ => {
                self.unexpected("`function` or `method`");
                return None;
            }
        };
        self.advance();
        let type_parameters = self.type_parameters();
        let name = self.identifier()?;
        self.expect(TokenKind::LParen);
        let parameters = self.comma_separated(&TokenKind::RParen, |parser| {
            let name = parser.identifier()?;
            parser.expect(TokenKind::Colon);
            let annotation = parser.annotation();
            Some(Parameter { name, annotation })
        });
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::Colon);
        let return_type = self.annotation();
        self.expect(TokenKind::Assign);
        let body = self.expression();
        Some(ClassMember {
            location: self.location_from(start),
            is_public,
            is_method,
            name,
            type_parameters,
            parameters,
            return_type,
            body,
        })
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn annotation(&mut self) -> Annotation {
        let start = self.peek().location.start;
        let ty = self.type_expression();
        Annotation {
            location: self.location_from(start),
            ty,
        }
    }

    fn type_expression(&mut self) -> Type {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntType => {
                self.advance();
                Type::INT
            }
            TokenKind::BoolType => {
                self.advance();
                Type::BOOL
            }
            TokenKind::StringType => {
                self.advance();
                Type::STRING
            }
            TokenKind::UnitType => {
                self.advance();
                Type::UNIT
            }
            TokenKind::Ident(name) => {
                self.advance();
                let mut type_arguments = Vec::new();
                if self.eat(&TokenKind::Lt) {
                    type_arguments =
                        self.comma_separated(&TokenKind::Gt, |parser| Some(parser.type_expression()));
                    self.expect(TokenKind::Gt);
                }
                Type::nominal(self.module.clone(), name, type_arguments)
            }
            TokenKind::LParen => {
                self.advance();
                let parameters =
                    self.comma_separated(&TokenKind::RParen, |parser| Some(parser.type_expression()));
                self.expect(TokenKind::RParen);
                self.expect(TokenKind::Arrow);
                let return_type = self.type_expression();
                Type::function(parameters, return_type)
            }
            _ => {
                self.unexpected("a type");
                Type::Unknown
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Expression {
        self.binary(1)
    }

    fn binary(&mut self, min_precedence: u8) -> Expression {
        let mut lhs = self.unary();
        while let Some(operator) = binary_operator(&self.peek().kind) {
            let precedence = operator.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.binary(precedence + 1);
            let location = lhs.location.union(rhs.location);
            lhs = Expression::new(
                location,
                ExpressionKind::Binary {
                    operator,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        lhs
    }

    fn unary(&mut self) -> Expression {
        let operator = match self.peek().kind {
            TokenKind::Not => UnaryOperator::Not,
            TokenKind::Minus => UnaryOperator::Neg,
            _ => return self.postfix(),
        };
        let start = self.advance().location.start;
        let operand = self.unary();
        Expression::new(
            self.location_from(start),
            ExpressionKind::Unary {
                operator,
                operand: Box::new(operand),
            },
        )
    }

    fn postfix(&mut self) -> Expression {
        let mut expression = self.primary();
        loop {
            if self.eat(&TokenKind::LParen) {
                let arguments =
                    self.comma_separated(&TokenKind::RParen, |parser| Some(parser.expression()));
                self.expect(TokenKind::RParen);
                let location = self.location_from(expression.location.start);
                expression = Expression::new(
                    location,
                    ExpressionKind::Call {
                        callee: Box::new(expression),
                        arguments,
                    },
                );
            } else if self.eat(&TokenKind::Dot) {
                let field_name = self.identifier_or_missing();
                let location = self.location_from(expression.location.start);
                expression = Expression::new(
                    location,
                    ExpressionKind::FieldAccess {
                        object: Box::new(expression),
                        field_name,
                        field_order: 0,
                    },
                );
            } else {
                return expression;
            }
        }
    }

    fn primary(&mut self) -> Expression {
        let token = self.peek().clone();
        let start = token.location.start;
        match token.kind {
            TokenKind::Int(value) => {
                self.advance();
                // Out-of-range literals wrap; `-2147483648` round-trips.
                literal(token.location, Literal::Int(value as i32))
            }
            TokenKind::True => {
                self.advance();
                literal(token.location, Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                literal(token.location, Literal::Bool(false))
            }
            TokenKind::Str(value) => {
                self.advance();
                literal(token.location, Literal::String(value))
            }
            TokenKind::This => {
                self.advance();
                Expression::new(token.location, ExpressionKind::This)
            }
            TokenKind::Ident(name) if starts_uppercase(&name) => {
                self.advance();
                let class_name = Id::new(token.location, name);
                self.expect(TokenKind::Dot);
                let function_name = self.identifier_or_missing();
                Expression::new(
                    self.location_from(start),
                    ExpressionKind::ClassFunction {
                        module: self.module.clone(),
                        class_name,
                        function_name,
                        type_arguments: Vec::new(),
                    },
                )
            }
            TokenKind::Ident(name) => {
                self.advance();
                Expression::new(token.location, ExpressionKind::Variable(name))
            }
            TokenKind::If => {
                self.advance();
                let condition = self.expression();
                self.expect(TokenKind::Then);
                let then_branch = self.expression();
                self.expect(TokenKind::Else);
                let else_branch = self.expression();
                Expression::new(
                    self.location_from(start),
                    ExpressionKind::IfElse {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                )
            }
            TokenKind::Match => self.match_expression(),
            TokenKind::LParen if self.is_lambda_start() => self.lambda(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression();
                self.expect(TokenKind::RParen);
                inner
            }
            TokenKind::LBrace => self.block(),
            _ => {
                self.unexpected("an expression");
                if !matches!(
                    token.kind,
                    TokenKind::RBrace | TokenKind::RParen | TokenKind::Eof | TokenKind::Class
                ) {
                    self.advance();
                }
                // Error recovery placeholder: an empty block has type unit.
                Expression::new(
                    token.location,
                    ExpressionKind::Block {
                        statements: Vec::new(),
                        result: None,
                    },
                )
            }
        }
    }

    /// A `(` starts a lambda when its matching `)` is followed by `->`.
    fn is_lambda_start(&self) -> bool {
        let mut depth = 0usize;
        let mut offset = 0usize;
        loop {
            match self.peek_at(offset) {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(self.peek_at(offset + 1), TokenKind::Arrow);
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    fn lambda(&mut self) -> Expression {
        let start = self.advance().location.start;
        let parameters = self.comma_separated(&TokenKind::RParen, |parser| {
            let name = parser.identifier()?;
            let annotation = if parser.eat(&TokenKind::Colon) {
                Some(parser.annotation())
            } else {
                None
            };
            Some(LambdaParameter {
                name,
                annotation,
                ty: Type::Unknown,
            })
        });
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::Arrow);
        let body = self.expression();
        Expression::new(
            self.location_from(start),
            ExpressionKind::Lambda {
                parameters,
                body: Box::new(body),
            },
        )
    }

    fn match_expression(&mut self) -> Expression {
        let start = self.advance().location.start;
        self.expect(TokenKind::LParen);
        let scrutinee = self.expression();
        self.expect(TokenKind::RParen);
        self.expect(TokenKind::LBrace);
        let mut cases = Vec::new();
        while self.at(&TokenKind::Bar) {
            let case_start = self.advance().location.start;
            let Some(tag) = self.identifier() else {
                break;
            };
            let binding = if self.eat(&TokenKind::Underscore) {
                None
            } else {
                self.identifier()
            };
            self.expect(TokenKind::Arrow);
            let body = self.expression();
            cases.push(MatchCase {
                location: self.location_from(case_start),
                tag,
                tag_order: 0,
                binding,
                binding_type: Type::Unknown,
                body,
            });
        }
        self.expect(TokenKind::RBrace);
        Expression::new(
            self.location_from(start),
            ExpressionKind::Match {
                scrutinee: Box::new(scrutinee),
                cases,
            },
        )
    }

    fn block(&mut self) -> Expression {
        let start = self.advance().location.start;
        let mut statements = Vec::new();
        while self.at(&TokenKind::Val) {
            let statement_start = self.advance().location.start;
            let pattern = self.pattern();
            let annotation = if self.eat(&TokenKind::Colon) {
                Some(self.annotation())
            } else {
                None
            };
            self.expect(TokenKind::Assign);
            let assigned = self.expression();
            self.expect(TokenKind::Semi);
            statements.push(Statement {
                location: self.location_from(statement_start),
                pattern,
                annotation,
                assigned,
            });
        }
        let result = if self.at(&TokenKind::RBrace) {
            None
        } else {
            Some(Box::new(self.expression()))
        };
        self.expect(TokenKind::RBrace);
        Expression::new(
            self.location_from(start),
            ExpressionKind::Block { statements, result },
        )
    }

    fn pattern(&mut self) -> Pattern {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Underscore => {
                self.advance();
                Pattern::Wildcard(token.location)
            }
            TokenKind::LBrace => {
                self.advance();
                let destructured = self.comma_separated(&TokenKind::RBrace, |parser| {
                    let field = parser.identifier()?;
                    let alias = if parser.eat(&TokenKind::As) {
                        parser.identifier()
                    } else {
                        None
                    };
                    Some(ObjectPatternItem {
                        field,
                        field_order: 0,
                        alias,
                        ty: Type::Unknown,
                    })
                });
                self.expect(TokenKind::RBrace);
                Pattern::Object {
                    location: self.location_from(token.location.start),
                    destructured,
                }
            }
            _ => match self.identifier() {
                Some(id) => Pattern::Id(id),
                None => Pattern::Wildcard(token.location),
            },
        }
    }
}

fn literal(location: Location, literal: Literal) -> Expression {
    Expression::new(location, ExpressionKind::Literal(literal))
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn binary_operator(kind: &TokenKind) -> Option<BinaryOperator> {
    let operator = match kind {
        TokenKind::Star => BinaryOperator::Mul,
        TokenKind::Slash => BinaryOperator::Div,
        TokenKind::Percent => BinaryOperator::Mod,
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Sub,
        TokenKind::ColonColon => BinaryOperator::Concat,
        TokenKind::Lt => BinaryOperator::Lt,
        TokenKind::Le => BinaryOperator::Le,
        TokenKind::Gt => BinaryOperator::Gt,
        TokenKind::Ge => BinaryOperator::Ge,
        TokenKind::EqEq => BinaryOperator::Eq,
        TokenKind::NotEq => BinaryOperator::Ne,
        TokenKind::AndAnd => BinaryOperator::And,
        TokenKind::OrOr => BinaryOperator::Or,
        _ => return None,
    };
    Some(operator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> (Module, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let module = parse_module(&ModuleReference::root(), source, &mut diagnostics);
        (module, diagnostics)
    }

    #[test]
    fn parses_struct_class_with_members() {
        let (module, diagnostics) = parse(
            "class Point(val x: int, private val y: int) {\n  function origin(): Point = Point.init(0, 0)\n  method sum(): int = this.x + this.y\n}",
        );
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let class = &module.classes[0];
        assert_eq!(class.name.name, "Point");
        match &class.type_definition {
            Some(TypeDefinition::Struct { fields, .. }) => {
                assert_eq!(fields.len(), 2);
                assert!(fields[0].is_public);
                assert!(!fields[1].is_public);
            }
            other => panic!("unexpected type definition {other:?}"),
        }
        assert_eq!(class.members.len(), 2);
        assert!(class.members[1].is_method);
    }

    #[test]
    fn parses_enum_class_and_match() {
        let (module, diagnostics) = parse(
            "class Opt<T>(None(unit), Some(T)) {\n  method isSome(): bool = match (this) { | None _ -> false | Some v -> true }\n}",
        );
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let class = &module.classes[0];
        assert_eq!(class.type_parameters.len(), 1);
        let ExpressionKind::Match { cases, .. } = &class.members[0].body.kind else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[0].binding.is_none());
        assert_eq!(cases[1].binding.as_ref().map(|b| b.name.as_str()), Some("v"));
    }

    #[test]
    fn respects_operator_precedence() {
        let mut diagnostics = Diagnostics::new();
        let expression = parse_expression(&ModuleReference::root(), "1 + 2 * 3 < 4 && true", &mut diagnostics);
        assert!(diagnostics.is_empty());
        let ExpressionKind::Binary { operator, lhs, .. } = &expression.kind else {
            panic!("expected binary");
        };
        assert_eq!(*operator, BinaryOperator::And);
        let ExpressionKind::Binary { operator, lhs, .. } = &lhs.kind else {
            panic!("expected comparison");
        };
        assert_eq!(*operator, BinaryOperator::Lt);
        let ExpressionKind::Binary { operator, .. } = &lhs.kind else {
            panic!("expected addition");
        };
        assert_eq!(*operator, BinaryOperator::Add);
    }

    #[test]
    fn distinguishes_lambdas_from_parentheses() {
        let mut diagnostics = Diagnostics::new();
        let lambda = parse_expression(&ModuleReference::root(), "(x, y: int) -> x", &mut diagnostics);
        assert!(matches!(lambda.kind, ExpressionKind::Lambda { ref parameters, .. } if parameters.len() == 2));
        let grouped = parse_expression(&ModuleReference::root(), "(1 + 2) * 3", &mut diagnostics);
        assert!(matches!(grouped.kind, ExpressionKind::Binary { operator: BinaryOperator::Mul, .. }));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn parses_blocks_with_patterns() {
        let mut diagnostics = Diagnostics::new();
        let block = parse_expression(
            &ModuleReference::root(),
            "{ val {a, b as c} = p; val _ = 1; val d: int = a; d }",
            &mut diagnostics,
        );
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let ExpressionKind::Block { statements, result } = &block.kind else {
            panic!("expected block");
        };
        assert_eq!(statements.len(), 3);
        assert!(result.is_some());
        let Pattern::Object { destructured, .. } = &statements[0].pattern else {
            panic!("expected object pattern");
        };
        assert_eq!(destructured[1].binding().name, "c");
    }

    #[test]
    fn parses_imports() {
        let (module, diagnostics) = parse("import { A, B } from foo.bar\nclass Main {}");
        assert!(diagnostics.is_empty());
        assert_eq!(module.imports[0].imported_module, ModuleReference::new(["foo", "bar"]));
        assert_eq!(module.imports[0].imported_members.len(), 2);
    }

    #[test]
    fn recovers_from_malformed_input() {
        let (module, diagnostics) = parse("class");
        assert!(!diagnostics.is_empty());
        assert!(module.classes.is_empty());

        let (module, diagnostics) = parse("class A { function f(): int = }\nclass B {}");
        assert!(!diagnostics.is_empty());
        assert_eq!(module.classes.len(), 2);
    }

    #[test]
    fn keeps_dangling_dot_for_completion() {
        let (module, diagnostics) = parse("class A { function f(a: A): unit = a. }");
        assert_eq!(diagnostics.len(), 1);
        let ExpressionKind::FieldAccess { field_name, .. } = &module.classes[0].members[0].body.kind
        else {
            panic!("expected field access");
        };
        assert_eq!(field_name.name, "");
    }
}
