//! Lexer for Tern sources.
//!
//! The lexer never fails: malformed characters and unterminated
//! literals are reported as `SyntaxError` diagnostics and skipped.

use crate::diagnostic::{Diagnostics, ErrorKind};
use crate::span::{Location, ModuleReference, Position};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Eof,

    // Identifiers and literals
    Ident(String),
    Int(i64),
    Str(String),

    // Keywords
    Class,
    Val,
    Function,
    Method,
    Private,
    Import,
    From,
    If,
    Then,
    Else,
    Match,
    This,
    True,
    False,
    IntType,
    BoolType,
    StringType,
    UnitType,
    As,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semi,
    Assign,
    Arrow,
    Bar,
    Underscore,

    // Operators
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    ColonColon,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Int(value) => format!("integer `{value}`"),
            TokenKind::Str(_) => "string literal".to_string(),
            other => format!("`{}`", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            TokenKind::Class => "class",
            TokenKind::Val => "val",
            TokenKind::Function => "function",
            TokenKind::Method => "method",
            TokenKind::Private => "private",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::If => "if",
            TokenKind::Then => "then",
            TokenKind::Else => "else",
            TokenKind::Match => "match",
            TokenKind::This => "this",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::IntType => "int",
            TokenKind::BoolType => "bool",
            TokenKind::StringType => "string",
            TokenKind::UnitType => "unit",
            TokenKind::As => "as",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Semi => ";",
            TokenKind::Assign => "=",
            TokenKind::Arrow => "->",
            TokenKind::Bar => "|",
            TokenKind::Underscore => "_",
            TokenKind::Not => "!",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::ColonColon => "::",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Eof | TokenKind::Ident(_) | TokenKind::Int(_) | TokenKind::Str(_) => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

/// Lex a whole source file. The token list always ends with `Eof`.
pub fn lex(module: &ModuleReference, source: &str, diagnostics: &mut Diagnostics) -> Vec<Token> {
    let mut lexer = Lexer {
        module,
        chars: source.chars().collect(),
        index: 0,
        line: 0,
        col: 0,
        diagnostics,
    };
    lexer.run()
}

struct Lexer<'a> {
    module: &'a ModuleReference,
    chars: Vec<char>,
    index: usize,
    line: u32,
    col: u32,
    diagnostics: &'a mut Diagnostics,
}

impl Lexer<'_> {
    fn run(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.position();
            let Some(c) = self.peek(0) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    location: Location::new(start, start),
                });
                return tokens;
            };
            if let Some(kind) = self.next_kind(c, start) {
                tokens.push(Token {
                    kind,
                    location: Location::new(start, self.position()),
                });
            }
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&mut self, start: Position, message: impl Into<String>) {
        let location = Location::new(start, self.position());
        self.diagnostics
            .report(ErrorKind::SyntaxError, self.module, location, message);
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.position();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                self.error(start, "Unterminated block comment.");
                                break;
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next_kind(&mut self, c: char, start: Position) -> Option<TokenKind> {
        if c.is_ascii_digit() {
            return Some(self.number(start));
        }
        if c.is_alphabetic() || c == '_' {
            return Some(self.word());
        }
        if c == '"' {
            return Some(self.string(start));
        }
        self.bump();
        let two = |lexer: &mut Self, next: char, yes: TokenKind, no: TokenKind| {
            if lexer.peek(0) == Some(next) {
                lexer.bump();
                yes
            } else {
                no
            }
        };
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            ':' => two(self, ':', TokenKind::ColonColon, TokenKind::Colon),
            '-' => two(self, '>', TokenKind::Arrow, TokenKind::Minus),
            '=' => two(self, '=', TokenKind::EqEq, TokenKind::Assign),
            '!' => two(self, '=', TokenKind::NotEq, TokenKind::Not),
            '<' => two(self, '=', TokenKind::Le, TokenKind::Lt),
            '>' => two(self, '=', TokenKind::Ge, TokenKind::Gt),
            '|' => two(self, '|', TokenKind::OrOr, TokenKind::Bar),
            '&' => {
                if self.peek(0) == Some('&') {
                    self.bump();
                    TokenKind::AndAnd
                } else {
                    self.error(start, "Unexpected character `&`.");
                    return None;
                }
            }
            other => {
                self.error(start, format!("Unexpected character `{other}`."));
                return None;
            }
        };
        Some(kind)
    }

    fn number(&mut self, start: Position) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.bump();
        }
        match text.parse::<i64>() {
            Ok(value) if value <= i64::from(i32::MAX) + 1 => TokenKind::Int(value),
            _ => {
                self.error(start, format!("Integer literal `{text}` is out of range."));
                TokenKind::Int(0)
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            text.push(c);
            self.bump();
        }
        match text.as_str() {
            "class" => TokenKind::Class,
            "val" => TokenKind::Val,
            "function" => TokenKind::Function,
            "method" => TokenKind::Method,
            "private" => TokenKind::Private,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "match" => TokenKind::Match,
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "int" => TokenKind::IntType,
            "bool" => TokenKind::BoolType,
            "string" => TokenKind::StringType,
            "unit" => TokenKind::UnitType,
            "as" => TokenKind::As,
            "_" => TokenKind::Underscore,
            _ => TokenKind::Ident(text),
        }
    }

    fn string(&mut self, start: Position) -> TokenKind {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return TokenKind::Str(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        self.error(start, format!("Unknown escape sequence `\\{other}`."));
                        value.push(other);
                    }
                    None => {
                        self.error(start, "Unterminated string literal.");
                        return TokenKind::Str(value);
                    }
                },
                Some('\n') | None => {
                    self.error(start, "Unterminated string literal.");
                    return TokenKind::Str(value);
                }
                Some(c) => value.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> (Vec<TokenKind>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let tokens = lex(&ModuleReference::root(), source, &mut diagnostics);
        (tokens.into_iter().map(|t| t.kind).collect(), diagnostics)
    }

    #[test]
    fn lexes_class_header() {
        let (tokens, diagnostics) = kinds("class Foo(val a: int) {}");
        assert!(diagnostics.is_empty());
        assert_eq!(
            tokens,
            vec![
                TokenKind::Class,
                TokenKind::Ident("Foo".into()),
                TokenKind::LParen,
                TokenKind::Val,
                TokenKind::Ident("a".into()),
                TokenKind::Colon,
                TokenKind::IntType,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators_and_comments() {
        let (tokens, diagnostics) = kinds("a :: b // trailing\n/* block */ -> <= != && ||");
        assert!(diagnostics.is_empty());
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::ColonColon,
                TokenKind::Ident("b".into()),
                TokenKind::Arrow,
                TokenKind::Le,
                TokenKind::NotEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let (tokens, _) = kinds(r#""a\n\"b""#);
        assert_eq!(tokens[0], TokenKind::Str("a\n\"b".into()));
    }

    #[test]
    fn reports_bad_characters_and_keeps_going() {
        let (tokens, diagnostics) = kinds("a # b");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn tracks_positions() {
        let mut diagnostics = Diagnostics::new();
        let tokens = lex(&ModuleReference::root(), "a\n  bc", &mut diagnostics);
        assert_eq!(tokens[1].location.start, Position::new(1, 2));
        assert_eq!(tokens[1].location.end, Position::new(1, 4));
    }
}
