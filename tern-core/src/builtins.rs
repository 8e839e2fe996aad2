//! Runtime-provided functions.
//!
//! User code reaches them through the always-visible `Builtins` class;
//! `::` lowers to `stringConcat` and allocation to `__malloc`. Every
//! backend imports them under the same names.

use std::collections::BTreeMap;

use crate::interface::{ClassInterface, MemberSignature, ModuleInterface};
use crate::span::{Location, ModuleReference};
use crate::types::Type;

pub const BUILTINS_CLASS: &str = "Builtins";

/// Import namespace used by the wasm emitter and the host.
pub const IMPORT_NAMESPACE: &str = "builtins";

/// Panic message of a division or modulo by zero.
pub const DIVISION_BY_ZERO: &str = "Division by zero";

/// Panic message of `stringToInt` on malformed input.
pub fn conversion_failure(text: &str) -> String {
    format!("Cannot convert `{text}` to int.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Builtin {
    Println,
    Panic,
    StringConcat,
    IntToString,
    StringToInt,
    Malloc,
}

impl Builtin {
    pub const ALL: [Builtin; 6] = [
        Builtin::Malloc,
        Builtin::Println,
        Builtin::Panic,
        Builtin::StringConcat,
        Builtin::IntToString,
        Builtin::StringToInt,
    ];

    /// Name of the import (and of the `Builtins` member, where exposed).
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Println => "println",
            Builtin::Panic => "panic",
            Builtin::StringConcat => "stringConcat",
            Builtin::IntToString => "intToString",
            Builtin::StringToInt => "stringToInt",
            Builtin::Malloc => "__malloc",
        }
    }

    /// Symbol called by native code.
    pub fn native_symbol(self) -> String {
        match self {
            Builtin::Malloc => "__tern_malloc".to_string(),
            other => format!("__tern_{}", other.name()),
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::StringConcat => 2,
            _ => 1,
        }
    }

    /// Builtin behind a `Builtins.<name>` member.
    pub fn from_member(name: &str) -> Option<Builtin> {
        match name {
            "println" => Some(Builtin::Println),
            "panic" => Some(Builtin::Panic),
            "intToString" => Some(Builtin::IntToString),
            "stringToInt" => Some(Builtin::StringToInt),
            _ => None,
        }
    }

    /// Whether a call may be dropped when its result is unused.
    pub fn is_pure(self) -> bool {
        matches!(self, Builtin::StringConcat | Builtin::IntToString)
    }
}

fn function(name: &str, type_parameters: &[&str], parameters: Vec<Type>, return_type: Type) -> MemberSignature {
    MemberSignature {
        name: name.to_string(),
        location: Location::DUMMY,
        is_public: true,
        is_method: false,
        type_parameters: type_parameters.iter().map(|p| p.to_string()).collect(),
        parameters,
        return_type,
    }
}

/// Interface of the pseudo module holding the `Builtins` class.
pub fn builtins_module_interface() -> ModuleInterface {
    let class = ClassInterface {
        module: ModuleReference::builtins(),
        name: BUILTINS_CLASS.to_string(),
        location: Location::DUMMY,
        is_public: true,
        type_parameters: Vec::new(),
        type_definition: None,
        functions: vec![
            function("println", &[], vec![Type::STRING], Type::UNIT),
            function("panic", &["T"], vec![Type::STRING], Type::Parameter("T".to_string())),
            function("intToString", &[], vec![Type::INT], Type::STRING),
            function("stringToInt", &[], vec![Type::STRING], Type::INT),
        ],
        methods: Vec::new(),
    };
    let mut classes = BTreeMap::new();
    classes.insert(BUILTINS_CLASS.to_string(), class);
    ModuleInterface {
        classes,
        imports: BTreeMap::new(),
    }
}

/// Parse an integer the way `stringToInt` does: optional sign, decimal
/// digits, wrapping to 32 bits. `None` means the runtime panics.
pub fn parse_int(text: &str) -> Option<i32> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude = digits
        .bytes()
        .fold(0i32, |acc, b| acc.wrapping_mul(10).wrapping_add(i32::from(b - b'0')));
    Some(if negative { magnitude.wrapping_neg() } else { magnitude })
}
