//! Core type representation for Tern.
//!
//! Types carry no source positions, so the derived equality is the
//! structural equality the checker needs.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::span::ModuleReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Unit,
    Bool,
    Int,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrimitiveType::Unit => "unit",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int => "int",
            PrimitiveType::String => "string",
        })
    }
}

/// A class type such as `Option<int>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NominalType {
    pub module: ModuleReference,
    pub name: String,
    pub type_arguments: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub parameters: Vec<Type>,
    pub return_type: Box<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Placeholder for types that are not known (yet). The parser puts it
    /// on every expression; the checker leaves it where inference failed.
    Unknown,
    Primitive(PrimitiveType),
    Nominal(NominalType),
    /// A generic type parameter in scope, e.g. `T`.
    Parameter(String),
    Function(FunctionType),
}

impl Type {
    pub const UNIT: Type = Type::Primitive(PrimitiveType::Unit);
    pub const BOOL: Type = Type::Primitive(PrimitiveType::Bool);
    pub const INT: Type = Type::Primitive(PrimitiveType::Int);
    pub const STRING: Type = Type::Primitive(PrimitiveType::String);

    pub fn nominal(module: ModuleReference, name: impl Into<String>, type_arguments: Vec<Type>) -> Type {
        Type::Nominal(NominalType {
            module,
            name: name.into(),
            type_arguments,
        })
    }

    pub fn function(parameters: Vec<Type>, return_type: Type) -> Type {
        Type::Function(FunctionType {
            parameters,
            return_type: Box::new(return_type),
        })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// True when no `Unknown` appears anywhere inside.
    pub fn is_fully_known(&self) -> bool {
        match self {
            Type::Unknown => false,
            Type::Primitive(_) | Type::Parameter(_) => true,
            Type::Nominal(nominal) => nominal.type_arguments.iter().all(Type::is_fully_known),
            Type::Function(function) => {
                function.parameters.iter().all(Type::is_fully_known)
                    && function.return_type.is_fully_known()
            }
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_nominal(&self) -> Option<&NominalType> {
        match self {
            Type::Nominal(nominal) => Some(nominal),
            _ => None,
        }
    }

    /// Replace type parameters by the types in `substitution`.
    pub fn substitute(&self, substitution: &HashMap<String, Type>) -> Type {
        if substitution.is_empty() {
            return self.clone();
        }
        match self {
            Type::Parameter(name) => substitution
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Type::Unknown | Type::Primitive(_) => self.clone(),
            Type::Nominal(nominal) => Type::Nominal(NominalType {
                module: nominal.module.clone(),
                name: nominal.name.clone(),
                type_arguments: nominal
                    .type_arguments
                    .iter()
                    .map(|t| t.substitute(substitution))
                    .collect(),
            }),
            Type::Function(function) => Type::function(
                function
                    .parameters
                    .iter()
                    .map(|t| t.substitute(substitution))
                    .collect(),
                function.return_type.substitute(substitution),
            ),
        }
    }

    /// True when any of `parameters` occurs inside.
    pub fn mentions_any(&self, parameters: &BTreeSet<String>) -> bool {
        match self {
            Type::Parameter(name) => parameters.contains(name),
            Type::Unknown | Type::Primitive(_) => false,
            Type::Nominal(nominal) => nominal
                .type_arguments
                .iter()
                .any(|t| t.mentions_any(parameters)),
            Type::Function(function) => {
                function.parameters.iter().any(|t| t.mentions_any(parameters))
                    || function.return_type.mentions_any(parameters)
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => f.write_str("unknown"),
            Type::Primitive(primitive) => write!(f, "{primitive}"),
            Type::Parameter(name) => f.write_str(name),
            Type::Nominal(nominal) => {
                f.write_str(&nominal.name)?;
                if !nominal.type_arguments.is_empty() {
                    f.write_str("<")?;
                    write_list(f, &nominal.type_arguments)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            Type::Function(function) => {
                f.write_str("(")?;
                write_list(f, &function.parameters)?;
                write!(f, ") -> {}", function.return_type)
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (index, ty) in types.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

/// Whether a value of type `actual` may flow where `expected` is wanted.
///
/// `Unknown` on either side is accepted so a single error does not
/// cascade into a chain of mismatches.
pub fn is_assignable(actual: &Type, expected: &Type) -> bool {
    match (actual, expected) {
        (Type::Unknown, _) | (_, Type::Unknown) => true,
        (Type::Primitive(a), Type::Primitive(b)) => a == b,
        (Type::Parameter(a), Type::Parameter(b)) => a == b,
        (Type::Nominal(a), Type::Nominal(b)) => {
            a.module == b.module
                && a.name == b.name
                && a.type_arguments.len() == b.type_arguments.len()
                && a
                    .type_arguments
                    .iter()
                    .zip(&b.type_arguments)
                    .all(|(x, y)| is_assignable(x, y))
        }
        (Type::Function(a), Type::Function(b)) => {
            a.parameters.len() == b.parameters.len()
                && a
                    .parameters
                    .iter()
                    .zip(&b.parameters)
                    .all(|(x, y)| is_assignable(x, y))
                && is_assignable(&a.return_type, &b.return_type)
        }
        _ => false,
    }
}

/// Compute the most informative common type of two compatible types.
///
/// Used for the two arms of `if` and the cases of `match`: wherever one
/// side is `Unknown`, the other side's information wins.
pub fn least_common_supertype(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        (Type::Unknown, other) | (other, Type::Unknown) => Some(other.clone()),
        (Type::Nominal(x), Type::Nominal(y)) => {
            if x.module != y.module
                || x.name != y.name
                || x.type_arguments.len() != y.type_arguments.len()
            {
                return None;
            }
            let type_arguments = x
                .type_arguments
                .iter()
                .zip(&y.type_arguments)
                .map(|(p, q)| least_common_supertype(p, q))
                .collect::<Option<Vec<_>>>()?;
            Some(Type::nominal(x.module.clone(), x.name.clone(), type_arguments))
        }
        (Type::Function(x), Type::Function(y)) => {
            if x.parameters.len() != y.parameters.len() {
                return None;
            }
            let parameters = x
                .parameters
                .iter()
                .zip(&y.parameters)
                .map(|(p, q)| least_common_supertype(p, q))
                .collect::<Option<Vec<_>>>()?;
            let return_type = least_common_supertype(&x.return_type, &y.return_type)?;
            Some(Type::function(parameters, return_type))
        }
        (x, y) if x == y => Some(x.clone()),
        _ => None,
    }
}

/// Solve type parameters in `pattern` against `concrete`.
///
/// Only parameters in `unsolved` are bound; the first binding wins.
/// Structural mismatches are ignored here and reported by the caller's
/// assignability check.
pub fn solve(
    pattern: &Type,
    concrete: &Type,
    unsolved: &BTreeSet<String>,
    solution: &mut HashMap<String, Type>,
) {
    match (pattern, concrete) {
        (_, Type::Unknown) => {}
        (Type::Parameter(name), _) if unsolved.contains(name) => {
            if !solution.contains_key(name) && concrete.is_fully_known() {
                solution.insert(name.clone(), concrete.clone());
            }
        }
        (Type::Nominal(p), Type::Nominal(c))
            if p.name == c.name && p.type_arguments.len() == c.type_arguments.len() =>
        {
            for (p, c) in p.type_arguments.iter().zip(&c.type_arguments) {
                solve(p, c, unsolved, solution);
            }
        }
        (Type::Function(p), Type::Function(c)) if p.parameters.len() == c.parameters.len() => {
            for (p, c) in p.parameters.iter().zip(&c.parameters) {
                solve(p, c, unsolved, solution);
            }
            solve(&p.return_type, &c.return_type, unsolved, solution);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(arg: Type) -> Type {
        Type::nominal(ModuleReference::root(), "Option", vec![arg])
    }

    #[test]
    fn displays_types() {
        let ty = Type::function(vec![Type::INT, option(Type::Parameter("T".into()))], Type::UNIT);
        assert_eq!(ty.to_string(), "(int, Option<T>) -> unit");
    }

    #[test]
    fn unknown_is_assignable_both_ways() {
        assert!(is_assignable(&Type::Unknown, &Type::INT));
        assert!(is_assignable(&option(Type::INT), &option(Type::Unknown)));
        assert!(!is_assignable(&Type::STRING, &Type::INT));
    }

    #[test]
    fn least_common_supertype_fills_unknowns() {
        let merged = least_common_supertype(&option(Type::Unknown), &option(Type::BOOL));
        assert_eq!(merged, Some(option(Type::BOOL)));
        assert_eq!(least_common_supertype(&Type::INT, &Type::BOOL), None);
    }

    #[test]
    fn solves_nested_parameters() {
        let unsolved: BTreeSet<String> = ["A".to_string(), "B".to_string()].into_iter().collect();
        let pattern = Type::function(
            vec![option(Type::Parameter("A".into()))],
            Type::Parameter("B".into()),
        );
        let concrete = Type::function(vec![option(Type::INT)], Type::STRING);
        let mut solution = HashMap::new();
        solve(&pattern, &concrete, &unsolved, &mut solution);
        assert_eq!(solution.get("A"), Some(&Type::INT));
        assert_eq!(solution.get("B"), Some(&Type::STRING));
        let substituted = pattern.substitute(&solution);
        assert_eq!(substituted, concrete);
    }
}
