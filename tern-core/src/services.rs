//! Editor queries over an incrementally updated set of modules.
//!
//! Every update re-checks the whole program and rebuilds position
//! indexes from the typed trees. Queries never fail: a position nothing
//! is known about gives `None` or an empty list.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{ClassDefinition, ClassMember, Expression, ExpressionKind, Module, Pattern};
use crate::compiler::check_sources;
use crate::diagnostic::Diagnostic;
use crate::interface::{ClassInterface, GlobalInterface, TypeDefinitionInfo};
use crate::span::{Location, ModuleReference, Position};
use crate::typecheck::TypeCheckOutput;
use crate::types::{FunctionType, Type};

/// Values attached to source ranges; lookups pick the most specific
/// range containing a position.
#[derive(Debug, Clone)]
pub struct LocationLookup<T> {
    entries: BTreeMap<ModuleReference, Vec<(Location, T)>>,
}

impl<T> Default for LocationLookup<T> {
    fn default() -> Self {
        LocationLookup {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> LocationLookup<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, module: &ModuleReference, location: Location, value: T) {
        self.entries
            .entry(module.clone())
            .or_default()
            .push((location, value));
    }

    pub fn purge(&mut self, module: &ModuleReference) {
        self.entries.remove(module);
    }

    pub fn get(&self, module: &ModuleReference, position: Position) -> Option<(Location, &T)> {
        self.entries
            .get(module)?
            .iter()
            .filter(|(location, _)| location.contains_position(position))
            .min_by_key(|(location, _)| extent(location))
            .map(|(location, value)| (*location, value))
    }

    pub fn get_best_location(&self, module: &ModuleReference, position: Position) -> Option<Location> {
        self.get(module, position).map(|(location, _)| location)
    }
}

fn extent(location: &Location) -> (u32, i64) {
    (
        location.end.line - location.start.line,
        i64::from(location.end.col) - i64::from(location.start.col),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeQuery {
    pub hover: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub module: ModuleReference,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionItemKind {
    Method,
    Function,
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub insert_text: String,
    pub kind: CompletionItemKind,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct LanguageServices {
    sources: BTreeMap<ModuleReference, String>,
    checked: Option<TypeCheckOutput>,
    types: LocationLookup<String>,
    definitions: LocationLookup<Definition>,
}

impl LanguageServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, module: ModuleReference, source: impl Into<String>) {
        self.sources.insert(module, source.into());
        self.recheck();
    }

    pub fn remove(&mut self, module: &ModuleReference) {
        self.sources.remove(module);
        self.recheck();
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleReference> {
        self.sources.keys()
    }

    fn recheck(&mut self) {
        let checked = check_sources(&self.sources);
        self.types = LocationLookup::new();
        self.definitions = LocationLookup::new();
        for (reference, module) in &checked.modules {
            Indexer {
                module: reference,
                interface: &checked.interface,
                types: &mut self.types,
                definitions: &mut self.definitions,
                scopes: Vec::new(),
            }
            .module(module);
        }
        tracing::debug!(
            modules = self.sources.len(),
            diagnostics = checked.diagnostics.len(),
            "language services refreshed"
        );
        self.checked = Some(checked);
    }

    pub fn get_errors(&self, module: &ModuleReference) -> Vec<Diagnostic> {
        self.checked
            .as_ref()
            .map(|checked| checked.diagnostics.for_module(module).cloned().collect())
            .unwrap_or_default()
    }

    pub fn query_type(&self, module: &ModuleReference, position: Position) -> Option<TypeQuery> {
        self.types
            .get(module, position)
            .map(|(location, hover)| TypeQuery {
                hover: hover.clone(),
                location,
            })
    }

    pub fn query_definition(&self, module: &ModuleReference, position: Position) -> Option<Definition> {
        self.definitions
            .get(module, position)
            .map(|(_, definition)| definition.clone())
    }

    /// Members that may follow the `.` at or before `position`.
    pub fn autocomplete(&self, module: &ModuleReference, position: Position) -> Vec<CompletionItem> {
        let Some(checked) = &self.checked else {
            return Vec::new();
        };
        let Some(typed) = checked.modules.get(module) else {
            return Vec::new();
        };
        let Some((class, access)) = find_access(typed, position) else {
            return Vec::new();
        };
        let interface = &checked.interface;
        let same_class = |target: &ClassInterface| target.module == *module && target.name == class;
        match &access.kind {
            ExpressionKind::FieldAccess { object, .. } | ExpressionKind::MethodAccess { object, .. } => {
                let Type::Nominal(nominal) = &object.ty else {
                    return Vec::new();
                };
                let Some(target) = interface.class(&nominal.module, &nominal.name) else {
                    return Vec::new();
                };
                let private_ok = same_class(target);
                let substitution = target.instantiation(&nominal.type_arguments);
                let mut items = Vec::new();
                if let Some(TypeDefinitionInfo::Struct(fields)) = &target.type_definition {
                    for field in fields.iter().filter(|f| f.is_public || private_ok) {
                        items.push(CompletionItem {
                            label: field.name.clone(),
                            insert_text: field.name.clone(),
                            kind: CompletionItemKind::Field,
                            detail: field.ty.substitute(&substitution).to_string(),
                        });
                    }
                }
                for method in target.methods.iter().filter(|m| m.is_public || private_ok) {
                    items.push(member_item(
                        &method.name,
                        &Type::Function(method.function_type()).substitute(&substitution),
                        method.parameters.is_empty(),
                        CompletionItemKind::Method,
                    ));
                }
                items
            }
            ExpressionKind::ClassFunction { class_name, .. } => {
                let Some(target) = interface.resolve_class(module, &class_name.name) else {
                    return Vec::new();
                };
                let private_ok = same_class(target);
                target
                    .functions
                    .iter()
                    .filter(|f| f.is_public || private_ok)
                    .map(|function| {
                        member_item(
                            &function.name,
                            &Type::Function(function.function_type()),
                            function.parameters.is_empty(),
                            CompletionItemKind::Function,
                        )
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

fn member_item(name: &str, ty: &Type, no_arguments: bool, kind: CompletionItemKind) -> CompletionItem {
    CompletionItem {
        label: name.to_string(),
        insert_text: if no_arguments {
            format!("{name}()")
        } else {
            format!("{name}($0)")
        },
        kind,
        detail: ty.to_string(),
    }
}

/// Innermost member access around `position`, with its enclosing class.
fn find_access(module: &Module, position: Position) -> Option<(String, &Expression)> {
    fn visit<'a>(expression: &'a Expression, position: Position, best: &mut Option<&'a Expression>) {
        if !expression.location.contains_position(position) {
            return;
        }
        if matches!(
            expression.kind,
            ExpressionKind::FieldAccess { .. }
                | ExpressionKind::MethodAccess { .. }
                | ExpressionKind::ClassFunction { .. }
        ) {
            *best = Some(expression);
        }
        for child in expression.children() {
            visit(child, position, best);
        }
    }

    for class in &module.classes {
        if !class.location.contains_position(position) {
            continue;
        }
        for member in &class.members {
            let mut best = None;
            visit(&member.body, position, &mut best);
            if let Some(expression) = best {
                return Some((class.name.name.clone(), expression));
            }
        }
    }
    None
}

struct Indexer<'a> {
    module: &'a ModuleReference,
    interface: &'a GlobalInterface,
    types: &'a mut LocationLookup<String>,
    definitions: &'a mut LocationLookup<Definition>,
    scopes: Vec<HashMap<String, Location>>,
}

impl<'a> Indexer<'a> {
    fn module(&mut self, module: &Module) {
        for class in &module.classes {
            self.class(class);
        }
    }

    fn local_definition(&mut self, use_site: Location, definition: Location) {
        self.definitions.set(
            self.module,
            use_site,
            Definition {
                module: self.module.clone(),
                location: definition,
            },
        );
    }

    fn bind(&mut self, name: &str, location: Location, ty: &Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), location);
        }
        self.local_definition(location, location);
        if *ty != Type::Unknown {
            self.types.set(self.module, location, ty.to_string());
        }
    }

    fn lookup(&self, name: &str) -> Option<Location> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn class(&mut self, class: &ClassDefinition) {
        self.types
            .set(self.module, class.location, format!("class {}", class.name.name));
        self.local_definition(class.name.location, class.location);
        for member in &class.members {
            self.member(member);
        }
    }

    fn member(&mut self, member: &ClassMember) {
        let ty = Type::Function(FunctionType {
            parameters: member.parameters.iter().map(|p| p.annotation.ty.clone()).collect(),
            return_type: Box::new(member.return_type.ty.clone()),
        });
        self.types.set(self.module, member.name.location, ty.to_string());
        self.local_definition(member.name.location, member.location);
        self.scopes.push(HashMap::new());
        for parameter in &member.parameters {
            self.bind(&parameter.name.name, parameter.name.location, &parameter.annotation.ty);
        }
        self.expression(&member.body);
        self.scopes.pop();
    }

    fn class_member_definition(&mut self, use_site: Location, class: &ClassInterface, location: Location) {
        self.definitions.set(
            self.module,
            use_site,
            Definition {
                module: class.module.clone(),
                location,
            },
        );
    }

    fn expression(&mut self, expression: &Expression) {
        if expression.ty != Type::Unknown {
            self.types
                .set(self.module, expression.location, expression.ty.to_string());
        }
        match &expression.kind {
            ExpressionKind::Variable(name) => {
                if let Some(definition) = self.lookup(name) {
                    self.local_definition(expression.location, definition);
                }
            }
            ExpressionKind::ClassFunction {
                class_name,
                function_name,
                ..
            } => {
                let interface = self.interface;
                if let Some(class) = interface.resolve_class(self.module, &class_name.name) {
                    self.class_member_definition(class_name.location, class, class.location);
                    if let Some(function) = class.function(&function_name.name) {
                        self.class_member_definition(function_name.location, class, function.location);
                    }
                }
            }
            ExpressionKind::FieldAccess {
                object, field_name, ..
            } => {
                if let Some(class) = self.nominal_class(&object.ty) {
                    if let Some((_, field)) = class.field(&field_name.name) {
                        self.class_member_definition(field_name.location, class, field.location);
                    }
                }
                self.expression(object);
            }
            ExpressionKind::MethodAccess {
                object,
                method_name,
                ..
            } => {
                if let Some(class) = self.nominal_class(&object.ty) {
                    if let Some(method) = class.method(&method_name.name) {
                        self.class_member_definition(method_name.location, class, method.location);
                    }
                }
                self.expression(object);
            }
            ExpressionKind::Match { scrutinee, cases } => {
                self.expression(scrutinee);
                for case in cases {
                    self.scopes.push(HashMap::new());
                    if let Some(binding) = &case.binding {
                        self.bind(&binding.name, binding.location, &case.binding_type);
                    }
                    self.expression(&case.body);
                    self.scopes.pop();
                }
            }
            ExpressionKind::Lambda { parameters, body } => {
                self.scopes.push(HashMap::new());
                for parameter in parameters {
                    self.bind(&parameter.name.name, parameter.name.location, &parameter.ty);
                }
                self.expression(body);
                self.scopes.pop();
            }
            ExpressionKind::Block { statements, result } => {
                self.scopes.push(HashMap::new());
                for statement in statements {
                    self.expression(&statement.assigned);
                    match &statement.pattern {
                        Pattern::Id(id) => {
                            let ty = statement
                                .annotation
                                .as_ref()
                                .map_or(&statement.assigned.ty, |annotation| &annotation.ty);
                            self.bind(&id.name, id.location, ty);
                        }
                        Pattern::Object { destructured, .. } => {
                            for item in destructured {
                                let binding = item.binding();
                                self.bind(&binding.name, binding.location, &item.ty);
                            }
                        }
                        Pattern::Wildcard(_) => {}
                    }
                }
                if let Some(result) = result {
                    self.expression(result);
                }
                self.scopes.pop();
            }
            _ => {
                for child in expression.children() {
                    self.expression(child);
                }
            }
        }
    }

    fn nominal_class(&self, ty: &Type) -> Option<&'a ClassInterface> {
        let Type::Nominal(nominal) = ty else {
            return None;
        };
        self.interface.class(&nominal.module, &nominal.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(line: u32, col: u32) -> Position {
        Position::new(line, col)
    }

    #[test]
    fn best_location_is_the_smallest_enclosing_range() {
        let module = ModuleReference::root();
        let small = Location::new(position(1, 0), position(2, 0));
        let large = Location::new(position(0, 0), position(29, 0));
        let mut lookup = LocationLookup::new();
        lookup.set(&module, large, "large");
        lookup.set(&module, small, "small");
        assert_eq!(lookup.get_best_location(&module, position(1, 4)), Some(small));
        assert_eq!(lookup.get_best_location(&module, position(9, 0)), Some(large));
        assert_eq!(lookup.get_best_location(&module, position(40, 0)), None);
        lookup.purge(&module);
        assert_eq!(lookup.get_best_location(&module, position(1, 4)), None);
    }

    #[test]
    fn class_names_hover_as_classes() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        services.update(module.clone(), "class Foo {}");
        assert!(services.get_errors(&module).is_empty());
        let query = services.query_type(&module, position(0, 7)).expect("type");
        assert_eq!(query.hover, "class Foo");
        assert_eq!(query.location, Location::new(position(0, 0), position(0, 12)));
    }

    #[test]
    fn reports_errors_per_module_and_forgets_removed_ones() {
        let main = ModuleReference::root();
        let other = ModuleReference::new(["other"]);
        let mut services = LanguageServices::new();
        services.update(main.clone(), "class Main { function main(): int = \"haha\" }");
        services.update(other.clone(), "class Other {}");
        assert_eq!(services.get_errors(&main).len(), 1);
        assert!(services.get_errors(&other).is_empty());
        services.remove(&main);
        assert!(services.get_errors(&main).is_empty());
        assert_eq!(services.modules().count(), 1);
    }

    #[test]
    fn expressions_hover_with_their_types() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        services.update(
            module.clone(),
            "class Main { function f(x: int): bool = x < 3 }",
        );
        // On `x` inside the body.
        let query = services.query_type(&module, position(0, 40)).expect("type");
        assert_eq!(query.hover, "int");
        assert_eq!(query.location, Location::new(position(0, 40), position(0, 41)));
    }

    #[test]
    fn definitions_resolve_locals_and_members() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        let source = "class Main {
  function id(v: int): int = v
  function main(): int = { val a = 1; Main.id(a) }
}";
        services.update(module.clone(), source);
        assert!(services.get_errors(&module).is_empty());

        // `a` in `Main.id(a)` points at the `val a`.
        let local = services.query_definition(&module, position(2, 46)).expect("local");
        assert_eq!(local.location, Location::new(position(2, 31), position(2, 32)));

        // `id` in `Main.id` points at the whole member.
        let member = services.query_definition(&module, position(2, 44)).expect("member");
        assert_eq!(member.module, module);
        assert_eq!(member.location.start, position(1, 2));
    }

    #[test]
    fn receivers_complete_public_members_only() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        let source = "class Foo {
  method shown(): unit = {}
  private method hidden(): unit = {}
  method take(x: int): int = x
}
class Bar {
  function test(foo: Foo): unit = foo.
}";
        services.update(module.clone(), source);
        let items = services.autocomplete(&module, position(6, 38));
        let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
        assert_eq!(labels, vec!["shown", "take"]);
        assert_eq!(items[0].insert_text, "shown()");
        assert_eq!(items[0].kind, CompletionItemKind::Method);
        assert_eq!(items[0].detail, "() -> unit");
        assert_eq!(items[1].insert_text, "take($0)");
        assert_eq!(items[1].detail, "(int) -> int");
    }

    #[test]
    fn generic_receivers_show_instantiated_members() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        let source = "class Box<T>(val v: T) {
  method get(): T = this.v
  method orElse(other: T): T = other
}
class Main {
  function f(b: Box<int>): unit = b.
}";
        services.update(module.clone(), source);
        let items = services.autocomplete(&module, position(5, 36));
        let details: Vec<_> = items
            .iter()
            .map(|item| (item.label.as_str(), item.detail.as_str()))
            .collect();
        assert_eq!(
            details,
            vec![
                ("v", "int"),
                ("get", "() -> int"),
                ("orElse", "(int) -> int"),
            ]
        );
        assert_eq!(items[0].kind, CompletionItemKind::Field);
        assert_eq!(items[1].insert_text, "get()");
    }

    #[test]
    fn class_names_complete_functions() {
        let module = ModuleReference::root();
        let mut services = LanguageServices::new();
        let source = "class P(val x: int) {
  function origin(): P = P.init(0)
}
class Main {
  function main(): int = P.
}";
        services.update(module.clone(), source);
        let items = services.autocomplete(&module, position(4, 27));
        let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
        assert!(labels.contains(&"origin"));
        assert!(labels.contains(&"init"));
        let init = items.iter().find(|item| item.label == "init").expect("init");
        assert_eq!(init.insert_text, "init($0)");
        assert_eq!(init.kind, CompletionItemKind::Function);
    }

    #[test]
    fn unknown_positions_give_empty_answers() {
        let module = ModuleReference::root();
        let services = LanguageServices::new();
        assert!(services.query_type(&module, position(0, 0)).is_none());
        assert!(services.query_definition(&module, position(0, 0)).is_none());
        assert!(services.autocomplete(&module, position(0, 0)).is_empty());
    }
}
