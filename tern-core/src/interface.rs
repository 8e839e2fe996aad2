//! Interface phase of type checking.
//!
//! Member signatures of every class are collected before any body is
//! checked, so classes may refer to each other across modules in any
//! order. The result is an immutable table: module → class → interface.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast;
use crate::builtins;
use crate::diagnostic::{Diagnostics, ErrorKind};
use crate::span::{Location, ModuleReference};
use crate::types::{FunctionType, Type};

/// Name of the synthesized struct constructor.
pub const STRUCT_CONSTRUCTOR: &str = "init";

#[derive(Debug, Clone, PartialEq)]
pub struct MemberSignature {
    pub name: String,
    pub location: Location,
    pub is_public: bool,
    pub is_method: bool,
    pub type_parameters: Vec<String>,
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

impl MemberSignature {
    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            parameters: self.parameters.clone(),
            return_type: Box::new(self.return_type.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub location: Location,
    pub ty: Type,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub name: String,
    pub location: Location,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefinitionInfo {
    Struct(Vec<FieldInfo>),
    Enum(Vec<VariantInfo>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInterface {
    pub module: ModuleReference,
    pub name: String,
    pub location: Location,
    pub is_public: bool,
    pub type_parameters: Vec<String>,
    pub type_definition: Option<TypeDefinitionInfo>,
    pub functions: Vec<MemberSignature>,
    pub methods: Vec<MemberSignature>,
}

impl ClassInterface {
    pub fn function(&self, name: &str) -> Option<&MemberSignature> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MemberSignature> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<(usize, &FieldInfo)> {
        match &self.type_definition {
            Some(TypeDefinitionInfo::Struct(fields)) => {
                fields.iter().enumerate().find(|(_, f)| f.name == name)
            }
            _ => None,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.type_definition, Some(TypeDefinitionInfo::Struct(_)))
    }

    pub fn variants(&self) -> Option<&[VariantInfo]> {
        match &self.type_definition {
            Some(TypeDefinitionInfo::Enum(variants)) => Some(variants),
            _ => None,
        }
    }

    /// The class type with its own type parameters as arguments.
    pub fn self_type(&self) -> Type {
        Type::nominal(
            self.module.clone(),
            self.name.clone(),
            self.type_parameters
                .iter()
                .map(|p| Type::Parameter(p.clone()))
                .collect(),
        )
    }

    /// Substitution from the class type parameters to `type_arguments`.
    pub fn instantiation(&self, type_arguments: &[Type]) -> std::collections::HashMap<String, Type> {
        self.type_parameters
            .iter()
            .cloned()
            .zip(type_arguments.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleInterface {
    pub classes: BTreeMap<String, ClassInterface>,
    /// Imported class name → module defining it.
    pub imports: BTreeMap<String, ModuleReference>,
}

/// Frozen cross-module interface context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalInterface {
    pub modules: BTreeMap<ModuleReference, ModuleInterface>,
}

impl GlobalInterface {
    pub fn class(&self, module: &ModuleReference, name: &str) -> Option<&ClassInterface> {
        self.modules.get(module)?.classes.get(name)
    }

    /// Resolve a class name as seen from `from`: local classes first,
    /// then imports, then `Builtins`.
    pub fn resolve_class(&self, from: &ModuleReference, name: &str) -> Option<&ClassInterface> {
        let module = self.modules.get(from)?;
        if let Some(class) = module.classes.get(name) {
            return Some(class);
        }
        if let Some(source) = module.imports.get(name) {
            return self.class(source, name);
        }
        self.class(&ModuleReference::builtins(), name)
    }
}

/// Entry of the class name table built before the interface phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    pub is_public: bool,
    pub type_parameter_count: usize,
}

/// Names of all classes of all modules; enough to resolve annotations
/// without any signature being known yet.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    modules: BTreeMap<ModuleReference, BTreeMap<String, ClassEntry>>,
}

impl ClassTable {
    pub fn build(modules: &BTreeMap<ModuleReference, ast::Module>) -> Self {
        let mut table = ClassTable::default();
        let mut builtin = BTreeMap::new();
        builtin.insert(
            builtins::BUILTINS_CLASS.to_string(),
            ClassEntry {
                is_public: true,
                type_parameter_count: 0,
            },
        );
        table.modules.insert(ModuleReference::builtins(), builtin);
        for (reference, module) in modules {
            let mut classes = BTreeMap::new();
            for class in &module.classes {
                classes.entry(class.name.name.clone()).or_insert(ClassEntry {
                    is_public: class.is_public,
                    type_parameter_count: class.type_parameters.len(),
                });
            }
            table.modules.insert(reference.clone(), classes);
        }
        table
    }

    pub fn contains_module(&self, module: &ModuleReference) -> bool {
        self.modules.contains_key(module)
    }

    pub fn entry(&self, module: &ModuleReference, name: &str) -> Option<ClassEntry> {
        self.modules.get(module)?.get(name).copied()
    }
}

/// Resolves written types as seen from one module.
pub struct TypeResolver<'a> {
    pub table: &'a ClassTable,
    pub module: &'a ModuleReference,
    pub imports: &'a BTreeMap<String, ModuleReference>,
}

impl TypeResolver<'_> {
    /// Module defining class `name` as seen from the current module.
    pub fn class_module(&self, name: &str) -> Option<ModuleReference> {
        if self.table.entry(self.module, name).is_some() {
            return Some(self.module.clone());
        }
        if let Some(source) = self.imports.get(name) {
            return Some(source.clone());
        }
        let builtins = ModuleReference::builtins();
        self.table.entry(&builtins, name).map(|_| builtins)
    }

    pub fn resolve(
        &self,
        ty: &Type,
        location: Location,
        type_parameters: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Type {
        match ty {
            Type::Unknown | Type::Primitive(_) | Type::Parameter(_) => ty.clone(),
            Type::Function(function) => Type::function(
                function
                    .parameters
                    .iter()
                    .map(|p| self.resolve(p, location, type_parameters, diagnostics))
                    .collect(),
                self.resolve(&function.return_type, location, type_parameters, diagnostics),
            ),
            Type::Nominal(nominal) => {
                if type_parameters.contains(&nominal.name) {
                    if !nominal.type_arguments.is_empty() {
                        diagnostics.report(
                            ErrorKind::ArityMismatch,
                            self.module,
                            location,
                            format!(
                                "Type parameter `{}` does not take type arguments.",
                                nominal.name
                            ),
                        );
                    }
                    return Type::Parameter(nominal.name.clone());
                }
                let Some(module) = self.class_module(&nominal.name) else {
                    diagnostics.report(
                        ErrorKind::UnresolvedType,
                        self.module,
                        location,
                        format!("Type `{}` is not resolved.", nominal.name),
                    );
                    return Type::Unknown;
                };
                let expected = self
                    .table
                    .entry(&module, &nominal.name)
                    .map_or(0, |entry| entry.type_parameter_count);
                let type_arguments: Vec<Type> = nominal
                    .type_arguments
                    .iter()
                    .map(|a| self.resolve(a, location, type_parameters, diagnostics))
                    .collect();
                if type_arguments.len() != expected {
                    diagnostics.report(
                        ErrorKind::ArityMismatch,
                        self.module,
                        location,
                        format!(
                            "Type `{}` expects {expected} type argument(s), found {}.",
                            nominal.name,
                            type_arguments.len()
                        ),
                    );
                    return Type::Unknown;
                }
                Type::nominal(module, nominal.name.clone(), type_arguments)
            }
        }
    }
}

/// Validate imports of one module and map imported names to modules.
pub fn resolve_imports(
    reference: &ModuleReference,
    module: &ast::Module,
    table: &ClassTable,
    diagnostics: &mut Diagnostics,
) -> BTreeMap<String, ModuleReference> {
    let local: BTreeSet<&str> = module.classes.iter().map(|c| c.name.name.as_str()).collect();
    let mut imports = BTreeMap::new();
    for import in &module.imports {
        if !table.contains_module(&import.imported_module) {
            diagnostics.report(
                ErrorKind::UnresolvedName,
                reference,
                import.imported_module_location,
                format!("Module `{}` is not found.", import.imported_module),
            );
            continue;
        }
        for member in &import.imported_members {
            match table.entry(&import.imported_module, &member.name) {
                Some(entry) if entry.is_public => {}
                _ => {
                    diagnostics.report(
                        ErrorKind::UnresolvedName,
                        reference,
                        member.location,
                        format!(
                            "Module `{}` has no public class `{}`.",
                            import.imported_module, member.name
                        ),
                    );
                    continue;
                }
            }
            if local.contains(member.name.as_str()) || imports.contains_key(&member.name) {
                diagnostics.report(
                    ErrorKind::Collision,
                    reference,
                    member.location,
                    format!("Name `{}` collides with a previously defined name.", member.name),
                );
                continue;
            }
            imports.insert(member.name.clone(), import.imported_module.clone());
        }
    }
    imports
}

/// Build the interface of one module.
///
/// Depends only on the class table, never on other modules' interfaces,
/// so modules can be processed independently; each call gets its own
/// diagnostic accumulator.
pub fn build_module_interface(
    reference: &ModuleReference,
    module: &ast::Module,
    table: &ClassTable,
    diagnostics: &mut Diagnostics,
) -> ModuleInterface {
    let imports = resolve_imports(reference, module, table, diagnostics);
    let resolver = TypeResolver {
        table,
        module: reference,
        imports: &imports,
    };
    let mut classes = BTreeMap::new();
    for class in &module.classes {
        if classes.contains_key(&class.name.name) {
            report_collision(diagnostics, reference, &class.name);
            continue;
        }
        let interface = class_interface(reference, class, &resolver, diagnostics);
        classes.insert(class.name.name.clone(), interface);
    }
    ModuleInterface { classes, imports }
}

fn report_collision(diagnostics: &mut Diagnostics, module: &ModuleReference, id: &ast::Id) {
    diagnostics.report(
        ErrorKind::Collision,
        module,
        id.location,
        format!("Name `{}` collides with a previously defined name.", id.name),
    );
}

fn unique_names(
    ids: &[ast::Id],
    outer: &BTreeSet<String>,
    module: &ModuleReference,
    diagnostics: &mut Diagnostics,
) -> BTreeSet<String> {
    let mut names = outer.clone();
    for id in ids {
        if !names.insert(id.name.clone()) {
            report_collision(diagnostics, module, id);
        }
    }
    names
}

fn class_interface(
    reference: &ModuleReference,
    class: &ast::ClassDefinition,
    resolver: &TypeResolver<'_>,
    diagnostics: &mut Diagnostics,
) -> ClassInterface {
    let class_type_parameters =
        unique_names(&class.type_parameters, &BTreeSet::new(), reference, diagnostics);
    let type_parameter_list: Vec<String> =
        class.type_parameters.iter().map(|p| p.name.clone()).collect();
    let self_type = Type::nominal(
        reference.clone(),
        class.name.name.clone(),
        type_parameter_list
            .iter()
            .map(|p| Type::Parameter(p.clone()))
            .collect(),
    );

    let mut functions: Vec<MemberSignature> = Vec::new();
    let mut methods: Vec<MemberSignature> = Vec::new();
    let mut member_names: BTreeSet<String> = BTreeSet::new();

    let type_definition = class.type_definition.as_ref().map(|definition| match definition {
        ast::TypeDefinition::Struct { location, fields } => {
            let mut seen = BTreeSet::new();
            let mut infos = Vec::new();
            for field in fields {
                if !seen.insert(field.name.name.clone()) {
                    report_collision(diagnostics, reference, &field.name);
                    continue;
                }
                infos.push(FieldInfo {
                    name: field.name.name.clone(),
                    location: field.name.location,
                    ty: resolver.resolve(
                        &field.annotation.ty,
                        field.annotation.location,
                        &class_type_parameters,
                        diagnostics,
                    ),
                    is_public: field.is_public,
                });
            }
            member_names.insert(STRUCT_CONSTRUCTOR.to_string());
            functions.push(MemberSignature {
                name: STRUCT_CONSTRUCTOR.to_string(),
                location: *location,
                is_public: true,
                is_method: false,
                type_parameters: type_parameter_list.clone(),
                parameters: infos.iter().map(|f| f.ty.clone()).collect(),
                return_type: self_type.clone(),
            });
            TypeDefinitionInfo::Struct(infos)
        }
        ast::TypeDefinition::Enum { variants, .. } => {
            let mut infos = Vec::new();
            for variant in variants {
                if !member_names.insert(variant.name.name.clone()) {
                    report_collision(diagnostics, reference, &variant.name);
                    continue;
                }
                let ty = resolver.resolve(
                    &variant.annotation.ty,
                    variant.annotation.location,
                    &class_type_parameters,
                    diagnostics,
                );
                functions.push(MemberSignature {
                    name: variant.name.name.clone(),
                    location: variant.name.location,
                    is_public: true,
                    is_method: false,
                    type_parameters: type_parameter_list.clone(),
                    parameters: vec![ty.clone()],
                    return_type: self_type.clone(),
                });
                infos.push(VariantInfo {
                    name: variant.name.name.clone(),
                    location: variant.name.location,
                    ty,
                });
            }
            TypeDefinitionInfo::Enum(infos)
        }
    });

    for member in &class.members {
        if !member_names.insert(member.name.name.clone()) {
            report_collision(diagnostics, reference, &member.name);
            continue;
        }
        let outer = if member.is_method {
            class_type_parameters.clone()
        } else {
            BTreeSet::new()
        };
        let in_scope = unique_names(&member.type_parameters, &outer, reference, diagnostics);
        let signature = MemberSignature {
            name: member.name.name.clone(),
            location: member.location,
            is_public: member.is_public,
            is_method: member.is_method,
            type_parameters: member.type_parameters.iter().map(|p| p.name.clone()).collect(),
            parameters: member
                .parameters
                .iter()
                .map(|p| resolver.resolve(&p.annotation.ty, p.annotation.location, &in_scope, diagnostics))
                .collect(),
            return_type: resolver.resolve(
                &member.return_type.ty,
                member.return_type.location,
                &in_scope,
                diagnostics,
            ),
        };
        if member.is_method {
            methods.push(signature);
        } else {
            functions.push(signature);
        }
    }

    ClassInterface {
        module: reference.clone(),
        name: class.name.name.clone(),
        location: class.location,
        is_public: class.is_public,
        type_parameters: type_parameter_list,
        type_definition,
        functions,
        methods,
    }
}

/// Run the interface phase over every module and freeze the result.
pub fn build_global_interface(
    modules: &BTreeMap<ModuleReference, ast::Module>,
    table: &ClassTable,
    diagnostics: &mut Diagnostics,
) -> GlobalInterface {
    let mut global = GlobalInterface::default();
    global
        .modules
        .insert(ModuleReference::builtins(), builtins::builtins_module_interface());
    for (reference, module) in modules {
        let mut local = Diagnostics::new();
        let interface = build_module_interface(reference, module, table, &mut local);
        diagnostics.extend(local);
        global.modules.insert(reference.clone(), interface);
    }
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn interface_of(sources: &[(&str, &str)]) -> (GlobalInterface, Diagnostics) {
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
        let table = ClassTable::build(&modules);
        let global = build_global_interface(&modules, &table, &mut diagnostics);
        (global, diagnostics)
    }

    #[test]
    fn collects_signatures_across_modules_in_any_order() {
        let (global, diagnostics) = interface_of(&[
            ("a", "import { B } from b\nclass A { function make(): B = B.init(1) }"),
            ("b", "import { A } from a\nclass B(val a: int) { method back(): A = A.make() }"),
        ]);
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let a = global.class(&ModuleReference::from_dotted("a"), "A").expect("class A");
        assert_eq!(
            a.function("make").map(|f| f.return_type.to_string()),
            Some("B".to_string())
        );
        let b = global.class(&ModuleReference::from_dotted("b"), "B").expect("class B");
        assert_eq!(b.function(STRUCT_CONSTRUCTOR).map(|f| f.parameters.len()), Some(1));
        assert!(b.method("back").is_some());
    }

    #[test]
    fn synthesizes_variant_constructors() {
        let (global, diagnostics) = interface_of(&[("", "class Opt<T>(None(unit), Some(T))")]);
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let opt = global.class(&ModuleReference::root(), "Opt").expect("class");
        let some = opt.function("Some").expect("Some");
        assert_eq!(some.type_parameters, vec!["T".to_string()]);
        assert_eq!(some.return_type.to_string(), "Opt<T>");
        assert_eq!(opt.variants().map(<[VariantInfo]>::len), Some(2));
    }

    #[test]
    fn reports_collisions() {
        let (_, diagnostics) = interface_of(&[(
            "",
            "class A(val x: int, val x: int) { function f(): int = 1 function f(): int = 2 }\nclass A {}",
        )]);
        let kinds: Vec<_> = diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::Collision, ErrorKind::Collision, ErrorKind::Collision]);
    }

    #[test]
    fn reports_unresolved_types_and_bad_imports() {
        let (_, diagnostics) = interface_of(&[
            ("a", "import { Hidden } from b\nimport { X } from nowhere\nclass A { function f(): Missing = 1 }"),
            ("b", "private class Hidden {}"),
        ]);
        let kinds: Vec<_> = diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![ErrorKind::UnresolvedName, ErrorKind::UnresolvedName, ErrorKind::UnresolvedType]
        );
    }

    #[test]
    fn class_type_parameters_are_only_visible_in_methods() {
        let (_, diagnostics) = interface_of(&[(
            "",
            "class Box<T>(val v: T) { method get(): T = this.v function bad(): T = 1 }",
        )]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.iter().next().map(|d| d.kind), Some(ErrorKind::UnresolvedType));
    }
}
