//! Pipeline driver: source discovery, checking, lowering, optimization
//! and emission.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::WalkDir;

use crate::ast::Module;
use crate::codegen_asm::emit_assembly;
use crate::codegen_wasm::emit_wasm;
use crate::diagnostic::Diagnostics;
use crate::error::CoreError;
use crate::hir::HirProgram;
use crate::hir_lower::{self, MAIN_CLASS, MAIN_FUNCTION};
use crate::mir::CompilationUnit;
use crate::mir_lower;
use crate::optimizer::{OptimizerConfig, optimize};
use crate::parser::parse_module;
use crate::span::{ModuleReference, SOURCE_EXTENSION};
use crate::typecheck::{TypeCheckOutput, type_check};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub optimize: bool,
    pub optimizer: OptimizerConfig,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            optimize: true,
            optimizer: OptimizerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub module: ModuleReference,
    /// Path relative to the project root.
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone)]
pub struct CompilationArtifact {
    pub hir: HirProgram,
    pub mir: CompilationUnit,
    pub wasm: Vec<u8>,
    pub assembly: String,
}

/// Module stored at `relative`, e.g. `a/b.tern` holds `a.b` and `.tern`
/// holds the root module.
pub fn module_for_path(relative: &Path) -> Option<ModuleReference> {
    let segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    let (last, directories) = segments.split_last()?;
    let stem = last.strip_suffix(SOURCE_EXTENSION)?;
    if stem.is_empty() {
        return directories.is_empty().then(ModuleReference::root);
    }
    Some(ModuleReference::new(
        directories.iter().cloned().chain(std::iter::once(stem.to_string())),
    ))
}

/// Every `.tern` file under `root`.
pub fn discover_sources(root: impl AsRef<Path>) -> Result<Vec<SourceFile>, CoreError> {
    let root = root.as_ref();
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let Some(module) = module_for_path(&relative) else {
            continue;
        };
        let contents = fs::read_to_string(path)?;
        files.push(SourceFile {
            module,
            path: relative,
            contents,
        });
    }
    tracing::debug!(root = %root.display(), files = files.len(), "discovered sources");
    Ok(files)
}

pub fn source_map(files: Vec<SourceFile>) -> BTreeMap<ModuleReference, String> {
    files
        .into_iter()
        .map(|file| (file.module, file.contents))
        .collect()
}

pub fn parse_sources(
    sources: &BTreeMap<ModuleReference, String>,
) -> (BTreeMap<ModuleReference, Module>, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let modules = sources
        .iter()
        .map(|(reference, source)| {
            (
                reference.clone(),
                parse_module(reference, source, &mut diagnostics),
            )
        })
        .collect();
    (modules, diagnostics)
}

/// Parse and check; syntax and type diagnostics end up together.
pub fn check_sources(sources: &BTreeMap<ModuleReference, String>) -> TypeCheckOutput {
    let started = Instant::now();
    let (modules, mut diagnostics) = parse_sources(sources);
    let mut output = type_check(&modules);
    diagnostics.extend(std::mem::take(&mut output.diagnostics));
    output.diagnostics = diagnostics;
    tracing::debug!(
        modules = sources.len(),
        diagnostics = output.diagnostics.len(),
        elapsed = ?started.elapsed(),
        "checked sources"
    );
    output
}

pub fn compile(
    sources: &BTreeMap<ModuleReference, String>,
    options: &CompilerOptions,
) -> Result<CompilationArtifact, CoreError> {
    let checked = check_sources(sources);
    if !checked.diagnostics.is_empty() {
        return Err(CoreError::Diagnostics(checked.diagnostics));
    }

    let started = Instant::now();
    let hir = hir_lower::lower_program(&checked.modules, &checked.interface)?;
    let mut mir = mir_lower::lower_program(&hir)?;
    if mir.entry.is_none() {
        return Err(CoreError::MissingEntryPoint(format!(
            "{MAIN_CLASS}.{MAIN_FUNCTION}"
        )));
    }
    tracing::debug!(elapsed = ?started.elapsed(), "lowered program");

    if options.optimize {
        let started = Instant::now();
        mir = optimize(mir, options.optimizer)?;
        tracing::debug!(elapsed = ?started.elapsed(), "optimized program");
    }

    let started = Instant::now();
    let wasm = emit_wasm(&mir)?;
    let assembly = emit_assembly(&mir)?;
    tracing::debug!(elapsed = ?started.elapsed(), "emitted code");
    Ok(CompilationArtifact {
        hir,
        mir,
        wasm,
        assembly,
    })
}
