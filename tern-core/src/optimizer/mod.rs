//! MIR → MIR optimizer.
//!
//! Each pass is a pure function from a unit to a unit plus a "changed"
//! flag. The driver runs the whole pipeline again until no pass reports
//! a change or the iteration cap is reached.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::mir::{CompilationUnit, Function, VarId};

pub mod const_fold;
pub mod copy_prop;
pub mod cse;
pub mod dce;
pub mod inline;
pub mod tail_rec;
pub mod unreachable;

pub struct PassOutcome {
    pub unit: CompilationUnit,
    pub changed: bool,
}

pub trait Pass {
    fn name(&self) -> &'static str;

    fn transform(&self, unit: CompilationUnit) -> Result<PassOutcome, CoreError>;
}

/// Passes that rewrite one function at a time.
pub trait FunctionPass {
    fn name(&self) -> &'static str;

    fn run(&self, function: &mut Function) -> Result<bool, CoreError>;
}

impl<P: FunctionPass> Pass for P {
    fn name(&self) -> &'static str {
        FunctionPass::name(self)
    }

    fn transform(&self, mut unit: CompilationUnit) -> Result<PassOutcome, CoreError> {
        let mut changed = false;
        for function in &mut unit.functions {
            changed |= self.run(function)?;
        }
        Ok(PassOutcome { unit, changed })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Largest callee, in statements plus terminators, that is inlined.
    pub inline_budget: usize,
    pub max_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            inline_budget: 24,
            max_iterations: 16,
        }
    }
}

pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Optimizer {
            passes: vec![
                Box::new(tail_rec::TailRecursion),
                Box::new(inline::Inliner {
                    budget: config.inline_budget,
                }),
                Box::new(const_fold::ConstantFolding),
                Box::new(copy_prop::CopyPropagation),
                Box::new(cse::CommonSubexpressions),
                Box::new(dce::DeadCode),
                Box::new(unreachable::UnreachableBlocks),
            ],
            config,
        }
    }

    pub fn with_passes(passes: Vec<Box<dyn Pass>>, config: OptimizerConfig) -> Self {
        Optimizer { passes, config }
    }

    pub fn run(&self, mut unit: CompilationUnit) -> Result<CompilationUnit, CoreError> {
        for iteration in 0..self.config.max_iterations {
            let mut changed = false;
            for pass in &self.passes {
                let outcome = pass.transform(unit)?;
                if outcome.changed {
                    tracing::trace!(pass = pass.name(), iteration, "pass changed the unit");
                }
                changed |= outcome.changed;
                unit = outcome.unit;
            }
            if !changed {
                tracing::debug!(iterations = iteration + 1, "optimizer reached a fixpoint");
                return Ok(unit);
            }
        }
        tracing::debug!(
            iterations = self.config.max_iterations,
            "optimizer stopped at the iteration cap"
        );
        Ok(unit)
    }
}

pub fn optimize(unit: CompilationUnit, config: OptimizerConfig) -> Result<CompilationUnit, CoreError> {
    let unit = Optimizer::new(config).run(unit)?;
    unit.validate()?;
    Ok(unit)
}

/// How many times each variable is written. Parameters count once.
pub(crate) fn definition_counts(function: &Function) -> HashMap<VarId, usize> {
    let mut counts: HashMap<VarId, usize> = HashMap::new();
    for parameter in &function.parameters {
        *counts.entry(*parameter).or_default() += 1;
    }
    for block in &function.blocks {
        for statement in &block.statements {
            if let Some(dest) = statement.dest() {
                *counts.entry(dest).or_default() += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use crate::diagnostic::Diagnostics;
    use crate::hir_lower;
    use crate::interpreter::{Evaluation, evaluate};
    use crate::mir::CompilationUnit;
    use crate::mir_lower;
    use crate::parser::parse_module;
    use crate::span::ModuleReference;
    use crate::typecheck::type_check;

    /// Compile a single root module down to unoptimized MIR.
    pub fn lower(source: &str) -> CompilationUnit {
        let module = ModuleReference::root();
        let mut diagnostics = Diagnostics::new();
        let parsed = parse_module(&module, source, &mut diagnostics);
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let mut modules = BTreeMap::new();
        modules.insert(module, parsed);
        let checked = type_check(&modules);
        assert!(checked.diagnostics.is_empty(), "{}", checked.diagnostics);
        let hir = hir_lower::lower_program(&checked.modules, &checked.interface).expect("hir");
        mir_lower::lower_program(&hir).expect("mir")
    }

    pub fn run(unit: &CompilationUnit) -> Evaluation {
        let entry = unit.entry.clone().expect("entry point");
        evaluate(unit, &entry).expect("evaluate")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{lower, run};
    use super::*;

    #[test]
    fn pipeline_preserves_behaviour_and_shrinks_code() {
        let unit = lower(
            "class Main {
  function square(x: int): int = x * x
  function main(): unit = {
    val a = 3 + 4;
    val b = Main.square(a);
    val _ = Builtins.println(Builtins.intToString(b + a * 0));
  }
}",
        );
        let before = run(&unit);
        let size_before: usize = unit.functions.iter().map(Function::size).sum();
        let optimized = optimize(unit, OptimizerConfig::default()).expect("optimize");
        let size_after: usize = optimized.functions.iter().map(Function::size).sum();
        assert_eq!(run(&optimized), before);
        assert_eq!(before.stdout, "49\n");
        assert!(size_after < size_before);
    }

    #[test]
    fn driver_stops_at_the_iteration_cap() {
        struct AlwaysChanged;
        impl Pass for AlwaysChanged {
            fn name(&self) -> &'static str {
                "always"
            }
            fn transform(&self, unit: CompilationUnit) -> Result<PassOutcome, CoreError> {
                Ok(PassOutcome {
                    unit,
                    changed: true,
                })
            }
        }
        let optimizer = Optimizer::with_passes(
            vec![Box::new(AlwaysChanged)],
            OptimizerConfig {
                inline_budget: 0,
                max_iterations: 3,
            },
        );
        assert!(optimizer.run(CompilationUnit::default()).is_ok());
    }
}
