use std::collections::BTreeMap;

use tern_core::diagnostic::Diagnostics;
use tern_core::mir::{BinaryOp, CompilationUnit, Condition, Operand, VarId};
use tern_core::optimizer::Pass;
use tern_core::optimizer::dce::DeadCode;
use tern_core::parser::parse_module;
use tern_core::printer::print_module;
use tern_core::services::LocationLookup;
use tern_core::typecheck::type_check;
use tern_core::{
    CompilerOptions, ErrorKind, Location, ModuleReference, Position, check_sources, compile,
    format_source,
};

const PROGRAM: &str = "class Counter(val start: int, private val step: int) {
  method advance(times: int): int = if times == 0 then this.start else Counter.init(this.start + this.step, this.step).advance(times - 1)
}
class Tag(Named(string), Anonymous(unit))
class Main {
  function label(t: Tag): string = match (t) { | Named n -> n | Anonymous _ -> \"?\" }
  function main(): int = {
    val counter = Counter.init(3, 4);
    val { start } = counter;
    val twice = (x: int) -> x * 2;
    val _ = Builtins.println(Main.label(Tag.Named(\"c\")) :: Main.label(Tag.Anonymous({})));
    twice(counter.advance(5)) - start
  }
}";

fn root(source: &str) -> BTreeMap<ModuleReference, String> {
    BTreeMap::from([(ModuleReference::root(), source.to_string())])
}

fn unoptimized(source: &str) -> CompilationUnit {
    let options = CompilerOptions {
        optimize: false,
        ..CompilerOptions::default()
    };
    compile(&root(source), &options).expect("compile").mir
}

#[test]
fn inverting_a_condition_twice_is_the_identity() {
    assert_eq!(Condition::One.invert(), Some(Condition::Zero));
    assert_eq!(Condition::Zero.invert(), Some(Condition::One));
    let comparisons = [
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Eq,
        BinaryOp::Ne,
    ];
    for op in comparisons {
        let condition = Condition::Compare {
            op,
            lhs: Operand::Var(VarId(0)),
            rhs: Operand::Const(7),
        };
        let inverted = condition.invert().expect("comparison");
        assert_ne!(inverted, condition);
        assert_eq!(inverted.invert(), Some(condition.clone()));
        for (lhs, rhs) in [(0, 7), (7, 7), (9, 7), (-3, 7)] {
            assert_ne!(
                op.evaluate(lhs, rhs),
                op.complement().and_then(|inverse| inverse.evaluate(lhs, rhs)),
                "{op:?} at {lhs}, {rhs}"
            );
        }
    }
}

#[test]
fn dead_code_elimination_is_idempotent() {
    let unit = unoptimized(PROGRAM);
    let once = DeadCode.transform(unit).expect("dce").unit;
    let twice = DeadCode.transform(once.clone()).expect("dce");
    assert!(!twice.changed);
    assert_eq!(twice.unit.to_string(), once.to_string());
}

#[test]
fn printing_a_checked_module_round_trips() {
    let reference = ModuleReference::root();
    let mut diagnostics = Diagnostics::new();
    let parsed = parse_module(&reference, PROGRAM, &mut diagnostics);
    assert!(diagnostics.is_empty(), "{diagnostics}");
    let checked = type_check(&BTreeMap::from([(reference.clone(), parsed)]));
    assert!(checked.diagnostics.is_empty(), "{}", checked.diagnostics);
    let printed = print_module(&checked.modules[&reference]);

    let rechecked = check_sources(&root(&printed));
    assert!(rechecked.diagnostics.is_empty(), "{}", rechecked.diagnostics);
    assert_eq!(print_module(&rechecked.modules[&reference]), printed);
}

#[test]
fn formatter_normalizes_or_leaves_input_alone() {
    assert_eq!(format_source("class  Foo {}"), "class Foo\n");
    assert_eq!(format_source("class"), "class");
    let output = check_sources(&root("class"));
    assert!(!output.diagnostics.is_empty());
    assert!(output.diagnostics.iter().any(|d| d.kind == ErrorKind::SyntaxError));
}

#[test]
fn a_string_body_for_an_int_function_is_one_mismatch() {
    let output = check_sources(&root("class Main { function main(): int = \"haha\" }"));
    let kinds: Vec<_> = output.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::TypeMismatch]);
}

#[test]
fn the_smallest_enclosing_range_wins() {
    let module = ModuleReference::root();
    let at = |line, col| Position::new(line, col);
    let mut lookup = LocationLookup::new();
    lookup.set(&module, Location::new(at(0, 0), at(10, 0)), "file");
    lookup.set(&module, Location::new(at(2, 0), at(4, 20)), "class");
    lookup.set(&module, Location::new(at(3, 4), at(3, 30)), "member");
    lookup.set(&module, Location::new(at(3, 10), at(3, 14)), "name");

    assert_eq!(
        lookup.get_best_location(&module, at(3, 12)),
        Some(Location::new(at(3, 10), at(3, 14)))
    );
    assert_eq!(lookup.get(&module, at(3, 20)).map(|(_, v)| *v), Some("member"));
    assert_eq!(lookup.get(&module, at(1, 0)).map(|(_, v)| *v), Some("file"));
    assert_eq!(lookup.get(&module, at(11, 0)), None);
    assert_eq!(lookup.get(&ModuleReference::new(["other"]), at(3, 12)), None);
}
