//! The optimizer must not change what a program prints or how it ends.

use std::collections::BTreeMap;

use tern_core::codegen_wasm::emit_wasm;
use tern_core::interpreter::{Evaluation, Outcome, evaluate};
use tern_core::mir::CompilationUnit;
use tern_core::optimizer::{OptimizerConfig, optimize};
use tern_core::{CompilerOptions, ModuleReference, compile};

const CORPUS: &[(&str, &str)] = &[
    (
        "arithmetic",
        "class Main {
  function show(n: int): unit = Builtins.println(Builtins.intToString(n))
  function main(): int = {
    val a = 2147483647;
    val _ = Main.show(a + 1);
    val _ = Main.show(17 / 5 * 5 + 17 % 5);
    val _ = Main.show(-17 / 5);
    val _ = Main.show((a - a) * 3 + 4);
    a * 3
  }
}",
    ),
    (
        "comparisons",
        "class Main {
  function sign(n: int): int = if n < 0 then -1 else if n == 0 then 0 else 1
  function between(n: int, lo: int, hi: int): bool = if n >= lo then n <= hi else false
  function main(): int = {
    val _ = Builtins.println(Builtins.intToString(Main.sign(-4) + Main.sign(0) * 10 + Main.sign(9) * 100));
    if Main.between(5, 1, 5) then (if Main.between(6, 1, 5) then 2 else 1) else 0
  }
}",
    ),
    (
        "recursion",
        "class Main {
  function fib(n: int): int = if n < 2 then n else Main.fib(n - 1) + Main.fib(n - 2)
  function sum(n: int, acc: int): int = if n == 0 then acc else Main.sum(n - 1, acc + n)
  function main(): int = {
    val _ = Builtins.println(Builtins.intToString(Main.fib(15)));
    Main.sum(10000, 0)
  }
}",
    ),
    (
        "variants",
        "class Shape(Circle(int), Rect(int), Empty(unit)) {
  method area(): int = match (this) {
    | Circle r -> 3 * r * r
    | Rect s -> s * s
    | Empty _ -> 0
  }
  method describe(): string = match (this) {
    | Circle _ -> \"circle\"
    | Rect _ -> \"rect\"
    | Empty _ -> \"empty\"
  }
}
class Main {
  function report(s: Shape): unit = Builtins.println(s.describe() :: \"=\" :: Builtins.intToString(s.area()))
  function main(): unit = {
    val _ = Main.report(Shape.Circle(3));
    val _ = Main.report(Shape.Rect(4));
    Main.report(Shape.Empty({}))
  }
}",
    ),
    (
        "records",
        "class Point(val x: int, val y: int) {
  method plus(other: Point): Point = Point.init(this.x + other.x, this.y + other.y)
  method show(): string = \"(\" :: Builtins.intToString(this.x) :: \",\" :: Builtins.intToString(this.y) :: \")\"
}
class Main {
  function main(): int = {
    val p = Point.init(1, 2).plus(Point.init(10, 20));
    val { x, y as vertical } = p;
    val _ = Builtins.println(p.show());
    x * vertical
  }
}",
    ),
    (
        "closures",
        "class Main {
  function apply(f: (int) -> int, n: int): int = f(n)
  function compose(f: (int) -> int, g: (int) -> int): (int) -> int = (x: int) -> f(g(x))
  function main(): int = {
    val offset = 100;
    val shift = (x: int) -> x + offset;
    val square = (x: int) -> x * x;
    val both = Main.compose(shift, square);
    val _ = Builtins.println(Builtins.intToString(both(7)));
    Main.apply(Main.compose(square, shift), 1)
  }
}",
    ),
    (
        "strings",
        "class Main {
  function repeat(s: string, n: int, acc: string): string =
    if n == 0 then acc else Main.repeat(s, n - 1, acc :: s)
  function main(): int = {
    val _ = Builtins.println(Main.repeat(\"ab\", 3, \"\"));
    val _ = Builtins.println(\"\");
    Builtins.stringToInt(\"-\" :: Builtins.intToString(12) :: \"3\")
  }
}",
    ),
    (
        "division_by_zero",
        "class Main {
  function ratio(a: int, b: int): int = a / b
  function main(): int = {
    val _ = Builtins.println(\"start\");
    val unused = Main.ratio(5, 0);
    1
  }
}",
    ),
    (
        "conversion_failure",
        "class Main {
  function main(): int = {
    val _ = Builtins.println(\"parsing\");
    Builtins.stringToInt(\"12x\")
  }
}",
    ),
    (
        "explicit_panic",
        "class Main {
  function checked(n: int): int = if n > 10 then Builtins.panic(\"limit\") else n
  function main(): int = Main.checked(5) + Main.checked(50)
}",
    ),
];

fn unoptimized(source: &str) -> CompilationUnit {
    let mut sources = BTreeMap::new();
    sources.insert(ModuleReference::root(), source.to_string());
    let options = CompilerOptions {
        optimize: false,
        ..CompilerOptions::default()
    };
    compile(&sources, &options).expect("compile").mir
}

fn run(unit: &CompilationUnit) -> Evaluation {
    let entry = unit.entry.clone().expect("entry");
    evaluate(unit, &entry).expect("evaluate")
}

#[test]
fn optimization_preserves_observable_behaviour() {
    for (name, source) in CORPUS {
        let unit = unoptimized(source);
        let before = run(&unit);
        let optimized = optimize(unit.clone(), OptimizerConfig::default()).expect("optimize");
        let after = run(&optimized);
        assert_eq!(before, after, "{name}");
        assert!(
            optimized.functions.iter().map(|f| f.size()).sum::<usize>()
                <= unit.functions.iter().map(|f| f.size()).sum::<usize>() * 4,
            "{name}: optimized code exploded"
        );
    }
}

#[test]
fn every_corpus_program_finishes() {
    for (name, source) in CORPUS {
        let evaluation = run(&unoptimized(source));
        assert!(
            matches!(evaluation.outcome, Outcome::Returned(_) | Outcome::Panicked(_)),
            "{name}: {:?}",
            evaluation.outcome
        );
    }
}

#[test]
fn corpus_results_match_hand_computed_values() {
    let expectations: &[(&str, &str, Outcome)] = &[
        (
            "arithmetic",
            "-2147483648\n17\n-3\n4\n",
            Outcome::Returned(2147483645),
        ),
        ("comparisons", "99\n", Outcome::Returned(1)),
        ("recursion", "610\n", Outcome::Returned(50005000)),
        ("variants", "circle=27\nrect=16\nempty=0\n", Outcome::Returned(0)),
        ("records", "(11,22)\n", Outcome::Returned(242)),
        ("closures", "149\n", Outcome::Returned(10201)),
        ("strings", "ababab\n\n", Outcome::Returned(-123)),
        (
            "division_by_zero",
            "start\n",
            Outcome::Panicked("Division by zero".to_string()),
        ),
        (
            "conversion_failure",
            "parsing\n",
            Outcome::Panicked("Cannot convert `12x` to int.".to_string()),
        ),
        ("explicit_panic", "", Outcome::Panicked("limit".to_string())),
    ];
    for (name, stdout, outcome) in expectations {
        let source = CORPUS
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, source)| *source)
            .expect("corpus entry");
        for optimized in [false, true] {
            let mut unit = unoptimized(source);
            if optimized {
                unit = optimize(unit, OptimizerConfig::default()).expect("optimize");
            }
            let evaluation = run(&unit);
            assert_eq!(evaluation.stdout, *stdout, "{name}, optimized={optimized}");
            assert_eq!(evaluation.outcome, *outcome, "{name}, optimized={optimized}");
        }
    }
}

#[test]
fn emitted_modules_validate() {
    for (name, source) in CORPUS {
        let unit = unoptimized(source);
        for unit in [unit.clone(), optimize(unit, OptimizerConfig::default()).expect("optimize")] {
            let bytes = emit_wasm(&unit).expect("emit");
            wasmparser::Validator::new()
                .validate_all(&bytes)
                .unwrap_or_else(|error| panic!("{name}: {error}"));
        }
    }
}

#[test]
fn zero_iteration_budget_leaves_the_unit_alone() {
    let unit = unoptimized(CORPUS[2].1);
    let config = OptimizerConfig {
        max_iterations: 0,
        ..OptimizerConfig::default()
    };
    let untouched = optimize(unit.clone(), config).expect("optimize");
    assert_eq!(untouched.to_string(), unit.to_string());
}
