//! Compiled wasm must behave exactly like the MIR evaluator.

use std::collections::BTreeMap;

use tern_core::builtins::{DIVISION_BY_ZERO, conversion_failure};
use tern_core::interpreter::{Outcome, evaluate};
use tern_core::{CompilerOptions, ModuleReference, compile};
use tern_host::{RunOutcome, run_wasm};

fn compile_root(source: &str, optimize: bool) -> tern_core::CompilationArtifact {
    let mut sources = BTreeMap::new();
    sources.insert(ModuleReference::root(), source.to_string());
    let options = CompilerOptions {
        optimize,
        ..CompilerOptions::default()
    };
    compile(&sources, &options).expect("compile")
}

/// Runs `source` both ways and returns what the host observed.
fn assert_parity(source: &str) -> (String, RunOutcome) {
    let mut observed = None;
    for optimize in [false, true] {
        let artifact = compile_root(source, optimize);
        let entry = artifact.mir.entry.clone().expect("entry");
        let expected = evaluate(&artifact.mir, &entry).expect("evaluate");
        let actual = run_wasm(&artifact.wasm).expect("run");
        assert_eq!(actual.stdout, expected.stdout, "stdout, optimize={optimize}");
        let expected_outcome = match expected.outcome {
            Outcome::Returned(value) => RunOutcome::Returned(value),
            Outcome::Panicked(message) => RunOutcome::Panicked(message),
            Outcome::StackOverflow => RunOutcome::StackOverflow,
            other => panic!("evaluator did not finish: {other:?}"),
        };
        assert_eq!(actual.outcome, expected_outcome, "outcome, optimize={optimize}");
        if let Some((stdout, outcome)) = &observed {
            assert_eq!(&actual.stdout, stdout);
            assert_eq!(&actual.outcome, outcome);
        }
        observed = Some((actual.stdout, actual.outcome));
    }
    observed.expect("two runs")
}

#[test]
fn arithmetic_wraps_like_the_evaluator() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function show(n: int): unit = Builtins.println(Builtins.intToString(n))
  function main(): int = {
    val big = 2147483647;
    val _ = Main.show(big + 1);
    val _ = Main.show(-7 / 2);
    val _ = Main.show(-7 % 2);
    val _ = Main.show((0 - 2147483647 - 1) / (0 - 1));
    big * 2
  }
}",
    );
    assert_eq!(stdout, "-2147483648\n-3\n-1\n-2147483648\n");
    assert_eq!(outcome, RunOutcome::Returned(-2));
}

#[test]
fn division_by_zero_panics() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function divide(a: int, b: int): int = a / b
  function main(): int = {
    val _ = Builtins.println(\"dividing\");
    Main.divide(1, 0)
  }
}",
    );
    assert_eq!(stdout, "dividing\n");
    assert_eq!(outcome, RunOutcome::Panicked(DIVISION_BY_ZERO.to_string()));
}

#[test]
fn malformed_numbers_panic() {
    let (_, outcome) = assert_parity(
        "class Main {
  function main(): int = Builtins.stringToInt(\"4 2\") + 1
}",
    );
    assert_eq!(outcome, RunOutcome::Panicked(conversion_failure("4 2")));
}

#[test]
fn explicit_panics_stop_the_program() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function check(n: int): int = if n > 2 then Builtins.panic(\"too big: \" :: Builtins.intToString(n)) else n
  function main(): int = {
    val a = Main.check(1);
    val _ = Builtins.println(\"ok\");
    Main.check(a + 5)
  }
}",
    );
    assert_eq!(stdout, "ok\n");
    assert_eq!(outcome, RunOutcome::Panicked("too big: 6".to_string()));
}

#[test]
fn closures_capture_their_environment() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function twice(f: (int) -> int, x: int): int = f(f(x))
  function main(): int = {
    val step = 5;
    val add = (x: int) -> x + step;
    val _ = Builtins.println(Builtins.intToString(Main.twice(add, 1)));
    Main.twice((y: int) -> y * y, 3)
  }
}",
    );
    assert_eq!(stdout, "11\n");
    assert_eq!(outcome, RunOutcome::Returned(81));
}

#[test]
fn variants_and_records_survive_the_heap() {
    let (stdout, outcome) = assert_parity(
        "class Shape(Circle(int), Square(int)) {
  method area(): int = match (this) {
    | Circle r -> 3 * r * r
    | Square s -> s * s
  }
}
class Pair(val left: Shape, val right: Shape) {
  method total(): int = this.left.area() + this.right.area()
}
class Main {
  function main(): int = {
    val pair = Pair.init(Shape.Circle(2), Shape.Square(5));
    val { left, right as other } = pair;
    val _ = Builtins.println(Builtins.intToString(left.area()) :: \"+\" :: Builtins.intToString(other.area()));
    pair.total()
  }
}",
    );
    assert_eq!(stdout, "12+25\n");
    assert_eq!(outcome, RunOutcome::Returned(37));
}

#[test]
fn loops_through_tail_calls_and_strings() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function count(n: int, acc: string): string =
    if n == 0 then acc else Main.count(n - 1, acc :: Builtins.intToString(n))
  function main(): unit = Builtins.println(Main.count(9, \"\") :: \"|\" :: Builtins.intToString(Builtins.stringToInt(\"-120\")))
}",
    );
    assert_eq!(stdout, "987654321|-120\n");
    assert_eq!(outcome, RunOutcome::Returned(0));
}

#[test]
fn deep_non_tail_recursion_returns() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function total(n: int): int = if n == 0 then 0 else n + Main.total(n - 1)
  function main(): int = {
    val _ = Builtins.println(Builtins.intToString(Main.total(1000)));
    Main.total(4000)
  }
}",
    );
    assert_eq!(stdout, "500500\n");
    assert_eq!(outcome, RunOutcome::Returned(8002000));
}

#[test]
fn unbounded_recursion_overflows_on_both_sides() {
    let (stdout, outcome) = assert_parity(
        "class Main {
  function down(n: int): int = 1 + Main.down(n + 1)
  function main(): int = {
    val _ = Builtins.println(\"descending\");
    Main.down(0)
  }
}",
    );
    assert_eq!(stdout, "descending\n");
    assert_eq!(outcome, RunOutcome::StackOverflow);
}
