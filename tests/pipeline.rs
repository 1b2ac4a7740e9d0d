use indoc::indoc;
use pretty_assertions::assert_eq;

use xlang::ast::{BinaryOperator, Expression, Statement};
use xlang::token::TokenKind;
use xlang::{CompileError, Dialect, IndexAssignment, Options, lexer, parse_source, run_captured};

fn run_full(source: &str) -> (i64, String) {
    let execution = run_captured(source, Options::default(), "").expect("program compiles");
    (execution.exit_code, execution.output)
}

#[test]
fn indentation_tokens_balance_at_end_of_input() {
    let source = "loop 1:\n    if 1:\n        show 1\n";
    let tokens = lexer::tokenize(source, Dialect::Basic).expect("tokenize");
    let indents = tokens.iter().filter(|t| *t.kind() == TokenKind::Indent).count();
    let dedents = tokens.iter().filter(|t| *t.kind() == TokenKind::Dedent).count();
    assert_eq!(indents, 2);
    assert_eq!(dedents, 2);
    assert_eq!(tokens.last().map(|t| t.kind().clone()), Some(TokenKind::EOF));
}

#[test]
fn multiplication_nests_under_addition() {
    let program = parse_source("1 + 2 * 3", Dialect::Full).expect("parse");
    assert_eq!(
        program.statements,
        vec![Statement::ExprStmt(Expression::binary(
            Expression::Number(1),
            BinaryOperator::Add,
            Expression::binary(
                Expression::Number(2),
                BinaryOperator::Mul,
                Expression::Number(3)
            ),
        ))]
    );
}

#[test]
fn range_loop_is_inclusive() {
    let (_, output) = run_full("for x in 1 to 3 { print(x) }");
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn basic_counting_loop() {
    let source = indoc! {"
        make x = 0
        loop x < 5:
            show x
            make x = x + 1
        stop
        show x
    "};
    let execution = run_captured(source, Options::new(Dialect::Basic), "").expect("compile");
    assert_eq!(execution.output, "0\n1\n2\n3\n4\n5\n");
    assert_eq!(execution.exit_code, 0);
}

#[test]
fn prime_test_builtin() {
    let (_, output) = run_full("print(isPrime(1))\nprint(isPrime(2))\nprint(isPrime(17))\nprint(isPrime(18))");
    assert_eq!(output, "0\n1\n1\n0\n");
}

#[test]
fn push_then_length_and_pop_on_empty() {
    let (code, _) = run_full("a = []\npush(a, 42)\nreturn length(a)");
    assert_eq!(code, 1);
    let (code, _) = run_full("a = []\nreturn pop(a)");
    assert_eq!(code, 0);
}

#[test]
fn function_without_return_yields_zero() {
    let (code, _) = run_full("func f() { x = 5 }\nreturn f() + 7");
    assert_eq!(code, 7);
}

#[test]
fn unassigned_variable_reads_zero() {
    let (code, _) = run_full("return ghost + 1");
    assert_eq!(code, 1);
}

#[test]
fn exit_code_is_mains_return_value() {
    let (code, output) = run_full("print(\"bye\")\nreturn 3");
    assert_eq!(code, 3);
    assert_eq!(output, "bye\n");
}

#[test]
fn index_assignment_modes() {
    let source = indoc! {"
        xs = [1, 2, 3]
        xs[0] = 9
        xs[3] = 4
        return xs[0] * 1000 + xs[2] * 100 + xs[3] * 10 + length(xs)
    "};
    let overwrite = run_captured(source, Options::default(), "").expect("compile");
    assert_eq!(overwrite.exit_code, 9344);

    let legacy = Options::default().with_index_assignment(IndexAssignment::TailReplace);
    let tail_replace = run_captured(source, legacy, "").expect("compile");
    // [1, 2, 9] after the non-append write, then 4 appended.
    assert_eq!(tail_replace.exit_code, 1944);
}

#[test]
fn early_return_inside_loops() {
    let source = indoc! {"
        func first_even(xs) {
            for x in xs {
                if x % 2 == 0 { return x }
            }
            return -1
        }
        func find(limit) {
            i = 0
            while 1 {
                if i * i > limit { return i }
                i = i + 1
            }
        }
        print(first_even([3, 5, 6, 8]))
        print(first_even([1]))
        print(find(50))
    "};
    let (_, output) = run_full(source);
    assert_eq!(output, "6\n-1\n8\n");
}

#[test]
fn print_classification_follows_string_literals() {
    let (_, output) = run_full("print(\"text\")\nprint(40 + 2)");
    assert_eq!(output, "text\n42\n");
}

#[test]
fn errors_are_reported_per_stage() {
    let lex = run_captured("x = 1 $", Options::default(), "").err().expect("lex error");
    assert!(matches!(lex, CompileError::Lex(_)));

    let syntax = run_captured("x = ", Options::default(), "").err().expect("syntax error");
    assert!(matches!(syntax, CompileError::Syntax(ref err) if err.line == 1));

    let codegen = run_captured("missing()", Options::default(), "")
        .err()
        .expect("codegen error");
    assert!(matches!(codegen, CompileError::Codegen(_)));
}

#[test]
fn range_bounds_are_evaluated_once() {
    let source = indoc! {"
        n = 3
        for i in 1 to n {
            n = 10
            print(i)
        }
    "};
    let (_, output) = run_full(source);
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn for_in_over_text_runs_once_per_character() {
    let source = indoc! {"
        s = \"abc\"
        k = 0
        for c in s { k = k + 1 }
        return k
    "};
    let (code, _) = run_full(source);
    assert_eq!(code, 3);
}

#[test]
fn for_in_body_sees_the_drained_collection() {
    let source = indoc! {"
        xs = [1, 2, 3]
        for x in xs { print(length(xs)) }
        return length(xs)
    "};
    let (code, output) = run_full(source);
    assert_eq!(output, "0\n1\n2\n");
    assert_eq!(code, 3);
}
