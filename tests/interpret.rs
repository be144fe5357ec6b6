mod common;

use common::{output, run, runtime_error};
use yapl::{InterpretError, ResultCode, RuntimeError, Value, Vm, VmOptions};

#[test]
fn arithmetic() {
    let (result, out) = run("puts(1 + 2);");
    assert_eq!(ResultCode::from(&result), ResultCode::Ok);
    assert_eq!(out, "3\n");
    assert_eq!(
        output("puts(7 % 3); puts(-7 % 3); puts(2 * 3 - 4 / 2); puts(1 / 0); puts(-0);"),
        "1\n-1\n4\ninf\n-0\n"
    );
}

#[test]
fn interned_strings_are_equal() {
    assert_eq!(
        output(r#"var x = "hi"; var y = "hi"; puts(x == y);"#),
        "true\n"
    );
    assert_eq!(
        output(r#"var a = "ab"; puts(a + "c" == "abc"); puts("foo" + "bar");"#),
        "true\nfoobar\n"
    );
}

#[test]
fn closure_mutates_captured_variable() {
    let src = "
fun make(n){ fun inc(){ return n = n + 1; } return inc; }
var c = make(10);
puts(c());
puts(c());
";
    assert_eq!(output(src), "11\n12\n");
}

#[test]
fn unbounded_recursion_overflows() {
    let (result, _) = run("fun f(){ f(); } f();");
    assert_eq!(ResultCode::from(&result), ResultCode::RuntimeError);
    let Err(InterpretError::Runtime(failure)) = result else {
        panic!("expected a runtime error");
    };
    assert_eq!(failure.error, RuntimeError::StackOverflow);
    assert_eq!(failure.trace.len(), yapl::VM_FRAMES_MAX);
    assert_eq!(failure.trace.last().unwrap().function, None);
    assert!(failure.to_string().contains("Stack overflow"));
}

#[test]
fn undefined_variable() {
    assert_eq!(
        runtime_error("puts(undefined_var);"),
        "[line 1] in <script>: Undefined variable 'undefined_var'."
    );
    assert_eq!(
        runtime_error("undefined_var = 1;"),
        "[line 1] in <script>: Undefined variable 'undefined_var'."
    );
}

#[test]
fn while_loop() {
    assert_eq!(
        output("var i = 0; while (i < 3) { puts(i); i = i + 1; }"),
        "0\n1\n2\n"
    );
}

#[test]
fn for_loop_and_prefix_operators() {
    assert_eq!(
        output("for (var i = 0; i < 3; ++i) print(i); puts(null);"),
        "012null\n"
    );
    assert_eq!(
        output("var i = 7; puts(++i); puts(--i); puts(i); { var j = 1; puts(--j); }"),
        "8\n7\n7\n0\n"
    );
}

#[test]
fn print_writes_no_newline() {
    assert_eq!(
        output(r#"print("a"); print(1.5); print(true); puts(puts);"#),
        "a1.5true<native fn>\n"
    );
    assert_eq!(
        output("fun f() {} puts(f); puts(0.1 + 0.2); puts(100000000000000000000);"),
        "<fn f>\n0.3\n1e+20\n"
    );
}

#[test]
fn falsiness() {
    let src = r#"
if (0) puts("yes"); else puts("no");
if ("") puts("yes"); else puts("no");
if (null) puts("yes"); else puts("no");
if ("a") puts("yes"); else puts("no");
puts(!1);
"#;
    assert_eq!(output(src), "no\nno\nno\nyes\nfalse\n");
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(
        output(r#"puts(null or "x"); puts(1 and 2); puts(false and crash()); puts(1 >= 2 or 2 <= 2);"#),
        "x\n2\nfalse\ntrue\n"
    );
}

#[test]
fn closures_share_a_variable() {
    let src = "
var get; var set;
fun make() {
  var v = 0;
  fun g() { return v; }
  fun s(x) { v = x; }
  get = g;
  set = s;
}
make();
set(5);
puts(get());
";
    assert_eq!(output(src), "5\n");
}

#[test]
fn block_locals_outlive_their_scope_when_captured() {
    let src = r#"
var f;
{
  var local = "inside";
  fun g() { return local; }
  f = g;
}
puts(f());
"#;
    assert_eq!(output(src), "inside\n");
}

#[test]
fn captures_through_several_levels() {
    let src = "
fun outer() {
  var a = 1;
  fun middle() {
    var b = 2;
    fun inner() { return a + b; }
    return inner;
  }
  return middle();
}
puts(outer()());
";
    assert_eq!(output(src), "3\n");
}

#[test]
fn recursion() {
    let src = "fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); } puts(fib(15));";
    assert_eq!(output(src), "610\n");
}

#[test]
fn runtime_errors() {
    assert_eq!(
        runtime_error("var a = 1; var a = 2;"),
        "[line 1] in <script>: Global variable 'a' is already defined."
    );
    assert_eq!(
        runtime_error("fun f(a) {} f();"),
        "[line 1] in <script>: Expected 1 arguments but got 0."
    );
    assert_eq!(
        runtime_error("var x = 1; x();"),
        "[line 1] in <script>: Can only call functions and closures."
    );
    assert_eq!(
        runtime_error(r#"puts(1 + "a");"#),
        "[line 1] in <script>: Operands must be two numbers or two strings."
    );
    assert_eq!(
        runtime_error(r#"puts(1 % "a");"#),
        "[line 1] in <script>: Operands must be numbers."
    );
    assert_eq!(
        runtime_error("puts(1, 2);"),
        "[line 1] in <script>: Native function 'puts' failed."
    );
}

#[test]
fn runtime_error_trace_lists_every_frame() {
    let src = r#"fun a() { b(); }
fun b() { return -"x"; }
a();"#;
    assert_eq!(
        runtime_error(src),
        "[line 2] in <fn b>: Operand must be a number.\n[line 1] in <fn a>\n[line 3] in <script>"
    );
}

#[test]
fn compile_errors_prevent_execution() {
    let (result, out) = run("puts(1);\nvar = 2;\n1 = 2;");
    assert_eq!(ResultCode::from(&result), ResultCode::CompileError);
    assert_eq!(out, "");
    let Err(InterpretError::Compile(errors)) = result else {
        panic!("expected compile errors");
    };
    assert_eq!(errors.len(), 2);
    assert_eq!(
        InterpretError::Compile(errors).to_string(),
        "[line 2] Error at '=': Expect variable name.\n[line 3] Error at '=': Invalid assignment target."
    );
}

#[test]
fn vm_is_reusable_after_errors() {
    let (mut vm, out) = common::vm();
    assert!(vm.interpret("puts(missing);").is_err());
    assert!(vm.interpret("var = ;").is_err());
    assert_eq!(vm.interpret("var kept = 1; puts(kept);"), Ok(()));
    assert_eq!(vm.interpret("puts(kept + 1);"), Ok(()));
    assert_eq!(out.contents(), "1\n2\n");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.global("kept"), Some(Value::Number(1.0)));
}

#[test]
fn no_upvalue_stays_open_after_returning() {
    let (mut vm, _) = common::vm();
    let src = "
fun make() { var a = 1; var b = 2; fun f() { return a + b; } return f; }
var f = make();
f();
";
    assert_eq!(vm.interpret(src), Ok(()));
    assert!(vm.open_upvalue_slots().is_empty());
}

#[cfg(unix)]
#[test]
fn clock_includes_cpu_time_used_before_the_vm_existed() {
    use std::time::{Duration, Instant};

    let busy_until = Instant::now() + Duration::from_millis(300);
    let mut spins = 0u64;
    while Instant::now() < busy_until {
        spins = std::hint::black_box(spins.wrapping_add(1));
    }
    assert_eq!(output("puts(clock() >= 0.2);"), "true\n");
}

#[test]
fn options_are_kept() {
    let options = VmOptions {
        script_name: Some("main.yapl".to_string()),
    };
    let vm = Vm::with_options(options, Box::new(std::io::sink())).unwrap();
    assert_eq!(vm.options().script_name.as_deref(), Some("main.yapl"));
}
