use aurora::{Error, RuntimeErrorKind, Value, Vm, compile_source, eval};

fn run(source: &str) -> Vm {
    let program = compile_source(source).unwrap_or_else(|e| panic!("compile failed: {}", e));
    let mut vm = Vm::new(&program);
    vm.run().unwrap_or_else(|e| panic!("run failed: {}", e));
    vm
}

fn number(vm: &Vm, name: &str) -> f64 {
    match vm.global(name) {
        Some(Value::Number(n)) => *n,
        other => panic!("`{}` is {:?}, not a number", name, other),
    }
}

// --- Whole programs ---

#[test]
fn bubble_sort_in_place() {
    let vm = run(r#"
# sort a list of numbers in place
sub sort l, n
  i = 0
  while i < n do
    j = 0
    while j < n - i - 1 do
      if l:j > l:(j + 1) then
        t = l:j
        l:j = l:(j + 1)
        l:(j + 1) = t
      end
      j += 1
    end
    i += 1
  end
end

data = {5, 3, 9, 1, 4}
sort(data, 5)
a = data:0
b = data:2
c = data:4
"#);
    assert_eq!(number(&vm, "a"), 1.0);
    assert_eq!(number(&vm, "b"), 4.0);
    assert_eq!(number(&vm, "c"), 9.0);
}

#[test]
fn primes_below_fifty() {
    let vm = run(r#"
fn is_prime n
  if n < 2 then return false end
  d = 2
  while d * d <= n do
    if n % d == 0 then return false end
    d += 1
  end
  return true
end

count = 0
last = 0
n = 0
while n < 50 do
  if is_prime(n) then
    count += 1
    last = n
  end
  n += 1
end
"#);
    assert_eq!(number(&vm, "count"), 15.0);
    assert_eq!(number(&vm, "last"), 47.0);
}

#[test]
fn higher_order_functions() {
    let source = r#"
fn map f, l, n
  out = {0, 0, 0}
  i = 0
  for x, l do
    out:i = f(x)
    i += 1
  end
  return out
end

fn square x -> x * x
fn sum l
  s = 0
  for x, l do s += x end
  return s
end

return sum(map(square, {1, 2, 3}, 3))
"#;
    assert_eq!(eval(source).unwrap(), Value::Number(14.0));
}

#[test]
fn mutual_recursion_through_globals() {
    let source = r#"
fn even n
  if n == 0 then return true end
  return odd(n - 1)
end
fn odd n
  if n == 0 then return false end
  return even(n - 1)
end
return even(10) and odd(7)
"#;
    assert_eq!(eval(source).unwrap(), Value::Bool(true));
}

#[test]
fn nested_loops_break_only_the_inner_one() {
    let vm = run(r#"
pairs = 0
for a, {1, 2, 3} do
  for b, {1, 2, 3} do
    if b > a then break end
    pairs += 1
  end
end
"#);
    assert_eq!(number(&vm, "pairs"), 6.0);
}

#[test]
fn text_values_flow_through() {
    let vm = run("greeting = \"hello\"\nfn pick a, b -> b\nname = pick(greeting, \"world\")\nsame = name == \"world\"\n");
    assert_eq!(vm.global("name"), Some(&Value::text("world")));
    assert_eq!(vm.global("same"), Some(&Value::Bool(true)));
}

#[test]
fn program_without_return_yields_nil() {
    assert_eq!(eval("x = 1\n").unwrap(), Value::Nil);
    assert_eq!(eval("").unwrap(), Value::Nil);
}

// --- Errors ---

#[test]
fn runtime_errors_carry_location() {
    let err = eval("fn get l, i -> l:i\nl = {1, 2}\nx = get(l, 1)\ny = get(l, 2)\n").unwrap_err();
    let Error::Runtime(err) = err else { panic!("expected runtime error, got {:?}", err) };
    assert_eq!(err.kind, RuntimeErrorKind::IndexOutOfRange { index: 2.0, len: 2 });
    assert_eq!(err.function, "get");
    assert_eq!(err.line, 1);
}

#[test]
fn globals_survive_a_failed_run() {
    let program = compile_source("x = 1\ny = x + true\n").unwrap();
    let mut vm = Vm::new(&program);
    assert!(vm.run().is_err());
    assert_eq!(vm.global("x"), Some(&Value::Number(1.0)));
    assert_eq!(vm.global("y"), Some(&Value::Nil));
}

#[test]
fn one_compiled_program_runs_many_times() {
    let program = compile_source("counter = 0\ncounter += 1\nreturn counter\n").unwrap();
    for _ in 0..3 {
        assert_eq!(Vm::new(&program).run(), Ok(Value::Number(1.0)));
    }
}
