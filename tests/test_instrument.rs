use pseudotest::instrument::{self, Instrumented};
use pseudotest::operators::Selection;
use pseudotest::{parser, Error};

fn run(source: &str, file: &str, selection: &Selection) -> Instrumented {
    let sites = parser::build_catalog(source, file, selection).unwrap();
    instrument::instrument(source, file, &sites).unwrap()
}

fn sdl(kinds: &[&str]) -> Selection {
    let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
    Selection::from_lists(&[], &kinds).unwrap()
}

fn xmt_only() -> Selection {
    Selection::from_lists(&["*".to_string()], &[]).unwrap()
}

const PROLOGUE: &str = "import pseudotest_runtime as _pseudotest  # pseudotest: instrumented\n";

#[test]
fn xmt_and_return_guards() {
    let source = "def add(a, b):\n    return a + b\n";
    let out = run(source, "calculator.py", &Selection::all());
    let expected = format!(
        "{PROLOGUE}def add(a, b):\n    if _pseudotest.is_enabled(\"xmt:calculator:add:1\"):\n        return 0\n    if not _pseudotest.is_enabled(\"sdl-return:calculator:add:1\"): return a + b\n"
    );
    assert_eq!(out.source, expected);
    assert_eq!(out.entries.len(), 2);
    assert!(out.dropped.is_empty());
}

#[test]
fn if_condition_is_forced_false() {
    let source = "def clamp(x):\n    if x > 100:\n        return 100\n    return x\n";
    let out = run(source, "calculator.py", &sdl(&["if"]));
    let expected = format!(
        "{PROLOGUE}def clamp(x):\n    if not _pseudotest.is_enabled(\"sdl-if:calculator:clamp:1\") and (x > 100):\n        return 100\n    return x\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn while_and_for_skip_their_bodies() {
    let source = "def drain(items):\n    while items:\n        items.pop()\n    for x in items:\n        print(x)\n";
    let out = run(source, "m.py", &sdl(&["while", "for"]));
    let expected = format!(
        "{PROLOGUE}def drain(items):\n    while not _pseudotest.is_enabled(\"sdl-while:m:drain:1\") and (items):\n        items.pop()\n    for x in (items) if not _pseudotest.is_enabled(\"sdl-for:m:drain:1\") else ():\n        print(x)\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn try_is_wrapped_and_reindented() {
    let source = "def load(path):\n    try:\n        return open(path).read()\n    except OSError:\n        return \"\"\n";
    let out = run(source, "io_utils.py", &sdl(&["try"]));
    let expected = format!(
        "{PROLOGUE}def load(path):\n    if not _pseudotest.is_enabled(\"sdl-try:io_utils:load:1\"):\n        try:\n            return open(path).read()\n        except OSError:\n            return \"\"\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn entry_guard_goes_before_a_wrapped_try() {
    let source = "def f():\n    try:\n        return 1\n    except ValueError:\n        return 2\n";
    let out = run(source, "m.py", &Selection::all());
    let expected = format!(
        "{PROLOGUE}def f():\n    if _pseudotest.is_enabled(\"xmt:m:f:1\"):\n        return 0\n    if not _pseudotest.is_enabled(\"sdl-try:m:f:1\"):\n        try:\n            if not _pseudotest.is_enabled(\"sdl-return:m:f:1\"): return 1\n        except ValueError:\n            if not _pseudotest.is_enabled(\"sdl-return:m:f:2\"): return 2\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn entry_guard_follows_docstring_and_annotation() {
    let source = "def greet(name: str) -> str:\n    \"\"\"Say hello.\"\"\"\n    return \"hi \" + name\n";
    let out = run(source, "m.py", &xmt_only());
    let expected = format!(
        "{PROLOGUE}def greet(name: str) -> str:\n    \"\"\"Say hello.\"\"\"\n    if _pseudotest.is_enabled(\"xmt:m:greet:1\"):\n        return \"\"\n    return \"hi \" + name\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn docstring_only_callable_gets_guard_at_end_of_file() {
    let source = "def todo():\n    \"\"\"Not yet.\"\"\"\n";
    let out = run(source, "m.py", &xmt_only());
    let expected = format!(
        "{PROLOGUE}def todo():\n    \"\"\"Not yet.\"\"\"\n    if _pseudotest.is_enabled(\"xmt:m:todo:1\"):\n        return None\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn prologue_follows_module_docstring_and_future_imports() {
    let source = "\"\"\"Tools.\"\"\"\nfrom __future__ import annotations\n\ndef f():\n    return 1\n";
    let out = run(source, "m.py", &xmt_only());
    let expected = format!(
        "\"\"\"Tools.\"\"\"\nfrom __future__ import annotations\n\n{PROLOGUE}def f():\n    if _pseudotest.is_enabled(\"xmt:m:f:1\"):\n        return 0\n    return 1\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn tab_indented_sources_keep_tabs() {
    let source = "def f(x):\n\tif x:\n\t\treturn 1\n\treturn 0\n";
    let out = run(source, "m.py", &xmt_only());
    let expected = format!(
        "{PROLOGUE}def f(x):\n\tif _pseudotest.is_enabled(\"xmt:m:f:1\"):\n\t\treturn 0\n\tif x:\n\t\treturn 1\n\treturn 0\n"
    );
    assert_eq!(out.source, expected);
}

#[test]
fn crlf_line_endings_are_preserved() {
    let source = "def f():\r\n    return 1\r\n";
    let out = run(source, "m.py", &xmt_only());
    assert!(out.source.starts_with("import pseudotest_runtime as _pseudotest  # pseudotest: instrumented\r\n"));
    assert!(out.source.contains("        return 0\r\n"));
    assert!(!out.source.replace("\r\n", "").contains('\n'));
}

#[test]
fn byte_order_mark_stays_first() {
    let source = "\u{feff}def f():\n    return 1\n";
    let out = run(source, "bom.py", &xmt_only());
    let expected = format!(
        "\u{feff}{PROLOGUE}def f():\n    if _pseudotest.is_enabled(\"xmt:bom:f:1\"):\n        return 0\n    return 1\n"
    );
    assert_eq!(out.source, expected);
    assert_eq!(out.source.matches('\u{feff}').count(), 1);
    assert!(instrument::is_instrumented(&out.source));
}

#[test]
fn unsafe_sites_are_dropped_with_warnings() {
    let source = "def f(): return 1\n";
    let out = run(source, "m.py", &Selection::all());
    assert_eq!(out.source, source);
    assert!(out.entries.is_empty());
    assert_eq!(out.dropped.len(), 2);
    assert!(out.dropped.iter().all(|w| w.file == "m.py" && w.line == Some(1)));
    assert_eq!(out.dropped[0].mutant.as_deref(), Some("xmt:m:f:1"));
}

#[test]
fn dropped_sites_keep_later_ordinals_stable() {
    let source = "def f(x):\n    if x: return 1\n    if x > 1:\n        return 2\n";
    let out = run(source, "m.py", &sdl(&["if", "return"]));
    let ids: Vec<String> = out.entries.iter().map(|s| s.mutant_id()).collect();
    assert_eq!(ids, vec!["sdl-if:m:f:1", "sdl-if:m:f:2", "sdl-return:m:f:2"]);
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(out.dropped[0].mutant.as_deref(), Some("sdl-return:m:f:1"));
}

#[test]
fn file_without_sites_is_untouched() {
    let source = "X = 1\n";
    let out = run(source, "consts.py", &Selection::all());
    assert_eq!(out.source, source);
    assert!(out.entries.is_empty());
}

#[test]
fn instrumenting_is_deterministic() {
    let source = "def f(xs):\n    total = 0\n    for x in xs:\n        if x > 0:\n            total += x\n    return total\n";
    let first = run(source, "m.py", &Selection::all());
    let second = run(source, "m.py", &Selection::all());
    assert_eq!(first.source, second.source);
    let a: Vec<String> = first.entries.iter().map(|s| s.mutant_id()).collect();
    let b: Vec<String> = second.entries.iter().map(|s| s.mutant_id()).collect();
    assert_eq!(a, b);
}

#[test]
fn instrumented_output_parses() {
    let source = r#"
class Stack:
    def __init__(self):
        self.items = []

    def pop(self):
        """Remove the top item."""
        try:
            return self.items.pop()
        except IndexError:
            return None

    def drain(self):
        while self.items:
            if len(self.items) > 10:
                self.items.clear()
            self.pop()
"#;
    let out = run(source, "stack.py", &Selection::all());
    assert!(parser::parse(&out.source, "stack.py").is_ok());
    assert!(instrument::is_instrumented(&out.source));
}

#[test]
fn instrumented_source_is_refused() {
    let source = "def add(a, b):\n    return a + b\n";
    let out = run(source, "calculator.py", &Selection::all());
    let sites = parser::build_catalog(&out.source, "calculator.py", &Selection::all()).unwrap();
    let err = instrument::instrument(&out.source, "calculator.py", &sites).err().unwrap();
    assert!(matches!(err, Error::AlreadyInstrumented { .. }));
}
