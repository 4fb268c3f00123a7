//! Trivial built-in `ScriptEngine` (SPEC_FULL §4): just enough of an
//! expression language to drive `<%= %>` output and `ns_return`-style early
//! exits, so the crate is runnable and testable without embedding a real
//! interpreter. Grounded on the `set`/`return` primitives of NaviServer's
//! Tcl ADP scripts (`examples/original_source/nsd/`), reduced to their
//! observable effect on the frame: variable storage and exception signaling,
//! nothing resembling a real parser or evaluator.

use std::collections::HashMap;

use crate::adp::eval::{AdpFrame, Exception, ScriptEngine, ScriptOutcome};

#[derive(Debug, Default)]
pub struct BasicEngine;

impl ScriptEngine for BasicEngine {
    /// Statements are `;`-separated; the value of the last one evaluated
    /// becomes the block's result (what `<%= %>` appends).
    fn eval(&self, source: &str, frame: &mut AdpFrame) -> ScriptOutcome {
        let mut result = String::new();
        for stmt in source.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            result = run_statement(stmt, frame);
            if frame.exception != Exception::Ok {
                break;
            }
        }
        ScriptOutcome::Value(result)
    }

    /// No tag-specific behavior of its own: a paired tag's body passes
    /// through unchanged, an unpaired tag produces nothing.
    fn eval_tag(
        &self,
        _name: &str,
        _attrs: &HashMap<String, String>,
        body: Option<&str>,
        _frame: &mut AdpFrame,
    ) -> ScriptOutcome {
        ScriptOutcome::Value(body.unwrap_or("").to_string())
    }
}

fn run_statement(stmt: &str, frame: &mut AdpFrame) -> String {
    let mut words = stmt.splitn(2, char::is_whitespace);
    let keyword = words.next().unwrap_or("");
    match keyword {
        "return" => {
            frame.exception = Exception::Return;
            String::new()
        }
        "break" => {
            frame.exception = Exception::Break;
            String::new()
        }
        "abort" => {
            frame.exception = Exception::Abort;
            String::new()
        }
        "set" => {
            let rest = words.next().unwrap_or("").trim();
            let mut parts = rest.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").to_string();
            let value = eval_expr(parts.next().unwrap_or("").trim(), frame);
            if !name.is_empty() {
                frame.vars.insert(name, value.clone());
            }
            value
        }
        _ => eval_expr(stmt, frame),
    }
}

/// `a + b + c`: numeric addition if every operand parses as a number,
/// string concatenation otherwise. A bare atom (no `+`) evaluates to itself.
fn eval_expr(expr: &str, frame: &AdpFrame) -> String {
    if !expr.contains('+') {
        return eval_atom(expr, frame);
    }
    let parts: Vec<String> = expr.split('+').map(|p| eval_atom(p.trim(), frame)).collect();
    let mut sum = 0.0f64;
    let mut all_numeric = true;
    for part in &parts {
        match part.parse::<f64>() {
            Ok(n) => sum += n,
            Err(_) => {
                all_numeric = false;
                break;
            }
        }
    }
    if all_numeric {
        format_number(sum)
    } else {
        parts.concat()
    }
}

fn eval_atom(atom: &str, frame: &AdpFrame) -> String {
    let atom = atom.trim();
    if let Some(inner) = atom.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner.to_string();
    }
    if let Some(name) = atom.strip_prefix('$') {
        return frame.vars.get(name).cloned().unwrap_or_default();
    }
    atom.to_string()
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_literal_evaluates_to_itself() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        match engine.eval("\"hello\"", &mut frame) {
            ScriptOutcome::Value(v) => assert_eq!(v, "hello"),
            ScriptOutcome::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn set_then_dollar_reference_reads_back_the_value() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        engine.eval("set name \"world\"; \"hi \" + $name", &mut frame);
        assert_eq!(frame.vars.get("name").map(String::as_str), Some("world"));
    }

    #[test]
    fn numeric_addition_across_plus() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        match engine.eval("1 + 2 + 3", &mut frame) {
            ScriptOutcome::Value(v) => assert_eq!(v, "6"),
            ScriptOutcome::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn string_concatenation_when_not_all_numeric() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        match engine.eval("\"a\" + \"b\"", &mut frame) {
            ScriptOutcome::Value(v) => assert_eq!(v, "ab"),
            ScriptOutcome::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn return_keyword_sets_return_exception_and_stops_the_block() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        engine.eval("set x 1; return; set y 2", &mut frame);
        assert_eq!(frame.exception, Exception::Return);
        assert_eq!(frame.vars.get("y"), None);
    }

    #[test]
    fn eval_tag_echoes_body_unchanged() {
        let engine = BasicEngine;
        let mut frame = AdpFrame::new("page.adp");
        match engine.eval_tag("box", &HashMap::new(), Some("inner"), &mut frame) {
            ScriptOutcome::Value(v) => assert_eq!(v, "inner"),
            ScriptOutcome::Error(e) => panic!("unexpected error: {e}"),
        }
    }
}
