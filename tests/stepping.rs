// tests/stepping.rs
// Pause placement for every debug action

mod common;

use common::{debug, pauses, ScriptedControls};
use runcode::debugger::{DebugAction, ExceptionPolicy, PauseReason};
use runcode::{Code, ExecEvent, ExecutionContext, RunError, Value};

use ExecEvent::{Exception, Line, Return};

const ADD: &str = r#"fn add(a, b) {
  let s = a + b;
  return s;
}
let x = add(1, 2);
print(x);
"#;

const FACT: &str = r#"fn fact(n) {
  if (n <= 1) {
    return 1;
  }
  let rest = fact(n - 1);
  return n * rest;
}
let result = fact(3);
print(result);
"#;

const RISKY: &str = r#"fn risky(n) {
  if (n > 1) {
    throw "too big";
  }
  return n;
}
try {
  risky(5);
} catch (e) {
  print(e);
}
risky(2);
"#;

#[cfg(test)]
mod loop_header_tests {
    use super::*;

    fn header_pauses(source: &str) -> usize {
        pauses(source, &[2], DebugAction::Continue)
            .iter()
            .filter(|p| p.line == 2)
            .count()
    }

    #[test]
    fn test_header_pauses_once_per_pass_plus_final_check() {
        let layouts = [
            "let total = 0;\nfor (let i = 0; i < 3; i = i + 1) {\n  total = total + i;\n}\n",
            "let total = 0;\nfor (let i = 0; i < 3; i = i + 1) total = total + i;\n",
            "let total = 0;\nfor (let i = 0; i < 3; i = i + 1) { total = total + i; }\n",
            "let total = 0;\nfor (let i = 0; i < 3; i = i + 1)\n{\n  total = total + i;\n}\n",
            "let total = 0;\nfor (let i = 0; i < 3; i = i + 1)\n  total = total + i;\n",
        ];
        for layout in layouts {
            assert_eq!(header_pauses(layout), 4, "layout:\n{}", layout);
        }
    }

    #[test]
    fn test_every_loop_form_rechecks_its_header() {
        let while_loop = "let i = 0;\nwhile (i < 2) i = i + 1;\n";
        let foreach_loop = "let seen = 0;\nfor (x in [1, 2, 3, 4]) seen = seen + x;\n";
        let empty_loop = "let n = 0;\nfor (x in []) { n = n + 1; }\n";
        assert_eq!(header_pauses(while_loop), 3);
        assert_eq!(header_pauses(foreach_loop), 5);
        assert_eq!(header_pauses(empty_loop), 1);
    }

    #[test]
    fn test_step_in_sees_the_same_header_passes_in_any_layout() {
        let braced = "let total = 0;\nfor (let i = 0; i < 2; i = i + 1) {\n  total = total + i;\n}\n";
        let inline = "let total = 0;\nfor (let i = 0; i < 2; i = i + 1) total = total + i;\n";

        let braced = pauses(braced, &[1], DebugAction::StepIn);
        let inline = pauses(inline, &[1], DebugAction::StepIn);
        let headers = |p: &[common::Pause]| p.iter().filter(|p| p.line == 2).count();

        assert_eq!(headers(&braced), 3);
        assert_eq!(headers(&inline), 3);
        assert_eq!(
            braced.iter().map(|p| p.line).collect::<Vec<_>>(),
            vec![1, 2, 3, 2, 3, 2]
        );
        assert_eq!(inline.iter().map(|p| p.line).collect::<Vec<_>>(), vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_break_leaves_without_a_final_check() {
        let source = "let i = 0;\nwhile (true) {\n  i = i + 1;\n  if (i == 2) { break; }\n}\n";
        let lines: Vec<u32> = pauses(source, &[2], DebugAction::Continue)
            .iter()
            .map(|p| p.line)
            .collect();
        assert_eq!(lines, vec![2, 2]);
    }
}

#[cfg(test)]
mod step_action_tests {
    use super::*;

    #[test]
    fn test_step_in_enters_the_call_and_reports_its_return() {
        let steps: Vec<_> = pauses(ADD, &[5], DebugAction::StepIn)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(
            steps,
            vec![
                (Line, 5, 0),
                (Line, 2, 1),
                (Line, 3, 1),
                (Return, 5, 0),
                (Line, 6, 0),
            ]
        );
    }

    #[test]
    fn test_step_over_skips_the_callee() {
        let steps: Vec<_> = pauses(ADD, &[5], DebugAction::StepOver)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(steps, vec![(Line, 5, 0), (Line, 6, 0)]);
    }

    #[test]
    fn test_step_over_passes_breakpoints_in_the_callee() {
        let code = Code::script(ADD);
        let mut controls = ScriptedControls::always(DebugAction::StepOver).break_at(&code, &[5, 3]);
        debug(&code, &mut controls).unwrap();
        let reasons: Vec<_> = controls.pauses.iter().map(|p| (p.line, p.reason)).collect();
        assert_eq!(reasons, vec![(5, PauseReason::Breakpoint), (6, PauseReason::Step)]);
        for pair in controls.pauses.windows(2) {
            assert!(pair[1].depth <= pair[0].depth, "stepped over into depth {}", pair[1].depth);
        }
    }

    #[test]
    fn test_step_out_passes_breakpoints_in_later_calls() {
        let source = "fn inner() {\n  return 1;\n}\nfn outer() {\n  let a = 1;\n  let b = inner();\n  return a + b;\n}\nlet r = outer();\nprint(r);\n";
        let steps: Vec<_> = pauses(source, &[5, 2], DebugAction::StepOut)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(steps, vec![(Line, 5, 1), (Return, 9, 0)]);
    }

    #[test]
    fn test_continue_after_a_step_over_reaches_callee_breakpoints() {
        let source = "fn add(a, b) {\n  return a + b;\n}\nlet x = add(1, 2);\nlet y = add(x, 3);\nprint(y);\n";
        let code = Code::script(source);
        let mut controls = ScriptedControls::new([DebugAction::StepOver, DebugAction::Continue])
            .with_fallback(DebugAction::Continue)
            .break_at(&code, &[4, 2]);
        debug(&code, &mut controls).unwrap();
        let steps: Vec<_> = controls.pauses.iter().map(|p| p.at()).collect();
        assert_eq!(steps, vec![(Line, 4, 0), (Line, 5, 0), (Line, 2, 1)]);
        assert_eq!(controls.pauses[2].value("a"), Some(Value::Int(3)));
    }

    #[test]
    fn test_step_out_returns_to_the_caller() {
        let steps: Vec<_> = pauses(ADD, &[2], DebugAction::StepOut)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(steps, vec![(Line, 2, 1), (Return, 5, 0)]);
    }

    #[test]
    fn test_step_in_walks_every_recursive_activation() {
        let pauses = pauses(FACT, &[8], DebugAction::StepIn);
        let steps: Vec<_> = pauses.iter().map(|p| p.at()).collect();
        assert_eq!(
            steps,
            vec![
                (Line, 8, 0),
                (Line, 2, 1),
                (Line, 5, 1),
                (Line, 2, 2),
                (Line, 5, 2),
                (Line, 2, 3),
                (Line, 3, 3),
                (Return, 5, 2),
                (Line, 6, 2),
                (Return, 5, 1),
                (Line, 6, 1),
                (Return, 8, 0),
                (Line, 9, 0),
            ]
        );
        assert!(pauses.iter().filter(|p| p.depth > 0).all(|p| p.function == "fact"));
    }

    #[test]
    fn test_step_over_never_goes_deeper_than_its_origin() {
        let pauses = pauses(FACT, &[3], DebugAction::StepOver);
        let steps: Vec<_> = pauses.iter().map(|p| p.at()).collect();
        assert_eq!(
            steps,
            vec![
                (Line, 3, 3),
                (Return, 5, 2),
                (Line, 6, 2),
                (Return, 5, 1),
                (Line, 6, 1),
                (Return, 8, 0),
                (Line, 9, 0),
            ]
        );
        for pair in pauses.windows(2) {
            assert!(pair[1].depth <= pair[0].depth, "{:?} after {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_step_out_only_stops_on_returns_of_shallower_frames() {
        let steps: Vec<_> = pauses(FACT, &[3], DebugAction::StepOut)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(
            steps,
            vec![(Line, 3, 3), (Return, 5, 2), (Return, 5, 1), (Return, 8, 0)]
        );
    }

    #[test]
    fn test_constructors_and_lambdas_are_stepped_into_like_functions() {
        let source = r#"class Point {
  fn init(self, x) {
    self.x = x;
  }
}
let double = fn(v) => v * 2;
let p = new Point(4);
let y = double(p.x);
"#;
        let pauses = pauses(source, &[7], DebugAction::StepIn);
        let steps: Vec<_> = pauses.iter().map(|p| p.at()).collect();
        assert_eq!(
            steps,
            vec![
                (Line, 7, 0),
                (Line, 3, 1),
                (Return, 7, 0),
                (Line, 8, 0),
                (Line, 6, 1),
                (Return, 8, 0),
            ]
        );
        assert_eq!(pauses[1].function, "init");
    }

    #[test]
    fn test_continue_only_stops_at_breakpoints() {
        let lines: Vec<u32> = pauses(FACT, &[6, 9], DebugAction::Continue)
            .iter()
            .map(|p| p.line)
            .collect();
        assert_eq!(lines, vec![6, 6, 9]);
    }

    #[test]
    fn test_the_script_finishing_never_pauses() {
        let steps: Vec<_> = pauses("let a = 1;\n", &[1], DebugAction::StepIn)
            .iter()
            .map(|p| p.at())
            .collect();
        assert_eq!(steps, vec![(Line, 1, 0)]);
    }
}

#[cfg(test)]
mod exception_tests {
    use super::*;

    fn run_risky(policy: ExceptionPolicy) -> (ScriptedControls, Result<(), RunError>) {
        let code = Code::script(RISKY);
        let mut controls = ScriptedControls::always(DebugAction::Continue).with_policy(policy);
        let result = debug(&code, &mut controls);
        (controls, result)
    }

    #[test]
    fn test_pause_on_any_reports_handled_and_unhandled() {
        let (controls, result) = run_risky(ExceptionPolicy::PauseOnAny);
        let seen: Vec<_> = controls
            .pauses
            .iter()
            .map(|p| (p.at(), p.reason, p.handled))
            .collect();
        assert_eq!(
            seen,
            vec![
                ((Exception, 3, 1), PauseReason::Exception, Some(true)),
                ((Exception, 3, 1), PauseReason::Exception, Some(false)),
            ]
        );
        assert!(matches!(result, Err(RunError::Execute(_))));
    }

    #[test]
    fn test_default_policy_pauses_on_unhandled_only() {
        let (controls, _) = run_risky(ExceptionPolicy::default());
        assert_eq!(controls.pauses.len(), 1);
        assert_eq!(controls.pauses[0].handled, Some(false));
    }

    #[test]
    fn test_pause_on_none_never_pauses_but_still_fails() {
        let (controls, result) = run_risky(ExceptionPolicy::PauseOnNone);
        assert!(controls.pauses.is_empty());
        match result {
            Err(RunError::Execute(err)) => {
                assert_eq!(err.message, "too big");
                assert_eq!(err.position.map(|p| p.line), Some(3));
                assert!(err.inner.is_none());
            }
            other => panic!("expected an execute error, got {:?}", other),
        }
    }

    #[test]
    fn test_handled_exception_does_not_consume_the_step() {
        let code = Code::script(RISKY);
        let mut controls = ScriptedControls::always(DebugAction::StepOver)
            .with_policy(ExceptionPolicy::PauseOnAny)
            .break_at(&code, &[8]);
        let result = debug(&code, &mut controls);
        assert_eq!(
            controls.steps(),
            vec![
                (Line, 8, 0),
                (Exception, 3, 1),
                (Line, 9, 0),
                (Line, 10, 0),
                (Line, 12, 0),
                (Exception, 3, 1),
            ]
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_step_over_skips_handled_exceptions_of_deeper_frames() {
        let code = Code::script(RISKY);
        let mut controls = ScriptedControls::always(DebugAction::StepOver)
            .with_policy(ExceptionPolicy::PauseOnNone)
            .break_at(&code, &[8]);
        let _ = debug(&code, &mut controls);
        assert_eq!(
            controls.steps(),
            vec![(Line, 8, 0), (Line, 9, 0), (Line, 10, 0), (Line, 12, 0)]
        );
    }
}

#[cfg(test)]
mod handler_tests {
    use super::*;

    const FAIL: &str = "fn fail() {\n  throw \"bad\";\n}\n";

    fn handler_steps(source: &str, line: u32) -> Vec<(ExecEvent, u32, usize, Option<Value>)> {
        pauses(source, &[line], DebugAction::StepIn)
            .iter()
            .map(|p| (p.event, p.line, p.depth, p.value("e")))
            .collect()
    }

    #[test]
    fn test_step_in_reaches_a_multi_line_handler() {
        let source = format!("{}try {{\n  fail();\n}} catch (e) {{\n  print(e);\n}}\n", FAIL);
        assert_eq!(
            handler_steps(&source, 5),
            vec![
                (Line, 5, 0, None),
                (Line, 2, 1, None),
                (Line, 6, 0, Some(Value::str("bad"))),
                (Line, 7, 0, Some(Value::str("bad"))),
            ]
        );
    }

    #[test]
    fn test_step_in_reaches_a_one_line_handler() {
        let source = format!("{}try {{ fail(); }} catch (e) {{ print(e); }}\n", FAIL);
        assert_eq!(
            handler_steps(&source, 4),
            vec![
                (Line, 4, 0, None),
                (Line, 2, 1, None),
                (Line, 4, 0, Some(Value::str("bad"))),
            ]
        );
    }
}

#[cfg(test)]
mod termination_tests {
    use super::*;

    #[test]
    fn test_stop_raises_debug_stop() {
        let code = Code::script("let a = 1;\nlet b = 2;\nout = a + b;\n");
        let mut controls = ScriptedControls::always(DebugAction::Stop).break_at(&code, &[2]);
        let mut context = ExecutionContext::debug().with_output("out");
        let result = code.debug_with_controls(&mut context, &mut controls);
        match result {
            Err(RunError::DebugStop { position }) => {
                assert_eq!(position.map(|p| p.line), Some(2));
            }
            other => panic!("expected a debug stop, got {:?}", other),
        }
        assert_eq!(controls.pauses.len(), 1);
        assert_eq!((controls.attached, controls.detached), (1, 1));
        assert!(context.output("out").is_some_and(|v| v.is_null()));
    }

    #[test]
    fn test_stop_cannot_be_caught_by_the_script() {
        let source = "try {\n  let a = 1;\n} catch (e) {\n  print(\"caught\");\n}\nprint(\"after\");\n";
        let code = Code::script(source);
        let mut controls = ScriptedControls::always(DebugAction::Stop).break_at(&code, &[2]);
        let mut context = ExecutionContext::debug();
        let result = code.debug_with_controls(&mut context, &mut controls);
        assert!(result.as_ref().is_err_and(|e| e.is_debug_stop()));
        assert!(context.printed().is_empty());
    }

    #[test]
    fn test_stop_inside_a_call_unwinds_everything() {
        let code = Code::script(FACT);
        let mut controls = ScriptedControls::always(DebugAction::Stop).break_at(&code, &[3]);
        let result = debug(&code, &mut controls);
        assert!(result.is_err_and(|e| e.is_debug_stop()));
        assert_eq!(controls.steps(), vec![(Line, 3, 3)]);
    }

    #[test]
    fn test_disconnect_lets_the_script_finish_silently() {
        let code = Code::script("let a = 1;\nlet b = 2;\nout = a + b;\n");
        let mut controls = ScriptedControls::always(DebugAction::Disconnect).break_at(&code, &[1, 2, 3]);
        let mut context = ExecutionContext::debug().with_output("out");
        code.debug_with_controls(&mut context, &mut controls).unwrap();
        assert_eq!(controls.lines(), vec![1]);
        assert_eq!((controls.attached, controls.detached), (1, 1));
        assert_eq!(context.output("out"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_disconnect_ignores_later_exceptions() {
        let code = Code::script(RISKY);
        let mut controls = ScriptedControls::always(DebugAction::Disconnect)
            .with_policy(ExceptionPolicy::PauseOnAny)
            .break_at(&code, &[7]);
        let result = debug(&code, &mut controls);
        assert_eq!(controls.lines(), vec![7]);
        assert!(matches!(result, Err(RunError::Execute(_))));
    }
}
