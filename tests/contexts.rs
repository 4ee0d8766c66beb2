// tests/contexts.rs
// Context identities, concurrent invocations and groups

mod common;

use common::ScriptedControls;
use parking_lot::Mutex;
use runcode::debugger::DebugAction;
use runcode::profiler::LineProfiler;
use runcode::{Code, ContextKind, ExecutionContext, RunError, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const THREADS: i64 = 16;

const MARKED: &str = r#"let total = 0;
for (let k = 0; k < 5; k = k + 1) {
  total = total + marker;
}
echo = marker;
sum = total;
id = __context__();
ambient = __current_context__();
"#;

fn marked_context(kind: ContextKind, marker: i64) -> ExecutionContext {
    ExecutionContext::new(kind)
        .with_input("marker", marker)
        .with_output("echo")
        .with_output("sum")
        .with_output("id")
        .with_output("ambient")
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[test]
    fn test_concurrent_runs_keep_their_own_outputs() {
        let code = Code::script(MARKED);
        let contexts: Vec<ExecutionContext> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|marker| {
                    let code = &code;
                    scope.spawn(move || {
                        let mut context = marked_context(ContextKind::Run, marker);
                        code.run(&mut context).expect("run");
                        context
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });

        let ids: HashSet<String> = contexts.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids.len(), THREADS as usize);
        for (marker, context) in (0..THREADS).zip(&contexts) {
            assert_eq!(context.output("echo"), Some(&Value::Int(marker)));
            assert_eq!(context.output("sum"), Some(&Value::Int(marker * 5)));
            assert_eq!(context.output("id"), Some(&Value::str(context.id().to_string())));
            // the ambient value is only promised to be one of the live contexts
            let ambient = context.output("ambient").and_then(|v| v.as_str()).unwrap_or_default();
            assert!(ids.contains(ambient), "unknown ambient context {}", ambient);
        }
        assert!(code.tracker().live().is_empty());
    }

    #[test]
    fn test_concurrent_debug_sessions_are_independent() {
        let code = Code::script(MARKED);
        let results: Vec<(i64, ScriptedControls, ExecutionContext)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|marker| {
                    let code = &code;
                    scope.spawn(move || {
                        let mut controls = ScriptedControls::always(DebugAction::Continue).break_at(code, &[3]);
                        let mut context = marked_context(ContextKind::Debug, marker);
                        code.debug_with_controls(&mut context, &mut controls).expect("debug");
                        (marker, controls, context)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });

        for (marker, controls, context) in results {
            assert_eq!(controls.pauses.len(), 5);
            for pause in &controls.pauses {
                assert_eq!(pause.value("marker"), Some(Value::Int(marker)));
            }
            let totals: Vec<_> = controls.pauses.iter().filter_map(|p| p.value("total")).collect();
            let expected: Vec<_> = (0..5).map(|k| Value::Int(marker * k)).collect();
            assert_eq!(totals, expected);
            assert_eq!(context.output("sum"), Some(&Value::Int(marker * 5)));
        }
    }

    #[test]
    fn test_concurrent_profiles_each_record_a_run() {
        let code = Code::script(MARKED);
        let profiler = Arc::new(Mutex::new(LineProfiler::new()));
        code.set_profiler(Some(profiler.clone()));
        let ids: HashSet<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|marker| {
                    let code = &code;
                    scope.spawn(move || {
                        let mut context = marked_context(ContextKind::Profile, marker);
                        code.profile(&mut context).expect("profile");
                        context.id()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });

        let profiler = profiler.lock();
        assert_eq!(profiler.run_count(), 8);
        assert_eq!(profiler.in_flight(), 0);
        let recorded: HashSet<_> = profiler.runs().iter().map(|r| r.context).collect();
        assert_eq!(recorded, ids);
        for run in profiler.runs() {
            assert_eq!(run.lines.get(&3), Some(&5));
            assert_eq!(run.calls.get("<module>"), Some(&1));
        }
    }

    #[test]
    fn test_single_run_sees_itself_as_current() {
        let code = Code::script(MARKED);
        let mut context = marked_context(ContextKind::Run, 1);
        code.run(&mut context).unwrap();
        let own = Value::str(context.id().to_string());
        assert_eq!(context.output("ambient"), Some(&own));
        assert_eq!(context.output("id"), Some(&own));
    }
}

#[cfg(test)]
mod group_tests {
    use super::*;

    #[test]
    fn test_run_group_shares_one_ambient_parent() {
        let code = Code::script(MARKED);
        let group = code.run_with("batch").unwrap();
        let parent = Value::str(group.info().parent.to_string());

        let mut first = marked_context(ContextKind::Run, 1);
        let mut second = marked_context(ContextKind::Run, 2);
        code.run(&mut first).unwrap();
        code.run(&mut second).unwrap();
        assert_eq!(first.output("ambient"), Some(&parent));
        assert_eq!(second.output("ambient"), Some(&parent));
        assert_ne!(first.output("id"), second.output("id"));

        drop(group);
        assert!(code.tracker().group().is_none());
        let mut after = marked_context(ContextKind::Run, 3);
        code.run(&mut after).unwrap();
        assert_eq!(after.output("ambient"), Some(&Value::str(after.id().to_string())));
    }

    #[test]
    fn test_run_group_blocks_debug_and_profile() {
        let code = Code::script("let a = 1;\n");
        let _group = code.run_with("batch").unwrap();
        let existing = RunError::RunGroupExists {
            existing: ContextKind::Run,
        };

        let mut controls = ScriptedControls::always(DebugAction::Continue);
        let debug = code.debug_with_controls(&mut ExecutionContext::debug(), &mut controls);
        assert_eq!(debug, Err(existing.clone()));
        assert_eq!(code.profile(&mut ExecutionContext::profile()), Err(existing.clone()));
        assert!(matches!(code.run_with("again"), Err(ref e) if *e == existing));
        assert!(matches!(code.profile_with("p"), Err(ref e) if *e == existing));

        code.run(&mut ExecutionContext::run()).unwrap();
    }

    #[test]
    fn test_debug_group_requires_controls() {
        let code = Code::script("let a = 1;\n");
        let context = ExecutionContext::debug();
        assert!(matches!(code.debug_with(&context), Err(RunError::NoDebugControls)));
    }

    #[test]
    fn test_debug_group_runs_invocations_under_the_attached_controls() {
        let code = Code::script("fn greet(name) {\n  let message = \"hi \" + name;\n  return message;\n}\n");
        let controls = Arc::new(Mutex::new(
            ScriptedControls::always(DebugAction::Continue).break_at(&code, &[2]),
        ));
        code.set_debug_controls(Some(controls.clone()));

        let mut context = ExecutionContext::debug();
        {
            let group = code.debug_with(&context).unwrap();
            assert_eq!(group.info().parent, context.id());
            assert_eq!(group.info().kind, ContextKind::Debug);
            let value = code.invoke(&mut context, "greet", vec![Value::str("ann")]).unwrap();
            assert_eq!(value, Value::str("hi ann"));
        }
        {
            let controls = controls.lock();
            assert_eq!(controls.lines(), vec![2]);
            assert_eq!(controls.pauses[0].value("name"), Some(Value::str("ann")));
            assert_eq!((controls.attached, controls.detached), (1, 1));
        }

        code.invoke(&mut context, "greet", vec![Value::str("bob")]).unwrap();
        assert_eq!(controls.lock().pauses.len(), 1);
    }

    #[test]
    fn test_profile_group_names_its_runs() {
        let code = Code::script("let a = 1;\n");
        let profiler = Arc::new(Mutex::new(LineProfiler::new()));
        code.set_profiler(Some(profiler.clone()));
        {
            let _group = code.profile_with("load").unwrap();
            code.profile(&mut ExecutionContext::profile()).unwrap();
            code.profile(&mut ExecutionContext::profile()).unwrap();
        }
        code.profile(&mut ExecutionContext::profile()).unwrap();

        let profiler = profiler.lock();
        assert_eq!(profiler.run_count(), 3);
        assert!(profiler.runs()[..2].iter().all(|r| r.group.as_deref() == Some("load")));
        assert_eq!(profiler.runs()[2].group, None);
    }
}
