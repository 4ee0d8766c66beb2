use crate::context::{ContextTracker, ExecutionContext};
use crate::value::Value;

const MAX_RANGE: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Str,
    Int,
    Push,
    ParseInt,
    Context,
    CurrentContext,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "print" => Builtin::Print,
            "range" => Builtin::Range,
            "len" => Builtin::Len,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "push" => Builtin::Push,
            "parse_int" => Builtin::ParseInt,
            "__context__" => Builtin::Context,
            "__current_context__" => Builtin::CurrentContext,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Push => "push",
            Builtin::ParseInt => "parse_int",
            Builtin::Context => "__context__",
            Builtin::CurrentContext => "__current_context__",
        }
    }
}

fn arity(builtin: Builtin, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!(
            "{}() takes {} argument(s), got {}",
            builtin.name(),
            if min == max { min.to_string() } else { format!("{} to {}", min, max) },
            args.len()
        ));
    }
    Ok(())
}

/// Builtins never emit frames. Errors come back as messages and are raised
/// as script exceptions at the call site.
pub fn call(
    builtin: Builtin,
    args: Vec<Value>,
    context: &mut ExecutionContext,
    tracker: &ContextTracker,
) -> Result<Value, String> {
    match builtin {
        Builtin::Print => {
            let line = args
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            context.print(line);
            Ok(Value::Null)
        }
        Builtin::Range => {
            arity(builtin, &args, 1, 2)?;
            let bounds: Vec<i64> = args
                .iter()
                .map(|a| a.as_int().ok_or_else(|| format!("range() expects int, got {}", a.type_name())))
                .collect::<Result<_, _>>()?;
            let (start, stop) = match bounds.as_slice() {
                [stop] => (0, *stop),
                [start, stop] => (*start, *stop),
                _ => (0, 0),
            };
            if stop.saturating_sub(start) > MAX_RANGE {
                return Err(format!("range() of more than {} items", MAX_RANGE));
            }
            Ok(Value::list((start..stop).map(Value::Int).collect()))
        }
        Builtin::Len => {
            arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(format!("len() of {}", other.type_name())),
            }
        }
        Builtin::Str => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::str(args[0].to_string()))
        }
        Builtin::Int => {
            arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| format!("int() cannot parse {:?}", s.as_ref())),
                other => Err(format!("int() of {}", other.type_name())),
            }
        }
        Builtin::Push => {
            arity(builtin, &args, 2, 2)?;
            match &args[0] {
                Value::List(items) => {
                    let mut items = items.as_ref().clone();
                    items.push(args[1].clone());
                    Ok(Value::list(items))
                }
                other => Err(format!("push() onto {}", other.type_name())),
            }
        }
        Builtin::ParseInt => {
            arity(builtin, &args, 1, 1)?;
            Ok(args[0]
                .as_str()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map(Value::Int)
                .unwrap_or(Value::Null))
        }
        Builtin::Context => {
            arity(builtin, &args, 0, 0)?;
            Ok(Value::str(context.id().to_string()))
        }
        Builtin::CurrentContext => {
            arity(builtin, &args, 0, 0)?;
            Ok(Value::str(tracker.current().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_and_len() {
        let mut ctx = ExecutionContext::run();
        let tracker = ContextTracker::new();
        let list = call(Builtin::Range, vec![Value::Int(1), Value::Int(4)], &mut ctx, &tracker).unwrap();
        assert_eq!(list, Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        let len = call(Builtin::Len, vec![list], &mut ctx, &tracker).unwrap();
        assert_eq!(len, Value::Int(3));
    }

    #[test]
    fn test_print_collects_lines() {
        let mut ctx = ExecutionContext::run();
        let tracker = ContextTracker::new();
        call(Builtin::Print, vec![Value::str("a"), Value::Int(1)], &mut ctx, &tracker).unwrap();
        assert_eq!(ctx.printed(), &["a 1".to_string()]);
    }

    #[test]
    fn test_parse_int_yields_null_on_garbage() {
        let mut ctx = ExecutionContext::run();
        let tracker = ContextTracker::new();
        let ok = call(Builtin::ParseInt, vec![Value::str(" 42 ")], &mut ctx, &tracker).unwrap();
        let bad = call(Builtin::ParseInt, vec![Value::str("4x")], &mut ctx, &tracker).unwrap();
        assert_eq!(ok, Value::Int(42));
        assert_eq!(bad, Value::Null);
    }

    #[test]
    fn test_arity_errors() {
        let mut ctx = ExecutionContext::run();
        let tracker = ContextTracker::new();
        let err = call(Builtin::Len, vec![], &mut ctx, &tracker).unwrap_err();
        assert_eq!(err, "len() takes 1 argument(s), got 0");
    }
}
