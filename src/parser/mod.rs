pub mod ast;
mod grammar;
pub mod lexer;
mod preprocessor;

pub use preprocessor::{preprocess, text_flags, Preprocessed};

use crate::error::CompileError;
use ast::Program;

/// Parse already preprocessed text. Statement-level errors are collected so
/// one build reports every broken statement.
pub fn parse(text: &str) -> Result<Program, CompileError> {
    let tokens = lexer::tokenize(text).map_err(|d| CompileError::new(vec![d]))?;
    let mut parser = grammar::Parser::new(tokens);
    let program = parser.program();
    if parser.diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(CompileError::new(parser.diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::ast::*;
    use super::*;

    #[test]
    fn test_parses_loops_and_functions() {
        let program = parse(
            "fn add(a, b) {\n  return a + b;\n}\nfor (let i = 0; i < 3; i = i + 1) {\n  add(i, 1);\n}\nfor (x in [1, 2]) print(x);\n",
        )
        .expect("parse");
        assert_eq!(program.body.len(), 3);
        match &program.body[1].kind {
            StmtKind::For { header, .. } => assert_eq!((header.line, header.column), (4, 17)),
            other => panic!("expected for, got {:?}", other),
        }
        match &program.body[2].kind {
            StmtKind::ForEach { var, body, .. } => {
                assert_eq!(var, "x");
                assert!(!body.braced());
            }
            other => panic!("expected foreach, got {:?}", other),
        }
    }

    #[test]
    fn test_deep_nesting_is_a_diagnostic() {
        let parens = format!("let x = {}1{};", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse(&parens).unwrap_err();
        assert!(err.errors().any(|d| d.message.contains("nesting deeper than")));

        let negations = format!("let y = {}true;", "!".repeat(50_000));
        assert!(parse(&negations).is_err());

        let sum = format!("let z = 1{};", " + 1".repeat(50_000));
        let err = parse(&sum).unwrap_err();
        assert!(err.errors().any(|d| d.message.contains("expression deeper than")));

        let calls = format!("let w = f{};", "()".repeat(50_000));
        assert!(parse(&calls).is_err());

        let branches = format!("{}f();", "if (a) ".repeat(50_000));
        let err = parse(&branches).unwrap_err();
        assert_eq!(err.first_position().map(|p| p.line), Some(1));
    }

    #[test]
    fn test_nesting_within_the_limit_parses() {
        let depth = grammar::MAX_NESTING / 2;
        let source = format!("let x = {}1{};", "(".repeat(depth), ")".repeat(depth));
        assert!(parse(&source).is_ok());
        let sum = format!("let z = 1{};", " + 1".repeat(grammar::MAX_EXPR_DEPTH / 2));
        assert!(parse(&sum).is_ok());
    }

    #[test]
    fn test_if_let_and_else_if() {
        let program =
            parse("if let v = f() { print(v); } else if (a) { b(); } else c();").expect("parse");
        match &program.body[0].kind {
            StmtKind::If {
                cond: Condition::Let { name, .. },
                otherwise: Some(other),
                ..
            } => {
                assert_eq!(name, "v");
                assert!(matches!(other.stmts[0].kind, StmtKind::If { .. }));
            }
            other => panic!("expected if-let, got {:?}", other),
        }
    }

    #[test]
    fn test_lambda_bodies() {
        let program = parse("let f = fn(x) => x * 2;\nlet g = fn() { return 1; };").expect("parse");
        match &program.body[0].kind {
            StmtKind::Let {
                value:
                    Expr {
                        kind: ExprKind::Lambda(decl),
                        ..
                    },
                ..
            } => {
                assert!(decl.lambda);
                assert!(matches!(decl.body.stmts[0].kind, StmtKind::Return(Some(_))));
            }
            other => panic!("expected lambda, got {:?}", other),
        }
    }

    #[test]
    fn test_errors_are_collected_per_statement() {
        let err = parse("let = 1;\nlet ok = 2;\nx + ;\n").unwrap_err();
        assert_eq!(err.diagnostics.len(), 2);
        assert_eq!(err.diagnostics[0].position.line, 1);
        assert_eq!(err.diagnostics[1].position.line, 3);
    }

    #[test]
    fn test_class_with_methods() {
        let program =
            parse("class P {\n fn init(self, x) { self.x = x; }\n fn get(self) { return self.x; }\n}")
                .expect("parse");
        match &program.body[0].kind {
            StmtKind::Class(decl) => {
                assert_eq!(decl.methods.len(), 2);
                assert_eq!(decl.methods[0].params, vec!["self", "x"]);
            }
            other => panic!("expected class, got {:?}", other),
        }
    }
}
