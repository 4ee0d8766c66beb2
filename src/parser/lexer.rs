use crate::diagnostics::{Diagnostic, Position};

/// Identifiers with this prefix are reserved for rendered trace calls.
pub const RESERVED_PREFIX: &str = "__rc_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Fn,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Try,
    Catch,
    Throw,
    Class,
    New,
    True,
    False,
    Null,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Keyword> {
        let kw = match word {
            "let" => Keyword::Let,
            "fn" => Keyword::Fn,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "throw" => Keyword::Throw,
            "class" => Keyword::Class,
            "new" => Keyword::New,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Kw(Keyword),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: Position,
    /// Byte offset one past the token.
    pub end: usize,
}

const PUNCT2: [&str; 7] = ["=>", "==", "!=", "<=", ">=", "&&", "||"];
const PUNCT1: [&str; 19] = [
    "(", ")", "{", "}", "[", "]", ",", ";", ".", "=", "<", ">", "+", "-", "*", "/", "%", "!",
    ":",
];

struct Cursor<'a> {
    text: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.offset..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.text[self.offset..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }
}

/// Split source text into tokens. Line comments are trivia; the text given
/// here has already had inactive preprocessor regions blanked out.
pub fn tokenize(text: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut cur = Cursor {
        text,
        offset: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    while let Some(ch) = cur.peek() {
        if ch.is_whitespace() {
            cur.bump();
            continue;
        }
        if ch == '/' && cur.peek_second() == Some('/') {
            while let Some(c) = cur.peek() {
                if c == '\n' {
                    break;
                }
                cur.bump();
            }
            continue;
        }

        let pos = cur.position();
        let tok = if ch.is_ascii_digit() {
            lex_number(&mut cur, pos)?
        } else if ch == '"' {
            lex_string(&mut cur, pos)?
        } else if ch.is_alphabetic() || ch == '_' {
            let start = cur.offset;
            while let Some(c) = cur.peek() {
                if c.is_alphanumeric() || c == '_' {
                    cur.bump();
                } else {
                    break;
                }
            }
            let word = &text[start..cur.offset];
            if word.starts_with(RESERVED_PREFIX) {
                return Err(Diagnostic::error(
                    pos,
                    format!("identifier `{}` uses the reserved `{}` prefix", word, RESERVED_PREFIX),
                ));
            }
            match Keyword::lookup(word) {
                Some(kw) => Tok::Kw(kw),
                None => Tok::Ident(word.to_string()),
            }
        } else {
            let rest = &text[cur.offset..];
            let punct = PUNCT2
                .iter()
                .chain(PUNCT1.iter())
                .find(|p| rest.starts_with(**p))
                .copied();
            match punct {
                Some(p) => {
                    for _ in 0..p.len() {
                        cur.bump();
                    }
                    Tok::Punct(p)
                }
                None => {
                    return Err(Diagnostic::error(
                        pos,
                        format!("unexpected character `{}`", ch),
                    ))
                }
            }
        };

        tokens.push(Token {
            tok,
            pos,
            end: cur.offset,
        });
    }

    let pos = cur.position();
    tokens.push(Token {
        tok: Tok::Eof,
        pos,
        end: cur.offset,
    });
    Ok(tokens)
}

fn lex_number(cur: &mut Cursor<'_>, pos: Position) -> Result<Tok, Diagnostic> {
    let start = cur.offset;
    let mut is_float = false;
    while let Some(c) = cur.peek() {
        if c.is_ascii_digit() {
            cur.bump();
        } else if c == '.' && !is_float && cur.peek_second().is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            cur.bump();
        } else {
            break;
        }
    }
    let digits = &cur.text[start..cur.offset];
    if is_float {
        digits
            .parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| Diagnostic::error(pos, format!("invalid number `{}`", digits)))
    } else {
        digits
            .parse::<i64>()
            .map(Tok::Int)
            .map_err(|_| Diagnostic::error(pos, format!("integer `{}` is out of range", digits)))
    }
}

fn lex_string(cur: &mut Cursor<'_>, pos: Position) -> Result<Tok, Diagnostic> {
    cur.bump();
    let mut out = String::new();
    loop {
        match cur.bump() {
            Some('"') => return Ok(Tok::Str(out)),
            Some('\\') => match cur.bump() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    return Err(Diagnostic::error(
                        pos,
                        format!("unknown escape `\\{}` in string", other),
                    ))
                }
                None => break,
            },
            Some('\n') | None => break,
            Some(c) => out.push(c),
        }
    }
    Err(Diagnostic::error(pos, "unterminated string literal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Tok> {
        tokenize(text)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_tokens_and_positions() {
        let tokens = tokenize("let x = 1;\n  x = x + 2.5;").expect("tokenize");
        assert_eq!(tokens[0].tok, Tok::Kw(Keyword::Let));
        assert_eq!(tokens[1].tok, Tok::Ident("x".into()));
        assert_eq!(tokens[5].pos, Position::new(2, 3, 13));
        assert!(tokens.iter().any(|t| t.tok == Tok::Float(2.5)));
    }

    #[test]
    fn test_comments_are_trivia() {
        assert_eq!(
            kinds("a // flag: x\nb"),
            vec![Tok::Ident("a".into()), Tok::Ident("b".into()), Tok::Eof]
        );
    }

    #[test]
    fn test_two_char_punctuation() {
        assert_eq!(
            kinds("a<=b=>c"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("<="),
                Tok::Ident("b".into()),
                Tok::Punct("=>"),
                Tok::Ident("c".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let err = tokenize("let __rc_trace = 1;").unwrap_err();
        assert_eq!(err.position.column, 5);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("\"abc").is_err());
    }
}
