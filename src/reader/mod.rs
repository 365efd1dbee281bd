//! Datum reader over the token stream: atoms, `( )` lists, `[ ]` vectors,
//! `{ }` objects, and `'x` for `(quote x)`. No macro expansion happens here.

use std::ops::Range;
use std::sync::Arc;

use crate::lexer::{self, LexError, Token};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected '{found}' at position {position}")]
    Unexpected { position: usize, found: String },
    #[error("'{open}' opened at position {position} is never closed")]
    Unclosed { position: usize, open: char },
    #[error("object at position {position} has a key without a value")]
    OddObject { position: usize },
    #[error("expected exactly one form, found {0}")]
    FormCount(usize),
}

impl ReadError {
    /// Byte offset of the problem, when one is known.
    pub fn position(&self) -> Option<usize> {
        match self {
            ReadError::Lex(e) => Some(e.position),
            ReadError::Unexpected { position, .. }
            | ReadError::Unclosed { position, .. }
            | ReadError::OddObject { position } => Some(*position),
            ReadError::FormCount(_) => None,
        }
    }
}

/// Reads every top-level form in `src`.
pub fn read_all(src: &str) -> Result<Vec<Value>, ReadError> {
    let tokens = lexer::lex(src)?;
    let mut reader = Reader { tokens, pos: 0 };
    let mut forms = Vec::new();
    while reader.pos < reader.tokens.len() {
        forms.push(reader.datum()?);
    }
    Ok(forms)
}

/// Reads a source holding exactly one form.
pub fn read(src: &str) -> Result<Value, ReadError> {
    let mut forms = read_all(src)?;
    match forms.len() {
        1 => Ok(forms.remove(0)),
        n => Err(ReadError::FormCount(n)),
    }
}

struct Reader {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

impl Reader {
    fn next(&mut self) -> Option<(Token, Range<usize>)> {
        let item = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        item
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn datum(&mut self) -> Result<Value, ReadError> {
        let Some((token, span)) = self.next() else {
            return Err(ReadError::FormCount(0));
        };
        Ok(match token {
            Token::Integer(n) => Value::Integer(n),
            Token::Float(f) => Value::Float(f),
            Token::Str(s) => Value::string(&s),
            Token::Keyword(k) => Value::keyword(&k),
            Token::Symbol(s) => atom(&s),
            Token::Quote => {
                if self.peek().is_none() {
                    return Err(ReadError::Unexpected { position: span.start, found: "'".to_string() });
                }
                let quoted = self.datum()?;
                Value::list([Value::symbol("quote"), quoted])
            }
            Token::LParen => Value::list(self.sequence(Token::RParen, '(', span.start)?),
            Token::LBracket => Value::vector(self.sequence(Token::RBracket, '[', span.start)?),
            Token::LBrace => {
                let items = self.sequence(Token::RBrace, '{', span.start)?;
                if items.len() % 2 != 0 {
                    return Err(ReadError::OddObject { position: span.start });
                }
                let pairs: Vec<(Value, Value)> =
                    items.chunks_exact(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect();
                Value::Object(Arc::from(pairs))
            }
            Token::RParen | Token::RBracket | Token::RBrace => {
                return Err(ReadError::Unexpected { position: span.start, found: closer(&token).to_string() });
            }
        })
    }

    fn sequence(&mut self, close: Token, open: char, start: usize) -> Result<Vec<Value>, ReadError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(ReadError::Unclosed { position: start, open }),
                Some(t) if *t == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.datum()?),
            }
        }
    }
}

fn atom(s: &str) -> Value {
    match s {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::symbol(s),
    }
}

fn closer(token: &Token) -> char {
    match token {
        Token::RBracket => ']',
        Token::RBrace => '}',
        _ => ')',
    }
}
