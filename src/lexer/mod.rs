use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n,]+")]
#[logos(skip(r";[^\n]*", allow_greedy = true))]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("'")]
    Quote,

    // Numbers outrank symbols, so `-1` is a number and `-` a symbol
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 10)]
    Integer(i64),
    #[regex(r"-?[0-9]+\.[0-9]+([eE][-+]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok(), priority = 11)]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r#":[^ \t\r\n,;()\[\]{}'":]+"#, |lex| lex.slice()[1..].to_string())]
    Keyword(String),

    #[regex(r#"[^ \t\r\n,;()\[\]{}'":0-9][^ \t\r\n,;()\[\]{}'"]*"#, |lex| lex.slice().to_string())]
    Symbol(String),
}

fn unescape(quoted: &str) -> Option<String> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            _ => return None,
        });
    }
    Some(out)
}

/// Lex source into tokens with their byte spans. The first bad token stops
/// lexing and is reported with a suggested fix.
pub fn lex(source: &str) -> Result<Vec<(Token, std::ops::Range<usize>)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    position: span.start,
                    snippet: source[span.clone()].to_string(),
                    suggestion: suggest_fix(&source[span]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') && bad_token.contains('\\') {
        "Supported escapes are \\n, \\t, \\r, \\0, \\\\ and \\\".".to_string()
    } else if bad_token.starts_with('"') {
        "Close the string with a matching '\"'.".to_string()
    } else if bad_token == ":" {
        "A keyword needs a name after the colon, e.g. ':key'.".to_string()
    } else {
        format!("Unexpected character(s): '{bad_token}'.")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}
