use std::fmt;

/// Lowest binding power; returned for anything that is not a binary
/// operator token.
pub const LOWEST_PREC: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Select,
    Where,
    Key,
    Value,
    Operator,
    Str,
    LParen,
    RParen,
    LBrack,
    RBrack,
    Name,
    Sep,
    Semi,
    Number,
    Float,
    Limit,
    Order,
    By,
    Asc,
    Desc,
    True,
    False,
    As,
    Group,
    Put,
    Remove,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Keyword and operator lexemes are lowercased; quoted strings and
    /// backtick names are verbatim.
    pub lexeme: String,
    /// Byte offset of the token's first character in the query.
    pub pos: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, pos: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            pos,
        }
    }

    /// Binding power for the precedence-climbing parser. Higher binds
    /// tighter.
    pub fn precedence(&self) -> u8 {
        if self.kind != TokenKind::Operator {
            return LOWEST_PREC;
        }
        match self.lexeme.as_str() {
            "|" | "or" => 1,
            "&" | "and" => 2,
            "=" | "!=" | "^=" | "~=" | ">" | ">=" | "<" | "<=" | "in" | "between" => 3,
            "+" | "-" => 4,
            "*" | "/" => 5,
            _ => LOWEST_PREC,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}) @{}", self.kind, self.lexeme, self.pos)
    }
}

pub struct Lexer<'a> {
    query: &'a [u8],
}

impl<'a> Lexer<'a> {
    pub fn new(query: &'a str) -> Self {
        Lexer {
            query: query.as_bytes(),
        }
    }

    /// Split the query into a flat token stream. Unterminated quotes
    /// simply end the final token at end of input; the parser reports the
    /// resulting shape errors.
    pub fn tokenize(&self) -> Vec<Token> {
        let q = self.query;
        let len = q.len();
        let mut out = Vec::new();
        let mut i = 0;
        while i < len {
            let c = q[i];
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    i += 1;
                }
                b'\'' | b'"' | b'`' => {
                    let quote = c;
                    let start = i;
                    let mut j = i + 1;
                    while j < len && q[j] != quote {
                        j += 1;
                    }
                    let body = String::from_utf8_lossy(&q[i + 1..j.min(len)]).into_owned();
                    let kind = if quote == b'`' {
                        TokenKind::Name
                    } else {
                        TokenKind::Str
                    };
                    out.push(Token::new(kind, body, start));
                    i = j.saturating_add(1);
                }
                b'^' | b'~' | b'!' | b'<' | b'>' | b'=' => {
                    if i + 1 < len && q[i + 1] == b'=' && c != b'=' {
                        let op = format!("{}=", c as char);
                        out.push(Token::new(TokenKind::Operator, op, i));
                        i += 2;
                    } else {
                        match c {
                            b'=' | b'!' | b'<' | b'>' => {
                                out.push(Token::new(
                                    TokenKind::Operator,
                                    (c as char).to_string(),
                                    i,
                                ));
                            }
                            // A bare `^` or `~` forms no token.
                            _ => {}
                        }
                        i += 1;
                    }
                }
                b'+' | b'-' | b'*' | b'/' | b'&' | b'|' => {
                    out.push(Token::new(TokenKind::Operator, (c as char).to_string(), i));
                    i += 1;
                }
                b'(' => {
                    out.push(Token::new(TokenKind::LParen, "(", i));
                    i += 1;
                }
                b')' => {
                    out.push(Token::new(TokenKind::RParen, ")", i));
                    i += 1;
                }
                b'[' => {
                    out.push(Token::new(TokenKind::LBrack, "[", i));
                    i += 1;
                }
                b']' => {
                    out.push(Token::new(TokenKind::RBrack, "]", i));
                    i += 1;
                }
                b',' => {
                    out.push(Token::new(TokenKind::Sep, ",", i));
                    i += 1;
                }
                b';' => {
                    out.push(Token::new(TokenKind::Semi, ";", i));
                    i += 1;
                }
                _ => {
                    let start = i;
                    let mut j = i;
                    while j < len && !is_delimiter(q[j]) {
                        j += 1;
                    }
                    let word = String::from_utf8_lossy(&q[start..j]).into_owned();
                    out.push(classify_word(&word, start));
                    i = j;
                }
            }
        }
        out
    }
}

fn is_delimiter(c: u8) -> bool {
    matches!(
        c,
        b' ' | b'\t'
            | b'\r'
            | b'\n'
            | b'\''
            | b'"'
            | b'`'
            | b'^'
            | b'~'
            | b'!'
            | b'<'
            | b'>'
            | b'='
            | b'+'
            | b'-'
            | b'*'
            | b'/'
            | b'&'
            | b'|'
            | b'('
            | b')'
            | b'['
            | b']'
            | b','
            | b';'
    )
}

/// Classify an unquoted word: keyword, word operator, boolean, integer,
/// float, or name. Matching is case-insensitive and the stored lexeme is
/// lowercased.
fn classify_word(word: &str, pos: usize) -> Token {
    let lower = word.to_ascii_lowercase();
    let kind = match lower.as_str() {
        "select" => TokenKind::Select,
        "where" => TokenKind::Where,
        "key" => TokenKind::Key,
        "value" => TokenKind::Value,
        "limit" => TokenKind::Limit,
        "order" => TokenKind::Order,
        "by" => TokenKind::By,
        "asc" => TokenKind::Asc,
        "desc" => TokenKind::Desc,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "as" => TokenKind::As,
        "group" => TokenKind::Group,
        "put" => TokenKind::Put,
        "remove" => TokenKind::Remove,
        "delete" => TokenKind::Delete,
        "in" | "between" | "and" | "or" => TokenKind::Operator,
        _ => {
            if lower.parse::<i64>().is_ok() {
                TokenKind::Number
            } else if lower.parse::<f64>().is_ok() {
                TokenKind::Float
            } else {
                TokenKind::Name
            }
        }
    };
    Token::new(kind, lower, pos)
}
