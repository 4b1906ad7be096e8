//! Tokenizer for path queries.

use serde_json::Value;
use std::fmt;

use crate::error::{ExtractError, ExtractResult};

/// A query token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Unquoted identifier (`interfaces`).
    Identifier(String),
    /// Double-quoted identifier (`"Ethernet1/1"`).
    QuotedIdentifier(String),
    /// Integer (only valid inside brackets).
    Number(i64),
    /// JSON literal in backticks.
    Literal(Value),
    /// Raw string literal in single quotes.
    RawString(String),
    Dot,
    Star,
    At,
    Comma,
    Colon,
    LBracket,
    RBracket,
    /// `[]`
    Flatten,
    /// `[?`
    Filter,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    /// Left binding power used by the parser.
    pub fn lbp(&self) -> u8 {
        match self {
            Token::Pipe => 1,
            Token::Or => 2,
            Token::And => 3,
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => 5,
            Token::Flatten => 9,
            Token::Star => 20,
            Token::Filter => 21,
            Token::Dot => 40,
            Token::Not => 45,
            Token::LBrace => 50,
            Token::LBracket => 55,
            Token::LParen => 60,
            _ => 0,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{}'", s),
            Token::QuotedIdentifier(s) => write!(f, "quoted identifier \"{}\"", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Literal(v) => write!(f, "literal `{}`", v),
            Token::RawString(s) => write!(f, "string '{}'", s),
            Token::Dot => f.write_str("'.'"),
            Token::Star => f.write_str("'*'"),
            Token::At => f.write_str("'@'"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Flatten => f.write_str("'[]'"),
            Token::Filter => f.write_str("'[?'"),
            Token::LBrace => f.write_str("'{'"),
            Token::RBrace => f.write_str("'}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Pipe => f.write_str("'|'"),
            Token::Or => f.write_str("'||'"),
            Token::And => f.write_str("'&&'"),
            Token::Not => f.write_str("'!'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// Splits a query into `(position, token)` pairs, ending with `Eof`.
pub fn tokenize(query: &str) -> ExtractResult<Vec<(usize, Token)>> {
    let chars: Vec<(usize, char)> = query.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |pos: usize, msg: &str| ExtractError::query_syntax(query, pos, msg);

    while i < chars.len() {
        let (pos, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '.' => Token::Dot,
            '*' => Token::Star,
            '@' => Token::At,
            ',' => Token::Comma,
            ':' => Token::Colon,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => match next {
                Some(']') => {
                    i += 1;
                    Token::Flatten
                }
                Some('?') => {
                    i += 1;
                    Token::Filter
                }
                _ => Token::LBracket,
            },
            '|' => {
                if next == Some('|') {
                    i += 1;
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            '&' => {
                if next == Some('&') {
                    i += 1;
                    Token::And
                } else {
                    return Err(err(pos, "expression references ('&') are not supported"));
                }
            }
            '!' => {
                if next == Some('=') {
                    i += 1;
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '=' => {
                if next == Some('=') {
                    i += 1;
                    Token::Eq
                } else {
                    return Err(err(pos, "expected '=='"));
                }
            }
            '<' => {
                if next == Some('=') {
                    i += 1;
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if next == Some('=') {
                    i += 1;
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '"' => {
                let (text, end) = read_delimited(&chars, i, '"')
                    .ok_or_else(|| err(pos, "unterminated quoted identifier"))?;
                i = end;
                let unescaped: String = serde_json::from_str(&format!("\"{}\"", text))
                    .map_err(|e| err(pos, &format!("invalid quoted identifier: {}", e)))?;
                Token::QuotedIdentifier(unescaped)
            }
            '\'' => {
                let (text, end) = read_delimited(&chars, i, '\'')
                    .ok_or_else(|| err(pos, "unterminated raw string"))?;
                i = end;
                Token::RawString(text.replace("\\'", "'"))
            }
            '`' => {
                let (text, end) = read_delimited(&chars, i, '`')
                    .ok_or_else(|| err(pos, "unterminated literal"))?;
                i = end;
                let text = text.replace("\\`", "`");
                let value = serde_json::from_str(&text)
                    .map_err(|e| err(pos, &format!("invalid JSON literal: {}", e)))?;
                Token::Literal(value)
            }
            c if c == '-' || c.is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let number = text
                    .parse::<i64>()
                    .map_err(|_| err(pos, &format!("invalid number '{}'", text)))?;
                tokens.push((pos, Token::Number(number)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((pos, Token::Identifier(text)));
                continue;
            }
            other => return Err(err(pos, &format!("unexpected character '{}'", other))),
        };

        tokens.push((pos, token));
        i += 1;
    }

    tokens.push((query.len(), Token::Eof));
    Ok(tokens)
}

/// Reads text between `delim` characters starting at `start` (the opening
/// delimiter). Backslash-escaped delimiters are kept escaped. Returns the
/// raw inner text and the index of the closing delimiter.
fn read_delimited(chars: &[(usize, char)], start: usize, delim: char) -> Option<(String, usize)> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let ch = chars[i].1;
        if ch == '\\' {
            if let Some((_, escaped)) = chars.get(i + 1) {
                text.push('\\');
                text.push(*escaped);
                i += 2;
                continue;
            }
        }
        if ch == delim {
            return Some((text, i));
        }
        text.push(ch);
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn kinds(query: &str) -> Vec<Token> {
        tokenize(query).unwrap().into_iter().map(|(_, t)| t).collect()
    }

    #[test]
    fn test_tokenize_path() {
        assert_eq!(
            kinds("vlans[0].vlan_name"),
            vec![
                Token::Identifier("vlans".into()),
                Token::LBracket,
                Token::Number(0),
                Token::RBracket,
                Token::Dot,
                Token::Identifier("vlan_name".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_filter_and_literals() {
        assert_eq!(
            kinds("a[?b == 'x' && c != `1`]"),
            vec![
                Token::Identifier("a".into()),
                Token::Filter,
                Token::Identifier("b".into()),
                Token::Eq,
                Token::RawString("x".into()),
                Token::And,
                Token::Identifier("c".into()),
                Token::Ne,
                Token::Literal(json!(1)),
                Token::RBracket,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_quoted_identifier() {
        assert_eq!(
            kinds("interfaces.\"Ethernet1/1\""),
            vec![
                Token::Identifier("interfaces".into()),
                Token::Dot,
                Token::QuotedIdentifier("Ethernet1/1".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("a = b").is_err());
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a.#").is_err());
    }
}
