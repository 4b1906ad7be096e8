//! Template segmentation and expression tokenizer.

use std::fmt;

use crate::error::{ExtractError, ExtractResult};

/// A top-level piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// `{{ ... }}` contents and the source offset of the contents.
    Output(String, usize),
    /// `{% ... %}` contents and the source offset of the contents.
    Tag(String, usize),
}

/// Splits a template into text, output and tag segments.
///
/// `{# ... #}` comments are dropped. A `-` right inside a delimiter
/// (`{%-`, `-%}`) trims whitespace on that side.
pub fn segments(source: &str) -> ExtractResult<Vec<Segment>> {
    let mut out: Vec<Segment> = Vec::new();
    let mut rest = source;
    let mut offset = 0;
    let mut trim_next = false;

    while !rest.is_empty() {
        let Some(open) = find_open(rest) else {
            push_text(&mut out, rest, trim_next);
            break;
        };

        push_text(&mut out, &rest[..open], trim_next);
        let kind = rest.as_bytes()[open + 1];
        let close = match kind {
            b'{' => "}}",
            b'%' => "%}",
            _ => "#}",
        };

        let mut inner_start = open + 2;
        if rest[inner_start..].starts_with('-') {
            inner_start += 1;
            if let Some(Segment::Text(prev)) = out.last_mut() {
                let trimmed_len = prev.trim_end().len();
                prev.truncate(trimmed_len);
            }
        }

        let inner_end = find_close(&rest[inner_start..], close).ok_or_else(|| {
            ExtractError::template_syntax(offset + open, format!("missing closing '{}'", close))
        })? + inner_start;

        let mut content = &rest[inner_start..inner_end];
        trim_next = content.ends_with('-');
        if trim_next {
            content = &content[..content.len() - 1];
        }

        let content_offset = offset + inner_start;
        match kind {
            b'{' => out.push(Segment::Output(content.trim().to_string(), content_offset)),
            b'%' => out.push(Segment::Tag(content.trim().to_string(), content_offset)),
            _ => {}
        }

        let consumed = inner_end + close.len();
        offset += consumed;
        rest = &rest[consumed..];
    }

    Ok(out)
}

fn push_text(out: &mut Vec<Segment>, text: &str, trim_start: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    if !text.is_empty() {
        out.push(Segment::Text(text.to_string()));
    }
}

/// Finds the next `{{`, `{%` or `{#`.
fn find_open(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#'))
}

/// Finds `close` outside of quoted strings.
fn find_close(s: &str, close: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, ch) in s.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if s[i..].starts_with(close) => {
                if close == "#}" || !s[..i].ends_with('\\') {
                    return Some(i);
                }
            }
            None => {}
        }
    }
    None
}

/// A token inside an output block or tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    Comma,
    Colon,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    End,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Name(n) => write!(f, "name '{}'", n),
            Tok::Str(s) => write!(f, "string '{}'", s),
            Tok::Int(i) => write!(f, "integer {}", i),
            Tok::Float(x) => write!(f, "float {}", x),
            Tok::Dot => f.write_str("'.'"),
            Tok::Comma => f.write_str("','"),
            Tok::Colon => f.write_str("':'"),
            Tok::Pipe => f.write_str("'|'"),
            Tok::Tilde => f.write_str("'~'"),
            Tok::Plus => f.write_str("'+'"),
            Tok::Minus => f.write_str("'-'"),
            Tok::Assign => f.write_str("'='"),
            Tok::Eq => f.write_str("'=='"),
            Tok::Ne => f.write_str("'!='"),
            Tok::Lt => f.write_str("'<'"),
            Tok::Le => f.write_str("'<='"),
            Tok::Gt => f.write_str("'>'"),
            Tok::Ge => f.write_str("'>='"),
            Tok::LParen => f.write_str("'('"),
            Tok::RParen => f.write_str("')'"),
            Tok::LBracket => f.write_str("'['"),
            Tok::RBracket => f.write_str("']'"),
            Tok::End => f.write_str("end of block"),
        }
    }
}

/// Tokenizes block contents; positions are absolute source offsets.
pub fn tokenize(content: &str, base: usize) -> ExtractResult<Vec<(usize, Tok)>> {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        let at = base + pos;
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < chars.len()
                && (chars[i].1.is_ascii_digit()
                    || (chars[i].1 == '.'
                        && !is_float
                        && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())))
            {
                if chars[i].1 == '.' {
                    is_float = true;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let token = if is_float {
                Tok::Float(text.parse().map_err(|_| {
                    ExtractError::template_syntax(at, format!("invalid number '{}'", text))
                })?)
            } else {
                Tok::Int(text.parse().map_err(|_| {
                    ExtractError::template_syntax(at, format!("invalid number '{}'", text))
                })?)
            };
            tokens.push((at, token));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push((at, Tok::Name(text)));
            continue;
        }

        if ch == '\'' || ch == '"' {
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let c = chars[i].1;
                if c == '\\' {
                    if let Some((_, escaped)) = chars.get(i + 1) {
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                        continue;
                    }
                }
                if c == ch {
                    closed = true;
                    i += 1;
                    break;
                }
                text.push(c);
                i += 1;
            }
            if !closed {
                return Err(ExtractError::template_syntax(at, "unterminated string"));
            }
            tokens.push((at, Tok::Str(text)));
            continue;
        }

        let (token, width) = match (ch, next) {
            ('=', Some('=')) => (Tok::Eq, 2),
            ('!', Some('=')) => (Tok::Ne, 2),
            ('<', Some('=')) => (Tok::Le, 2),
            ('>', Some('=')) => (Tok::Ge, 2),
            ('=', _) => (Tok::Assign, 1),
            ('<', _) => (Tok::Lt, 1),
            ('>', _) => (Tok::Gt, 1),
            ('.', _) => (Tok::Dot, 1),
            (',', _) => (Tok::Comma, 1),
            (':', _) => (Tok::Colon, 1),
            ('|', _) => (Tok::Pipe, 1),
            ('~', _) => (Tok::Tilde, 1),
            ('+', _) => (Tok::Plus, 1),
            ('-', _) => (Tok::Minus, 1),
            ('(', _) => (Tok::LParen, 1),
            (')', _) => (Tok::RParen, 1),
            ('[', _) => (Tok::LBracket, 1),
            (']', _) => (Tok::RBracket, 1),
            (other, _) => {
                return Err(ExtractError::template_syntax(
                    at,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        tokens.push((at, token));
        i += width;
    }

    tokens.push((base + content.len(), Tok::End));
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segments() {
        let segs = segments("a {{ x }} b {% if y %}c{% endif %}{# note #}").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Text("a ".into()),
                Segment::Output("x".into(), 4),
                Segment::Text(" b ".into()),
                Segment::Tag("if y".into(), 14),
                Segment::Text("c".into()),
                Segment::Tag("endif".into(), 25),
            ]
        );
    }

    #[test]
    fn test_whitespace_control() {
        let segs = segments("a   {%- if x -%}   b").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Text("a".into()),
                Segment::Tag("if x".into(), 7),
                Segment::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_close_inside_string_is_ignored() {
        let segs = segments("{{ '}}' }}").unwrap();
        assert_eq!(segs, vec![Segment::Output("'}}'".into(), 2)]);
    }

    #[test]
    fn test_unclosed_block() {
        assert!(segments("{{ x").is_err());
    }

    #[test]
    fn test_tokenize_expression() {
        let toks: Vec<Tok> = tokenize("obj | default('x') == 1.5", 0)
            .unwrap()
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(
            toks,
            vec![
                Tok::Name("obj".into()),
                Tok::Pipe,
                Tok::Name("default".into()),
                Tok::LParen,
                Tok::Str("x".into()),
                Tok::RParen,
                Tok::Eq,
                Tok::Float(1.5),
                Tok::End,
            ]
        );
    }
}
