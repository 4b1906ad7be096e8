//! Template parser: statements from segments, expressions from tokens.

use serde_json::Value;

use super::filters;
use super::lexer::{segments, tokenize, Segment, Tok};
use crate::error::{ExtractError, ExtractResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

/// Template expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Attr(Box<Expr>, String),
    Item(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Filter {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// `x is [not] name`
    Test {
        input: Box<Expr>,
        name: String,
        negated: bool,
    },
    /// `then if test else otherwise`
    Cond {
        then: Box<Expr>,
        test: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

/// Template statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    For {
        targets: Vec<String>,
        iterable: Expr,
        body: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Set {
        name: String,
        value: Expr,
    },
}

const TESTS: &[&str] = &["defined", "undefined", "none", "string", "number", "mapping", "sequence"];

/// Parses template source into statements.
pub fn parse_template(source: &str) -> ExtractResult<Vec<Stmt>> {
    let segs = segments(source)?;
    let mut cursor = SegmentCursor {
        segs: &segs,
        index: 0,
    };
    let (body, end) = cursor.block(&[])?;
    match end {
        None => Ok(body),
        Some((keyword, pos)) => Err(ExtractError::template_syntax(
            pos,
            format!("unexpected '{}'", keyword),
        )),
    }
}

/// Parses a standalone expression (used by tests and `{{ }}` blocks).
pub fn parse_expression(content: &str, base: usize) -> ExtractResult<Expr> {
    let mut parser = ExprParser::new(content, base)?;
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

struct SegmentCursor<'s> {
    segs: &'s [Segment],
    index: usize,
}

impl SegmentCursor<'_> {
    /// Parses statements until one of `terminators` (or end of input).
    /// Returns the body and the terminating tag keyword with the tag parser
    /// positioned after the keyword.
    fn block(&mut self, terminators: &[&str]) -> ExtractResult<(Vec<Stmt>, Option<(String, usize)>)> {
        let mut body = Vec::new();

        while let Some(seg) = self.segs.get(self.index) {
            self.index += 1;
            match seg {
                Segment::Text(text) => body.push(Stmt::Text(text.clone())),
                Segment::Output(content, pos) => body.push(Stmt::Output(parse_expression(content, *pos)?)),
                Segment::Tag(content, pos) => {
                    let keyword = content.split_whitespace().next().unwrap_or("");
                    if terminators.contains(&keyword) {
                        return Ok((body, Some((content.clone(), *pos))));
                    }
                    match keyword {
                        "if" => body.push(self.if_block(content, *pos)?),
                        "for" => body.push(self.for_block(content, *pos)?),
                        "set" => body.push(set_stmt(content, *pos)?),
                        other => {
                            return Err(ExtractError::template_syntax(
                                *pos,
                                format!("unexpected tag '{}'", other),
                            ))
                        }
                    }
                }
            }
        }

        if terminators.is_empty() {
            Ok((body, None))
        } else {
            Err(ExtractError::template_syntax(
                0,
                format!("missing '{}'", terminators.last().copied().unwrap_or("end")),
            ))
        }
    }

    fn if_block(&mut self, content: &str, pos: usize) -> ExtractResult<Stmt> {
        let mut branches = Vec::new();
        let mut condition = tag_expression(content, "if", pos)?;

        loop {
            let (body, end) = self.block(&["elif", "else", "endif"])?;
            let Some((tag, tag_pos)) = end else {
                return Err(ExtractError::template_syntax(pos, "missing 'endif'"));
            };
            branches.push((condition, body));

            match tag.split_whitespace().next() {
                Some("elif") => condition = tag_expression(&tag, "elif", tag_pos)?,
                Some("else") => {
                    let (otherwise, end) = self.block(&["endif"])?;
                    if end.is_none() {
                        return Err(ExtractError::template_syntax(pos, "missing 'endif'"));
                    }
                    return Ok(Stmt::If { branches, otherwise });
                }
                _ => {
                    return Ok(Stmt::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }

    fn for_block(&mut self, content: &str, pos: usize) -> ExtractResult<Stmt> {
        let rest = content.trim_start_matches("for").trim_start();
        let offset = pos + content.len() - rest.len();
        let mut parser = ExprParser::new(rest, offset)?;

        let mut targets = vec![parser.name()?];
        while parser.peek() == &Tok::Comma {
            parser.advance();
            targets.push(parser.name()?);
        }
        match parser.advance() {
            Tok::Name(n) if n == "in" => {}
            other => {
                return Err(ExtractError::template_syntax(
                    offset,
                    format!("expected 'in', found {}", other),
                ))
            }
        }
        let iterable = parser.expression()?;
        parser.expect_end()?;

        let (body, end) = self.block(&["else", "endfor"])?;
        let otherwise = match end {
            Some((tag, _)) if tag.trim() == "else" => {
                let (otherwise, end) = self.block(&["endfor"])?;
                if end.is_none() {
                    return Err(ExtractError::template_syntax(pos, "missing 'endfor'"));
                }
                otherwise
            }
            Some(_) => Vec::new(),
            None => return Err(ExtractError::template_syntax(pos, "missing 'endfor'")),
        };

        Ok(Stmt::For {
            targets,
            iterable,
            body,
            otherwise,
        })
    }
}

fn tag_expression(content: &str, keyword: &str, pos: usize) -> ExtractResult<Expr> {
    let rest = content.trim_start_matches(keyword);
    if rest.trim().is_empty() {
        return Err(ExtractError::template_syntax(pos, format!("'{}' needs a condition", keyword)));
    }
    parse_expression(rest, pos + keyword.len())
}

fn set_stmt(content: &str, pos: usize) -> ExtractResult<Stmt> {
    let rest = content.trim_start_matches("set");
    let offset = pos + 3;
    let mut parser = ExprParser::new(rest, offset)?;
    let name = parser.name()?;
    match parser.advance() {
        Tok::Assign => {}
        other => {
            return Err(ExtractError::template_syntax(
                offset,
                format!("expected '=', found {}", other),
            ))
        }
    }
    let value = parser.expression()?;
    parser.expect_end()?;
    Ok(Stmt::Set { name, value })
}

struct ExprParser {
    tokens: Vec<(usize, Tok)>,
    index: usize,
}

impl ExprParser {
    fn new(content: &str, base: usize) -> ExtractResult<Self> {
        Ok(Self {
            tokens: tokenize(content, base)?,
            index: 0,
        })
    }

    fn peek(&self) -> &Tok {
        self.tokens.get(self.index).map_or(&Tok::End, |(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.index + offset)
            .map_or(&Tok::End, |(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map_or(0, |(p, _)| *p)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ExtractError {
        ExtractError::template_syntax(self.position(), message)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == keyword)
    }

    fn expect(&mut self, expected: Tok) -> ExtractResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.peek())))
        }
    }

    fn expect_end(&self) -> ExtractResult<()> {
        match self.peek() {
            Tok::End => Ok(()),
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }

    fn name(&mut self) -> ExtractResult<String> {
        match self.advance() {
            Tok::Name(n) => Ok(n),
            other => Err(self.error(format!("expected name, found {}", other))),
        }
    }

    fn expression(&mut self) -> ExtractResult<Expr> {
        let then = self.or()?;
        if !self.is_keyword("if") {
            return Ok(then);
        }
        self.advance();
        let test = self.or()?;
        let otherwise = if self.is_keyword("else") {
            self.advance();
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Expr::Cond {
            then: Box::new(then),
            test: Box::new(test),
            otherwise,
        })
    }

    fn or(&mut self) -> ExtractResult<Expr> {
        let mut left = self.and()?;
        while self.is_keyword("or") {
            self.advance();
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> ExtractResult<Expr> {
        let mut left = self.not()?;
        while self.is_keyword("and") {
            self.advance();
            let right = self.not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> ExtractResult<Expr> {
        if self.is_keyword("not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ExtractResult<Expr> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek() {
                Tok::Eq => BinaryOp::Eq,
                Tok::Ne => BinaryOp::Ne,
                Tok::Lt => BinaryOp::Lt,
                Tok::Le => BinaryOp::Le,
                Tok::Gt => BinaryOp::Gt,
                Tok::Ge => BinaryOp::Ge,
                Tok::Name(n) if n == "in" => BinaryOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    BinaryOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    self.advance();
                    let negated = self.is_keyword("not");
                    if negated {
                        self.advance();
                    }
                    let name = self.name()?;
                    if !TESTS.contains(&name.as_str()) {
                        return Err(self.error(format!("unknown test '{}'", name)));
                    }
                    left = Expr::Test {
                        input: Box::new(left),
                        name,
                        negated,
                    };
                    continue;
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.concat()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn concat(&mut self) -> ExtractResult<Expr> {
        let mut left = self.additive()?;
        while *self.peek() == Tok::Tilde {
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary(BinaryOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> ExtractResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> ExtractResult<Expr> {
        if *self.peek() == Tok::Minus {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.filtered()
    }

    fn filtered(&mut self) -> ExtractResult<Expr> {
        let mut expr = self.postfix()?;
        while *self.peek() == Tok::Pipe {
            self.advance();
            let name = self.name()?;
            if !filters::is_known(&name) {
                return Err(ExtractError::UnknownFilter(name));
            }
            let (args, kwargs) = if *self.peek() == Tok::LParen {
                self.advance();
                self.call_args()?
            } else {
                (Vec::new(), Vec::new())
            };
            expr = Expr::Filter {
                input: Box::new(expr),
                name,
                args,
                kwargs,
            };
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> ExtractResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if *self.peek() == Tok::RParen {
            self.advance();
            return Ok((args, kwargs));
        }
        loop {
            if matches!(self.peek(), Tok::Name(_)) && *self.peek_at(1) == Tok::Assign {
                let key = self.name()?;
                self.advance();
                kwargs.push((key, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument after keyword argument"));
                }
                args.push(self.expression()?);
            }
            match self.advance() {
                Tok::Comma => continue,
                Tok::RParen => return Ok((args, kwargs)),
                other => return Err(self.error(format!("expected ',' or ')', found {}", other))),
            }
        }
    }

    fn postfix(&mut self) -> ExtractResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    expr = match self.advance() {
                        Tok::Name(name) => Expr::Attr(Box::new(expr), name),
                        Tok::Int(i) => Expr::Item(Box::new(expr), Box::new(Expr::Literal(Value::from(i)))),
                        other => return Err(self.error(format!("expected attribute, found {}", other))),
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Item(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> ExtractResult<Expr> {
        match self.advance() {
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Tok::Float(f) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            )),
            Tok::Name(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Tok::LParen => {
                let inner = self.expression()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Tok::RBracket {
                    loop {
                        items.push(self.expression()?);
                        if *self.peek() == Tok::Comma {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_filter_chain() {
        let expr = parse_expression("obj | first | upper", 0).unwrap();
        let Expr::Filter { input, name, .. } = expr else {
            panic!("expected filter");
        };
        assert_eq!(name, "upper");
        assert!(matches!(*input, Expr::Filter { ref name, .. } if name == "first"));
    }

    #[test]
    fn test_parse_filter_kwargs() {
        let expr = parse_expression("obj | default('x', boolean=true)", 0).unwrap();
        let Expr::Filter { args, kwargs, .. } = expr else {
            panic!("expected filter");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "boolean");
    }

    #[test]
    fn test_parse_conditional_expression() {
        let expr = parse_expression("'up' if enabled else 'down'", 0).unwrap();
        assert!(matches!(expr, Expr::Cond { otherwise: Some(_), .. }));
    }

    #[test]
    fn test_parse_not_in_and_tests() {
        assert!(matches!(
            parse_expression("x not in ['a']", 0).unwrap(),
            Expr::Binary(BinaryOp::NotIn, _, _)
        ));
        assert!(matches!(
            parse_expression("x is not none", 0).unwrap(),
            Expr::Test { negated: true, .. }
        ));
    }

    #[test]
    fn test_parse_statements() {
        let body = parse_template("{% for i in obj %}{% if i %}{{ i }}{% else %}-{% endif %}{% endfor %}")
            .unwrap();
        assert_eq!(body.len(), 1);
        assert!(matches!(&body[0], Stmt::For { targets, .. } if targets == &vec!["i".to_string()]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_template("{% if x %}unterminated").is_err());
        assert!(parse_template("{% endif %}").is_err());
        assert!(matches!(
            parse_template("{{ x | nosuchfilter }}"),
            Err(ExtractError::UnknownFilter(_))
        ));
        assert!(parse_template("{{ x is weird }}").is_err());
    }
}
