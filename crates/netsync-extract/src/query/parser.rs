//! Top-down operator precedence parser for path queries.

use serde_json::Value;

use super::ast::{Comparator, Node};
use super::functions;
use super::lexer::{tokenize, Token};
use crate::error::{ExtractError, ExtractResult};

/// Right-hand sides of a projection stop at tokens binding weaker than this.
const PROJECTION_STOP: u8 = 10;

/// Parses a query string into a [`Node`].
pub fn parse(query: &str) -> ExtractResult<Node> {
    let mut parser = Parser {
        query,
        tokens: tokenize(query)?,
        position: 0,
    };
    let node = parser.expression(0)?;
    match parser.peek() {
        Token::Eof => Ok(node),
        other => Err(parser.error(format!("unexpected {} after expression", other))),
    }
}

struct Parser<'q> {
    query: &'q str,
    tokens: Vec<(usize, Token)>,
    position: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map_or(&Token::Eof, |(_, t)| t)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map_or(self.query.len(), |(pos, _)| *pos)
    }

    fn error(&self, message: impl Into<String>) -> ExtractError {
        ExtractError::query_syntax(self.query, self.offset(), message)
    }

    fn expect(&mut self, expected: Token) -> ExtractResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.peek())))
        }
    }

    fn expression(&mut self, rbp: u8) -> ExtractResult<Node> {
        let mut left = self.nud()?;
        while rbp < self.peek().lbp() {
            left = self.led(left)?;
        }
        Ok(left)
    }

    fn nud(&mut self) -> ExtractResult<Node> {
        let start = self.offset();
        match self.advance() {
            Token::At => Ok(Node::Identity),
            Token::Identifier(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    self.function(name, start)
                } else {
                    Ok(Node::Field(name))
                }
            }
            Token::QuotedIdentifier(name) => Ok(Node::Field(name)),
            Token::Literal(value) => Ok(Node::Literal(value)),
            Token::RawString(s) => Ok(Node::Literal(Value::String(s))),
            Token::Star => {
                let rhs = self.projection_rhs(Token::Star.lbp())?;
                Ok(Node::ObjectProjection(Node::Identity.boxed(), rhs.boxed()))
            }
            Token::LBracket => match self.peek() {
                Token::Number(_) => Ok(Node::Index(self.index()?)),
                Token::Star if *self.peek_at(1) == Token::RBracket => {
                    self.advance();
                    self.advance();
                    let rhs = self.projection_rhs(Token::Star.lbp())?;
                    Ok(Node::Projection(Node::Identity.boxed(), rhs.boxed()))
                }
                _ => self.multi_list(),
            },
            Token::Flatten => {
                let rhs = self.projection_rhs(Token::Flatten.lbp())?;
                Ok(Node::Projection(
                    Node::Flatten(Node::Identity.boxed()).boxed(),
                    rhs.boxed(),
                ))
            }
            Token::Filter => self.filter(Node::Identity),
            Token::LBrace => self.multi_hash(),
            Token::Not => Ok(Node::Not(self.expression(Token::Not.lbp())?.boxed())),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExtractError::query_syntax(
                self.query,
                start,
                format!("unexpected {}", other),
            )),
        }
    }

    fn led(&mut self, left: Node) -> ExtractResult<Node> {
        let start = self.offset();
        match self.advance() {
            Token::Dot => {
                let rhs = self.dot_rhs(Token::Dot.lbp())?;
                Ok(Node::Subexpr(left.boxed(), rhs.boxed()))
            }
            Token::LBracket => match self.peek() {
                Token::Number(_) => {
                    let index = self.index()?;
                    Ok(Node::Subexpr(left.boxed(), Node::Index(index).boxed()))
                }
                Token::Star if *self.peek_at(1) == Token::RBracket => {
                    self.advance();
                    self.advance();
                    let rhs = self.projection_rhs(Token::Star.lbp())?;
                    Ok(Node::Projection(left.boxed(), rhs.boxed()))
                }
                other => Err(self.error(format!("expected index or '*', found {}", other))),
            },
            Token::Flatten => {
                let rhs = self.projection_rhs(Token::Flatten.lbp())?;
                Ok(Node::Projection(Node::Flatten(left.boxed()).boxed(), rhs.boxed()))
            }
            Token::Filter => self.filter(left),
            Token::Pipe => {
                let rhs = self.expression(Token::Pipe.lbp())?;
                Ok(Node::Pipe(left.boxed(), rhs.boxed()))
            }
            Token::Or => {
                let rhs = self.expression(Token::Or.lbp())?;
                Ok(Node::Or(left.boxed(), rhs.boxed()))
            }
            Token::And => {
                let rhs = self.expression(Token::And.lbp())?;
                Ok(Node::And(left.boxed(), rhs.boxed()))
            }
            token @ (Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge) => {
                let comparator = match token {
                    Token::Eq => Comparator::Eq,
                    Token::Ne => Comparator::Ne,
                    Token::Lt => Comparator::Lt,
                    Token::Le => Comparator::Le,
                    Token::Gt => Comparator::Gt,
                    _ => Comparator::Ge,
                };
                let rhs = self.expression(token.lbp())?;
                Ok(Node::Compare(comparator, left.boxed(), rhs.boxed()))
            }
            other => Err(ExtractError::query_syntax(
                self.query,
                start,
                format!("unexpected {}", other),
            )),
        }
    }

    /// Parses `N]` after an opening bracket.
    fn index(&mut self) -> ExtractResult<i64> {
        match self.advance() {
            Token::Number(n) => {
                self.expect(Token::RBracket)?;
                Ok(n)
            }
            other => Err(self.error(format!("expected number, found {}", other))),
        }
    }

    fn dot_rhs(&mut self, lbp: u8) -> ExtractResult<Node> {
        match self.peek() {
            Token::LBracket => {
                self.advance();
                self.multi_list()
            }
            Token::LBrace => {
                self.advance();
                self.multi_hash()
            }
            Token::Identifier(_) | Token::QuotedIdentifier(_) | Token::Star | Token::At => {
                self.expression(lbp)
            }
            other => Err(self.error(format!("unexpected {} after '.'", other))),
        }
    }

    fn projection_rhs(&mut self, lbp: u8) -> ExtractResult<Node> {
        if self.peek().lbp() < PROJECTION_STOP {
            return Ok(Node::Identity);
        }
        match self.peek() {
            Token::Dot => {
                self.advance();
                self.dot_rhs(lbp)
            }
            Token::LBracket | Token::Filter => self.expression(lbp),
            other => Err(self.error(format!("unexpected {} after projection", other))),
        }
    }

    fn filter(&mut self, lhs: Node) -> ExtractResult<Node> {
        let condition = self.expression(0)?;
        self.expect(Token::RBracket)?;
        let rhs = self.projection_rhs(Token::Filter.lbp())?;
        Ok(Node::FilterProjection {
            lhs: lhs.boxed(),
            condition: condition.boxed(),
            rhs: rhs.boxed(),
        })
    }

    fn multi_list(&mut self) -> ExtractResult<Node> {
        let mut items = Vec::new();
        loop {
            items.push(self.expression(0)?);
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(Token::RBracket)?;
            return Ok(Node::MultiList(items));
        }
    }

    fn multi_hash(&mut self) -> ExtractResult<Node> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.advance() {
                Token::Identifier(k) | Token::QuotedIdentifier(k) => k,
                other => return Err(self.error(format!("expected key, found {}", other))),
            };
            self.expect(Token::Colon)?;
            pairs.push((key, self.expression(0)?));
            if *self.peek() == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(Token::RBrace)?;
            return Ok(Node::MultiHash(pairs));
        }
    }

    fn function(&mut self, name: String, start: usize) -> ExtractResult<Node> {
        if !functions::is_known(&name) {
            return Err(ExtractError::query_syntax(
                self.query,
                start,
                format!("unknown function '{}'", name),
            ));
        }
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.expression(0)?);
                if *self.peek() == Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(Node::Function(name, args))
    }
}
