//! Condition expression parser
//!
//! Recursive descent over the token stream, lowest precedence first:
//!
//! ```text
//! or      := and (('||' | 'or') and)*
//! and     := unary (('&&' | 'and') unary)*
//! unary   := ('!' | 'not') unary | compare
//! compare := primary (op primary)?
//! primary := literal | name | name '(' args ')' | '(' or ')'
//! ```
//!
//! Comparisons do not chain: `a < b < c` is a parse error.

use super::ast::{CompareOp, Expression, Literal};
use super::lexer::{tokenize, Token, TokenKind};
use crate::eval::error::ParseError;

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };

    if parser.peek().kind == TokenKind::Eof {
        return Err(ParseError::new("empty condition", "", 0));
    }

    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(trailing, "unexpected token after expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and advance never moves past it
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: &str) -> ParseError {
        let message = if token.kind == TokenKind::Eof {
            format!("{} (reached end of input)", message)
        } else {
            message.to_string()
        };
        ParseError::new(message, token.text.clone(), token.position)
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error_at(self.peek(), message))
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.peek().kind == TokenKind::Not {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_primary()?;
        let Some(op) = compare_op(&self.peek().kind) else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_primary()?;

        if compare_op(&self.peek().kind).is_some() {
            return Err(self.error_at(
                self.peek(),
                "comparisons cannot be chained; use && to combine them",
            ));
        }

        Ok(Expression::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::True => Ok(Expression::Literal(Literal::Boolean(true))),
            TokenKind::False => Ok(Expression::Literal(Literal::Boolean(false))),
            TokenKind::Number(n) => Ok(Expression::Literal(Literal::Number(n))),
            TokenKind::Duration(d) => Ok(Expression::Literal(Literal::Duration(d))),
            TokenKind::Str(s) => Ok(Expression::Literal(Literal::String(s))),
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(Expression::Call { name, args })
                } else {
                    Ok(Expression::Property(name))
                }
            }
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "expected ')'")?;
                Ok(inner)
            }
            _ => Err(self.error_at(&token, "expected a value, property or '('")),
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one
    fn parse_args(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        if self.peek().kind == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            let token = self.advance();
            match token.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                _ => return Err(self.error_at(&token, "expected ',' or ')' in argument list")),
            }
        }
    }
}

fn compare_op(kind: &TokenKind) -> Option<CompareOp> {
    match kind {
        TokenKind::Eq => Some(CompareOp::Eq),
        TokenKind::NotEq => Some(CompareOp::NotEq),
        TokenKind::Gt => Some(CompareOp::Gt),
        TokenKind::Gte => Some(CompareOp::Gte),
        TokenKind::Lt => Some(CompareOp::Lt),
        TokenKind::Lte => Some(CompareOp::Lte),
        _ => None,
    }
}
