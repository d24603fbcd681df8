//! Condition DSL parser.
//!
//! Recursive descent over the infix grammar, with error messages carrying
//! the character offset of the failure.
//!
//! Precedence, loosest first: OR, AND, NOT, comparison, additive,
//! multiplicative, unary minus. A comparison is non-associative (at most
//! one per parenthesis level). Historical offsets are written
//! `series[1]` or `series[-1]`; both mean one bar back.

use crate::domain::condition::{BinaryOp, Expr, Function, UnaryOp};
use crate::domain::error::ParseError;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Case-insensitive keyword with a word boundary after it.
    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        // get() also rejects a slice that would split a UTF-8 character
        let Some(head) = remaining.get(..keyword.len()) else {
            return false;
        };
        head.eq_ignore_ascii_case(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        let first = match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => ch,
            _ => {
                let word = self.peek_word();
                return Err(self.error(format!("expected identifier, found '{}'", word)));
            }
        };

        let mut ident = String::new();
        ident.push(first);
        self.advance();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(ident)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("OR") {
                let right = self.parse_and()?;
                left = Expr::BinaryOp {
                    op: BinaryOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("AND") {
                let right = self.parse_not()?;
                left = Expr::BinaryOp {
                    op: BinaryOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.consume_keyword("NOT") {
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        self.skip_whitespace();

        let op = if self.consume_exact(">=") {
            BinaryOp::Ge
        } else if self.consume_exact("<=") {
            BinaryOp::Le
        } else if self.consume_exact("==") {
            BinaryOp::Eq
        } else if self.consume_exact("!=") {
            BinaryOp::Ne
        } else if self.consume_exact(">") {
            BinaryOp::Gt
        } else if self.consume_exact("<") {
            BinaryOp::Lt
        } else {
            return Ok(left);
        };

        let right = self.parse_additive()?;
        Ok(Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_exact("+") {
                BinaryOp::Add
            } else if self.consume_exact("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.consume_exact("*") {
                BinaryOp::Mul
            } else if self.consume_exact("/") {
                BinaryOp::Div
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.consume_exact("-") {
            let operand = self.parse_unary()?;
            // fold a negated literal immediately so windows and parameter
            // substitution see plain numbers
            if let Expr::Literal(v) = operand {
                return Ok(Expr::Literal(-v));
            }
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();

        match self.peek() {
            Some('(') => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            Some(ch) if ch.is_ascii_digit() || ch == '.' => {
                Ok(Expr::Literal(self.parse_number()?))
            }
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                let start = self.pos;
                if self.peek_keyword("AND") || self.peek_keyword("OR") || self.peek_keyword("NOT")
                {
                    return Err(self.error(format!("expected operand, found '{}'", self.peek_word())));
                }
                let ident = self.parse_identifier()?;
                self.parse_postfix(ident, start)
            }
            Some(ch) => Err(self.error(format!("expected operand, found '{}'", ch))),
            None => Err(self.error("expected operand, found end of input")),
        }
    }

    /// Function call, offset access, or a plain series reference.
    fn parse_postfix(&mut self, ident: String, ident_pos: usize) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                let func = Function::from_name(&ident).ok_or(ParseError {
                    message: format!("unknown function: {}", ident),
                    position: ident_pos,
                })?;
                self.advance();
                let args = self.parse_args()?;
                if args.len() != func.arity() {
                    return Err(ParseError {
                        message: format!(
                            "{} expects {} argument(s), found {}",
                            func.name(),
                            func.arity(),
                            args.len()
                        ),
                        position: ident_pos,
                    });
                }
                if func.takes_window() && args[1].as_window().is_none() {
                    return Err(ParseError {
                        message: format!(
                            "{} window argument must be a positive integer literal",
                            func.name()
                        ),
                        position: ident_pos,
                    });
                }
                Ok(Expr::FunctionCall { func, args })
            }
            Some('[') => {
                self.advance();
                self.skip_whitespace();
                // `close[1]` and `close[-1]` both mean one bar back
                self.consume_exact("-");
                let magnitude = self.parse_offset_integer()?;
                self.expect_char(']')?;
                Ok(Expr::SeriesRef {
                    name: ident,
                    offset: magnitude,
                })
            }
            _ => Ok(Expr::SeriesRef {
                name: ident,
                offset: 0,
            }),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(args);
        }

        loop {
            args.push(self.parse_or()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(')') => {
                    self.advance();
                    return Ok(args);
                }
                Some(ch) => {
                    return Err(self.error(format!("expected ',' or ')', found '{}'", ch)));
                }
                None => return Err(self.error("expected ')', found end of input")),
            }
        }
    }

    fn parse_offset_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut digits = 0;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else {
                break;
            }
        }
        if digits == 0 {
            return Err(ParseError {
                message: "expected integer offset".to_string(),
                position: start,
            });
        }
        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid offset: {}", num_str),
            position: start,
        })
    }

    fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_or()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after expression: '{}'",
                self.remaining()
            )));
        }
        Ok(expr)
    }
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}
