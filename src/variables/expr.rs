//! Arithmetic expressions.
//!
//! Grammar (after variable references have been substituted):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('^' unary)?
//! primary := number | constant | function '(' expr ')' | '(' expr ')'
//! ```
//!
//! `^` binds tighter than unary minus and is right-associative, so `-2^2` is `-4`
//! and `2^3^2` is `512`. Constants are `~pi` and `~e`. Number literals accept a
//! fraction and a scientific exponent (`1.5e-3`).

use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::character::complete::{alpha1, alphanumeric0, char, multispace0, one_of};
use nom::combinator::{map, peek, recognize, value};
use nom::multi::many0;
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser as _};

use super::{ResolveError, VariableStore, substitute};

/// Parenthesis/unary nesting beyond this is rejected as too complex.
const MAX_NESTING: usize = 200;
/// Binary `+ - * /` operators allowed in one expression.
const MAX_OPERATORS: usize = 1000;

/// Resolve variable references in `expression`, then evaluate it.
pub fn evaluate(expression: &str, vars: &VariableStore) -> Result<f64, ResolveError> {
    let resolved = substitute(expression, vars)?;
    evaluate_resolved(&resolved)
}

/// Evaluate text that no longer contains variable references.
pub fn evaluate_resolved(text: &str) -> Result<f64, ResolveError> {
    let expr = parse(text)?;
    let value = expr.eval().map_err(|reason| invalid(text, reason))?;
    if !value.is_finite() {
        return Err(invalid(text, "result is not a finite number"));
    }
    Ok(value)
}

/// Parse text into an expression tree.
pub fn parse(text: &str) -> Result<Expr, ResolveError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
        depth: 0,
        operators: 0,
    };
    let expr = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(invalid(text, format!("unexpected {tok}")));
    }
    Ok(expr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sqrt,
    Abs,
    Round,
    Floor,
    Ceil,
    Trunc,
    Sin,
    Cos,
    Tan,
    Ln,
}

impl Function {
    fn apply(self, x: f64) -> f64 {
        match self {
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
            Function::Round => x.round(),
            Function::Floor => x.floor(),
            Function::Ceil => x.ceil(),
            Function::Trunc => x.trunc(),
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Ln => x.ln(),
        }
    }
}

impl FromStr for Function {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "round" => Function::Round,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "trunc" => Function::Trunc,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "ln" => Function::Ln,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        arg: Box<Expr>,
    },
}

impl Expr {
    pub fn eval(&self) -> Result<f64, &'static str> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Neg(inner) => -inner.eval()?,
            Expr::Call { function, arg } => function.apply(arg.eval()?),
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (lhs.eval()?, rhs.eval()?);
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => {
                        if r == 0.0 {
                            return Err("division by zero");
                        }
                        l / r
                    }
                    BinaryOp::Pow => l.powf(r),
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Number(f64),
    Constant(&'a str),
    Ident(&'a str),
    Op(BinaryOp),
    LParen,
    RParen,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Constant(name) => write!(f, "'~{name}'"),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Op(op) => {
                let c = match op {
                    BinaryOp::Add => '+',
                    BinaryOp::Sub => '-',
                    BinaryOp::Mul => '*',
                    BinaryOp::Div => '/',
                    BinaryOp::Pow => '^',
                };
                write!(f, "'{c}'")
            }
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> ResolveError {
    ResolveError::InvalidExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn too_complex(expression: &str) -> ResolveError {
    ResolveError::ExpressionTooComplex {
        expression: expression.to_string(),
    }
}

// `double` also reads a leading sign and `nan`/`inf`; signs are operators here,
// so a literal must start with a digit or a dot.
fn number_literal(input: &str) -> IResult<&str, Token<'_>> {
    map(
        preceded(peek(one_of("0123456789.")), double),
        Token::Number,
    )
    .parse(input)
}

fn constant(input: &str) -> IResult<&str, Token<'_>> {
    map(preceded(char('~'), alpha1), Token::Constant).parse(input)
}

fn ident(input: &str) -> IResult<&str, Token<'_>> {
    map(recognize(pair(alpha1, alphanumeric0)), Token::Ident).parse(input)
}

fn punctuation(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        value(Token::Op(BinaryOp::Add), char('+')),
        value(Token::Op(BinaryOp::Sub), char('-')),
        value(Token::Op(BinaryOp::Mul), char('*')),
        value(Token::Op(BinaryOp::Div), char('/')),
        value(Token::Op(BinaryOp::Pow), char('^')),
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
    ))
    .parse(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    alt((number_literal, constant, punctuation, ident)).parse(input)
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>, ResolveError> {
    let (rest, tokens) = match many0(delimited(multispace0, token, multispace0)).parse(text) {
        Ok(lexed) => lexed,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(invalid(text, format!("malformed input at '{}'", e.input)));
        }
        Err(nom::Err::Incomplete(_)) => return Err(invalid(text, "incomplete expression")),
    };

    if let Some(c) = rest.trim_start().chars().next() {
        return Err(invalid(text, format!("unexpected character '{c}'")));
    }
    if tokens.is_empty() {
        return Err(invalid(text, "empty expression"));
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn enter(&mut self) -> Result<(), ResolveError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(too_complex(self.text));
        }
        Ok(())
    }

    /// Counts one `+ - * /` operator. Each one nests the tree a level deeper.
    fn count_operator(&mut self) -> Result<(), ResolveError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(too_complex(self.text));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ResolveError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.eat_op(&[BinaryOp::Add, BinaryOp::Sub]) {
            self.count_operator()?;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ResolveError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&[BinaryOp::Mul, BinaryOp::Div]) {
            self.count_operator()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ResolveError> {
        match self.eat_op(&[BinaryOp::Add, BinaryOp::Sub]) {
            Some(op) => {
                self.enter()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(if op == BinaryOp::Sub {
                    Expr::Neg(Box::new(inner))
                } else {
                    inner
                })
            }
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ResolveError> {
        let base = self.primary()?;
        if self.eat_op(&[BinaryOp::Pow]).is_some() {
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ResolveError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Constant(name)) => match name {
                "pi" => Ok(Expr::Number(std::f64::consts::PI)),
                "e" => Ok(Expr::Number(std::f64::consts::E)),
                _ => Err(invalid(self.text, format!("unknown constant '~{name}'"))),
            },
            Some(Token::LParen) => self.parenthesized(),
            Some(Token::Ident(name)) => {
                let function = name
                    .parse::<Function>()
                    .map_err(|()| invalid(self.text, format!("unknown function '{name}'")))?;
                match self.next() {
                    Some(Token::LParen) => {}
                    _ => return Err(invalid(self.text, format!("expected '(' after '{name}'"))),
                }
                let arg = self.parenthesized()?;
                Ok(Expr::Call {
                    function,
                    arg: Box::new(arg),
                })
            }
            Some(tok) => Err(invalid(self.text, format!("unexpected {tok}"))),
            None => Err(invalid(self.text, "unexpected end of expression")),
        }
    }

    /// Everything after an opening parenthesis up to and including its match.
    fn parenthesized(&mut self) -> Result<Expr, ResolveError> {
        self.enter()?;
        let inner = self.expr()?;
        match self.next() {
            Some(Token::RParen) => {}
            _ => return Err(invalid(self.text, "missing ')'")),
        }
        self.depth -= 1;
        Ok(inner)
    }
}
