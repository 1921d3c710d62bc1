//! The arithmetic subset of Painless accepted by `bucket_script`.
//!
//! Scripts are tokenized with nom and parsed by precedence climbing into a
//! small AST, which is then lowered to a SQL expression over the columns the
//! script variables resolve to.

use crate::sql::Expr;
use crate::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{map, map_res, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Semicolon,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    Number(f64),
    Null,
    Bool(bool),
    Str(String),
    Var(String),
    Neg(Box<Script>),
    Not(Box<Script>),
    Binary {
        op: &'static str,
        left: Box<Script>,
        right: Box<Script>,
    },
    Ternary {
        condition: Box<Script>,
        then: Box<Script>,
        otherwise: Box<Script>,
    },
    Call {
        name: String,
        args: Vec<Script>,
    },
}

// ============================================================================
// Tokenizer
// ============================================================================

const OPERATORS: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "?", ":",
];

fn number(input: &str) -> IResult<&str, Token> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |s: &str| s.parse::<f64>().map(Token::Number),
    )(input)
}

fn ident(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_"), tag(".")))),
        )),
        |s: &str| Token::Ident(s.to_string()),
    )(input)
}

fn string(input: &str) -> IResult<&str, Token> {
    map(
        alt((
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
        )),
        |s: &str| Token::Str(s.to_string()),
    )(input)
}

fn operator(input: &str) -> IResult<&str, Token> {
    for op in OPERATORS {
        if let Some(rest) = input.strip_prefix(op) {
            return Ok((rest, Token::Op(*op)));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        map(char('('), |_| Token::LParen),
        map(char(')'), |_| Token::RParen),
        map(char(','), |_| Token::Comma),
        map(char(';'), |_| Token::Semicolon),
    ))(input)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let token = preceded(multispace0, alt((number, string, ident, punctuation, operator)));
    let (rest, tokens) = many0(token)(input)
        .map_err(|e| Error::Script(format!("cannot tokenize script: {e}")))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(Error::Script(format!("unexpected input in script near '{rest}'")));
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Script(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn expression(&mut self) -> Result<Script> {
        let condition = self.binary(0)?;
        if self.eat_op(&["?"]).is_none() {
            return Ok(condition);
        }
        let then = self.expression()?;
        if self.eat_op(&[":"]).is_none() {
            return Err(Error::Script("ternary without ':'".to_string()));
        }
        let otherwise = self.expression()?;
        Ok(Script::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary(&mut self, level: usize) -> Result<Script> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut left = self.binary(level + 1)?;
        while let Some(op) = self.eat_op(ops) {
            let right = self.binary(level + 1)?;
            left = Script::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Script> {
        if self.eat_op(&["!"]).is_some() {
            return Ok(Script::Not(Box::new(self.unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Script::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Script> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Script::Number(n)),
            Some(Token::Str(s)) => Ok(Script::Str(s)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "null" => Ok(Script::Null),
                "true" => Ok(Script::Bool(true)),
                "false" => Ok(Script::Bool(false)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Script::Call { name, args })
                }
                _ => Ok(Script::Var(name)),
            },
            other => Err(Error::Script(format!("unexpected token {other:?}"))),
        }
    }
}

/// Parses one script expression, with an optional leading `return` and
/// trailing `;`.
pub fn parse_script(source: &str) -> Result<Script> {
    let mut tokens = tokenize(source)?;
    while tokens.last() == Some(&Token::Semicolon) {
        tokens.pop();
    }
    if matches!(tokens.first(), Some(Token::Ident(word)) if word == "return") {
        tokens.remove(0);
    }
    if tokens.is_empty() {
        return Err(Error::Script("empty script".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let script = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(Error::Script(format!("unexpected token {token:?}")));
    }
    Ok(script)
}

// ============================================================================
// Lowering
// ============================================================================

fn math_function(name: &str) -> Option<&'static str> {
    Some(match name {
        "Math.abs" => "abs",
        "Math.max" => "greatest",
        "Math.min" => "least",
        "Math.pow" => "pow",
        "Math.sqrt" => "sqrt",
        "Math.log" => "log",
        "Math.log10" => "log10",
        "Math.exp" => "exp",
        "Math.floor" => "floor",
        "Math.ceil" => "ceil",
        "Math.round" => "round",
        _ => return None,
    })
}

impl Script {
    /// Lowers the script to SQL. `variables` maps script variable names to
    /// the column aliases they read.
    pub fn to_sql(&self, variables: &HashMap<String, String>) -> Result<Expr> {
        self.lower(variables, true)
    }

    fn lower(&self, variables: &HashMap<String, String>, top: bool) -> Result<Expr> {
        Ok(match self {
            Script::Number(n) => Expr::number(*n),
            Script::Null => Expr::null(),
            Script::Bool(b) => Expr::bool(*b),
            Script::Str(s) => Expr::string(s.clone()),
            Script::Var(name) => {
                let key = name.strip_prefix("params.").unwrap_or(name);
                let alias = variables
                    .get(key)
                    .ok_or_else(|| Error::Script(format!("unknown script variable '{name}'")))?;
                Expr::column(alias.clone())
            }
            Script::Neg(inner) => Expr::function("negate", vec![inner.lower(variables, true)?]),
            Script::Not(inner) => Expr::not(inner.lower(variables, true)?),
            Script::Ternary {
                condition,
                then,
                otherwise,
            } => Expr::function(
                "if",
                vec![
                    condition.lower(variables, true)?,
                    then.lower(variables, true)?,
                    otherwise.lower(variables, true)?,
                ],
            ),
            Script::Call { name, args } => {
                let function = math_function(name)
                    .ok_or_else(|| Error::Script(format!("unsupported function '{name}'")))?;
                let args = args
                    .iter()
                    .map(|a| a.lower(variables, true))
                    .collect::<Result<Vec<_>>>()?;
                Expr::function(function, args)
            }
            Script::Binary { op, left, right } => {
                let expr = match (*op, left.as_ref(), right.as_ref()) {
                    ("==", operand, Script::Null) | ("==", Script::Null, operand) => {
                        return Ok(Expr::is_null(operand.lower(variables, false)?))
                    }
                    ("!=", operand, Script::Null) | ("!=", Script::Null, operand) => {
                        return Ok(Expr::is_not_null(operand.lower(variables, false)?))
                    }
                    ("&&", l, r) => {
                        return Ok(Expr::and(l.lower(variables, true)?, r.lower(variables, true)?))
                    }
                    ("||", l, r) => {
                        return Ok(Expr::or(l.lower(variables, true)?, r.lower(variables, true)?))
                    }
                    (op, l, r) => {
                        let sql_op = if op == "==" { "=" } else { op };
                        Expr::infix(l.lower(variables, false)?, sql_op, r.lower(variables, false)?)
                    }
                };
                if top {
                    expr
                } else {
                    Expr::paren(expr)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lower(source: &str, variables: &HashMap<String, String>) -> String {
        parse_script(source).unwrap().to_sql(variables).unwrap().to_string()
    }

    #[test]
    fn test_simple_product() {
        let v = vars(&[("count", "aggr__2__count")]);
        assert_eq!(lower("count * 1", &v), r#""aggr__2__count"*1"#);
        assert_eq!(lower("params.count * 1", &v), r#""aggr__2__count"*1"#);
    }

    #[test]
    fn test_precedence_and_parens() {
        let v = vars(&[("a", "x"), ("b", "y")]);
        assert_eq!(lower("a + b * 2", &v), r#""x"+("y"*2)"#);
        assert_eq!(lower("(a + b) * 2", &v), r#"("x"+"y")*2"#);
        assert_eq!(lower("return a / b;", &v), r#""x"/"y""#);
    }

    #[test]
    fn test_null_checks_and_ternary() {
        let v = vars(&[("n", "num"), ("d", "den")]);
        assert_eq!(
            lower(
                "params.n != null && params.d != null && params.d != 0 ? params.n / params.d : 0",
                &v
            ),
            r#"if((("num" IS NOT NULL AND "den" IS NOT NULL) AND "den"!=0), "num"/"den", 0)"#
        );
    }

    #[test]
    fn test_math_functions() {
        let v = vars(&[("a", "x")]);
        assert_eq!(lower("Math.max(a, 0)", &v), r#"greatest("x", 0)"#);
        assert_eq!(lower("Math.abs(a - 1.5)", &v), r#"abs("x"-1.5)"#);
    }

    #[test]
    fn test_unknown_variable_and_function() {
        let v = vars(&[("a", "x")]);
        assert!(parse_script("b * 2").unwrap().to_sql(&v).is_err());
        assert!(parse_script("Math.random()").unwrap().to_sql(&v).is_err());
    }

    #[test]
    fn test_malformed_scripts() {
        assert!(parse_script("").is_err());
        assert!(parse_script("a +").is_err());
        assert!(parse_script("(a").is_err());
        assert!(parse_script("a # b").is_err());
        assert!(parse_script("a ? b").is_err());
    }
}
