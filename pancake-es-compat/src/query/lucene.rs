//! Lucene query-string syntax used by `query_string` and Kibana's search bar
//!
//! Supported: `field:value`, quoted phrases, `*`/`?` wildcards, `AND`/`OR`/
//! `NOT` (plus `&&`, `||`, `!`, `-`, `+`), parentheses, field groups such
//! as `status:(a OR b)`, `[a TO b]`/`{a TO b}` ranges, `>`/`>=`/`<`/`<=`
//! comparisons and `_exists_:field`. Boosts, fuzziness and regexes are not.

use super::translator::{date_value, parse_date_millis, wildcard_to_like};
use crate::error::EsCompatError;
use pancake::schema::{FieldDescriptor, FieldType, SchemaLookup};
use pancake::sql::{Expr, FULLTEXT_FIELD, MATCH_OPERATOR};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, multispace0},
    combinator::map,
    multi::many0,
    sequence::preceded,
    IResult,
};
use serde_json::Value;

type Result<T> = std::result::Result<T, EsCompatError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    And,
    Or,
    Not,
    Must,
    Compare(&'static str),
    /// `true` for the inclusive `[`
    RangeOpen(bool),
    RangeClose(bool),
    Phrase(String),
    Word(String),
}

/// Parsed query string
#[derive(Debug, Clone, PartialEq)]
pub enum LuceneQuery {
    MatchAll,
    And(Vec<LuceneQuery>),
    Or(Vec<LuceneQuery>),
    Not(Box<LuceneQuery>),
    Term { field: Option<String>, value: TermText },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermText {
    Word(String),
    Phrase(String),
    /// `(value, inclusive)` per side; `None` for `*`
    Range {
        lower: Option<(String, bool)>,
        upper: Option<(String, bool)>,
    },
    Compare(&'static str, String),
}

// ============================================================================
// Tokenizer
// ============================================================================

const SPECIAL: &[char] = &['(', ')', ':', '"', '[', ']', '{', '}'];

fn word(input: &str) -> IResult<&str, Token> {
    let mut text = String::new();
    let mut chars = input.char_indices();
    let mut end = input.len();
    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() || SPECIAL.contains(&c) {
            end = i;
            break;
        }
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                text.push(escaped);
            }
            continue;
        }
        text.push(c);
    }
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Alpha)));
    }
    let token = match text.as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        _ => Token::Word(text),
    };
    Ok((&input[end..], token))
}

fn phrase(input: &str) -> IResult<&str, Token> {
    let (body, _) = char('"')(input)?;
    let mut text = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[i + 1..], Token::Phrase(text))),
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    text.push(escaped);
                }
            }
            _ => text.push(c),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

fn compare(input: &str) -> IResult<&str, Token> {
    alt((
        map(tag(">="), |_| Token::Compare(">=")),
        map(tag("<="), |_| Token::Compare("<=")),
        map(tag(">"), |_| Token::Compare(">")),
        map(tag("<"), |_| Token::Compare("<")),
    ))(input)
}

fn punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        map(char('('), |_| Token::LParen),
        map(char(')'), |_| Token::RParen),
        map(char(':'), |_| Token::Colon),
        map(char('['), |_| Token::RangeOpen(true)),
        map(char('{'), |_| Token::RangeOpen(false)),
        map(char(']'), |_| Token::RangeClose(true)),
        map(char('}'), |_| Token::RangeClose(false)),
        map(tag("&&"), |_| Token::And),
        map(tag("||"), |_| Token::Or),
        map(char('!'), |_| Token::Not),
        map(char('-'), |_| Token::Not),
        map(char('+'), |_| Token::Must),
    ))(input)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let token = preceded(multispace0, alt((phrase, compare, punctuation, word)));
    let (rest, tokens) =
        many0(token)(input).map_err(|e| EsCompatError::InvalidQuery(format!("cannot tokenize query string: {e}")))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(EsCompatError::InvalidQuery(format!(
            "unexpected input in query string near '{rest}'"
        )));
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Juxtaposed clauses are ANDed instead of ORed.
    and_default: bool,
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

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(EsCompatError::InvalidQuery(format!(
                "expected {expected:?} in query string, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self, field: Option<&str>) -> Result<LuceneQuery> {
        let mut items = vec![self.parse_and(field)?];
        loop {
            match self.peek() {
                Some(Token::Or) => {
                    self.pos += 1;
                    items.push(self.parse_and(field)?);
                }
                Some(Token::RParen) | None => break,
                Some(_) => items.push(self.parse_and(field)?),
            }
        }
        Ok(collapse(items, LuceneQuery::Or))
    }

    fn parse_and(&mut self, field: Option<&str>) -> Result<LuceneQuery> {
        let mut items = vec![self.parse_unary(field)?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    items.push(self.parse_unary(field)?);
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                Some(_) if self.and_default => items.push(self.parse_unary(field)?),
                Some(_) => break,
            }
        }
        Ok(collapse(items, LuceneQuery::And))
    }

    fn parse_unary(&mut self, field: Option<&str>) -> Result<LuceneQuery> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(LuceneQuery::Not(Box::new(self.parse_unary(field)?)))
            }
            Some(Token::Must) => {
                self.pos += 1;
                self.parse_unary(field)
            }
            _ => self.parse_primary(field),
        }
    }

    fn parse_primary(&mut self, field: Option<&str>) -> Result<LuceneQuery> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or(field)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(name)) if self.peek() == Some(&Token::Colon) => {
                self.pos += 1;
                self.parse_value(&name)
            }
            Some(Token::Word(w)) => Ok(term(field, TermText::Word(w))),
            Some(Token::Phrase(p)) => Ok(term(field, TermText::Phrase(p))),
            Some(Token::RangeOpen(_) | Token::Compare(_)) => {
                self.pos -= 1;
                let field = field.ok_or_else(|| {
                    EsCompatError::InvalidQuery("range in query string needs a field".to_string())
                })?;
                self.parse_value(field)
            }
            other => Err(EsCompatError::InvalidQuery(format!(
                "unexpected {other:?} in query string"
            ))),
        }
    }

    fn parse_value(&mut self, field: &str) -> Result<LuceneQuery> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or(Some(field))?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(w)) => Ok(term(Some(field), TermText::Word(w))),
            Some(Token::Phrase(p)) => Ok(term(Some(field), TermText::Phrase(p))),
            Some(Token::Compare(op)) => {
                let value = self.bound_text()?;
                Ok(term(Some(field), TermText::Compare(op, value)))
            }
            Some(Token::RangeOpen(lower_inclusive)) => {
                let lower = self.bound_text()?;
                self.expect(Token::Word("TO".to_string()))?;
                let upper = self.bound_text()?;
                let upper_inclusive = match self.next() {
                    Some(Token::RangeClose(inclusive)) => inclusive,
                    other => {
                        return Err(EsCompatError::InvalidQuery(format!(
                            "unterminated range in query string, found {other:?}"
                        )))
                    }
                };
                let side = |text: String, inclusive| (text != "*").then_some((text, inclusive));
                Ok(term(
                    Some(field),
                    TermText::Range {
                        lower: side(lower, lower_inclusive),
                        upper: side(upper, upper_inclusive),
                    },
                ))
            }
            other => Err(EsCompatError::InvalidQuery(format!(
                "missing value for field '{field}' in query string, found {other:?}"
            ))),
        }
    }

    fn bound_text(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w) | Token::Phrase(w)) => Ok(w),
            other => Err(EsCompatError::InvalidQuery(format!(
                "expected a value in query string, found {other:?}"
            ))),
        }
    }
}

fn term(field: Option<&str>, value: TermText) -> LuceneQuery {
    let any_field = field.map_or(true, |f| f == "*");
    if any_field && value == TermText::Word("*".to_string()) {
        return LuceneQuery::MatchAll;
    }
    LuceneQuery::Term {
        field: field.map(str::to_string),
        value,
    }
}

fn collapse(mut items: Vec<LuceneQuery>, wrap: fn(Vec<LuceneQuery>) -> LuceneQuery) -> LuceneQuery {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

/// Parses a query string. An empty string matches everything.
pub fn parse(query: &str, and_default: bool) -> Result<LuceneQuery> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Ok(LuceneQuery::MatchAll);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        and_default,
    };
    let parsed = parser.parse_or(None)?;
    if let Some(token) = parser.peek() {
        return Err(EsCompatError::InvalidQuery(format!(
            "unexpected {token:?} in query string"
        )));
    }
    Ok(parsed)
}

// ============================================================================
// SQL lowering
// ============================================================================

/// Lowers a parsed query to a predicate; unqualified terms search every
/// field in `default_fields`.
pub fn to_sql(query: &LuceneQuery, default_fields: &[String], schema: &dyn SchemaLookup) -> Result<Option<Expr>> {
    match query {
        LuceneQuery::MatchAll => Ok(None),
        LuceneQuery::And(items) => {
            let mut parts = vec![];
            for item in items {
                parts.extend(to_sql(item, default_fields, schema)?);
            }
            Ok(Expr::and_all(parts))
        }
        LuceneQuery::Or(items) => {
            let mut parts = vec![];
            for item in items {
                match to_sql(item, default_fields, schema)? {
                    Some(e) => parts.push(e),
                    None => return Ok(None),
                }
            }
            Ok(Expr::or_all(parts))
        }
        LuceneQuery::Not(inner) => Ok(Some(match to_sql(inner, default_fields, schema)? {
            Some(e) => Expr::not(e),
            None => Expr::bool(false),
        })),
        LuceneQuery::Term { field, value } => {
            let fields = match field {
                Some(f) if f != "*" => std::slice::from_ref(f),
                _ => default_fields,
            };
            let mut parts = vec![];
            for f in fields {
                match term_sql(f, value, schema)? {
                    Some(e) => parts.push(e),
                    None => return Ok(None),
                }
            }
            Ok(Expr::or_all(parts))
        }
    }
}

fn term_sql(field: &str, value: &TermText, schema: &dyn SchemaLookup) -> Result<Option<Expr>> {
    if field == "_exists_" {
        let (TermText::Word(name) | TermText::Phrase(name)) = value else {
            return Err(EsCompatError::InvalidQuery("_exists_ expects a field name".to_string()));
        };
        let descriptor = schema.resolve(name)?;
        return Ok(Some(Expr::is_not_null(Expr::column(descriptor.column_name()))));
    }

    let descriptor = if field == FULLTEXT_FIELD {
        FieldDescriptor::new(FULLTEXT_FIELD, FieldType::Unknown)
    } else {
        schema.resolve(field)?
    };
    let column = Expr::column(descriptor.column_name());

    Ok(Some(match value {
        TermText::Word(w) if w == "*" => Expr::is_not_null(column),
        TermText::Word(w) if w.contains(['*', '?']) => Expr::infix(column, "ILIKE", Expr::string(wildcard_to_like(w))),
        TermText::Word(w) => match typed_literal(&descriptor, w, false) {
            Some(literal) => Expr::infix(column, "=", literal),
            None => Expr::infix(column, MATCH_OPERATOR, Expr::string(w.clone())),
        },
        TermText::Phrase(p) => Expr::infix(column, MATCH_OPERATOR, Expr::string(p.clone())),
        TermText::Compare(op, v) => Expr::infix(column, *op, bound_literal(&descriptor, v)),
        TermText::Range { lower, upper } => {
            let mut parts = vec![];
            if let Some((v, inclusive)) = lower {
                parts.push(Expr::infix(column.clone(), if *inclusive { ">=" } else { ">" }, bound_literal(&descriptor, v)));
            }
            if let Some((v, inclusive)) = upper {
                parts.push(Expr::infix(column.clone(), if *inclusive { "<=" } else { "<" }, bound_literal(&descriptor, v)));
            }
            match Expr::and_all(parts) {
                Some(e) => e,
                None => Expr::is_not_null(column),
            }
        }
    }))
}

/// Number or date literal when the field's type calls for one. Untyped
/// fields only take dates when `infer_dates` is set.
fn typed_literal(field: &FieldDescriptor, text: &str, infer_dates: bool) -> Option<Expr> {
    let dated = field.field_type.is_date()
        || (infer_dates && field.field_type == FieldType::Unknown && parse_date_millis(text).is_some());
    if dated {
        return date_value(&Value::String(text.to_string()), false).map(|(e, _)| e);
    }
    if field.field_type.is_numeric() {
        return text.parse::<f64>().ok().map(Expr::number);
    }
    None
}

fn bound_literal(field: &FieldDescriptor, text: &str) -> Expr {
    if let Some(literal) = typed_literal(field, text, true) {
        return literal;
    }
    match text.parse::<f64>() {
        Ok(n) if field.field_type == FieldType::Unknown => Expr::number(n),
        _ => Expr::string(text),
    }
}
