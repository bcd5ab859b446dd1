//! Text predicate parser using nom.
//!
//! Parses a small lambda-body syntax into the same [`Expr`] tree the builder
//! functions produce.
//!
//! # Syntax Overview
//!
//! ```text
//! isActive == true && creditLimit > 5000
//! name.Contains("smith") || email.EndsWith("@corp.com")
//! country in ["US", "CA"] && !(deletedAt == null)
//! ```
//!
//! `!` binds tighter than `&&`, which binds tighter than `||`. A bare field in
//! predicate position means `field == true`.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::ast::{BinaryOp, Expr, StringOpKind, Value};
use crate::error::ParseError;

/// Parse a complete predicate string.
///
/// ```
/// use sqlroute::ast::*;
/// use sqlroute::parser::parse_predicate;
///
/// let parsed = parse_predicate("isActive == true && creditLimit > 5000").unwrap();
/// assert_eq!(parsed, and(eq("isActive", true), gt("creditLimit", 5000)));
/// ```
pub fn parse_predicate(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::new(0, "Empty predicate"));
    }

    match parse_or(input) {
        Ok((remaining, expr)) => {
            let remaining = remaining.trim_start();
            if remaining.is_empty() {
                Ok(expr)
            } else {
                Err(ParseError::new(
                    input.len() - remaining.len(),
                    format!("Unexpected trailing content: '{}'", remaining),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ParseError::new(
            input.len() - e.input.len(),
            format!("Parse failed: {:?}", e.code),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(ParseError::new(input.len(), "Unexpected end of input"))
        }
    }
}

/// Surround a parser with optional whitespace.
fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// `a || b || c`, folded left.
fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), parse_and))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::or)))
}

/// `a && b && c`, folded left.
fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), parse_unary))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::and)))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), parse_unary), Expr::negate),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(ws(char('(')), parse_or, ws(char(')'))),
        parse_term,
    ))(input)
}

/// A single test: string call, membership, comparison or bare operand.
fn parse_term(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        parse_string_call,
        parse_membership,
        parse_comparison,
        parse_operand,
    ))(input)
}

/// `name.Contains("x")`
fn parse_string_call(input: &str) -> IResult<&str, Expr> {
    let (input, (member, _, kind, _, literal, _)) = tuple((
        parse_identifier,
        char('.'),
        parse_string_method,
        ws(char('(')),
        parse_quoted_string,
        ws(char(')')),
    ))(input)?;

    Ok((
        input,
        Expr::StringOp {
            kind,
            member: member.to_string(),
            literal: Value::String(literal.to_string()),
        },
    ))
}

fn parse_string_method(input: &str) -> IResult<&str, StringOpKind> {
    alt((
        value(StringOpKind::Contains, alt((tag("Contains"), tag("contains")))),
        value(StringOpKind::StartsWith, alt((tag("StartsWith"), tag("startsWith")))),
        value(StringOpKind::EndsWith, alt((tag("EndsWith"), tag("endsWith")))),
    ))(input)
}

/// `country in ["US", "CA"]`
fn parse_membership(input: &str) -> IResult<&str, Expr> {
    let (input, member) = parse_identifier(input)?;
    let (input, _) = tuple((multispace1, tag("in"), multispace0, char('[')))(input)?;
    let (input, values) = separated_list0(char(','), ws(parse_literal))(input)?;
    let (input, _) = preceded(multispace0, char(']'))(input)?;

    Ok((
        input,
        Expr::SetMembership {
            member: member.to_string(),
            values,
        },
    ))
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, (left, op, right)) =
        tuple((parse_operand, ws(parse_compare_op), parse_operand))(input)?;
    Ok((input, Expr::binary(op, left, right)))
}

fn parse_compare_op(input: &str) -> IResult<&str, BinaryOp> {
    // Two-char operators first
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Gt, char('>')),
        value(BinaryOp::Lt, char('<')),
    ))(input)
}

/// A literal or a field reference.
fn parse_operand(input: &str) -> IResult<&str, Expr> {
    alt((
        map(parse_number, Expr::Constant),
        map(parse_quoted_string, |s| Expr::Constant(Value::String(s.to_string()))),
        map(parse_identifier, |word| match keyword(word) {
            Some(v) => Expr::Constant(v),
            None => Expr::MemberRef(word.to_string()),
        }),
    ))(input)
}

/// A literal only (inside `in [...]`).
fn parse_literal(input: &str) -> IResult<&str, Value> {
    alt((
        parse_number,
        map(parse_quoted_string, |s| Value::String(s.to_string())),
        map_opt(parse_identifier, keyword),
    ))(input)
}

fn keyword(word: &str) -> Option<Value> {
    match word {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

/// Parse an identifier: letter or underscore, then alphanumerics.
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a number (float before integer).
fn parse_number(input: &str) -> IResult<&str, Value> {
    alt((
        map_res(
            recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
            |s: &str| s.parse::<f64>().map(Value::Float),
        ),
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>().map(Value::Int)
        }),
    ))(input)
}

/// Double- or single-quoted string, empty allowed.
fn parse_quoted_string(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
    ))(input)
}
