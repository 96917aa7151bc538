use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{all_consuming, map};
use nom::sequence::{delimited, preceded, terminated};
use nom::{IResult, Parser};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RefiningValue;

/// Parsed refining-attribute predicate:
///   class:A                  equality (text or numeric)
///   year:[1990 TO 2000]      inclusive range, `*` for an open bound
///   NOT a:x, (…), AND, OR    boolean structure
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Equals { attribute: String, value: String },
    Range { attribute: String, lo: Option<f64>, hi: Option<f64> },
}

#[derive(Debug, Clone)]
pub struct FilterQuery {
    source: String,
    expr: FilterExpr,
}

impl FilterQuery {
    pub fn parse(input: &str) -> Result<FilterQuery> {
        match all_consuming(delimited(multispace0, expr, multispace0)).parse(input) {
            Ok((_, parsed)) => Ok(FilterQuery { source: input.to_string(), expr: parsed }),
            Err(err) => {
                let fragment = match &err {
                    nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
                    nom::Err::Incomplete(_) => input,
                };
                Err(Error::new(
                    ErrorKind::FilterQueryMalformed,
                    format!("cannot parse filter query at '{}'", fragment),
                ))
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    /// Evaluate against one record; `lookup` resolves an attribute name to
    /// the record's values (multi-valued attributes match on any value).
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Option<Vec<RefiningValue>>) -> bool {
        eval(&self.expr, lookup)
    }
}

fn eval(expr: &FilterExpr, lookup: &dyn Fn(&str) -> Option<Vec<RefiningValue>>) -> bool {
    match expr {
        FilterExpr::And(children) => children.iter().all(|c| eval(c, lookup)),
        FilterExpr::Or(children) => children.iter().any(|c| eval(c, lookup)),
        FilterExpr::Not(child) => !eval(child, lookup),
        FilterExpr::Equals { attribute, value } => {
            let Some(values) = lookup(attribute) else { return false };
            let numeric = value.parse::<f64>().ok();
            values.iter().any(|v| match (numeric, v.as_f64()) {
                (Some(want), Some(have)) => want == have,
                _ => v.as_text() == Some(value.as_str()),
            })
        }
        FilterExpr::Range { attribute, lo, hi } => {
            let Some(values) = lookup(attribute) else { return false };
            values.iter().any(|v| match v.as_f64() {
                Some(x) => lo.map_or(true, |l| x >= l) && hi.map_or(true, |h| x <= h),
                None => false,
            })
        }
    }
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(input)
}

fn bare_value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !"():[]\"".contains(c)).parse(input)
}

fn value_token(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('"'), take_while(|c: char| c != '"'), char('"')), |s: &str| s.to_string()),
        map(bare_value, |s: &str| s.to_string()),
    ))
    .parse(input)
}

fn bound(input: &str) -> IResult<&str, Option<f64>> {
    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>('*').parse(input) {
        return Ok((rest, None));
    }
    let (rest, token) = bare_value(input)?;
    match token.parse::<f64>() {
        Ok(v) => Ok((rest, Some(v))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))),
    }
}

fn comparison(input: &str) -> IResult<&str, FilterExpr> {
    let (input, attribute) = ident(input)?;
    let (input, _) = char(':').parse(input)?;

    if let Ok((input, _)) = char::<&str, nom::error::Error<&str>>('[').parse(input) {
        let (input, _) = multispace0(input)?;
        let (input, lo) = bound(input)?;
        let (input, _) = delimited(multispace1, tag("TO"), multispace1).parse(input)?;
        let (input, hi) = bound(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = char(']').parse(input)?;
        return Ok((input, FilterExpr::Range { attribute: attribute.to_string(), lo, hi }));
    }

    let (input, value) = value_token(input)?;
    Ok((input, FilterExpr::Equals { attribute: attribute.to_string(), value }))
}

fn unary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(preceded(terminated(tag("NOT"), multispace1), unary), |e| {
            FilterExpr::Not(Box::new(e))
        }),
        delimited(terminated(char('('), multispace0), expr, preceded(multispace0, char(')'))),
        comparison,
    ))
    .parse(input)
}

fn and_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (mut input, first) = unary(input)?;
    let mut items = vec![first];
    while let Ok((rest, _)) =
        delimited(multispace1, tag::<&str, &str, nom::error::Error<&str>>("AND"), multispace1).parse(input)
    {
        let (rest, next) = unary(rest)?;
        items.push(next);
        input = rest;
    }
    if items.len() == 1 {
        Ok((input, items.pop().expect("nonempty")))
    } else {
        Ok((input, FilterExpr::And(items)))
    }
}

fn expr(input: &str) -> IResult<&str, FilterExpr> {
    let (mut input, first) = and_expr(input)?;
    let mut items = vec![first];
    while let Ok((rest, _)) =
        delimited(multispace1, tag::<&str, &str, nom::error::Error<&str>>("OR"), multispace1).parse(input)
    {
        let (rest, next) = and_expr(rest)?;
        items.push(next);
        input = rest;
    }
    if items.len() == 1 {
        Ok((input, items.pop().expect("nonempty")))
    } else {
        Ok((input, FilterExpr::Or(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_of<'a>(pairs: &'a [(&'a str, RefiningValue)]) -> impl Fn(&str) -> Option<Vec<RefiningValue>> + 'a {
        move |name: &str| {
            let values: Vec<RefiningValue> =
                pairs.iter().filter(|(n, _)| *n == name).map(|(_, v)| v.clone()).collect();
            (!values.is_empty()).then_some(values)
        }
    }

    #[test]
    fn equality_matches_text_and_numbers() {
        let fq = FilterQuery::parse("class:A").unwrap();
        let record = [("class", RefiningValue::Text("A".into()))];
        assert!(fq.matches(&lookup_of(&record)));

        let fq = FilterQuery::parse("year:1991").unwrap();
        let record = [("year", RefiningValue::Int(1991))];
        assert!(fq.matches(&lookup_of(&record)));
        let record = [("year", RefiningValue::Int(1990))];
        assert!(!fq.matches(&lookup_of(&record)));
    }

    #[test]
    fn ranges_are_inclusive_with_open_bounds() {
        let fq = FilterQuery::parse("year:[1990 TO 2000]").unwrap();
        for (y, expect) in [(1989, false), (1990, true), (2000, true), (2001, false)] {
            let record = [("year", RefiningValue::Int(y))];
            assert_eq!(fq.matches(&lookup_of(&record)), expect, "year {}", y);
        }

        let fq = FilterQuery::parse("year:[* TO 2000]").unwrap();
        let record = [("year", RefiningValue::Int(1))];
        assert!(fq.matches(&lookup_of(&record)));
    }

    #[test]
    fn boolean_structure_and_parentheses() {
        let fq = FilterQuery::parse("(class:A OR class:B) AND NOT year:[2000 TO *]").unwrap();
        let record = [
            ("class", RefiningValue::Text("B".into())),
            ("year", RefiningValue::Int(1995)),
        ];
        assert!(fq.matches(&lookup_of(&record)));
        let record = [
            ("class", RefiningValue::Text("B".into())),
            ("year", RefiningValue::Int(2005)),
        ];
        assert!(!fq.matches(&lookup_of(&record)));
        let record = [
            ("class", RefiningValue::Text("C".into())),
            ("year", RefiningValue::Int(1995)),
        ];
        assert!(!fq.matches(&lookup_of(&record)));
    }

    #[test]
    fn missing_attribute_never_matches() {
        let fq = FilterQuery::parse("color:red").unwrap();
        assert!(!fq.matches(&|_| None));
    }

    #[test]
    fn malformed_input_reports_the_fragment() {
        let err = FilterQuery::parse("class:[A TO").unwrap_err();
        assert_eq!(err.kind, ErrorKind::FilterQueryMalformed);
        assert!(err.context.contains("TO"), "context: {}", err.context);

        assert!(FilterQuery::parse("AND class:A").is_err());
        assert!(FilterQuery::parse("").is_err());
    }

    #[test]
    fn quoted_values_may_contain_spaces() {
        let fq = FilterQuery::parse("genre:\"progressive rock\"").unwrap();
        let record = [("genre", RefiningValue::Text("progressive rock".into()))];
        assert!(fq.matches(&lookup_of(&record)));
    }
}
