//! Textual predicate language.
//!
//! ```text
//! age >= 20 AND (name BEGINSWITH[c] "a" OR NOT owner.name == $0)
//!     SORT(age DESC, name) DISTINCT(name) LIMIT(5)
//! ```
//!
//! Keywords are case-insensitive. `[c]` after an operator compares strings
//! without case. `$N` refers to the N-th argument passed alongside the text.

use chumsky::{prelude::*, regex::regex, text, text::ascii::ident};

use super::error::{QueryError, QueryResult};
use super::predicate::{Case, CompareOp, Predicate, SortOrder, StringOp};
use crate::record::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Clause {
    Sort(Vec<(String, SortOrder)>),
    Distinct(Vec<String>),
    Limit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedQuery {
    pub(crate) predicate: Predicate,
    pub(crate) clauses: Vec<Clause>,
}

/// Everything after the column path of a condition
#[derive(Debug, Clone)]
enum Tail {
    Compare(CompareOp, Case, Value),
    StringMatch(StringOp, Case, Value),
    Between(Value, Value),
    In(Vec<Value>),
}

type Extra<'a> = extra::Err<Rich<'a, char>>;

/// A whole word matched without case
fn keyword<'a>(word: &'static str) -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    ident()
        .try_map(move |s: &str, span| {
            if s.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Rich::custom(span, format!("expected {}", word)))
            }
        })
        .padded()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn literal<'a>(args: &'a [Value]) -> impl Parser<'a, &'a str, Value, Extra<'a>> + Clone {
    let string = regex(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#)
        .map(|s: &str| Value::String(unescape(&s[1..s.len() - 1])));

    let float = regex(r"-?\d+\.\d+").try_map(|s: &str, span| {
        s.parse::<f64>()
            .map(Value::Double)
            .map_err(|e| Rich::custom(span, e.to_string()))
    });

    let integer = regex(r"-?\d+").try_map(|s: &str, span| {
        s.parse::<i64>()
            .map(Value::Int)
            .map_err(|e| Rich::custom(span, e.to_string()))
    });

    let boolean = choice((
        keyword("true").to(Value::Bool(true)),
        keyword("false").to(Value::Bool(false)),
    ));

    let null = choice((keyword("null"), keyword("nil"))).to(Value::Null);

    let arg = just('$')
        .ignore_then(text::int(10))
        .try_map(move |s: &str, span| {
            s.parse::<usize>()
                .ok()
                .and_then(|i| args.get(i).cloned())
                .ok_or_else(|| Rich::custom(span, format!("no argument ${}", s)))
        });

    choice((string, float, integer, boolean, null, arg)).padded()
}

pub(crate) fn parser<'a>(args: &'a [Value]) -> impl Parser<'a, &'a str, ParsedQuery, Extra<'a>> {
    let path = ident()
        .separated_by(just('.'))
        .at_least(1)
        .collect::<Vec<&str>>()
        .map(|segments| segments.join("."))
        .padded();

    let case = just("[c]")
        .or_not()
        .map(|c| match c {
            Some(_) => Case::Insensitive,
            None => Case::Sensitive,
        })
        .padded();

    let compare_op = choice((
        just("==").to(CompareOp::Equal),
        just("!=").to(CompareOp::NotEqual),
        just("<>").to(CompareOp::NotEqual),
        just(">=").to(CompareOp::GreaterEqual),
        just("=>").to(CompareOp::GreaterEqual),
        just("<=").to(CompareOp::LessEqual),
        just("=<").to(CompareOp::LessEqual),
        just("=").to(CompareOp::Equal),
        just(">").to(CompareOp::Greater),
        just("<").to(CompareOp::Less),
    ))
    .padded();

    let string_op = choice((
        keyword("CONTAINS").to(StringOp::Contains),
        keyword("BEGINSWITH").to(StringOp::BeginsWith),
        keyword("ENDSWITH").to(StringOp::EndsWith),
        keyword("LIKE").to(StringOp::Like),
    ));

    let lit = literal(args);
    let list = lit
        .clone()
        .separated_by(just(',').padded())
        .collect::<Vec<_>>()
        .delimited_by(just('{').padded(), just('}').padded());

    let tail = choice((
        compare_op
            .then(case.clone())
            .then(lit.clone())
            .map(|((op, case), value)| Tail::Compare(op, case, value)),
        string_op
            .then(case)
            .then(lit)
            .map(|((op, case), value)| Tail::StringMatch(op, case, value)),
        keyword("BETWEEN")
            .ignore_then(list.clone())
            .try_map(|values: Vec<Value>, span| match <[Value; 2]>::try_from(values) {
                Ok([low, high]) => Ok(Tail::Between(low, high)),
                Err(_) => Err(Rich::custom(span, "BETWEEN takes exactly two values")),
            }),
        keyword("IN").ignore_then(list).map(Tail::In),
    ));

    let condition = path
        .clone()
        .then(tail)
        .try_map(|(path, tail), span| {
            Ok(match tail {
                Tail::Compare(op, case, value) => Predicate::Compare {
                    path,
                    op,
                    value,
                    case,
                },
                Tail::StringMatch(op, case, Value::String(pattern)) => Predicate::StringMatch {
                    path,
                    op,
                    pattern,
                    case,
                },
                Tail::StringMatch(..) => {
                    return Err(Rich::custom(span, "string operators take a string"));
                }
                Tail::Between(low, high) => Predicate::Between { path, low, high },
                Tail::In(values) => Predicate::In { path, values },
            })
        });

    let predicate = recursive(|predicate| {
        let atom = choice((
            keyword("TRUEPREDICATE").to(Predicate::True),
            keyword("FALSEPREDICATE").to(Predicate::True.not()),
            predicate.delimited_by(just('(').padded(), just(')').padded()),
            condition,
        ));

        let unary = choice((keyword("NOT"), just('!').padded().ignored()))
            .repeated()
            .foldr(atom, |_, p: Predicate| p.not());

        let conjunction = unary.clone().foldl(
            choice((keyword("AND"), just("&&").padded().ignored()))
                .ignore_then(unary)
                .repeated(),
            Predicate::and,
        );

        conjunction.clone().foldl(
            choice((keyword("OR"), just("||").padded().ignored()))
                .ignore_then(conjunction)
                .repeated(),
            Predicate::or,
        )
    });

    let order = choice((
        keyword("ASCENDING").to(SortOrder::Ascending),
        keyword("ASC").to(SortOrder::Ascending),
        keyword("DESCENDING").to(SortOrder::Descending),
        keyword("DESC").to(SortOrder::Descending),
    ))
    .or_not()
    .map(Option::unwrap_or_default);

    let clause = choice((
        keyword("SORT")
            .ignore_then(
                path.clone()
                    .then(order)
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(Clause::Sort),
        keyword("DISTINCT")
            .ignore_then(
                path.separated_by(just(',').padded())
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(Clause::Distinct),
        keyword("LIMIT")
            .ignore_then(
                text::int(10)
                    .padded()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .try_map(|s: &str, span| {
                s.parse::<usize>()
                    .map(Clause::Limit)
                    .map_err(|e| Rich::custom(span, e.to_string()))
            }),
    ));

    predicate
        .or_not()
        .map(|p| p.unwrap_or(Predicate::True))
        .then(clause.repeated().collect::<Vec<_>>())
        .padded()
        .then_ignore(end())
        .map(|(predicate, clauses)| ParsedQuery { predicate, clauses })
}

pub(crate) fn parse(input: &str, args: &[Value]) -> QueryResult<ParsedQuery> {
    parser(args)
        .parse(input)
        .into_result()
        .map_err(|errs| QueryError::Syntax(format!("{:?}", errs)))
}
