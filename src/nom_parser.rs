use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{char, i64 as decimal_i64, space0, u16 as decimal_u16};
use nom::combinator::{all_consuming, verify};
use nom::sequence::{delimited, separated_pair};
use nom::IResult;

type Text = str;

/// One `keyword=value` configuration statement.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) struct Statement<'a> {
    pub keyword: &'a str,
    pub value: &'a str,
}

pub(crate) fn parse_statement(input: &Text) -> Option<Statement<'_>> {
    match all_consuming(statement)(input) {
        Ok((_, (keyword, value))) => Some(Statement { keyword, value }),
        Err(_) => None,
    }
}

/// Decimal TCP port, 1..=65535.
pub(crate) fn parse_port(input: &Text) -> Option<u16> {
    let parsed: IResult<&Text, u16> =
        all_consuming(verify(decimal_u16, |port: &u16| *port != 0))(input);
    parsed.ok().map(|(_, port)| port)
}

/// Signed millisecond value.
pub(crate) fn parse_millis(input: &Text) -> Option<i64> {
    let parsed: IResult<&Text, i64> = all_consuming(decimal_i64)(input);
    parsed.ok().map(|(_, ms)| ms)
}

fn statement(input: &Text) -> IResult<&Text, (&Text, &Text)> {
    separated_pair(
        delimited(space0, keyword, space0),
        char('='),
        delimited(space0, value, space0),
    )(input)
}

fn keyword(input: &Text) -> IResult<&Text, &Text> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')(input)
}

fn value(input: &Text) -> IResult<&Text, &Text> {
    take_while(|c: char| !c.is_whitespace())(input)
}
