use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    character::complete::{char, line_ending},
    combinator::{map, value},
    multi::{many0, separated_list1},
    sequence::delimited,
    IResult,
};

use crate::errors::ParseError;

/// Parses CSV text into rows of fields.
///
/// Fields are split on `,` and rows on `\n` or `\r\n`. A quoted field may hold
/// commas, line breaks and `""` escapes. Blank lines are dropped.
pub fn parse_csv(input: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let body = input.strip_prefix('\u{feff}').unwrap_or(input);

    let (rest, rows) = parse_rows(body).map_err(|err| match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => ParseError::Malformed {
            line: line_of(body, e.input),
        },
        nom::Err::Incomplete(_) => ParseError::Malformed {
            line: line_of(body, ""),
        },
    })?;

    if !rest.is_empty() {
        let line = line_of(body, rest);
        return Err(if rest.starts_with('"') {
            ParseError::StrayQuote { line }
        } else {
            ParseError::Malformed { line }
        });
    }

    Ok(rows
        .into_iter()
        .filter(|row| !(row.len() == 1 && row[0].is_empty()))
        .collect())
}

fn parse_rows(input: &str) -> IResult<&str, Vec<Vec<String>>> {
    separated_list1(line_ending, parse_row)(input)
}

fn parse_row(input: &str) -> IResult<&str, Vec<String>> {
    separated_list1(char(','), parse_field)(input)
}

fn parse_field(input: &str) -> IResult<&str, String> {
    alt((parse_quoted, parse_bare))(input)
}

fn parse_quoted(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            many0(alt((is_not("\""), value("\"", tag("\"\""))))),
            char('"'),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}

fn parse_bare(input: &str) -> IResult<&str, String> {
    map(
        take_while(|c: char| c != ',' && c != '"' && c != '\r' && c != '\n'),
        |s: &str| s.to_string(),
    )(input)
}

// `rest` is always a suffix of `body`.
fn line_of(body: &str, rest: &str) -> usize {
    let consumed = body.len().saturating_sub(rest.len());
    body[..consumed].matches('\n').count() + 1
}
