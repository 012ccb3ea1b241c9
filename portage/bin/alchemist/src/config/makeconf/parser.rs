// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::path::Path;

use anyhow::anyhow;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while, take_while1},
    character::complete::{self, multispace0, multispace1},
    character::is_alphabetic,
    character::is_alphanumeric,
    combinator::{map, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair},
    IResult,
};

use nom_locate::LocatedSpan;

pub type Span<'a> = LocatedSpan<&'a str, &'a Path>;

/// An enum corresponding to the values that can be assigned to a variable. The two variants
/// correspond to either a literal string or an in-place variable expansion (e.g. "${FOO}").
/// A variable expansion can then recursively contain literal strings and more variable expansions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    /// A verbatim section of text, e.g. "foo".
    Literal(Span<'a>),
    /// A variable expansion site, e.g. `${MY_VAR}`.
    Expansion(Span<'a>),
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Literal(s) => write!(f, "{}", s),
            Value::Expansion(name) => write!(f, "${{{}}}", name),
        }
    }
}

/// An [RVal] is the complete expression on the right-hand side of a variable assignment, e.g.
/// `FOO="spam $HAM eggs"` would have an [RVal] of `"spam $HAM eggs"`. In this example, the
/// [RVal] would have the [Value]s of a Literal("spam "), an Expansion{name: "HAM"}, and another
/// Literal(" eggs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RVal<'a> {
    pub vals: Vec<Value<'a>>,
}

impl<'a> RVal<'a> {
    fn new(vals: Vec<Value<'a>>) -> Self {
        Self { vals }
    }
}

impl fmt::Display for RVal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for val in self.vals.iter() {
            write!(f, "{}", val)?;
        }
        Ok(())
    }
}

/// Represents a statement in a make.conf-like configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'a> {
    /// An assignment to a variable, e.g. `FOO="bar $baz"`.
    Assign(Span<'a>, RVal<'a>),
    /// Inclusion of another source file, e.g. `source path/to/make.conf`.
    Source(RVal<'a>),
}

/// Represents a make.conf-like configuration file as a sequence of statements.
pub type File<'a> = Vec<Statement<'a>>;

/// Parser entry point for the entirety of a `make.conf` file. Expects the full body of the file
/// as a single [Span] as input.
pub fn full_parse(mut input: Span<'_>, allow_source: bool) -> anyhow::Result<File<'_>> {
    let mut file = File::new();

    // This parser loop re-assigns the remaining text to the `input` variable as fragments
    // are consumed by each sub-parser.
    while !input.is_empty() {
        if let Ok((new_input, _)) = comment_line(input) {
            input = new_input;
            continue;
        }

        if let Ok((new_input, statement)) = assignment(input) {
            file.push(statement);
            input = new_input;
            continue;
        }

        if allow_source {
            if let Ok((new_input, statement)) = source(input) {
                file.push(statement);
                input = new_input;
                continue;
            }
        }

        // Consume any stray leading whitespace, or return an error if we cannot parse further.
        let (new, _) =
            multispace1::<Span, nom::error::VerboseError<Span>>(input).map_err(|_| {
                anyhow!(
                    "Syntax error at line {line_number}:\n\n\
                    {full_line}\n\
                    {caret:>column$}\n\n\
                    Invalid fragment (expected a variable assignment or comment).
                ",
                    line_number = input.location_line(),
                    full_line = std::str::from_utf8(input.get_line_beginning()).unwrap(),
                    caret = '^',
                    column = input.get_column(),
                )
            })?;
        input = new;
    }

    Ok(file)
}

/// Parser to recognize a commented line in a `make.conf` file.
fn comment_line(input: Span) -> IResult<Span, Span> {
    recognize(preceded(complete::char('#'), complete::not_line_ending))(input)
}

/// Parser to recognize a full assignment expression, e.g. `FOO="$BAR $BAZ"`.
fn assignment(input: Span) -> IResult<Span, Statement> {
    map(separated_pair(variable, tag("="), rval), |(lval, rval)| {
        Statement::Assign(lval, rval)
    })(input)
}

/// Parser to recognize a source statement, e.g. `source path/to/make.conf`.
fn source(input: Span) -> IResult<Span, Statement> {
    map(preceded(pair(tag("source"), multispace1), rval), |rval| {
        Statement::Source(rval)
    })(input)
}

/// Parser to recognize a [RVal].
fn rval(input: Span) -> IResult<Span, RVal> {
    alt((double_quoted_rval, single_quoted_rval, unquoted_rval))(input)
}

/// Parser to recognize a properly double-quoted [RVal].
///
/// Spec reference:
/// https://dev.gentoo.org/~ulm/pms/head/pms.html#x1-470005.2.4
///
/// Line continuations are not currently handled properly.
fn double_quoted_rval(input: Span) -> IResult<Span, RVal> {
    map(
        delimited(
            tag("\""),
            many0(alt((double_quoted_literal, escaped_char, expansion))),
            tag("\""),
        ),
        |vals| RVal { vals },
    )(input)
}

/// Parser to recognize a properly single-quoted [RVal].
///
/// Line continuations are not currently handled properly.
fn single_quoted_rval(input: Span) -> IResult<Span, RVal> {
    map(delimited(tag("'"), is_not("'"), tag("'")), |s| RVal {
        vals: vec![Value::Literal(s)],
    })(input)
}

/// Parser to recognize unquoted rvalues, as much as possible.
///
/// These are violations of the PMS, but the ability to correctly parse these is needed to support
/// the few organic usages within the Chrome OS tree.
fn unquoted_rval(input: Span) -> IResult<Span, RVal> {
    let not_ws = |c: char| !c.is_ascii_whitespace();
    // Our best guess for an unquoted rvalue is everything up until the next piece of whitespace.
    let unquoted_literal = map(take_while1(not_ws), Value::Literal);

    map(
        preceded(multispace0, many0(alt((expansion, unquoted_literal)))),
        RVal::new,
    )(input)
}

/// Parser to recognize double-quoted string literals.
fn double_quoted_literal(input: Span<'_>) -> IResult<Span<'_>, Value<'_>> {
    map(is_not("$\"\\"), Value::Literal)(input)
}

/// Parser to recognize double-quoted escaped characters.
fn escaped_char(input: Span<'_>) -> IResult<Span<'_>, Value<'_>> {
    map(preceded(tag("\\"), take(1usize)), Value::Literal)(input)
}

/// Parser to recognize variable names.
fn variable(input: Span<'_>) -> IResult<Span<'_>, Span<'_>> {
    let leading_symbol = |c| is_alphabetic(c as u8) || c == '_';
    let trailing_symbol = |c| is_alphanumeric(c as u8) || c == '_';
    recognize(preceded(
        take_while1(leading_symbol),
        take_while(trailing_symbol),
    ))(input)
}

/// Parser to recognize variable expansions in rvalues.
fn expansion(input: Span<'_>) -> IResult<Span<'_>, Value<'_>> {
    map(
        preceded(
            tag("$"),
            alt((delimited(tag("{"), variable, tag("}")), variable)),
        ),
        Value::Expansion,
    )(input)
}
