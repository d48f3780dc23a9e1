//! Parser for host command lines.
//!
//! Commands stay short and bounded, so the grammar composes `winnow`
//! combinators directly over the input line and writes the program
//! definition into a fixed-capacity [`ProgramSpec`] as it parses. No
//! allocation, no intermediate tree.
//!
//! ```text
//! start <name> lid=<temp> <component>+
//!   component := '(' temp ',' ramp_s ',' hold_s [',' name] ')'
//!              | '(' count 'x' <component>+ ')'
//! stop
//! status
//! config contrast=<0-255>
//! ```

use core::fmt;
use core::time::Duration;

use winnow::ModalResult;
use winnow::Parser;
use winnow::ascii::{dec_uint, float, space0};
use winnow::token::take_while;

use crate::controller::{Command, ProgramName, StartCommand};
use crate::program::{CYCLE_POOL_CAPACITY, ProgramSpec, SpecItem, StepSpec};

/// Structured command produced from one input line.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    /// A command destined for the controller.
    Controller(Command),
    /// Status request, answered by the host from a snapshot.
    Status,
}

/// Errors produced while parsing a command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The first word is not a known command.
    UnknownCommand,
    /// The line deviates from the grammar at `offset`.
    Syntax {
        offset: usize,
        expected: &'static str,
    },
    /// A step or program name exceeds its bound.
    NameTooLong { offset: usize },
    /// The program definition exceeds the token stream capacity.
    ProgramTooLarge,
    /// Cycles nest deeper than the cycle pool can represent.
    NestingTooDeep,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownCommand => f.write_str("unknown command"),
            ParseError::Syntax { offset, expected } => {
                write!(f, "expected {expected} at column {offset}")
            }
            ParseError::NameTooLong { offset } => {
                write!(f, "name too long at column {offset}")
            }
            ParseError::ProgramTooLarge => f.write_str("program definition too large"),
            ParseError::NestingTooDeep => f.write_str("cycles nested too deeply"),
        }
    }
}

/// Parses one trimmed command line.
pub fn parse_line(line: &str) -> Result<HostCommand, ParseError> {
    let mut rest = line.trim_ascii();
    let rest = &mut rest;

    let keyword = parse_ident(line, rest, "command")?;
    match keyword {
        "stop" => {
            expect_end(line, rest)?;
            Ok(HostCommand::Controller(Command::Stop))
        }
        "status" => {
            expect_end(line, rest)?;
            Ok(HostCommand::Status)
        }
        "config" => parse_config(line, rest),
        "start" => parse_start(line, rest),
        _ => Err(ParseError::UnknownCommand),
    }
}

fn parse_config(line: &str, rest: &mut &str) -> Result<HostCommand, ParseError> {
    skip_space(rest);
    expect_literal(line, rest, "contrast")?;
    skip_space(rest);
    expect_char(line, rest, '=')?;
    skip_space(rest);
    let contrast = parse_u8(line, rest, "contrast value 0-255")?;
    expect_end(line, rest)?;
    Ok(HostCommand::Controller(Command::Config { contrast }))
}

fn parse_start(line: &str, rest: &mut &str) -> Result<HostCommand, ParseError> {
    skip_space(rest);
    let raw_name = parse_ident(line, rest, "program name")?;
    let mut name = ProgramName::new();
    name.push_str(raw_name).map_err(|_| ParseError::NameTooLong {
        offset: offset_of(line, rest),
    })?;

    skip_space(rest);
    expect_literal(line, rest, "lid")?;
    skip_space(rest);
    expect_char(line, rest, '=')?;
    skip_space(rest);
    let lid_temp = parse_f32(line, rest, "lid temperature")?;

    let mut spec = ProgramSpec::new();
    skip_space(rest);
    if !rest.starts_with('(') {
        return Err(syntax(line, rest, "program component"));
    }
    while rest.starts_with('(') {
        parse_component(line, rest, &mut spec, 0)?;
        skip_space(rest);
    }
    expect_end(line, rest)?;

    Ok(HostCommand::Controller(Command::Start(StartCommand {
        name,
        lid_temp,
        spec,
    })))
}

fn parse_component(
    line: &str,
    rest: &mut &str,
    spec: &mut ProgramSpec,
    depth: usize,
) -> Result<(), ParseError> {
    expect_char(line, rest, '(')?;
    skip_space(rest);

    if let Some(count) = try_cycle_header(rest) {
        if depth >= CYCLE_POOL_CAPACITY - 1 {
            return Err(ParseError::NestingTooDeep);
        }
        spec.push(SpecItem::BeginCycle(count))
            .map_err(|_| ParseError::ProgramTooLarge)?;

        skip_space(rest);
        if !rest.starts_with('(') {
            return Err(syntax(line, rest, "cycle component"));
        }
        while rest.starts_with('(') {
            parse_component(line, rest, spec, depth + 1)?;
            skip_space(rest);
        }
        expect_char(line, rest, ')')?;
        spec.push(SpecItem::EndCycle)
            .map_err(|_| ParseError::ProgramTooLarge)?;
        return Ok(());
    }

    parse_step_body(line, rest, spec)
}

/// Consumes `<count> x` if present, leaving the input untouched otherwise.
fn try_cycle_header(rest: &mut &str) -> Option<u16> {
    let mut probe = *rest;
    let count: u16 = {
        let parsed: ModalResult<u16> = dec_uint.parse_next(&mut probe);
        parsed.ok()?
    };
    skip_space(&mut probe);
    let marker: ModalResult<char> = 'x'.parse_next(&mut probe);
    marker.ok()?;
    *rest = probe;
    Some(count)
}

fn parse_step_body(line: &str, rest: &mut &str, spec: &mut ProgramSpec) -> Result<(), ParseError> {
    let target_temp = parse_f32(line, rest, "step temperature")?;
    skip_space(rest);
    expect_char(line, rest, ',')?;
    skip_space(rest);
    let ramp_s = parse_u64(line, rest, "ramp seconds")?;
    skip_space(rest);
    expect_char(line, rest, ',')?;
    skip_space(rest);
    let hold_s = parse_u64(line, rest, "hold seconds")?;
    skip_space(rest);

    let name = if rest.starts_with(',') {
        expect_char(line, rest, ',')?;
        skip_space(rest);
        parse_ident(line, rest, "step name")?
    } else {
        ""
    };
    skip_space(rest);
    expect_char(line, rest, ')')?;

    let step = StepSpec::new(
        name,
        target_temp,
        Duration::from_secs(ramp_s),
        Duration::from_secs(hold_s),
    )
    .map_err(|_| ParseError::NameTooLong {
        offset: offset_of(line, rest),
    })?;
    spec.push(SpecItem::Step(step))
        .map_err(|_| ParseError::ProgramTooLarge)
}

fn offset_of(line: &str, rest: &&str) -> usize {
    line.len().saturating_sub(rest.len())
}

fn syntax(line: &str, rest: &&str, expected: &'static str) -> ParseError {
    ParseError::Syntax {
        offset: offset_of(line, rest),
        expected,
    }
}

fn skip_space(rest: &mut &str) {
    let _: ModalResult<&str> = space0.parse_next(rest);
}

fn expect_end(line: &str, rest: &mut &str) -> Result<(), ParseError> {
    skip_space(rest);
    if rest.is_empty() {
        Ok(())
    } else {
        Err(syntax(line, rest, "end of line"))
    }
}

fn expect_char(line: &str, rest: &mut &str, mut c: char) -> Result<(), ParseError> {
    let parsed: ModalResult<char> = c.parse_next(rest);
    match parsed {
        Ok(_) => Ok(()),
        Err(_) => Err(syntax(line, rest, punctuation_name(c))),
    }
}

fn expect_literal(line: &str, rest: &mut &str, mut literal: &'static str) -> Result<(), ParseError> {
    let parsed: ModalResult<&str> = literal.parse_next(rest);
    match parsed {
        Ok(_) => Ok(()),
        Err(_) => Err(syntax(line, rest, literal)),
    }
}

fn parse_ident<'s>(
    line: &str,
    rest: &mut &'s str,
    expected: &'static str,
) -> Result<&'s str, ParseError> {
    let parsed: ModalResult<&str> =
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            .parse_next(rest);
    parsed.map_err(|_| syntax(line, rest, expected))
}

fn parse_f32(line: &str, rest: &mut &str, expected: &'static str) -> Result<f32, ParseError> {
    let parsed: ModalResult<f32> = float.parse_next(rest);
    parsed.map_err(|_| syntax(line, rest, expected))
}

fn parse_u64(line: &str, rest: &mut &str, expected: &'static str) -> Result<u64, ParseError> {
    let parsed: ModalResult<u64> = dec_uint.parse_next(rest);
    parsed.map_err(|_| syntax(line, rest, expected))
}

fn parse_u8(line: &str, rest: &mut &str, expected: &'static str) -> Result<u8, ParseError> {
    let parsed: ModalResult<u8> = dec_uint.parse_next(rest);
    parsed.map_err(|_| syntax(line, rest, expected))
}

fn punctuation_name(c: char) -> &'static str {
    match c {
        '(' => "`(`",
        ')' => "`)`",
        ',' => "`,`",
        '=' => "`=`",
        _ => "punctuation",
    }
}
