//! Parser for detector error model description files.
//!
//! Provides functions for parsing Stim-style `.dem` files into a
//! [`DetectorErrorModel`]. Each line is tokenised with nom into an instruction
//! name, optional parenthesised arguments, and targets; `repeat` blocks are
//! then expanded while tracking the running `shift_detectors` offset.

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list0;
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use qdec_core::dem::{DetectorErrorModel, ErrorMechanism, Symptom};
use qdec_core::{ProtocolError, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Detector(usize),
    Observable(usize),
    Separator,
    Number(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Instruction<'a> {
    name: &'a str,
    args: Vec<f64>,
    targets: Vec<Target>,
    opens_block: bool,
}

#[derive(Debug)]
enum Node<'a> {
    Leaf(usize, Instruction<'a>),
    Repeat {
        count: usize,
        body: Vec<Node<'a>>,
    },
}

fn index(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse::<usize>)(input)
}

fn target(input: &str) -> IResult<&str, Target> {
    alt((
        map(preceded(char('D'), index), Target::Detector),
        map(preceded(char('L'), index), Target::Observable),
        map(char('^'), |_| Target::Separator),
        map(index, Target::Number),
    ))(input)
}

fn arguments(input: &str) -> IResult<&str, Vec<f64>> {
    delimited(
        pair(char('('), space0),
        separated_list0(delimited(space0, char(','), space0), double),
        pair(space0, char(')')),
    )(input)
}

fn instruction(input: &str) -> IResult<&str, Instruction<'_>> {
    let (input, name) = take_while1(|c: char| c.is_ascii_alphabetic() || c == '_')(input)?;
    let (input, args) = opt(arguments)(input)?;
    let (input, _) = space0(input)?;
    let (input, targets) = separated_list0(space1, target)(input)?;
    let (input, _) = space0(input)?;
    let (input, brace) = opt(char('{'))(input)?;
    Ok((
        input,
        Instruction {
            name,
            args: args.unwrap_or_default(),
            targets,
            opens_block: brace.is_some(),
        },
    ))
}

fn syntax_error(line: usize, text: &str) -> ProtocolError {
    ProtocolError::decode(format!("dem line {line}: cannot parse `{text}`"))
}

/// Splits the text into a tree of instructions and `repeat` blocks.
fn build_tree(text: &str) -> Result<Vec<Node<'_>>> {
    // Each open block keeps its header line, repeat count, and body so far.
    let mut stack: Vec<(usize, usize, Vec<Node<'_>>)> = Vec::new();
    let mut top: Vec<Node<'_>> = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        if content == "}" {
            let (_, count, body) = stack.pop().ok_or_else(|| {
                ProtocolError::decode(format!("dem line {line_no}: unmatched `}}`"))
            })?;
            let node = Node::Repeat { count, body };
            match stack.last_mut() {
                Some((_, _, parent)) => parent.push(node),
                None => top.push(node),
            }
            continue;
        }

        let (rest, instr) = instruction(content).map_err(|_| syntax_error(line_no, content))?;
        if !rest.trim().is_empty() {
            return Err(syntax_error(line_no, content));
        }

        if instr.opens_block {
            if instr.name != "repeat" {
                return Err(ProtocolError::decode(format!(
                    "dem line {line_no}: only `repeat` may open a block"
                )));
            }
            let count = match instr.targets.as_slice() {
                [Target::Number(n)] => *n,
                _ => return Err(syntax_error(line_no, content)),
            };
            stack.push((line_no, count, Vec::new()));
            continue;
        }

        let node = Node::Leaf(line_no, instr);
        match stack.last_mut() {
            Some((_, _, parent)) => parent.push(node),
            None => top.push(node),
        }
    }

    if let Some((line, _, _)) = stack.last() {
        return Err(ProtocolError::decode(format!(
            "dem line {line}: `repeat` block is never closed"
        )));
    }
    Ok(top)
}

fn index_overflow(line: usize) -> ProtocolError {
    ProtocolError::decode(format!("dem line {line}: index overflow"))
}

fn observable(line: usize, o: usize) -> Result<usize> {
    if o == usize::MAX {
        return Err(index_overflow(line));
    }
    Ok(o)
}

struct Expander {
    offset: usize,
    dem: DetectorErrorModel,
}

impl Expander {
    fn run(&mut self, nodes: &[Node<'_>]) -> Result<()> {
        for node in nodes {
            match node {
                Node::Leaf(line, instr) => self.apply(*line, instr)?,
                Node::Repeat { count, body, .. } => {
                    for _ in 0..*count {
                        self.run(body)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies the running shift. The result must leave room for a count.
    fn detector(&self, line: usize, d: usize) -> Result<usize> {
        self.offset
            .checked_add(d)
            .filter(|&i| i < usize::MAX)
            .ok_or_else(|| index_overflow(line))
    }

    fn apply(&mut self, line: usize, instr: &Instruction<'_>) -> Result<()> {
        match instr.name {
            "error" => {
                let p = match instr.args.as_slice() {
                    [p] => *p,
                    _ => {
                        return Err(ProtocolError::decode(format!(
                            "dem line {line}: `error` takes exactly one probability"
                        )));
                    }
                };
                if !(0.0..=1.0).contains(&p) {
                    return Err(ProtocolError::decode(format!(
                        "dem line {line}: probability {p} is outside [0, 1]"
                    )));
                }

                let mut components = Vec::new();
                let mut current = Symptom::default();
                for t in &instr.targets {
                    match *t {
                        Target::Separator => components.push(std::mem::take(&mut current)),
                        Target::Detector(d) => current.detectors.push(self.detector(line, d)?),
                        Target::Observable(o) => current.observables.push(observable(line, o)?),
                        Target::Number(_) => {
                            return Err(ProtocolError::decode(format!(
                                "dem line {line}: bare number is not an error target"
                            )));
                        }
                    }
                }
                components.push(current);
                for c in &mut components {
                    c.detectors.sort_unstable();
                    c.observables.sort_unstable();
                }
                self.dem.push_mechanism(ErrorMechanism::new(p, components));
            }
            "detector" => {
                for t in &instr.targets {
                    match *t {
                        Target::Detector(d) => {
                            let index = self.detector(line, d)?;
                            self.dem.declare_detector(index);
                        }
                        _ => {
                            return Err(ProtocolError::decode(format!(
                                "dem line {line}: `detector` only takes D targets"
                            )));
                        }
                    }
                }
            }
            "logical_observable" => {
                for t in &instr.targets {
                    match *t {
                        Target::Observable(o) => self.dem.declare_observable(observable(line, o)?),
                        _ => {
                            return Err(ProtocolError::decode(format!(
                                "dem line {line}: `logical_observable` only takes L targets"
                            )));
                        }
                    }
                }
            }
            "shift_detectors" => match instr.targets.as_slice() {
                [Target::Number(n)] => {
                    self.offset = self
                        .offset
                        .checked_add(*n)
                        .ok_or_else(|| index_overflow(line))?;
                }
                _ => {
                    return Err(ProtocolError::decode(format!(
                        "dem line {line}: `shift_detectors` takes one count"
                    )));
                }
            },
            other => {
                return Err(ProtocolError::decode(format!(
                    "dem line {line}: unknown instruction `{other}`"
                )));
            }
        }
        Ok(())
    }
}

/// Parses detector error model text.
pub fn parse_dem(text: &str) -> Result<DetectorErrorModel> {
    let tree = build_tree(text)?;
    let mut expander = Expander {
        offset: 0,
        dem: DetectorErrorModel::new(),
    };
    expander.run(&tree)?;
    Ok(expander.dem)
}

/// Loads a `.dem` file and parses it.
///
/// A path that cannot be read is a resource error; malformed content is a
/// decode error carrying the offending line number.
pub fn load_dem_file<P: AsRef<Path>>(path: P) -> Result<DetectorErrorModel> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| ProtocolError::resource(path, e))?;
    parse_dem(&text)
}
