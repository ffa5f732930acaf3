//! Instruction scripts and the action registry.
//!
//! A test case drives the cluster through small text scripts, one
//! instruction per line:
//!
//! ```text
//! # seed the two origin servers, then crawl
//! seed {SCHEME}://a.case1.{DOMAIN}:{PORT}/ {SCHEME}://b.case1.{DOMAIN}:{PORT}/
//! wait_spider_done
//! verify_search_result_url|q=test&n=2|2|http://x.example/1|http://x.example/2
//! ```
//!
//! Lines are tokenized here; actions are looked up in a [`Registry`] whose
//! entries carry a declared arity, checked once when the action is
//! registered and then against every instruction that names it.

use std::cmp::Ordering;
use std::collections::HashMap;

use thiserror::Error;

use crate::literal::FormatError;

/// One parsed instruction line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// 1-based line number within its file.
    pub line: usize,
    /// Action name.
    pub action: String,
    /// Positional arguments.
    pub args: Vec<String>,
}

impl Instruction {
    /// Arguments joined back with single spaces.
    pub fn joined_args(&self) -> String {
        self.args.join(" ")
    }
}

/// Tokenize one line. Returns `None` for blank and `#` comment lines.
///
/// A first token containing `|` is split at the first `|`: the part before
/// is the action and the rest becomes the first argument.
pub fn parse_line(line: &str, line_no: usize) -> Option<Instruction> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    let mut args = Vec::new();

    let action = match first.split_once('|') {
        Some((action, rest)) => {
            args.push(rest.to_string());
            action
        }
        None => first,
    };
    args.extend(tokens.map(str::to_string));

    Some(Instruction {
        line: line_no,
        action: action.to_string(),
        args,
    })
}

/// Tokenize a whole script.
pub fn parse_script(text: &str) -> Vec<Instruction> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(line, i + 1))
        .collect()
}

/// Literal lines of an expectation file: trimmed, blank and `#` lines dropped.
pub fn literal_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Natural ordering: digit runs compare numerically, everything else lexically.
///
/// `instructions2` sorts before `instructions10`, `case9` before `case10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks(a);
    let mut right = Chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (is_digits(x), is_digits(y)) {
                    (true, true) => {
                        let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Sort names in natural order.
pub fn natural_sort<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

fn is_digits(s: &str) -> bool {
    s.as_bytes().first().is_some_and(u8::is_ascii_digit)
}

/// Splits a string into alternating digit and non-digit runs.
struct Chunks<'a>(&'a str);

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.0.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(self.0.len());
        let (chunk, rest) = self.0.split_at(end);
        self.0 = rest;
        Some(chunk)
    }
}

/// Declared argument count of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    /// Minimum argument count.
    pub min: usize,
    /// Maximum argument count, `None` for unbounded.
    pub max: Option<usize>,
    /// Arguments must come in key/value pairs.
    pub pairs: bool,
}

impl ActionSpec {
    /// Exactly `n` arguments.
    pub const fn exactly(n: usize) -> Self {
        Self::between(n, n)
    }

    /// Between `min` and `max` arguments, inclusive.
    pub const fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
            pairs: false,
        }
    }

    /// At least `min` arguments.
    pub const fn at_least(min: usize) -> Self {
        Self {
            min,
            max: None,
            pairs: false,
        }
    }

    /// Any number of arguments, including none.
    pub const fn any() -> Self {
        Self::at_least(0)
    }

    /// One or more key/value pairs.
    pub const fn pairs() -> Self {
        Self {
            min: 2,
            max: None,
            pairs: true,
        }
    }

    /// Check an argument list against this spec.
    pub fn check(&self, action: &str, args: &[String]) -> Result<(), FormatError> {
        let got = args.len();
        if got < self.min || self.max.is_some_and(|max| got > max) {
            return Err(FormatError::Arity {
                action: action.to_string(),
                min: self.min,
                max: self.max,
                got,
            });
        }
        if self.pairs && got % 2 != 0 {
            return Err(FormatError::UnpairedArguments {
                action: action.to_string(),
                got,
            });
        }
        Ok(())
    }
}

/// Errors raised while registering actions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Name already registered
    #[error("action {0:?} is already registered")]
    Duplicate(String),

    /// Name is empty or contains a separator
    #[error("invalid action name {0:?}")]
    InvalidName(String),

    /// Minimum exceeds maximum
    #[error("action {name:?}: min arity {min} exceeds max arity {max}")]
    InvalidArity {
        /// Action name.
        name: String,
        /// Declared minimum.
        min: usize,
        /// Declared maximum.
        max: usize,
    },
}

/// Action name to handler mapping with declared arity.
#[derive(Debug, Clone)]
pub struct Registry<H> {
    entries: HashMap<String, (ActionSpec, H)>,
}

impl<H> Registry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler.
    pub fn register(&mut self, name: &str, spec: ActionSpec, handler: H) -> Result<(), RegistryError> {
        if name.is_empty() || name.contains(|c: char| c == '|' || c.is_whitespace()) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if let Some(max) = spec.max {
            if spec.min > max {
                return Err(RegistryError::InvalidArity {
                    name: name.to_string(),
                    min: spec.min,
                    max,
                });
            }
        }
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries.insert(name.to_string(), (spec, handler));
        Ok(())
    }

    /// Look an instruction up.
    ///
    /// `Ok(None)` means the action is unknown, which callers log and skip.
    /// An arity mismatch is a [`FormatError`].
    pub fn resolve(&self, instruction: &Instruction) -> Result<Option<&H>, FormatError> {
        let Some((spec, handler)) = self.entries.get(&instruction.action) else {
            return Ok(None);
        };
        spec.check(&instruction.action, &instruction.args)?;
        Ok(Some(handler))
    }

    /// Declared spec of an action.
    pub fn spec(&self, name: &str) -> Option<ActionSpec> {
        self.entries.get(name).map(|(spec, _)| *spec)
    }

    /// True when the action is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
