//! Scanner for the `measure` command line:
//!
//! ```text
//! <statement> [-n <count>[,<count>...]] [-s <setup>] [--variance]
//! ```
//!
//! Flags may appear anywhere in the line. Everything that is not a flag or a
//! flag value is kept, in order, as the statement.

use thiserror::Error;

/// Repetition counts used when the line has no `-n`.
pub const DEFAULT_RUNS_COUNTS: [u64; 14] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 100, 1_000, 10_000, 100_000];

const VARIANCE_FLAG: &str = "--variance";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("invalid repetition count {token:?} in `-n {arg}`")]
  InvalidCount { token: String, arg: String },

  #[error("flag `-{flag}` expects a value")]
  MissingValue { flag: char },

  #[error("unsupported combination: a command line and a cell body were both given")]
  UnsupportedCombination,

  #[error("cell mode is not supported, pass the statement on the command line")]
  CellUnsupported,
}

/// The pieces of one `measure` command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeasureArgs {
  pub stmt: String,
  /// `None` means no setup at all.
  pub setup: Option<String>,
  /// Counts given with `-n`, if any.
  pub runs_counts: Option<Vec<u64>>,
  pub variance: bool,
}

impl MeasureArgs {
  /// The counts to measure at, falling back to [`DEFAULT_RUNS_COUNTS`].
  pub fn runs_counts(&self) -> Vec<u64> {
    self
      .runs_counts
      .clone()
      .unwrap_or_else(|| DEFAULT_RUNS_COUNTS.to_vec())
  }
}

/// Parses a `measure` invocation. Returns `Ok(None)` when there is nothing to
/// do, i.e. an empty line and no cell.
pub fn parse_invocation(line: &str, cell: Option<&str>) -> Result<Option<MeasureArgs>, ParseError> {
  let empty = line.trim().is_empty();

  match cell {
    Some(_) if empty => Err(ParseError::CellUnsupported),
    Some(_) => Err(ParseError::UnsupportedCombination),
    None if empty => Ok(None),
    None => parse_line(line).map(Some),
  }
}

/// Scans one line left to right, consuming flags and their values as it goes.
pub fn parse_line(line: &str) -> Result<MeasureArgs, ParseError> {
  let chars: Vec<char> = line.chars().collect();
  let text = |from: usize, to: usize| chars[from..to].iter().collect::<String>();

  let mut stmt = String::new();
  let mut setup = None;
  let mut runs_counts = None;
  let mut variance = false;

  let mut i = 0;
  while i < chars.len() {
    let c = chars[i];

    if c != '-' {
      stmt.push(c);
      i += 1;
      continue;
    }

    if text(i, (i + VARIANCE_FLAG.len()).min(chars.len())) == VARIANCE_FLAG {
      variance = true;
      i += VARIANCE_FLAG.len();
      continue;
    }

    let flag = match chars.get(i + 1) {
      Some(&flag @ ('n' | 's')) => flag,
      _ => {
        stmt.push(c);
        i += 1;
        continue;
      }
    };

    // The value either follows a single space or is glued to the flag.
    let start = match chars.get(i + 2) {
      Some(' ') => i + 3,
      Some(_) => i + 2,
      None => return Err(ParseError::MissingValue { flag }),
    };
    if start >= chars.len() {
      return Err(ParseError::MissingValue { flag });
    }

    match flag {
      'n' => {
        let stop = (start..chars.len())
          .find(|&j| chars[j].is_whitespace() || chars[j] == '-')
          .unwrap_or(chars.len());
        runs_counts = Some(parse_counts(&text(start, stop))?);
        i = stop;
      }
      _ => {
        // Up to the last flag marker left on the line, so setup code may
        // contain spaces.
        let stop = (start + 1..chars.len())
          .rev()
          .find(|&j| chars[j] == '-' && chars[j - 1].is_whitespace())
          .map_or(chars.len(), |j| j - 1);
        setup = Some(text(start, stop).trim().to_string());
        i = stop;
      }
    }
  }

  Ok(MeasureArgs {
    stmt: stmt.trim().to_string(),
    setup,
    runs_counts,
    variance,
  })
}

fn parse_counts(arg: &str) -> Result<Vec<u64>, ParseError> {
  arg
    .split(',')
    .map(|token| match token.trim().parse::<u64>() {
      Ok(count) if count > 0 => Ok(count),
      _ => Err(ParseError::InvalidCount {
        token: token.to_string(),
        arg: arg.to_string(),
      }),
    })
    .collect()
}
