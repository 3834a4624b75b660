use std::io::{self, IsTerminal, Write};

use anyhow::{Context, Result};

use crate::format::{human_ns, justification};

const PLOT_WIDTH: usize = 40;

/// A line-plot backend.
pub trait Chart {
  /// Prepares the backend for interactive rendering. Fails when the backend
  /// cannot display anything in the current environment.
  fn enable(&mut self) -> Result<()>;

  /// Plots `values` against the categorical x-axis `labels`.
  fn plot(&mut self, xlabel: &str, ylabel: &str, labels: &[String], values: &[f64]) -> Result<()>;
}

/// Draws a plot as text, one row per x label, with each point placed
/// proportionally between the smallest and largest value.
pub struct TextChart<W> {
  out: W,
  interactive: bool,
}

impl TextChart<io::Stdout> {
  /// Plots to stdout, which must be a terminal.
  pub fn stdout() -> Self {
    let out = io::stdout();
    let interactive = out.is_terminal();

    Self { out, interactive }
  }
}

impl<W: Write> TextChart<W> {
  pub fn new(out: W) -> Self {
    Self {
      out,
      interactive: true,
    }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write> Chart for TextChart<W> {
  fn enable(&mut self) -> Result<()> {
    if !self.interactive {
      anyhow::bail!("output is not an interactive terminal");
    }

    Ok(())
  }

  fn plot(&mut self, xlabel: &str, ylabel: &str, labels: &[String], values: &[f64]) -> Result<()> {
    if labels.len() != values.len() {
      anyhow::bail!("{} labels for {} values", labels.len(), values.len());
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let label_width = justification(labels.iter().chain([&xlabel.to_string()]));

    writeln!(self.out, "{xlabel:>label_width$} {ylabel}").context("write")?;
    for (label, &value) in labels.iter().zip(values) {
      let column = if span > 0.0 {
        ((value - min) / span * (PLOT_WIDTH - 1) as f64).round() as usize
      } else {
        0
      };

      let row = format!("{}*{}", " ".repeat(column), " ".repeat(PLOT_WIDTH - 1 - column));
      writeln!(self.out, "{label:>label_width$} |{row}| {}", human_ns(value)).context("write")?;
    }

    self.out.flush().context("flush")
  }
}
