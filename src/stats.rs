use std::fmt;

use anyhow::{Context, Result};

use crate::{
  config::Progress,
  exec::{Executor, Namespace, Timing},
  format::{fmt_int, human_ns, justification, percent_of, HDIV},
};

/// Total sampling time allowed for a variance pass, largest first. The
/// smallest tier above a single timing call is the one used.
pub const BUDGETS_NS: [u64; 8] = [
  5_000_000_000,
  1_000_000_000,
  500_000_000,
  100_000_000,
  50_000_000,
  10_000_000,
  5_000_000,
  1_000_000,
];

/// One re-timing of a whole timing call.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
  pub nanosec: u64,
  /// Squared distance from the measurement's average.
  pub deviation: f64,
}

/// The most extreme sample seen so far and the run it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extreme {
  pub nanosec: u64,
  pub index: usize,
}

/// Run-to-run variability of a single measurement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stats {
  pub runs: Vec<Run>,
  pub variance: f64,
  pub stdev: u64,
  pub slowest: Option<Extreme>,
  pub fastest: Option<Extreme>,
  pub nanosec_sum: u64,
  pub nanosec_avg: f64,
}

/// Picks the sampling budget for a timing call that took `nanosec_sum`, and
/// how many repetitions fit in it. Returns `None` when a single call already
/// exceeds every tier.
pub fn budget_for(nanosec_sum: u64) -> Option<(u64, u64)> {
  let nanosec_sum = nanosec_sum.max(1);

  BUDGETS_NS
    .iter()
    .rev()
    .find(|&&budget| budget > nanosec_sum)
    .map(|&budget| (budget, budget / nanosec_sum))
}

impl Stats {
  /// Whether a variance pass actually ran.
  pub fn is_calculated(&self) -> bool {
    self.slowest.is_some() && self.fastest.is_some()
  }

  /// Re-runs `timing` as many times as the sampling budget allows and derives
  /// variance and standard deviation against `nanosec_avg`.
  ///
  /// Returns `Ok(false)` when the pass was skipped because one call is already
  /// over budget.
  pub fn calculate<E: Executor + ?Sized>(
    &mut self,
    exec: &mut E,
    timing: &Timing,
    namespace: &mut Namespace,
    nanosec_sum: u64,
    nanosec_avg: f64,
    progress: Progress,
  ) -> Result<bool> {
    let Some((budget, repetitions)) = budget_for(nanosec_sum) else {
      progress.notice(format_args!(
        "Not calculating variance because one repetition would take {} (cap is 10 seconds)",
        human_ns(nanosec_sum as f64)
      ));
      return Ok(false);
    };

    progress.notice(format_args!(
      "Calculating variance among {} repetitions...",
      fmt_int(repetitions)
    ));
    log::debug!("variance budget {budget} ns for a {nanosec_sum} ns call");

    self.nanosec_sum = nanosec_sum;
    self.nanosec_avg = nanosec_avg;

    let mut deviation_sum = 0.0;

    for index in 0..repetitions as usize {
      let nanosec = exec.time(timing, namespace).with_context(|| format!("variance run {index}"))?;

      if self.fastest.map_or(true, |fastest| nanosec < fastest.nanosec) {
        self.fastest = Some(Extreme { nanosec, index });
      }
      if self.slowest.map_or(true, |slowest| nanosec > slowest.nanosec) {
        self.slowest = Some(Extreme { nanosec, index });
      }

      let deviation = (nanosec as f64 - nanosec_avg).powi(2);
      deviation_sum += deviation;
      self.runs.push(Run { nanosec, deviation });
    }

    self.variance = if repetitions > 1 {
      deviation_sum / (repetitions - 1) as f64
    } else {
      0.0
    };
    self.stdev = self.variance.sqrt().floor() as u64;

    Ok(true)
  }
}

impl fmt::Display for Stats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (Some(slowest), Some(fastest)) = (self.slowest, self.fastest) else {
      return write!(f, "no variance samples");
    };

    let avg = self.nanosec_avg;

    let avg_human = human_ns(avg);
    let sum_human = human_ns(self.nanosec_sum as f64);
    let stdev_human = human_ns(self.stdev as f64);
    let slowest_human = human_ns(slowest.nanosec as f64);
    let fastest_human = human_ns(fastest.nanosec as f64);

    let stdev_percent = percent_of(self.stdev as f64, avg);
    let slowest_percent = percent_of(slowest.nanosec as f64, avg);
    let fastest_percent = percent_of(fastest.nanosec as f64, avg);

    let w1 = justification([&avg_human, &sum_human, &stdev_human, &slowest_human, &fastest_human]);
    let w2 = justification([&stdev_percent, &slowest_percent, &fastest_percent]);
    let w3 = justification([slowest.index, fastest.index]);

    writeln!(f, "Avg      {HDIV} {avg_human:>w1$} {HDIV}")?;
    writeln!(f, "Total    {HDIV} {sum_human:>w1$} {HDIV}")?;
    writeln!(f, "Std. Dev {HDIV} {stdev_human:>w1$} {HDIV} {stdev_percent:>w2$}%")?;
    writeln!(
      f,
      "Slowest  {HDIV} {slowest_human:>w1$} {HDIV} {slowest_percent:>w2$}% {HDIV} Run # {:>w3$}",
      slowest.index
    )?;
    write!(
      f,
      "Fastest  {HDIV} {fastest_human:>w1$} {HDIV} {fastest_percent:>w2$}% {HDIV} Run # {:>w3$}",
      fastest.index
    )
  }
}
