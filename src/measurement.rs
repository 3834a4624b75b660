use std::fmt;

use anyhow::{Context, Result};

use crate::{
  config::Progress,
  exec::{Executor, Namespace, Timing},
  format::{fmt_int, human_ns, HDIV},
  stats::Stats,
};

pub const DEFAULT_RUN_COUNT: u64 = 1_000_000;

/// A statement timed at one fixed repetition count.
#[derive(Clone, Debug)]
pub struct Measurement {
  pub stmt: String,
  pub run_count: u64,
  pub nanosec_sum: u64,
  pub nanosec_avg: f64,
  /// Present whenever variance was requested, even if it was never computed.
  pub stats: Option<Stats>,
}

impl Measurement {
  /// Times `stmt` `run_count` times in a single call, then, if `variance` is
  /// set, samples how much that call varies from run to run.
  ///
  /// # Errors
  ///
  /// This will return an error if:
  /// - `run_count` is zero.
  /// - the executor fails to run the setup or statement.
  pub fn new<E: Executor + ?Sized>(
    exec: &mut E,
    stmt: &str,
    setup: Option<&str>,
    run_count: u64,
    namespace: &mut Namespace,
    variance: bool,
    progress: Progress,
  ) -> Result<Self> {
    if run_count == 0 {
      anyhow::bail!("repetition count must be positive");
    }

    let timing = Timing {
      stmt,
      setup,
      run_count,
    };

    progress.notice(format_args!("Timing {} runs...", fmt_int(run_count)));
    let nanosec_sum = exec.time(&timing, namespace).context("time")?;
    let nanosec_avg = nanosec_sum as f64 / run_count as f64;

    let mut measurement = Self {
      stmt: stmt.to_string(),
      run_count,
      nanosec_sum,
      nanosec_avg,
      stats: None,
    };

    if variance {
      let mut stats = Stats::default();

      // A single run has no run-to-run variance to speak of.
      if run_count > 1 {
        stats
          .calculate(exec, &timing, namespace, nanosec_sum, nanosec_avg, progress)
          .context("variance")?;
      }

      measurement.stats = Some(stats);
    }

    Ok(measurement)
  }

  pub fn calculated_stats(&self) -> Option<&Stats> {
    self.stats.as_ref().filter(|stats| stats.is_calculated())
  }
}

impl fmt::Display for Measurement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.calculated_stats() {
      Some(stats) => write!(f, "{stats}"),
      None => write!(
        f,
        "Avg: {} {HDIV} Total: {}",
        human_ns(self.nanosec_avg),
        human_ns(self.nanosec_sum as f64)
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedExecutor;

  const QUIET: Progress = Progress { quiet: true };

  #[test]
  fn average_is_sum_over_run_count() {
    for (sum, run_count) in [(1_000, 1), (1_000, 3), (7, 2), (123_456_789, 1_000)] {
      let mut exec = ScriptedExecutor::new(&[sum]);
      let measurement = Measurement::new(&mut exec, "s", None, run_count, &mut Namespace::new(), false, QUIET).unwrap();

      assert_eq!(measurement.nanosec_sum, sum);
      assert_eq!(measurement.nanosec_avg, sum as f64 / run_count as f64);
      assert!(measurement.stats.is_none());
    }
  }

  #[test]
  fn passes_the_timing_through() {
    let mut exec = ScriptedExecutor::new(&[10]);
    Measurement::new(&mut exec, "stmt", Some("setup"), 42, &mut Namespace::new(), false, QUIET).unwrap();

    assert_eq!(
      exec.timings(),
      [("stmt".to_string(), Some("setup".to_string()), 42)]
    );
  }

  #[test]
  fn zero_run_count_is_rejected() {
    let mut exec = ScriptedExecutor::new(&[]);
    assert!(Measurement::new(&mut exec, "s", None, 0, &mut Namespace::new(), false, QUIET).is_err());
    assert_eq!(exec.calls(), 0);
  }

  #[test]
  fn single_run_variance_is_empty() {
    let mut exec = ScriptedExecutor::new(&[1_000]);
    let measurement = Measurement::new(&mut exec, "s", None, 1, &mut Namespace::new(), true, QUIET).unwrap();

    let stats = measurement.stats.as_ref().unwrap();
    assert!(stats.runs.is_empty());
    assert!(!stats.is_calculated());
    assert_eq!(exec.calls(), 1);
    assert!(measurement.to_string().starts_with("Avg: "));
  }

  #[test]
  fn variance_reruns_the_same_timing() {
    // 500 us call, 1 ms budget: 2 variance runs.
    let mut exec = ScriptedExecutor::new(&[500_000, 400_000, 600_000]);
    let measurement = Measurement::new(&mut exec, "s", Some("x"), 10, &mut Namespace::new(), true, QUIET).unwrap();

    assert_eq!(exec.calls(), 3);
    assert!(exec
      .timings()
      .iter()
      .all(|timing| timing == &("s".to_string(), Some("x".to_string()), 10)));

    let stats = measurement.calculated_stats().unwrap();
    assert_eq!(stats.nanosec_avg, 50_000.0);
    assert_eq!(stats.runs.len(), 2);
    assert!(measurement.to_string().starts_with("Avg      "));
  }

  #[test]
  fn errors_propagate() {
    let mut exec = ScriptedExecutor::failing_after(&[], "syntax error");
    let err = Measurement::new(&mut exec, "(", None, 5, &mut Namespace::new(), false, QUIET).unwrap_err();
    assert!(format!("{err:#}").contains("syntax error"));
  }

  #[test]
  fn plain_report() {
    let measurement = Measurement {
      stmt: "s".to_string(),
      run_count: 4,
      nanosec_sum: 10_000_000,
      nanosec_avg: 2_500_000.0,
      stats: None,
    };

    assert_eq!(measurement.to_string(), format!("Avg: 2.50 ms {HDIV} Total: 10.00 ms"));
  }
}
