use std::{
  fmt,
  ops::{Bound, Index, Range, RangeBounds},
};

use anyhow::{Context, Result};

use crate::{
  chart::Chart,
  config::Progress,
  exec::{Executor, Namespace},
  format::{fmt_int, justification, HDIV},
  measurement::Measurement,
  stats::Stats,
};

/// Measurements of one statement across several repetition counts.
///
/// `measurements`, `runs_counts`, `nanosec_avgs` and `stats_arr` are kept
/// index-aligned, except that a repeated count overwrites its earlier
/// measurement in place while the three sequences still grow.
#[derive(Clone, Debug, Default)]
pub struct Experiment {
  /// Keyed by the thousands-separated repetition count, in run order.
  pub measurements: Vec<(String, Measurement)>,
  pub runs_counts: Vec<u64>,
  pub nanosec_avgs: Vec<f64>,
  pub stats_arr: Vec<Option<Stats>>,
  pub variance: bool,
}

impl Experiment {
  /// Runs one [`Measurement`] per entry of `runs_counts`, in the given order.
  pub fn run<E: Executor + ?Sized>(
    exec: &mut E,
    stmt: &str,
    runs_counts: &[u64],
    setup: Option<&str>,
    namespace: &mut Namespace,
    variance: bool,
    progress: Progress,
  ) -> Result<Self> {
    let mut experiment = Self {
      variance,
      ..Self::default()
    };

    for &run_count in runs_counts {
      let measurement = Measurement::new(exec, stmt, setup, run_count, namespace, variance, progress)
        .with_context(|| format!("measure {run_count} runs"))?;

      experiment.runs_counts.push(measurement.run_count);
      experiment.nanosec_avgs.push(measurement.nanosec_avg);
      experiment.stats_arr.push(measurement.stats.clone());
      experiment.insert(fmt_int(run_count), measurement);
    }

    Ok(experiment)
  }

  /// Inserts under `key`, replacing an existing entry where it stands.
  fn insert(&mut self, key: String, measurement: Measurement) {
    match self.measurements.iter_mut().find(|(existing, _)| *existing == key) {
      Some((_, slot)) => *slot = measurement,
      None => self.measurements.push((key, measurement)),
    }
  }

  pub fn len(&self) -> usize {
    self.measurements.len()
  }

  pub fn is_empty(&self) -> bool {
    self.measurements.is_empty()
  }

  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.measurements.iter().map(|(key, _)| key.as_str())
  }

  pub fn get(&self, index: usize) -> Option<&Measurement> {
    self.measurements.get(index).map(|(_, measurement)| measurement)
  }

  /// Looks a measurement up by its label, e.g. `"1,000"`.
  pub fn get_label(&self, label: &str) -> Option<&Measurement> {
    self
      .measurements
      .iter()
      .find(|(key, _)| key == label)
      .map(|(_, measurement)| measurement)
  }

  /// Returns an independent copy holding only the entries in `range`. Every
  /// collection is cut with the same range, clamped to its own length.
  pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Self {
    let start = range.start_bound().cloned();
    let end = range.end_bound().cloned();

    let mut copy = self.clone();
    copy.measurements = cut(&self.measurements, start, end);
    copy.runs_counts = cut(&self.runs_counts, start, end);
    copy.nanosec_avgs = cut(&self.nanosec_avgs, start, end);
    copy.stats_arr = cut(&self.stats_arr, start, end);

    copy
  }

  /// Plots average time per run against repetition count. Returns `false`,
  /// after logging why, when there is no chart or it fails.
  pub fn plot(&self, chart: Option<&mut dyn Chart>) -> bool {
    let Some(chart) = chart else {
      log::warn!("no chart backend available, Experiment::plot will not work");
      return false;
    };

    if let Err(err) = chart.enable() {
      log::warn!("could not enable chart: {err:#}. Experiment::plot will not work");
      return false;
    }

    let labels: Vec<String> = self.runs_counts.iter().map(|&count| fmt_int(count)).collect();

    match chart.plot("Repeats", "Nanoseconds", &labels, &self.nanosec_avgs) {
      Ok(()) => true,
      Err(err) => {
        log::warn!("plot failed: {err:#}");
        false
      }
    }
  }
}

fn clamp(start: Bound<usize>, end: Bound<usize>, len: usize) -> Range<usize> {
  let start = match start {
    Bound::Included(start) => start,
    Bound::Excluded(start) => start.saturating_add(1),
    Bound::Unbounded => 0,
  };
  let end = match end {
    Bound::Included(end) => end.saturating_add(1),
    Bound::Excluded(end) => end,
    Bound::Unbounded => len,
  };

  let end = end.min(len);
  start.min(end)..end
}

fn cut<T: Clone>(items: &[T], start: Bound<usize>, end: Bound<usize>) -> Vec<T> {
  items[clamp(start, end, items.len())].to_vec()
}

impl Index<usize> for Experiment {
  type Output = Measurement;

  fn index(&self, index: usize) -> &Measurement {
    &self.measurements[index].1
  }
}

impl Index<&str> for Experiment {
  type Output = Measurement;

  fn index(&self, label: &str) -> &Measurement {
    match self.get_label(label) {
      Some(measurement) => measurement,
      None => panic!("no measurement labelled {label:?}"),
    }
  }
}

impl fmt::Display for Experiment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let labels: Vec<String> = self.labels().map(|key| format!("{key} runs")).collect();
    let width = justification(&labels);

    for (i, (label, (_, measurement))) in labels.iter().zip(&self.measurements).enumerate() {
      if i > 0 {
        writeln!(f)?;
      }

      let report = measurement.to_string();
      if measurement.calculated_stats().is_none() {
        write!(f, "{label:<width$} {HDIV} {report}")?;
        continue;
      }

      for (j, line) in report.lines().enumerate() {
        if j == 0 {
          write!(f, "{label:<width$} {line}")?;
        } else {
          write!(f, "\n{:width$} {line}", "")?;
        }
      }
    }

    Ok(())
  }
}
