use std::collections::VecDeque;

use anyhow::Result;

use crate::exec::{Executor, Namespace, Timing};

/// Executor double that hands out pre-recorded durations and remembers what
/// it was asked to time.
pub struct ScriptedExecutor {
  samples: VecDeque<u64>,
  failure: Option<String>,
  timings: Vec<(String, Option<String>, u64)>,
}

impl ScriptedExecutor {
  pub fn new(samples: &[u64]) -> Self {
    Self {
      samples: samples.iter().copied().collect(),
      failure: None,
      timings: Vec::new(),
    }
  }

  /// Fails with `message` once `samples` run out.
  pub fn failing_after(samples: &[u64], message: &str) -> Self {
    Self {
      failure: Some(message.to_string()),
      ..Self::new(samples)
    }
  }

  pub fn calls(&self) -> usize {
    self.timings.len()
  }

  pub fn timings(&self) -> &[(String, Option<String>, u64)] {
    &self.timings
  }
}

impl Executor for ScriptedExecutor {
  fn time(&mut self, timing: &Timing, _namespace: &mut Namespace) -> Result<u64> {
    self.timings.push((
      timing.stmt.to_string(),
      timing.setup.map(str::to_string),
      timing.run_count,
    ));

    match (self.samples.pop_front(), &self.failure) {
      (Some(sample), _) => Ok(sample),
      (None, Some(failure)) => anyhow::bail!("{failure}"),
      (None, None) => anyhow::bail!("no scripted sample left for call {}", self.timings.len()),
    }
  }
}
