use std::{fmt, path::PathBuf, time::Duration};

use anyhow::Result;

use crate::exec::{Namespace, ShellExecutor};

/// Options shared by every subcommand.
#[derive(clap::Args, Clone, Debug)]
pub struct Config {
  /// Suppress progress notices.
  #[arg(short, long)]
  pub quiet: bool,
  /// Enable debug logging.
  #[arg(short, long)]
  pub verbose: bool,
  /// Shell used to execute statements and setup code.
  #[arg(long, default_value = "sh")]
  pub shell: PathBuf,
  /// Abort a single timing call after this many seconds.
  #[arg(long, value_name = "SECS")]
  pub timeout: Option<u64>,
  /// Seed the namespace with a variable, visible to statements as an
  /// environment variable.
  #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
  pub vars: Vec<(String, String)>,
}

impl Config {
  pub fn progress(&self) -> Progress {
    Progress { quiet: self.quiet }
  }

  pub fn executor(&self) -> ShellExecutor {
    ShellExecutor::new(&self.shell).with_timeout(self.timeout.map(Duration::from_secs))
  }

  pub fn namespace(&self) -> Namespace {
    self.vars.iter().cloned().collect()
  }

  pub fn init_logger(&self) {
    let level = if self.verbose {
      log::LevelFilter::Debug
    } else {
      log::LevelFilter::Warn
    };

    env_logger::Builder::new()
      .filter_level(level)
      .parse_default_env()
      .init();
  }
}

pub fn parse_var(var: &str) -> Result<(String, String)> {
  let Some((name, value)) = var.split_once('=') else {
    anyhow::bail!("expected NAME=VALUE, got {var:?}");
  };

  if name.is_empty() {
    anyhow::bail!("empty variable name in {var:?}");
  }

  Ok((name.to_string(), value.to_string()))
}

/// Where progress notices go: stderr, unless silenced.
#[derive(Clone, Copy, Debug, Default)]
pub struct Progress {
  pub quiet: bool,
}

impl Progress {
  pub fn notice(self, args: fmt::Arguments) {
    if !self.quiet {
      eprintln!("{args}");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vars_split_on_first_equals() {
    assert_eq!(parse_var("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
    assert_eq!(parse_var("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
    assert!(parse_var("novalue").is_err());
    assert!(parse_var("=x").is_err());
  }
}
