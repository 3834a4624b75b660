use std::{
  io::Write,
  process::{Child, ChildStdin, Command, ExitStatus},
  time::Duration,
};

use anyhow::{Context, Result};
use wait_timeout::ChildExt as WaitExt;

use crate::exec::Namespace;

#[extend::ext]
pub impl ExitStatus {
  fn check_success(&self) -> Result<()> {
    if !self.success() {
      anyhow::bail!("exited with non-zero status {self}");
    }

    Ok(())
  }
}

#[extend::ext]
pub impl Child {
  /// Returns an error if the exit status was non-zero.
  fn check_success(&mut self) -> Result<()> {
    self.wait().context("wait")?.check_success()
  }

  /// Returns an error if the exit status was non-zero. On timeout, kills the
  /// child and returns `Ok(None)`.
  fn check_success_timeout(&mut self, timeout: Duration) -> Result<Option<()>> {
    let Some(status) = self.wait_timeout(timeout).context("wait")? else {
      self.kill().context("kill after timeout")?;
      self.wait().context("reap after kill")?;

      return Ok(None);
    };

    status.check_success()?;

    Ok(Some(()))
  }
}

#[extend::ext]
pub impl Command {
  /// Exports every namespace entry as an environment variable of the command.
  fn with_namespace(&mut self, namespace: &Namespace) -> &mut Self {
    self.envs(namespace)
  }
}

#[extend::ext]
pub impl ChildStdin {
  /// Writes a chunk of script to the child and flushes it, so the child can
  /// start executing it right away.
  fn send(&mut self, script: &str) -> Result<()> {
    self.write_all(script.as_bytes()).context("write")?;
    if !script.ends_with('\n') {
      self.write_all(b"\n").context("write")?;
    }
    self.flush().context("flush")
  }
}
