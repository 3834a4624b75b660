use std::{
  collections::BTreeMap,
  io::{self, BufRead, BufReader},
  path::{Path, PathBuf},
  process::{Child, ChildStdin, Command, Stdio},
  sync::mpsc::{self, Receiver, RecvTimeoutError},
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, Result};

use crate::ext::{ChildExt, ChildStdinExt, CommandExt};

/// Variables shared between the host and every executed statement.
///
/// Nothing is snapshotted or isolated: whatever a statement changes stays
/// changed for the next timing call.
pub type Namespace = BTreeMap<String, String>;

const READY_MARKER: &str = "__measure_ready__";
const DONE_MARKER: &str = "__measure_done__";
const VAR_MARKER: &str = "__measure_var__";
const VARS_DONE_MARKER: &str = "__measure_vars_done__";

/// Shell functions defined at the top of every session.
///
/// `__measure_dump NAME` prints `NAME`, its value and the variable marker if
/// `NAME` is set. `__measure_dump_new` does the same for every variable
/// exported after `__measure_env0` was recorded.
const HELPERS: &str = r#"__measure_exported() {
  env | while IFS= read -r __measure_line; do
    case $__measure_line in
      *=*) __measure_name=${__measure_line%%=*} ;;
      *) continue ;;
    esac
    case $__measure_name in
      ''|[!A-Za-z_]*|*[!A-Za-z0-9_]*|__measure_*) ;;
      *) printf '%s\n' "$__measure_name" ;;
    esac
  done
}
__measure_dump() {
  if eval "[ -n \"\${$1+set}\" ]"; then
    printf '%s\n' "$1"
    eval "printf '%s\n' \"\${$1}\""
    printf '%s\n' "$__measure_var_marker"
  fi
}
__measure_dump_new() {
  __measure_exported | while IFS= read -r __measure_name; do
    case "
$__measure_env0
" in
      *"
$__measure_name
"*) ;;
      *) __measure_dump "$__measure_name" ;;
    esac
  done
}
__measure_env0=$(__measure_exported)"#;

/// How long a finished session may take to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// One timing call: `setup` once, then `stmt` back to back `run_count` times.
#[derive(Clone, Copy, Debug)]
pub struct Timing<'a> {
  pub stmt: &'a str,
  pub setup: Option<&'a str>,
  pub run_count: u64,
}

/// Executes statements and reports how long they took.
pub trait Executor {
  /// Runs `timing.setup` once, then `timing.stmt` exactly `timing.run_count`
  /// times, returning the nanoseconds spent on the statement executions only.
  ///
  /// # Errors
  ///
  /// Compile or runtime failures of the setup or statement are returned as-is.
  fn time(&mut self, timing: &Timing, namespace: &mut Namespace) -> Result<u64>;
}

/// A monotonic nanosecond clock.
pub trait Clock {
  fn now_ns(&self) -> u64;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
  origin: Instant,
}

impl MonotonicClock {
  pub fn new() -> Self {
    Self { origin: Instant::now() }
  }
}

impl Default for MonotonicClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for MonotonicClock {
  fn now_ns(&self) -> u64 {
    u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
  }
}

/// Runs statements as POSIX shell code.
///
/// Every timing call gets its own `<shell> -s` session with the namespace
/// exported as environment variables. The setup runs first, then the
/// statement is looped inside the same session, so shell state created by the
/// setup is visible to the statement. Only the loop is timed. User code reads
/// its stdin from `/dev/null`.
///
/// Afterwards every namespace entry is refreshed from the session, removed if
/// the session unset it, and variables the session newly exported are added.
pub struct ShellExecutor<C = MonotonicClock> {
  shell: PathBuf,
  timeout: Option<Duration>,
  clock: C,
}

impl ShellExecutor {
  pub fn new<P: Into<PathBuf>>(shell: P) -> Self {
    Self {
      shell: shell.into(),
      timeout: None,
      clock: MonotonicClock::new(),
    }
  }
}

impl<C: Clock> ShellExecutor<C> {
  pub fn with_clock<D: Clock>(self, clock: D) -> ShellExecutor<D> {
    ShellExecutor {
      shell: self.shell,
      timeout: self.timeout,
      clock,
    }
  }

  /// Bounds the wall time of a whole timing call, setup included.
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }
}

impl<C: Clock> Executor for ShellExecutor<C> {
  fn time(&mut self, timing: &Timing, namespace: &mut Namespace) -> Result<u64> {
    let mut session = Session::spawn(&self.shell, namespace, self.timeout).context("spawn session")?;

    // User code reads /dev/null: the session's own stdin carries this script.
    session
      .send(&format!(
        "set -e\n\
         __measure_var_marker='{VAR_MARKER}'\n\
         {HELPERS}\n\
         {{\n{setup}\n:\n}} </dev/null\n\
         printf '\\n%s\\n' '{READY_MARKER}'",
        setup = timing.setup.unwrap_or(":")
      ))
      .context("send setup")?;
    session.wait_for(READY_MARKER).context("setup")?;

    let start = self.clock.now_ns();
    session.send(&loop_script(timing)).context("send statement")?;
    session.wait_for(DONE_MARKER).context("statement")?;
    let elapsed = self.clock.now_ns().saturating_sub(start);

    session.read_namespace(namespace).context("read back namespace")?;
    session.finish().context("finish session")?;

    log::debug!(
      "{shell:?}: {run_count} runs of {stmt:?} took {elapsed} ns",
      shell = self.shell,
      run_count = timing.run_count,
      stmt = timing.stmt,
    );

    Ok(elapsed)
  }
}

fn loop_script(timing: &Timing) -> String {
  format!(
    "__measure_i=0\n\
     while [ \"$__measure_i\" -lt {run_count} ]; do\n\
     {stmt}\n\
     __measure_i=$((__measure_i + 1))\n\
     done </dev/null\n\
     printf '\\n%s\\n' '{DONE_MARKER}'",
    run_count = timing.run_count,
    stmt = timing.stmt,
  )
}

/// Whether `name` can be a shell variable the session is allowed to report.
fn is_shell_name(name: &str) -> bool {
  let mut chars = name.chars();

  chars.next().is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
    && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
    && !name.starts_with("__measure_")
}

/// A live shell reading its script from a pipe.
struct Session {
  child: Child,
  stdin: Option<ChildStdin>,
  lines: Receiver<io::Result<String>>,
  timeout: Option<Duration>,
  deadline: Option<Instant>,
}

impl Session {
  fn spawn(shell: &Path, namespace: &Namespace, timeout: Option<Duration>) -> Result<Self> {
    let mut child = Command::new(shell)
      .arg("-s")
      .with_namespace(namespace)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .spawn()
      .with_context(|| format!("spawn {shell:?}"))?;

    let stdin = child.stdin.take().context("stdin")?;
    let stdout = child.stdout.take().context("stdout")?;

    // Drained on a helper thread so that a hung statement can still be timed
    // out from here.
    let (tx, lines) = mpsc::channel();
    thread::spawn(move || {
      for line in BufReader::new(stdout).lines() {
        if tx.send(line).is_err() {
          break;
        }
      }
    });

    Ok(Self {
      child,
      stdin: Some(stdin),
      lines,
      timeout,
      deadline: timeout.map(|timeout| Instant::now() + timeout),
    })
  }

  fn send(&mut self, script: &str) -> Result<()> {
    self.stdin.as_mut().context("stdin already closed")?.send(script)
  }

  /// Receives the next line of output while `expecting` is still outstanding.
  fn next_line(&mut self, expecting: &str) -> Result<String> {
    let next = match self.deadline {
      Some(deadline) => self.lines.recv_timeout(deadline.saturating_duration_since(Instant::now())),
      None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    match next {
      Ok(line) => line.context("read stdout"),
      Err(RecvTimeoutError::Timeout) => {
        self.child.kill().context("kill after timeout")?;
        self.child.wait().context("reap after kill")?;
        anyhow::bail!("timed out after {:?}", self.timeout.unwrap_or_default());
      }
      Err(RecvTimeoutError::Disconnected) => {
        self.stdin.take();
        self.child.check_success()?;
        anyhow::bail!("shell exited before printing {expecting:?}");
      }
    }
  }

  /// Blocks until the shell prints `marker` on a line of its own.
  fn wait_for(&mut self, marker: &str) -> Result<()> {
    loop {
      let line = self.next_line(marker)?;
      if line == marker {
        return Ok(());
      }
      log::trace!("stdout: {line}");
    }
  }

  /// Copies the session's variables back into `namespace`. Entries the shell
  /// unset are removed, and variables exported since the session started are
  /// added.
  fn read_namespace(&mut self, namespace: &mut Namespace) -> Result<()> {
    let names: Vec<String> = namespace.keys().filter(|name| is_shell_name(name)).cloned().collect();

    let mut script = String::new();
    for name in &names {
      script.push_str(&format!("__measure_dump {name}\n"));
    }
    script.push_str(&format!("__measure_dump_new\nprintf '%s\\n' '{VARS_DONE_MARKER}'"));
    self.send(&script)?;

    let mut vars = Namespace::new();
    loop {
      let name = self.next_line(VARS_DONE_MARKER)?;
      if name == VARS_DONE_MARKER {
        break;
      }

      let mut value = Vec::new();
      loop {
        let line = self.next_line(VAR_MARKER)?;
        if line == VAR_MARKER {
          break;
        }
        value.push(line);
      }

      vars.insert(name, value.join("\n"));
    }

    for name in names {
      if !vars.contains_key(&name) {
        log::debug!("{name} was unset by the session");
        namespace.remove(&name);
      }
    }
    namespace.extend(vars);

    Ok(())
  }

  fn finish(mut self) -> Result<()> {
    self.send("exit 0")?;
    self.stdin.take();

    if self.child.check_success_timeout(EXIT_GRACE)?.is_none() {
      anyhow::bail!("shell did not exit within {EXIT_GRACE:?}");
    }

    Ok(())
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    self.stdin.take();

    // Reaps the shell when a timing call bails out before `finish`.
    if let Ok(None) = self.child.try_wait() {
      let _ = self.child.kill();
      let _ = self.child.wait();
    }
  }
}
