use std::{
  cell::RefCell,
  collections::BTreeMap,
  fmt,
  io::{BufRead, Write},
  ops::Bound,
  rc::Rc,
};

use anyhow::{Context, Result};

use crate::{
  chart::Chart,
  config::{parse_var, Progress},
  exec::{Executor, Namespace},
  experiment::Experiment,
  measurement::{Measurement, DEFAULT_RUN_COUNT},
  parse::parse_invocation,
};

const PROMPT: &str = ">>> ";

/// A command body: the argument line, the cell body if any, and the shared
/// namespace.
pub type Handler<'a> = Box<dyn FnMut(&str, Option<&str>, &mut Namespace) -> Result<Outcome> + 'a>;

/// Whatever a command hands back to the host for display.
#[derive(Debug)]
pub enum Outcome {
  Nothing,
  Text(String),
  Measurement(Measurement),
  Experiment(Experiment),
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Nothing => Ok(()),
      Outcome::Text(text) => write!(f, "{text}"),
      Outcome::Measurement(measurement) => write!(f, "{measurement}"),
      Outcome::Experiment(experiment) => write!(f, "{experiment}"),
    }
  }
}

/// Dispatch table of named commands sharing one namespace.
pub struct Host<'a> {
  commands: BTreeMap<String, Handler<'a>>,
  pub namespace: Namespace,
}

impl<'a> Host<'a> {
  pub fn new(namespace: Namespace) -> Self {
    Self {
      commands: BTreeMap::new(),
      namespace,
    }
  }

  /// Registers `handler` under `name`, replacing any previous one.
  pub fn register<F>(&mut self, name: &str, handler: F)
  where
    F: FnMut(&str, Option<&str>, &mut Namespace) -> Result<Outcome> + 'a,
  {
    self.commands.insert(name.to_string(), Box::new(handler));
  }

  pub fn command_names(&self) -> impl Iterator<Item = &str> {
    self.commands.keys().map(String::as_str)
  }

  pub fn call(&mut self, name: &str, line: &str, cell: Option<&str>) -> Result<Outcome> {
    if !self.commands.contains_key(name) {
      let available = self.command_names().map(|name| format!("%{name}")).collect::<Vec<_>>();
      anyhow::bail!("unknown command %{name} (available: {})", available.join(", "));
    }

    let handler = self.commands.get_mut(name).context("handler")?;

    handler(line, cell, &mut self.namespace).with_context(|| format!("%{name}"))
  }

  /// Runs `%name line` or `%%name line` followed by a cell body on the next
  /// lines.
  pub fn run(&mut self, input: &str) -> Result<Outcome> {
    let input = input.trim_start();
    let (head, body) = match input.split_once('\n') {
      Some((head, body)) => (head, Some(body)),
      None => (input, None),
    };

    let (command, cell) = if let Some(command) = head.strip_prefix("%%") {
      (command, Some(body.unwrap_or("")))
    } else if let Some(command) = head.strip_prefix('%') {
      if body.is_some_and(|body| !body.trim().is_empty()) {
        anyhow::bail!("a %command takes a single line, use %%command for a cell body");
      }
      (command, None)
    } else {
      anyhow::bail!("expected `%command ...` or `%%command ...`, got {head:?}");
    };

    let (name, line) = command.split_once(char::is_whitespace).unwrap_or((command, ""));

    self.call(name, line.trim(), cell)
  }

  /// Reads commands from `input` until it ends or says `exit`, writing every
  /// result or error to `out`. A `%%` command collects body lines up to the
  /// next blank line.
  pub fn repl<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> Result<()> {
    let mut lines = input.lines();

    loop {
      write!(out, "{PROMPT}").context("write")?;
      out.flush().context("flush")?;

      let Some(line) = lines.next() else {
        writeln!(out).context("write")?;
        break;
      };
      let mut command = line.context("read")?;

      match command.trim() {
        "" => continue,
        "exit" | "quit" => break,
        _ => {}
      }

      if command.trim_start().starts_with("%%") {
        for body in lines.by_ref() {
          let body = body.context("read")?;
          if body.trim().is_empty() {
            break;
          }
          command.push('\n');
          command.push_str(&body);
        }
      }

      match self.run(&command) {
        Ok(Outcome::Nothing) => {}
        Ok(outcome) => writeln!(out, "{outcome}").context("write")?,
        Err(err) => writeln!(out, "error: {err:#}").context("write")?,
      }
    }

    Ok(())
  }
}

/// Parses `a..b`, `a..`, `..b` or `..` into slice bounds.
fn parse_range(range: &str) -> Result<(Bound<usize>, Bound<usize>)> {
  let Some((start, end)) = range.split_once("..") else {
    anyhow::bail!("expected a range like `1..3`, got {range:?}");
  };

  let bound = |text: &str| -> Result<Bound<usize>> {
    if text.is_empty() {
      return Ok(Bound::Unbounded);
    }
    text
      .parse::<usize>()
      .map(Bound::Excluded)
      .with_context(|| format!("invalid range bound {text:?}"))
  };

  let start = match bound(start.trim())? {
    Bound::Excluded(start) => Bound::Included(start),
    unbounded => unbounded,
  };
  let end = match end.trim().strip_prefix('=') {
    Some(end) => match bound(end.trim())? {
      Bound::Excluded(end) => Bound::Included(end),
      unbounded => unbounded,
    },
    None => bound(end.trim())?,
  };

  Ok((start, end))
}

/// Registers the harness commands:
///
/// - `%measure <stmt> [-n counts] [-s setup] [--variance]`
/// - `%timeit <stmt> [-n count] [-s setup] [--variance]`, a single measurement
/// - `%plot [a..b]`, plots the last experiment or a slice of it
/// - `%set NAME=VALUE`, `%unset NAME`, `%who`
pub fn register_builtins<'a, E: Executor + 'a>(
  host: &mut Host<'a>,
  exec: E,
  progress: Progress,
  mut chart: Option<Box<dyn Chart + 'a>>,
) {
  let exec = Rc::new(RefCell::new(exec));
  let last = Rc::new(RefCell::new(None::<Experiment>));

  {
    let exec = Rc::clone(&exec);
    let last = Rc::clone(&last);
    host.register("measure", move |line, cell, namespace| {
      let Some(args) = parse_invocation(line, cell)? else {
        return Ok(Outcome::Nothing);
      };

      let experiment = Experiment::run(
        &mut *exec.borrow_mut(),
        &args.stmt,
        &args.runs_counts(),
        args.setup.as_deref(),
        namespace,
        args.variance,
        progress,
      )?;

      *last.borrow_mut() = Some(experiment.clone());

      Ok(Outcome::Experiment(experiment))
    });
  }

  host.register("timeit", move |line, cell, namespace| {
    let Some(args) = parse_invocation(line, cell)? else {
      return Ok(Outcome::Nothing);
    };

    let run_count = match args.runs_counts.as_deref() {
      None => DEFAULT_RUN_COUNT,
      Some([run_count]) => *run_count,
      Some(_) => anyhow::bail!("%timeit takes a single repetition count, use %measure for several"),
    };

    let measurement = Measurement::new(
      &mut *exec.borrow_mut(),
      &args.stmt,
      args.setup.as_deref(),
      run_count,
      namespace,
      args.variance,
      progress,
    )?;

    Ok(Outcome::Measurement(measurement))
  });

  host.register("plot", move |line, _, _| {
    let last = last.borrow();
    let Some(experiment) = last.as_ref() else {
      anyhow::bail!("nothing to plot yet, run %measure first");
    };

    let experiment = if line.is_empty() {
      experiment.clone()
    } else {
      experiment.slice(parse_range(line)?)
    };

    let plotted = match chart.as_mut() {
      Some(chart) => experiment.plot(Some(&mut **chart)),
      None => experiment.plot(None),
    };

    if plotted {
      Ok(Outcome::Nothing)
    } else {
      Ok(Outcome::Text("plot unavailable".to_string()))
    }
  });

  host.register("set", |line, _, namespace| {
    let (name, value) = parse_var(line)?;
    namespace.insert(name, value);
    Ok(Outcome::Nothing)
  });

  host.register("unset", |line, _, namespace| {
    if namespace.remove(line).is_none() {
      anyhow::bail!("{line:?} is not set");
    }
    Ok(Outcome::Nothing)
  });

  host.register("who", |_, _, namespace| {
    let vars = namespace
      .iter()
      .map(|(name, value)| format!("{name}={value}"))
      .collect::<Vec<_>>();
    Ok(Outcome::Text(vars.join("\n")))
  });
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use super::*;
  use crate::{chart::TextChart, parse::ParseError, testing::ScriptedExecutor};

  const QUIET: Progress = Progress { quiet: true };

  fn host<'a>(samples: &[u64]) -> Host<'a> {
    let mut host = Host::new(Namespace::new());
    register_builtins(&mut host, ScriptedExecutor::new(samples), QUIET, None);
    host
  }

  #[test]
  fn measure_returns_the_experiment() {
    let mut host = host(&[10, 40, 90]);

    let Outcome::Experiment(experiment) = host.run("%measure stmt -n 1,2,3").unwrap() else {
      panic!("expected an experiment");
    };

    assert_eq!(experiment.runs_counts, [1, 2, 3]);
    assert_eq!(experiment.nanosec_avgs, [10.0, 20.0, 30.0]);
  }

  #[test]
  fn line_and_cell_together_are_rejected() {
    let mut host = host(&[]);

    let err = host.run("%%measure stmt\nbody line").unwrap_err();
    assert_eq!(
      err.root_cause().downcast_ref::<ParseError>(),
      Some(&ParseError::UnsupportedCombination)
    );

    let err = host.run("%%measure\nbody line").unwrap_err();
    assert_eq!(
      err.root_cause().downcast_ref::<ParseError>(),
      Some(&ParseError::CellUnsupported)
    );
  }

  #[test]
  fn empty_measure_does_nothing() {
    let mut host = host(&[]);
    assert!(matches!(host.run("%measure").unwrap(), Outcome::Nothing));
  }

  #[test]
  fn timeit_takes_one_count() {
    let mut host = host(&[500]);

    let Outcome::Measurement(measurement) = host.run("%timeit stmt -n 5").unwrap() else {
      panic!("expected a measurement");
    };
    assert_eq!(measurement.run_count, 5);
    assert_eq!(measurement.nanosec_avg, 100.0);

    assert!(host.run("%timeit stmt -n 5,6").is_err());
  }

  #[test]
  fn timeit_defaults_to_a_million_runs() {
    let mut host = host(&[2_000_000]);

    let Outcome::Measurement(measurement) = host.run("%timeit stmt").unwrap() else {
      panic!("expected a measurement");
    };
    assert_eq!(measurement.run_count, 1_000_000);
    assert_eq!(measurement.nanosec_avg, 2.0);
  }

  #[test]
  fn namespace_commands() {
    let mut host = host(&[]);

    host.run("%set A=1").unwrap();
    host.run("%set B=two words").unwrap();
    assert_eq!(host.namespace.get("B").map(String::as_str), Some("two words"));

    let Outcome::Text(who) = host.run("%who").unwrap() else {
      panic!("expected text");
    };
    assert_eq!(who, "A=1\nB=two words");

    host.run("%unset A").unwrap();
    assert!(!host.namespace.contains_key("A"));
    assert!(host.run("%unset A").is_err());
  }

  #[test]
  fn unknown_commands_fail() {
    let mut host = host(&[]);
    let err = host.run("%nope x").unwrap_err();
    assert!(err.to_string().contains("unknown command %nope"));
    assert!(host.run("measure x").is_err());
  }

  #[test]
  fn custom_handlers_see_the_namespace() {
    let mut host = Host::new(Namespace::from([("X".to_string(), "1".to_string())]));
    host.register("echo", |line, _, namespace| {
      namespace.insert("LAST".to_string(), line.to_string());
      Ok(Outcome::Text(format!("{line} {}", namespace["X"])))
    });

    let outcome = host.run("%echo  hello ").unwrap();
    assert_eq!(outcome.to_string(), "hello 1");
    assert_eq!(host.namespace["LAST"], "hello");
    assert_eq!(host.command_names().collect::<Vec<_>>(), ["echo"]);
  }

  #[test]
  fn plot_needs_an_experiment_and_a_chart() {
    let mut host = host(&[1, 2]);
    assert!(host.run("%plot").is_err());

    host.run("%measure stmt -n 1,2").unwrap();
    let outcome = host.run("%plot").unwrap();
    assert_eq!(outcome.to_string(), "plot unavailable");
  }

  #[test]
  fn plot_slices_the_last_experiment() {
    let out = Rc::new(RefCell::new(Vec::new()));

    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
      fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
      }

      fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
      }
    }

    let mut host = Host::new(Namespace::new());
    register_builtins(
      &mut host,
      ScriptedExecutor::new(&[1, 2, 3, 4]),
      QUIET,
      Some(Box::new(TextChart::new(Shared(Rc::clone(&out))))),
    );

    host.run("%measure stmt -n 1,10,100,1000").unwrap();
    assert!(matches!(host.run("%plot 1..3").unwrap(), Outcome::Nothing));

    let out = String::from_utf8(out.borrow().clone()).unwrap();
    let rows: Vec<_> = out.lines().skip(1).map(|row| row.split('|').next().unwrap().trim()).collect();
    assert_eq!(rows, ["10", "100"]);
  }

  #[test]
  fn ranges() {
    assert_eq!(parse_range("1..3").unwrap(), (Bound::Included(1), Bound::Excluded(3)));
    assert_eq!(parse_range("..2").unwrap(), (Bound::Unbounded, Bound::Excluded(2)));
    assert_eq!(parse_range("2..").unwrap(), (Bound::Included(2), Bound::Unbounded));
    assert_eq!(parse_range("0..=4").unwrap(), (Bound::Included(0), Bound::Included(4)));
    assert!(parse_range("3").is_err());
    assert!(parse_range("a..b").is_err());
  }

  #[test]
  fn repl_runs_until_exit() {
    let mut host = host(&[3_000]);
    let input = Cursor::new("%set N=1\n\n%measure stmt -n 1\n%%measure x\nbody\n\n%who\nexit\n%who\n");
    let mut out = Vec::new();

    host.repl(input, &mut out).unwrap();

    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("1 runs"));
    assert!(out.contains("Avg: 3.00 μs"));
    assert!(out.contains("error: %measure: unsupported combination"));
    assert_eq!(out.matches("N=1").count(), 1);
  }
}
