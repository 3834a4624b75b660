use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use measure_harness::{
  chart::TextChart,
  config::Config,
  host::{register_builtins, Host, Outcome},
};

#[derive(Parser)]
struct Args {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Time a statement across repetition counts and print the report.
  ///
  /// The line follows the `%measure` grammar:
  /// `<statement> [-n <count>[,<count>...]] [-s <setup>] [--variance]`.
  Measure {
    #[command(flatten)]
    config: Config,
    /// Plot average time per run against repetition count.
    #[arg(long)]
    plot: bool,
    /// Statement and harness flags.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    line: Vec<String>,
  },
  /// Read `%command` lines from stdin.
  Repl {
    #[command(flatten)]
    config: Config,
  },
}

fn main() -> Result<()> {
  match Args::parse().command {
    Command::Measure { config, plot, line } => {
      config.init_logger();

      let mut host = Host::new(config.namespace());
      register_builtins(&mut host, config.executor(), config.progress(), None);

      let outcome = host.call("measure", &line.join(" "), None).context("measure")?;
      println!("\n{outcome}");

      if plot {
        if let Outcome::Experiment(experiment) = &outcome {
          experiment.plot(Some(&mut TextChart::stdout()));
        }
      }
    }
    Command::Repl { config } => {
      config.init_logger();

      let mut host = Host::new(config.namespace());
      register_builtins(
        &mut host,
        config.executor(),
        config.progress(),
        Some(Box::new(TextChart::stdout())),
      );

      let commands = host.command_names().map(|name| format!("%{name}")).collect::<Vec<_>>();
      eprintln!("commands: {}", commands.join(", "));

      host.repl(io::stdin().lock(), io::stdout()).context("repl")?;
    }
  }

  Ok(())
}
