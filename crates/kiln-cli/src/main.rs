#![forbid(unsafe_code)]

use std::error::Error;
use std::process;

use clap::Parser;
use kiln_engine::{BehaviorSettings, Engine};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiln", about = "A bean-driven build tool")]
#[command(version)]
#[command(after_help = "Examples:\n  kiln pack\n  kiln layout.style=SIMPLE depTree\n  kiln quality: maxEvictions=0 project: check\n  kiln -kb=quality -Dkiln.repo=~/.m2 check")]
struct Cli {
    /// Behavior flags (`-kb=`, `-lv`, `-lst`, `-cw`, `-co`, `-Dkey=value`),
    /// bean switches (`name:`), field assignments (`key=value`) and method names
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let (verbose, stacktrace) = match BehaviorSettings::parse(&cli.args) {
        Ok((settings, _)) => (settings.verbose, settings.stacktrace),
        Err(_) => (false, false),
    };
    init_tracing(verbose);
    debug!(args = ?cli.args, "starting");

    if let Err(err) = run(&cli.args) {
        eprintln!("error: {err}");
        if stacktrace {
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
        }
        process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let cwd = std::env::current_dir()?;
    Engine::standard().run(&cwd, args)?;
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise `-lv` selects debug output.
fn init_tracing(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_no_arguments() {
        let cli = Cli::try_parse_from(["kiln"]).unwrap();
        assert!(cli.args.is_empty());
    }

    #[test]
    fn parse_bean_tokens_verbatim() {
        let cli = Cli::try_parse_from(["kiln", "quality:", "maxEvictions=0", "project:", "check"]).unwrap();
        assert_eq!(cli.args, vec!["quality:", "maxEvictions=0", "project:", "check"]);
    }

    #[test]
    fn parse_behavior_flags_as_arguments() {
        let cli = Cli::try_parse_from(["kiln", "-lv", "-kb=quality", "-Dkiln.repo=/tmp/repo", "check"]).unwrap();
        assert_eq!(cli.args.len(), 4);
        let (settings, tokens) = BehaviorSettings::parse(&cli.args).unwrap();
        assert!(settings.verbose);
        assert_eq!(settings.default_kbean.as_deref(), Some("quality"));
        assert_eq!(tokens, vec!["check"]);
    }
}
