#![allow(clippy::result_large_err)]

use anyhow::{anyhow, Context};
use nodeward::config::SupervisorConfig;
use nodeward::telemetry;

enum CliCommand {
    Run { config_path: Option<String> },
    Validate { configs: Vec<String> },
    Help,
    ValidateHelp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run { config_path } => {
            let config = SupervisorConfig::load(config_path.as_deref())
                .context("failed to load configuration")?;

            let app = nodeward::app::SupervisorApp::initialise(config)
                .await
                .context("failed to construct supervisor")?;

            app.run().await.context("supervisor runtime error")
        }
        CliCommand::Validate { configs } => run_validate_command(configs),
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::ValidateHelp => {
            print_validate_help();
            Ok(())
        }
    }
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run { config_path: None });
    };

    if first == "validate" {
        return parse_validate_args(args);
    }

    let mut config_path = None;
    let mut pending = Some(first);

    loop {
        let arg = match pending.take() {
            Some(value) => value,
            None => match args.next() {
                Some(value) => value,
                None => break,
            },
        };

        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { config_path })
}

fn parse_validate_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut configs = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::ValidateHelp),
            other => configs.push(other.to_string()),
        }
    }

    if configs.is_empty() {
        anyhow::bail!("nodeward validate requires at least one config path");
    }

    Ok(CliCommand::Validate { configs })
}

fn print_help() {
    println!(
        "\
Usage: nodeward [OPTIONS]
       nodeward validate <CONFIG>...

Options:
  -c, --config <PATH>    Path to the supervisor configuration file
  -h, --help             Print this help message

Environment:
  NODEWARD__<SECTION>__<KEY>   Override configuration values
  RUST_LOG                     Log filter (default nodeward=info,info)
"
    );
}

fn print_validate_help() {
    println!(
        "\
Usage: nodeward validate <CONFIG>...

Options:
  -h, --help             Print this help message
"
    );
}

fn run_validate_command(configs: Vec<String>) -> anyhow::Result<()> {
    let mut had_error = false;

    for path in configs {
        match SupervisorConfig::from_path(&path) {
            Ok(config) => println!("validated {path} ({} node(s))", config.nodes.len()),
            Err(err) => {
                eprintln!("{path}: {err}");
                had_error = true;
            }
        }
    }

    if had_error {
        Err(anyhow!("one or more configs failed validation"))
    } else {
        Ok(())
    }
}
