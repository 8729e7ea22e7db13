//! Refinement engine scenario simulator

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use refine_core::RefineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod scenarios;

fn cli() -> Command {
    Command::new("refine-sim")
        .version(refine_core::VERSION)
        .about("Run canned refinement scenarios against scripted collaborators")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML engine configuration"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run scenarios and print a text report")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .action(ArgAction::Append)
                        .help("Only run the named scenario (repeatable)"),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Run all scenarios and print the report")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<RefineConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Ok(RefineConfig::load(path)?),
        None => Ok(RefineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    let report = match matches.subcommand() {
        Some(("report", args)) => {
            let report = scenarios::run_all(&config, &[]).await;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
            report
        }
        Some(("simulate", args)) => {
            let only: Vec<String> = args
                .get_many::<String>("scenario")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            let report = scenarios::run_all(&config, &only).await;
            println!("{}", report.generate_text());
            report
        }
        _ => {
            let report = scenarios::run_all(&config, &[]).await;
            println!("{}", report.generate_text());
            report
        }
    };

    std::process::exit(if report.passed() { 0 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn scenario_flag_repeats() {
        let matches = cli()
            .try_get_matches_from(["refine-sim", "simulate", "--scenario", "A", "--scenario", "e"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let names: Vec<&String> = args.get_many::<String>("scenario").unwrap().collect();
        assert_eq!(names, ["A", "e"]);
    }

    #[tokio::test]
    async fn every_scenario_passes() {
        let report = scenarios::run_all(&RefineConfig::default(), &[]).await;
        assert_eq!(report.results.len(), 6);
        assert!(report.passed(), "{}", report.generate_text());
    }
}
