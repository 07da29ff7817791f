use clap::Parser;

use volley_core::config::trace;
use volley_run::{Cli, RunConfig, run_once};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = trace::Config::parse(&cli.log) {
        eprintln!("failed to set up logging: {err:#}");
        std::process::exit(2);
    }

    let config = match RunConfig::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    let output_json = config.json;

    if config.dry_run {
        match serde_json::to_string_pretty(&config.job) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to serialize job: {err:#}");
                std::process::exit(2);
            }
        }
    }

    let summary = run_once(config).await;
    if output_json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to serialize summary: {err:#}");
                std::process::exit(2);
            }
        }
    } else {
        println!("{}", summary.human_summary());
    }
}
