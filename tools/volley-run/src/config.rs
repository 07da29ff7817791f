use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use volley_core::{
    JobDescriptor, RunRequest,
    job::{Headers, JsonBody},
};

pub const DEFAULT_METHOD: &str = "get";
pub const DEFAULT_PARALLELISM: i64 = 10;
pub const DEFAULT_LOG: &str = "info";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "volley-run",
    about = "Run one HTTP load test in the foreground and print its summary"
)]
pub struct Cli {
    #[arg(long)]
    pub url: String,
    #[arg(long, default_value = DEFAULT_METHOD)]
    pub method: String,
    #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
    pub parallelism: i64,
    #[arg(long)]
    pub volume: i64,
    /// `Name: value`, may be repeated
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,
    /// JSON object sent with every POST
    #[arg(long)]
    pub body: Option<String>,

    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, env = "VOLLEY_LOG", default_value = DEFAULT_LOG)]
    pub log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub job: JobDescriptor,
    pub json: bool,
    pub dry_run: bool,
}

impl TryFrom<Cli> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        let headers = parse_headers(&args.headers)?;
        let body = args
            .body
            .as_deref()
            .map(parse_body)
            .transpose()
            .context("invalid --body")?;

        let job = JobDescriptor::try_from(RunRequest {
            url: Some(args.url),
            method: Some(args.method),
            parallelism: Some(args.parallelism),
            load_volume: Some(args.volume),
            headers: Some(headers),
            body,
        })?;

        Ok(Self {
            job,
            json: args.json,
            dry_run: args.dry_run,
        })
    }
}

fn parse_headers(raw: &[String]) -> Result<Headers> {
    let mut headers = Headers::new();
    for line in raw {
        let Some((name, value)) = line.split_once(':') else {
            bail!("--header must look like `Name: value`, got `{line}`");
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("--header name must not be empty, got `{line}`");
        }
        headers
            .entry(name.to_owned())
            .or_default()
            .push(value.trim().to_owned());
    }
    Ok(headers)
}

fn parse_body(raw: &str) -> Result<JsonBody> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--body must be a JSON object, got `{other}`"),
    }
}
