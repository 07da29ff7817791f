//! volley server configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default external api, serves run submission and health
    pub static DEFAULT_EXTERNAL_API: &str = "[::]:8080";
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "volley-worker";
    /// default log level. Can use this argument or VOLLEY_LOG env var
    pub const DEFAULT_VOLLEY_LOG: &str = "info";

    use std::net::SocketAddr;

    pub use clap::Parser;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "volley", bin_name = "volley", about, long_about = None)]
    /// parses from cli & environment var. volley will load `.env` in the same dir as the binary as well
    pub struct Config {
        /// the address the external api listens on
        #[clap(long, env, value_parser, default_value = DEFAULT_EXTERNAL_API)]
        pub external_api: SocketAddr,
        /// number of runtime worker threads, defaults to the number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_VOLLEY_LOG)]
        pub volley_log: String,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parse_defaults() {
            let cfg = Config::try_parse_from(["volley"]).expect("defaults should parse");
            assert_eq!(
                cfg.external_api,
                DEFAULT_EXTERNAL_API.parse::<SocketAddr>().unwrap()
            );
            assert_eq!(cfg.thread_name, DEFAULT_THREAD_NAME);
            assert_eq!(cfg.threads, None);
        }

        #[test]
        fn parse_overrides() {
            let cfg = Config::try_parse_from([
                "volley",
                "--external-api",
                "127.0.0.1:9000",
                "--threads",
                "4",
            ])
            .expect("cli should parse");
            assert_eq!(cfg.external_api.port(), 9000);
            assert_eq!(cfg.threads, Some(4));
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use crate::env::parse_var_with_err;

    /// log as "json" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Logging configuration
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber. Log level comes from `volley_log`,
        /// format from the `LOG_FORMAT` env var
        pub fn parse(volley_log: &str) -> Result<Self> {
            let log_frmt: String = parse_var_with_err("LOG_FORMAT", DEFAULT_LOG_FORMAT)?;

            // the target's own client internals are noise at most levels
            let filter = EnvFilter::try_new(volley_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("hyper_util=off".parse()?);

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .try_init()?;
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .try_init()?;
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .try_init()?;
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
