//! pvreg configs

pub mod cli {
    //! Parse from either cli or env var

    /// the default path to the simulated records
    pub static DEFAULT_CONFIG_PATH: &str = "/var/lib/pvreg/records.yaml";
    /// default instrument database
    pub const DEFAULT_DATABASE_URL: &str = "sqlite:///var/lib/pvreg/instruments.db";
    /// default instrument PVs are attached to
    pub static DEFAULT_INSTRUMENT: &str = "default";
    /// default poll interval, in milliseconds
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
    /// default connect timeout, in seconds. 0 waits forever
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "pvreg-worker";
    /// default log level. Can use this argument or PVREG_LOG env var
    pub const DEFAULT_PVREG_LOG: &str = "info";

    use std::{path::PathBuf, time::Duration};

    pub use clap::Parser;

    use crate::session::SessionConfig;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "pvreg", bin_name = "pvreg", about, long_about = None)]
    /// parses from cli & environment var. pvreg will load `.env` in the working dir as well
    pub struct Config {
        /// path to the simulated record definitions
        #[clap(
            short,
            long,
            value_parser,
            env,
            default_value = DEFAULT_CONFIG_PATH
        )]
        pub config_path: PathBuf,
        /// instrument database, use "sqlite::memory:" for an in memory db
        #[clap(short, long, env, value_parser, default_value = DEFAULT_DATABASE_URL)]
        pub database_url: String,
        /// name of the instrument new PVs are attached to, created if missing
        #[clap(short, long, env, value_parser, default_value = DEFAULT_INSTRUMENT)]
        pub instrument: String,
        /// how often pending connections are polled, in milliseconds. Must be at least 1
        #[clap(
            long,
            env,
            value_parser = clap::value_parser!(u64).range(1..),
            default_value_t = DEFAULT_POLL_INTERVAL_MS
        )]
        pub poll_interval_ms: u64,
        /// give up on a connection after this many seconds, 0 waits forever
        #[clap(long, env, value_parser, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
        pub connect_timeout_secs: u64,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to the number of cpus
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_PVREG_LOG)]
        pub pvreg_log: String,
        /// PV names to attach
        #[clap(value_parser)]
        pub pvs: Vec<String>,
    }

    impl Config {
        /// poll interval as `Duration`
        pub fn poll_interval(&self) -> Duration {
            Duration::from_millis(self.poll_interval_ms)
        }

        /// connect timeout as `Duration`, `None` when disabled
        pub fn connect_timeout(&self) -> Option<Duration> {
            (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
        }

        /// settings for the registration session
        pub fn session(&self) -> SessionConfig {
            SessionConfig {
                poll_interval: self.poll_interval(),
                connect_timeout: self.connect_timeout(),
            }
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::{Context, Result};
    use tracing_subscriber::{
        filter::{Directive, EnvFilter},
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use std::env;

    /// log as "json", "pretty" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Logging settings. [`Config::parse`] installs the global `tracing`
    /// subscriber, so call it once at startup
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber filtered by `pvreg_log` and return the
        /// settings used. Format comes from `LOG_FORMAT`. Panics if a global
        /// subscriber is already set
        pub fn parse(pvreg_log: &str) -> Result<Self> {
            let log_frmt = env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_owned());

            // Log level comes from PVREG_LOG
            let filter = EnvFilter::try_new(pvreg_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                // statement logging is noisy below trace
                .add_directive("sqlx=warn".parse::<Directive>().context("bad sqlx directive")?);

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
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
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
