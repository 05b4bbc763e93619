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

/// Log setup for confkeeper. Logs always go to stderr so stdout carries
/// only command output (`get` writes raw file bytes there).
#[derive(Debug)]
pub struct Config {
    /// formatting to apply to logs
    pub log_frmt: String,
}

impl Config {
    /// install the global subscriber
    pub fn parse(log: &str, log_frmt: &str) -> Result<Self> {
        // Log level comes from CONFKEEPER_LOG
        let filter = EnvFilter::try_new(log)
            .or_else(|_| EnvFilter::try_new("info"))?
            .add_directive("async_nats=warn".parse()?);

        match log_frmt {
            "json" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new())
                            .with_writer(std::io::stderr),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .init();
            }
        }

        Ok(Self {
            log_frmt: log_frmt.to_owned(),
        })
    }
}
