//! Serialized (on-disk) form of the coordinator config.
//!
//! Everything here is a direct mirror of the YAML document; validation and
//! defaulting into runtime types happens in the crate root.
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, de};

/// default KV bucket holding the coordination tree
pub static DEFAULT_BUCKET: &str = "cluster_coordination";
/// default root for membership entries
pub static DEFAULT_HOSTS_ROOT: &str = "/hosts";
/// default root for collection -> bundle mappings
pub static DEFAULT_COLLECTIONS_ROOT: &str = "/collections";
/// default root for configuration bundles
pub static DEFAULT_CONFIGS_ROOT: &str = "/configs";
/// file fetched by `get_config` when the caller names none
pub static DEFAULT_CONFIG_FILE: &str = "config.xml";

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    pub coordination: Coordination,
    pub collection: String,
    pub host_address: Option<String>,
    #[serde(default)]
    pub membership: MembershipMode,
    #[serde(default = "default_config_file")]
    pub default_config_file: String,
    #[serde(default)]
    pub paths: PathRoots,
}

/// connection settings for the coordination ensemble
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Coordination {
    /// comma separated list of ensemble members
    pub connect_string: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(
        default = "default_client_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub client_timeout: Duration,
    #[serde(
        default = "default_connect_wait",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub connect_wait: Duration,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub request_timeout: Duration,
}

/// What happens to this host's membership entry when the coordinator closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    /// entry outlives the coordinator
    #[default]
    Persistent,
    /// the coordinator removes its own entry on close
    Ephemeral,
}

/// Well-known roots of the coordination tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PathRoots {
    #[serde(default = "default_hosts_root")]
    pub hosts: String,
    #[serde(default = "default_collections_root")]
    pub collections: String,
    #[serde(default = "default_configs_root")]
    pub configs: String,
}

impl Default for PathRoots {
    fn default() -> Self {
        Self {
            hosts: default_hosts_root(),
            collections: default_collections_root(),
            configs: default_configs_root(),
        }
    }
}

pub fn default_bucket() -> String {
    DEFAULT_BUCKET.to_owned()
}

pub fn default_config_file() -> String {
    DEFAULT_CONFIG_FILE.to_owned()
}

pub fn default_hosts_root() -> String {
    DEFAULT_HOSTS_ROOT.to_owned()
}

pub fn default_collections_root() -> String {
    DEFAULT_COLLECTIONS_ROOT.to_owned()
}

pub fn default_configs_root() -> String {
    DEFAULT_CONFIGS_ROOT.to_owned()
}

pub const fn default_client_timeout() -> Duration {
    Duration::from_secs(15)
}

pub const fn default_connect_wait() -> Duration {
    Duration::from_millis(5000)
}

pub const fn default_request_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Parse a duration string with optional time units
/// Accepts: "5000", "5000ms", "15s", "1m", "1h"
/// If no unit is specified, assumes milliseconds
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::Error::msg("empty duration string"));
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let millis_per_unit = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', 's' or 'ms' are supported",
            other
        ),
    };

    num.checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Millis(u64),
    String(String),
}

impl WireDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        let duration = match self {
            WireDuration::Millis(val) => Duration::from_millis(val),
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom)?,
        };
        if duration.is_zero() {
            return Err(E::custom("duration cannot be zero"));
        }
        Ok(duration)
    }
}

fn deserialize_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    WireDuration::deserialize(de)?.into_duration()
}

fn serialize_duration<S>(duration: &Duration, ser: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ser.serialize_str(&format!("{}ms", duration.as_millis()))
}
