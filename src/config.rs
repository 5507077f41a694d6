use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MAX_MERGE_TOLERANCE_SECS;
use crate::model::Ts;

/// Server settings, read from `RATECAL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub merge_tolerance_secs: Ts,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "ratecal".into(),
            max_connections: 256,
            compact_threshold: 1000,
            merge_tolerance_secs: 60,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their defaults;
    /// set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let tolerance: Ts = parse(&lookup, "RATECAL_MERGE_TOLERANCE_SECS")?
            .unwrap_or(d.merge_tolerance_secs);
        if !(0..=MAX_MERGE_TOLERANCE_SECS).contains(&tolerance) {
            return Err(ConfigError {
                var: "RATECAL_MERGE_TOLERANCE_SECS",
                value: tolerance.to_string(),
            });
        }
        Ok(Self {
            port: parse(&lookup, "RATECAL_PORT")?.unwrap_or(d.port),
            bind: lookup("RATECAL_BIND").unwrap_or(d.bind),
            data_dir: lookup("RATECAL_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("RATECAL_PASSWORD").unwrap_or(d.password),
            max_connections: parse(&lookup, "RATECAL_MAX_CONNECTIONS")?
                .unwrap_or(d.max_connections),
            compact_threshold: parse(&lookup, "RATECAL_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            merge_tolerance_secs: tolerance,
            metrics_port: parse(&lookup, "RATECAL_METRICS_PORT")?,
            tls_cert: lookup("RATECAL_TLS_CERT"),
            tls_key: lookup("RATECAL_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("RATECAL_PORT", "6000"),
            ("RATECAL_BIND", "127.0.0.1"),
            ("RATECAL_DATA_DIR", "/tmp/cal"),
            ("RATECAL_PASSWORD", "secret"),
            ("RATECAL_MAX_CONNECTIONS", "8"),
            ("RATECAL_COMPACT_THRESHOLD", "50"),
            ("RATECAL_MERGE_TOLERANCE_SECS", "0"),
            ("RATECAL_METRICS_PORT", "9090"),
            ("RATECAL_TLS_CERT", "c.pem"),
            ("RATECAL_TLS_KEY", "k.pem"),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cal"));
        assert_eq!(config.password, "secret");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.merge_tolerance_secs, 0);
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.tls_cert.as_deref(), Some("c.pem"));
        assert_eq!(config.tls_key.as_deref(), Some("k.pem"));
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("RATECAL_PORT", "http")])).unwrap_err();
        assert_eq!(err.var, "RATECAL_PORT");
        assert!(err.to_string().contains("RATECAL_PORT"));
    }

    #[test]
    fn tolerance_out_of_range() {
        let err = Config::from_lookup(lookup(&[("RATECAL_MERGE_TOLERANCE_SECS", "-1")]))
            .unwrap_err();
        assert_eq!(err.var, "RATECAL_MERGE_TOLERANCE_SECS");
        let too_big = (MAX_MERGE_TOLERANCE_SECS + 1).to_string();
        let vars = [("RATECAL_MERGE_TOLERANCE_SECS", too_big.as_str())];
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }
}
