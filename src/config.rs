use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once from `ROOMGRID_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub housekeeping_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5480,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            housekeeping_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring {key}={raw:?}: not a valid value");
                    None
                }
            }
        }

        let d = Self::default();
        Self {
            port: parsed(&lookup, "ROOMGRID_PORT").unwrap_or(d.port),
            bind: lookup("ROOMGRID_BIND").unwrap_or(d.bind),
            data_dir: lookup("ROOMGRID_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            max_connections: parsed(&lookup, "ROOMGRID_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "ROOMGRID_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "ROOMGRID_METRICS_PORT"),
            housekeeping_interval: parsed(&lookup, "ROOMGRID_HOUSEKEEPING_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map_or(d.housekeeping_interval, Duration::from_secs),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c, Config::default());
        assert_eq!(c.listen_addr(), "0.0.0.0:5480");
    }

    #[test]
    fn reads_every_variable() {
        let c = config(&[
            ("ROOMGRID_PORT", "7000"),
            ("ROOMGRID_BIND", "127.0.0.1"),
            ("ROOMGRID_DATA_DIR", "/var/lib/roomgrid"),
            ("ROOMGRID_MAX_CONNECTIONS", "8"),
            ("ROOMGRID_COMPACT_THRESHOLD", "50"),
            ("ROOMGRID_METRICS_PORT", "9100"),
            ("ROOMGRID_HOUSEKEEPING_SECS", "60"),
        ]);
        assert_eq!(c.listen_addr(), "127.0.0.1:7000");
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/roomgrid"));
        assert_eq!(c.max_connections, 8);
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.housekeeping_interval, Duration::from_secs(60));
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("ROOMGRID_PORT", "eighty"),
            ("ROOMGRID_METRICS_PORT", "-1"),
            ("ROOMGRID_HOUSEKEEPING_SECS", "0"),
        ]);
        assert_eq!(c.port, 5480);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.housekeeping_interval, Duration::from_secs(300));
    }
}
