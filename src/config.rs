//! Configuration loader. Treated as an external collaborator by the core
//! design (§1) — the rest of the crate only ever sees the resulting
//! `Config` value, never argv.

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub dir: String,
    pub dbfilename: String,
    pub replicaof: Option<(String, u16)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 6379,
            dir: ".".to_string(),
            dbfilename: "empty.rdb".to_string(),
            replicaof: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("'{0}' requires an argument")]
    MissingValue(String),
    #[error("invalid value for '{flag}': {value}")]
    InvalidValue { flag: String, value: String },
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("--replicaof requires a \"<host> <port>\" value")]
    BadReplicaOf,
}

/// Parses `--port`, `--dir`, `--dbfilename`, `--replicaof "<host> <port>"`
/// from the given argv-style iterator (§6, §4.8).
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut iter = args.into_iter().peekable();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--port" => {
                let value = iter.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
                config.port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue { flag: arg, value: value.clone() })?;
            }
            "--dir" => {
                config.dir = iter.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
            }
            "--dbfilename" => {
                config.dbfilename = iter.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
            }
            "--replicaof" => {
                let value = iter.next().ok_or(ConfigError::BadReplicaOf)?;
                let mut parts = value.split_whitespace();
                let host = parts.next().ok_or(ConfigError::BadReplicaOf)?.to_string();
                let port: u16 = parts
                    .next()
                    .ok_or(ConfigError::BadReplicaOf)?
                    .parse()
                    .map_err(|_| ConfigError::BadReplicaOf)?;
                if parts.next().is_some() {
                    return Err(ConfigError::BadReplicaOf);
                }
                config.replicaof = Some((host, port));
            }
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = parse_args(std::iter::empty()).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.dir, ".");
        assert_eq!(config.dbfilename, "empty.rdb");
        assert!(config.replicaof.is_none());
    }

    #[test]
    fn parses_replicaof_into_host_and_port() {
        let args = ["--replicaof", "localhost 6380"].map(String::from);
        let config = parse_args(args).unwrap();
        assert_eq!(config.replicaof, Some(("localhost".to_string(), 6380)));
    }

    #[test]
    fn rejects_unknown_flag() {
        let args = ["--bogus"].map(String::from);
        assert!(matches!(parse_args(args), Err(ConfigError::UnknownOption(_))));
    }
}
