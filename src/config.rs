use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub root: PathBuf,
    pub bind_addr: String,
    pub autosave_interval_seconds: u64,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7190";
pub const DEFAULT_RATE_LIMIT_REQUESTS: usize = 25;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5);

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: ravenfell <data-root> [bind_addr]".to_string());
        }

        let root = Path::new(&args[1]).to_path_buf();
        let bind_addr = if args.len() > 2 {
            args[2].clone()
        } else {
            std::env::var("RAVENFELL_BIND_ADDR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
        };
        let autosave_interval_seconds = match std::env::var("RAVENFELL_AUTOSAVE_SECS") {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!(
                        "ravenfell: invalid RAVENFELL_AUTOSAVE_SECS '{}', autosave disabled",
                        value
                    );
                    0
                }
            },
            Err(_) => 0,
        };
        let rate_limit_requests = std::env::var("RAVENFELL_RATE_LIMIT")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|parsed| *parsed > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS);

        Ok(Self {
            root,
            bind_addr,
            autosave_interval_seconds,
            rate_limit_requests,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn missing_root_is_a_usage_error() {
        let err = AppConfig::from_args(&args(&["ravenfell"])).expect_err("usage");
        assert!(err.contains("usage"));
    }

    #[test]
    fn positional_bind_addr_wins() {
        let config =
            AppConfig::from_args(&args(&["ravenfell", "/srv/ravenfell", "127.0.0.1:9999"]))
                .expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.root, PathBuf::from("/srv/ravenfell"));
    }
}
