//! Command line options and the OpenStack auth configuration file.

use crate::error::ControllerError;
use clap::Parser;
use openstack_client::AuthOptions;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("GIT_COMMIT"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
);

/// Assigns OpenStack floating IPs to opted-in Kubernetes nodes.
#[derive(Debug, Clone, Parser)]
#[command(name = "kube-fip-controller", version = VERSION)]
pub struct Options {
    /// Absolute path to kubeconfig
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// The controllers threadiness
    #[arg(long, default_value_t = 1)]
    pub threadiness: usize,

    /// Interval for checking with OpenStack.
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    pub recheck_interval: Duration,

    /// The host to expose Prometheus metrics on.
    #[arg(long, default_value = "0.0.0.0")]
    pub metric_host: IpAddr,

    /// The port to expose Prometheus metrics on.
    #[arg(long, default_value_t = 9091)]
    pub metric_port: u16,

    /// Name of the default Floating IP network.
    #[arg(long, required = true)]
    pub default_floating_network: String,

    /// Name of the default Floating IP subnet.
    #[arg(long, required = true)]
    pub default_floating_subnet: String,

    /// Absolute path to configuration file.
    #[arg(long, required = true)]
    pub config: PathBuf,
}

/// Reads the OpenStack authentication config from the given YAML file.
pub fn read_auth_config(path: &PathBuf) -> Result<AuthOptions, ControllerError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), err))
    })?;
    serde_yaml::from_str(&raw).map_err(|err| {
        ControllerError::InvalidConfig(format!("cannot parse {}: {}", path.display(), err))
    })
}

/// Parses durations of the form `90s`, `10m`, `1h` or `1h30m`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        number.clear();
        total += match c {
            's' => value,
            'm' => value * 60,
            'h' => value * 3600,
            _ => return Err(format!("invalid duration unit {:?} in {:?}", c, input)),
        };
    }
    if !number.is_empty() {
        return Err(format!("duration {:?} has a trailing number without unit", input));
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn parse_duration_bare_seconds() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1h30").is_err());
    }

    #[test]
    fn auth_config_deserializes() {
        let yaml = r#"
auth_url: https://keystone.example.com/v3
username: fip-controller
password: secret
user_domain_name: Default
project_name: cloud
project_domain_name: Default
"#;
        let auth: AuthOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(auth.auth_url, "https://keystone.example.com/v3");
        assert_eq!(auth.username, "fip-controller");
        assert_eq!(auth.project_domain_name, "Default");
    }
}
