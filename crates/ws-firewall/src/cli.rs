use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ws-firewall",
    version,
    about = "WebSocket relay guarded by an AI content-safety detector"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Backend WebSocket URL (overrides config file setting)
    #[arg(long)]
    pub upstream: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_config_yaml() {
        let cli = Cli::parse_from(["ws-firewall"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(cli.listen.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cli = Cli::parse_from([
            "ws-firewall",
            "-c",
            "/etc/fw.yaml",
            "--listen",
            "0.0.0.0:9000",
            "--upstream",
            "ws://backend:8080",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/fw.yaml"));
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.upstream.as_deref(), Some("ws://backend:8080"));
    }
}
