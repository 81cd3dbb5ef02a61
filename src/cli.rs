//! `clap`-derived CLI surface: `run` (default), `--config`, `--list-windows`.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_CONFIG_PATH: &str = "config/config.json";

#[derive(Debug, Parser)]
#[command(name = "castrelay", about = "Live screen/window capture relayed as FLV-over-WebSocket")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enumerate candidate capture sources, one per line as `<title>\t<class>`, then exit.
    #[arg(long)]
    pub list_windows: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_standard_config_path() {
        let cli = Cli::parse_from(["castrelay"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.list_windows);
    }

    #[test]
    fn accepts_config_override_and_list_windows_flag() {
        let cli = Cli::parse_from(["castrelay", "--config", "/tmp/custom.json", "--list-windows"]);
        assert_eq!(cli.config, PathBuf::from("/tmp/custom.json"));
        assert!(cli.list_windows);
    }
}
