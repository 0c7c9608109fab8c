use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "barkwatch",
    version,
    about = "Acoustic event monitor: captures audio, classifies it, and raises debounced detection events"
)]
pub struct Cli {
    /// Play a WAV file instead of capturing from a device
    #[arg(long, value_name = "WAV", conflicts_with = "device")]
    pub file: Option<PathBuf>,

    /// Input device name (host default when omitted)
    #[arg(short = 'D', long)]
    pub device: Option<String>,

    /// Run as relay server, optionally overriding the bind address
    #[arg(
        long,
        value_name = "ADDR",
        num_args = 0..=1,
        default_missing_value = "0.0.0.0",
        conflicts_with = "connect"
    )]
    pub serve: Option<String>,

    /// Connect to a relay server at host:port
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<String>,

    /// Stream captured audio upstream instead of classifying locally
    #[arg(long, requires = "connect")]
    pub forward_audio: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Minimum score for subject labels
    #[arg(long, value_name = "SCORE")]
    pub subject_threshold: Option<f32>,

    /// Minimum score for signature labels
    #[arg(long, value_name = "SCORE")]
    pub signature_threshold: Option<f32>,

    /// Main loop tick rate in Hz
    #[arg(long, value_name = "HZ")]
    pub tick_rate: Option<u32>,

    /// Exit after this many seconds
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Relay port override
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Command-line flags win over the config file.
    pub fn apply_overrides(&self, cfg: &mut AppConfig) {
        if let Some(v) = self.subject_threshold {
            cfg.debounce.subject_threshold = v;
        }
        if let Some(v) = self.signature_threshold {
            cfg.debounce.signature_threshold = v;
        }
        if let Some(v) = self.tick_rate {
            cfg.tick_rate_hz = v;
        }
        if let Some(v) = self.port {
            cfg.relay.port = v;
        }
        if let Some(addr) = &self.serve {
            cfg.relay.bind_addr = addr.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_config_defaults() {
        let cli = Cli::parse_from([
            "barkwatch",
            "--subject-threshold",
            "0.7",
            "--tick-rate",
            "30",
            "--serve",
            "127.0.0.1",
            "--port",
            "20001",
        ]);
        let mut cfg = AppConfig::default();
        cli.apply_overrides(&mut cfg);

        assert_eq!(cfg.debounce.subject_threshold, 0.7);
        assert_eq!(cfg.debounce.signature_threshold, 0.85);
        assert_eq!(cfg.tick_rate_hz, 30);
        assert_eq!(cfg.relay.bind_addr, "127.0.0.1");
        assert_eq!(cfg.relay.port, 20001);
    }

    #[test]
    fn serve_without_a_value_defaults_to_all_interfaces() {
        let cli = Cli::parse_from(["barkwatch", "--serve"]);
        assert_eq!(cli.serve.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn serve_and_connect_are_mutually_exclusive() {
        assert!(
            Cli::try_parse_from(["barkwatch", "--serve", "--connect", "10.0.0.1:19912"]).is_err()
        );
    }

    #[test]
    fn forward_audio_requires_connect() {
        assert!(Cli::try_parse_from(["barkwatch", "--forward-audio"]).is_err());
        assert!(
            Cli::try_parse_from(["barkwatch", "--connect", "10.0.0.1:19912", "--forward-audio"])
                .is_ok()
        );
    }
}
