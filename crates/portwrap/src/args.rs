//! Command-line arguments and their merge with the settings file

use std::path::PathBuf;

use clap::Parser;

use pw_core::config::{default_settings_path, load_settings};
use pw_core::forward::ENTRY_SEPARATOR;
use pw_core::{ConfigError, SessionSettings};

#[derive(Parser, Debug)]
#[command(name = "portwrap")]
#[command(author, version, about = "Run a command with SSH local port forwards set up around it")]
pub struct Cli {
    /// TOML settings file (default: <config dir>/portwrap/session.toml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SSH server host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// SSH server port [default: 22]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Login user name [default: current user]
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password, also used as the private key passphrase
    #[arg(long, env = "PORTWRAP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key file
    #[arg(short, long, value_name = "FILE")]
    pub identity: Option<PathBuf>,

    /// Keepalive interval in seconds (0 disables)
    #[arg(short, long, value_name = "SECS")]
    pub keepalive: Option<u32>,

    /// Forwarding localPort:remoteHost:remotePort, repeatable
    #[arg(short = 'L', long = "forward", value_name = "SPEC")]
    pub forwards: Vec<String>,

    /// Verify the server's host key against ~/.ssh/known_hosts
    #[arg(long)]
    pub strict_host_key_checking: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Command to run while the forwards are up
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Tracing filter derived from `-q`/`-v`
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, 2) => "debug",
            (false, _) => "trace",
        }
    }

    /// Settings from the file, with flags taking precedence
    pub fn settings(&self) -> Result<SessionSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => load_settings(path)?,
            None => {
                let path = default_settings_path();
                if path.exists() {
                    load_settings(&path)?
                } else {
                    SessionSettings::default()
                }
            }
        };

        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port.to_string();
        }
        if let Some(user) = &self.user {
            settings.username = user.clone();
        }
        if let Some(password) = &self.password {
            settings.password = password.clone();
        }
        if let Some(identity) = &self.identity {
            settings.keyfile = identity.display().to_string();
        }
        if let Some(keepalive) = self.keepalive {
            settings.keepalive = keepalive.to_string();
        }
        if !self.forwards.is_empty() {
            let separator = ENTRY_SEPARATOR.to_string();
            settings.forwardings = self.forwards.join(separator.as_str());
        }
        if self.strict_host_key_checking {
            settings.strict_host_key_checking = true;
        }

        Ok(settings)
    }
}
