//! portwrap: run a command with SSH local port forwards set up around it
//!
//! The binary plays the host role for [`pw_tunnel::ForwardingWrapper`]: it
//! builds the session configuration from flags and an optional settings
//! file, sets the forwards up, runs the command and always tears down.

pub mod args;
pub mod output;
pub mod runner;

pub use args::Cli;
