//! Process-wide configuration.
//!
//! Loading this from CLI flags / environment / a config-management system is
//! an external-collaborator concern (see SPEC_FULL.md §1); this module only
//! defines the shape the core consumes and a minimal JSON-file loader for it,
//! in the same spirit as the teacher's `ConfHandle` but without the TLS/token
//! machinery that has no counterpart here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;

pub const DEFAULT_MANAGEMENT_PORT: u16 = 10000;
pub const DEFAULT_STREAM_PORT_BASE: u16 = 10500;

/// The injected command-name table (see SPEC_FULL.md §4.3): names are
/// configuration, the behavior per kind is the core's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandNames {
    pub ack: String,
    pub sch: String,
    pub dis: String,
    pub png: String,
    pub ssu: String,
    pub sry: String,
    pub ao: String,
    pub ai: String,
    pub do_: String,
    pub di: String,
}

impl Default for CommandNames {
    fn default() -> Self {
        Self {
            ack: "ACK".to_owned(),
            sch: "SCH".to_owned(),
            dis: "DIS".to_owned(),
            png: "PNG".to_owned(),
            ssu: "SSU".to_owned(),
            sry: "SRY".to_owned(),
            ao: "AO".to_owned(),
            ai: "AI".to_owned(),
            do_: "DO".to_owned(),
            di: "DI".to_owned(),
        }
    }
}

impl CommandNames {
    pub fn name_for(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Ack => &self.ack,
            CommandKind::Sch => &self.sch,
            CommandKind::Dis => &self.dis,
            CommandKind::Png => &self.png,
            CommandKind::Ssu => &self.ssu,
            CommandKind::StreamReady => &self.sry,
            CommandKind::Ao => &self.ao,
            CommandKind::Ai => &self.ai,
            CommandKind::Do => &self.do_,
            CommandKind::Di => &self.di,
        }
    }

    /// Builds the ordered prefix table the dispatcher matches lines against.
    ///
    /// `StreamReady` is deliberately excluded: it is never matched against an
    /// incoming line, only ever sent unprompted right after accept.
    pub fn table(&self) -> Vec<(CommandKind, &str)> {
        vec![
            (CommandKind::Ack, self.ack.as_str()),
            (CommandKind::Sch, self.sch.as_str()),
            (CommandKind::Dis, self.dis.as_str()),
            (CommandKind::Png, self.png.as_str()),
            (CommandKind::Ssu, self.ssu.as_str()),
            (CommandKind::Ao, self.ao.as_str()),
            (CommandKind::Ai, self.ai.as_str()),
            (CommandKind::Do, self.do_.as_str()),
            (CommandKind::Di, self.di.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port clients connect to for the management protocol.
    pub management_port: u16,
    /// First UDP port handed out to a client's Stream.
    pub stream_port_base: u16,
    /// Path of the append-only CSV telemetry log. Opened by `main`, not by the core.
    pub telemetry_log_path: PathBuf,
    /// Injected command-name table.
    pub command_names: CommandNames,
    /// Stream sender and telemetry logger tick period, in milliseconds.
    pub tick_millis: u64,
    /// Number of ticks between telemetry throughput aggregation passes.
    pub telemetry_aggregate_every: u32,
    /// `tracing` env-filter directives for operational logging.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            management_port: DEFAULT_MANAGEMENT_PORT,
            stream_port_base: DEFAULT_STREAM_PORT_BASE,
            telemetry_log_path: PathBuf::from("relayd-telemetry.csv"),
            command_names: CommandNames::default(),
            tick_millis: 100,
            telemetry_aggregate_every: 10,
            log_filter: "info".to_owned(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults for
    /// any field the file omits. A missing file is not an error: it yields
    /// the default configuration, matching the "configuration loading is an
    /// external collaborator" stance of the core.
    pub fn load_from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).context("invalid JSON configuration"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error).context("failed to read configuration file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_table_matches_glossary() {
        let names = CommandNames::default();
        let table = names.table();
        assert_eq!(table.len(), 9);
        assert!(table.contains(&(CommandKind::Dis, "DIS")));
        assert!(table.contains(&(CommandKind::Ssu, "SSU")));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = Config::load_from_file(std::path::Path::new("/nonexistent/relayd.json")).unwrap();
        assert_eq!(config.management_port, DEFAULT_MANAGEMENT_PORT);
    }
}
