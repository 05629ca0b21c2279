//! The subset of the fastboot command set the flasher speaks.

use std::fmt;
use std::path::PathBuf;

/// A single protocol subcommand, rendered to the argument vector passed to
/// the protocol binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastbootCommand {
    /// `devices` - enumerate attached devices
    Devices,
    /// `getvar <name>` - query a boot-loader variable
    GetVar(String),
    /// `erase <partition>`
    Erase(String),
    /// `flash <partition> <image>`
    Flash { partition: String, image: PathBuf },
    /// `reboot`
    Reboot,
    /// `--version` - used to validate the binary
    Version,
}

impl FastbootCommand {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            FastbootCommand::Devices => vec!["devices".to_string()],
            FastbootCommand::GetVar(name) => vec!["getvar".to_string(), name.clone()],
            FastbootCommand::Erase(partition) => vec!["erase".to_string(), partition.clone()],
            FastbootCommand::Flash { partition, image } => vec![
                "flash".to_string(),
                partition.clone(),
                image.to_string_lossy().to_string(),
            ],
            FastbootCommand::Reboot => vec!["reboot".to_string()],
            FastbootCommand::Version => vec!["--version".to_string()],
        }
    }
}

impl fmt::Display for FastbootCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}
