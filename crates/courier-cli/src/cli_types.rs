use clap::ValueEnum;

use courier_dispatch::DispatchMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliDispatchMode {
    All,
    Roles,
}

impl From<CliDispatchMode> for DispatchMode {
    fn from(value: CliDispatchMode) -> Self {
        match value {
            CliDispatchMode::All => DispatchMode::All,
            CliDispatchMode::Roles => DispatchMode::Roles,
        }
    }
}
