//! CLI enum types.

use clap::ValueEnum;

use crate::config::SourceKind;

/// Frame source selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Camera,
    Sample,
    Still,
}

impl From<SourceArg> for SourceKind {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Camera => SourceKind::Camera,
            SourceArg::Sample => SourceKind::Sample,
            SourceArg::Still => SourceKind::Still,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_arg_conversion() {
        assert_eq!(SourceKind::from(SourceArg::Camera), SourceKind::Camera);
        assert_eq!(SourceKind::from(SourceArg::Sample), SourceKind::Sample);
        assert_eq!(SourceKind::from(SourceArg::Still), SourceKind::Still);
    }
}
