use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output format of the `tracing` subscriber installed by the binaries.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, flattened for log shippers.
    Json,
    /// Single-line human-readable events.
    #[default]
    Compact,
}

/// Error produced when a [`LogFormat`] cannot be parsed from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("JSON", LogFormat::Json)]
    #[case("compact", LogFormat::Compact)]
    fn parses_case_insensitively(#[case] input: &str, #[case] expected: LogFormat) {
        let parsed: LogFormat = input.parse().expect("format should parse");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn rejects_unknown_formats() {
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
