use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Colour hint attached to user-facing messages and error pages.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Info,
    Blue,
    Green,
    Yellow,
    Orange,
    #[default]
    Red,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_indicator_wire_names() {
        assert_eq!(Indicator::Red.to_string(), "red");
        assert_eq!(Indicator::from_str("orange").unwrap(), Indicator::Orange);
        assert_eq!(serde_json::to_string(&Indicator::Info).unwrap(), "\"info\"");
    }
}
