//! Registry configuration and per-connection delivery settings.

use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ChannelName
// ---------------------------------------------------------------------------

/// Channel used when a client does not name one.
pub const DEFAULT_CHANNEL: &str = "default";

/// Name of a broadcast channel.
///
/// Channels are implicit: a name only matters while at least one
/// connection is joined to it. The empty string maps to
/// [`DEFAULT_CHANNEL`]; no other validation is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            Self(DEFAULT_CHANNEL.to_string())
        } else {
            Self(name)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelName {
    fn default() -> Self {
        Self(DEFAULT_CHANNEL.to_string())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// DeliverySettings
// ---------------------------------------------------------------------------

/// Per-connection delivery preferences, recorded at join time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Whether broadcasts from this connection are also delivered back to it.
    pub deliver_to_self: bool,
}

impl DeliverySettings {
    /// Builds settings from the raw `echo` flag of a connect request.
    ///
    /// Missing or unrecognised values disable self-delivery.
    pub fn from_flag(raw: Option<&str>) -> Self {
        Self {
            deliver_to_self: raw.and_then(parse_flag).unwrap_or(false),
        }
    }
}

/// Parses a boolean-ish string.
///
/// Accepts `1`, `t`, `T`, `TRUE`, `true`, `True` and their negative
/// counterparts `0`, `f`, `F`, `FALSE`, `false`, `False`. Anything else
/// is `None`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`RoomRegistry`](crate::RoomRegistry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on a single write during broadcast. A recipient that
    /// does not accept the frame in time is evicted. `None` waits forever.
    pub send_timeout: Option<Duration>,

    /// Upper bound on closing an evicted connection.
    pub close_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Some(Duration::from_secs(5)),
            close_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_channel_name_maps_to_default() {
        assert_eq!(ChannelName::new("").as_str(), DEFAULT_CHANNEL);
        assert_eq!(ChannelName::default(), ChannelName::new(""));
    }

    #[test]
    fn test_channel_name_is_not_validated() {
        let name = ChannelName::new("  weird/näme ");
        assert_eq!(name.as_str(), "  weird/näme ");
        assert_eq!(name.to_string(), "  weird/näme ");
    }

    #[test]
    fn test_parse_flag_accepts_boolean_spellings() {
        for raw in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_flag(raw), Some(true), "{raw}");
        }
        for raw in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_flag(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_flag("yes"), None);
        assert_eq!(parse_flag("tRuE"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_delivery_settings_from_flag() {
        assert!(DeliverySettings::from_flag(Some("true")).deliver_to_self);
        assert!(!DeliverySettings::from_flag(Some("0")).deliver_to_self);
        assert!(!DeliverySettings::from_flag(Some("garbage")).deliver_to_self);
        assert!(!DeliverySettings::from_flag(None).deliver_to_self);
        assert_eq!(DeliverySettings::default(), DeliverySettings::from_flag(None));
    }

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.send_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.close_timeout, Duration::from_secs(1));
    }
}
