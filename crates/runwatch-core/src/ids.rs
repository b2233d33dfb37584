use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque string identifier. Locally minted values are `<prefix>_<uuid v7>`,
/// so they sort by creation time; runtime-assigned values are kept verbatim.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// One orchestrated run, minted by this process.
    RunId => "run"
);
string_id!(
    /// Assigned by the runtime on `session.create`.
    SessionId => "sess"
);
string_id!(TurnId => "turn");
string_id!(ToolCallId => "call");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(RunId::new().as_str().starts_with("run_"));
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(TurnId::new().as_str().starts_with("turn_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn from_raw_preserves_runtime_value() {
        let id = SessionId::from_raw("6f1c2a");
        assert_eq!(id.as_str(), "6f1c2a");
        assert_eq!(id.to_string(), "6f1c2a");
    }

    #[test]
    fn serializes_transparently() {
        let id = TurnId::from_raw("turn-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""turn-7""#);
        let parsed: TurnId = serde_json::from_str(r#""turn-7""#).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<RunId> = (0..50).map(|_| RunId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
