//! Strongly-typed identifiers for domain entities.
//!
//! Source stamps, buildsets and pending requests are identified by opaque
//! integers assigned by the backing store.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(raw.parse()?))
            }
        }
    };
}

define_id!(SourceStampId, "ss");
define_id!(BuildsetId, "bs");
define_id!(PendingRequestId, "pr");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_stamp_id_display() {
        assert_eq!(SourceStampId::new(42).to_string(), "42");
    }

    #[test]
    fn test_id_parse_accepts_prefix() {
        let plain: SourceStampId = "42".parse().unwrap();
        let prefixed: SourceStampId = "ss_42".parse().unwrap();
        assert_eq!(plain, prefixed);
        assert!("bs_x".parse::<BuildsetId>().is_err());
    }
}
