//! Library version identifier and strict `vMAJOR.MINOR.PATCH` parsing.
//!
//! Version numbers roughly follow semantic versioning: MAJOR for
//! incompatible API changes, MINOR for backward-compatible additions,
//! PATCH for bug fixes. Nothing is guaranteed for `v0.0.x`.

use std::fmt;

use crate::error::{QuiverError, Result};

/// A three-numbered version identifier with lexicographic ordering on the
/// numeric triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// The version of this library. The only process-wide constant in the crate.
pub const LIBRARY_VERSION: Version = Version::new(0, 1, 0);

impl Version {
    /// Construct a version from its parts.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version { major, minor, patch }
    }

    /// Parse a string that is *exactly* of the form `vMAJOR.MINOR.PATCH`.
    ///
    /// Fails with [`QuiverError::Malformed`] when the leading `v` is missing,
    /// a segment is absent, or a segment is not a base-10 integer.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .strip_prefix('v')
            .ok_or_else(|| QuiverError::malformed(format!("version `{text}` does not begin with 'v'")))?;

        let mut segments = body.split('.');
        let mut next = |name: &str| -> Result<u64> {
            let segment = segments
                .next()
                .ok_or_else(|| QuiverError::malformed(format!("version `{text}` is missing the {name} segment")))?;
            segment
                .parse::<u64>()
                .map_err(|_| QuiverError::malformed(format!("version `{text}` has a non-numeric {name} segment")))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if segments.next().is_some() {
            return Err(QuiverError::malformed(format!("version `{text}` has trailing segments")));
        }
        Ok(Version { major, minor, patch })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_display_parse_round_trip(major in 0u64..10_000, minor in 0u64..10_000, patch in 0u64..10_000) {
            let v = Version::new(major, minor, patch);
            prop_assert_eq!(Version::parse(&v.to_string()).unwrap(), v);
        }

        #[test]
        fn prop_ordering_matches_tuple(a in any::<(u16, u16, u16)>(), b in any::<(u16, u16, u16)>()) {
            let va = Version::new(a.0 as u64, a.1 as u64, a.2 as u64);
            let vb = Version::new(b.0 as u64, b.1 as u64, b.2 as u64);
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }
    }
}
