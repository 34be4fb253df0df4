use crate::error::{Error, Kind};
use std::fmt;
use std::str::FromStr;

/// Marker string accepted by [`Version::parse`] for the latest-version sentinel.
const LATEST_MARKER: &str = "latest";

/// A migration version: an ordered sequence of non-negative numeric components
/// parsed from a dotted or underscored string ("1", "1.2", "1_2_3").
///
/// Two sentinels exist besides real versions: [`Version::empty`] orders below
/// every real version and stands for "nothing applied yet", [`Version::latest`]
/// orders above every real version and is never stored in the ledger.
///
/// Trailing zero components are insignificant: "1.0" and "1" compare equal and
/// display the same.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(Repr);

// Variant order gives the sentinel ordering for free.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Repr {
    Empty,
    Numbered(Vec<u64>),
    Latest,
}

impl Version {
    /// The sentinel below all real versions.
    pub fn empty() -> Version {
        Version(Repr::Empty)
    }

    /// The sentinel above all real versions.
    pub fn latest() -> Version {
        Version(Repr::Latest)
    }

    /// Parse a version from its string form.
    ///
    /// Components are digits separated by `.` or `_`; empty components and
    /// non-digit characters are rejected. The empty string parses to the empty
    /// sentinel and `"latest"` (any case) to the latest sentinel.
    pub fn parse(text: &str) -> Result<Version, Error> {
        if text.is_empty() {
            return Ok(Version::empty());
        }
        if text.eq_ignore_ascii_case(LATEST_MARKER) {
            return Ok(Version::latest());
        }

        let mut components = Vec::new();
        for component in text.split(['.', '_']) {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::new(Kind::InvalidVersion(text.into())));
            }
            let number = component
                .parse::<u64>()
                .map_err(|_| Error::new(Kind::InvalidVersion(text.into())))?;
            components.push(number);
        }

        // normalize so that "1.0" and "1" are the same value
        while components.len() > 1 && components.last() == Some(&0) {
            components.pop();
        }

        Ok(Version(Repr::Numbered(components)))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == Repr::Empty
    }

    pub fn is_latest(&self) -> bool {
        self.0 == Repr::Latest
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Version, Error> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Empty => Ok(()),
            Repr::Latest => write!(f, "{}", LATEST_MARKER),
            Repr::Numbered(components) => {
                let mut first = true;
                for component in components {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", component)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}
