use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A dotted numeric client build version such as `2.10.1`.
///
/// Ordering is plain lexicographic over the components with no zero padding:
/// a shorter version that is a prefix of a longer one sorts first, so
/// `2.1 > 2.0.9` and `2.0 < 2.0.0`. Components have no width limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(Vec<Component>);

/// One integer component, kept as its decimal digits so that arbitrarily long
/// build numbers still compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Component {
    negative: bool,
    digits: String, // no leading zeros, "0" for zero
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("non-numeric version component {0:?}")]
    InvalidComponent(String),
}

impl Version {
    pub fn components(&self) -> &[Component] {
        &self.0
    }
}

impl Component {
    /// The component as an `i64`, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        self.to_string().parse().ok()
    }
}

impl FromStr for Component {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidComponent(s.to_string());
        let trimmed = s.trim();
        let (negative, magnitude) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        if magnitude.is_empty() || !magnitude.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let digits = match magnitude.trim_start_matches('0') {
            "" => "0",
            rest => rest,
        };
        Ok(Component {
            negative: negative && digits != "0",
            digits: digits.to_string(),
        })
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        let magnitude = self
            .digits
            .len()
            .cmp(&other.digits.len())
            .then_with(|| self.digits.cmp(&other.digits));
        match (self.negative, other.negative) {
            (false, false) => magnitude,
            (true, true) => magnitude.reverse(),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.digits)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(VersionError::Empty);
        }
        s.split('.')
            .map(str::parse::<Component>)
            .collect::<Result<Vec<_>, _>>()
            .map(Version)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// True when `latest` is strictly newer than `client`. If either side fails to
/// parse this is `false`, so an unreadable version never triggers an update
/// notice.
pub fn is_newer(client: &str, latest: &str) -> bool {
    match (client.parse::<Version>(), latest.parse::<Version>()) {
        (Ok(client), Ok(latest)) => latest > client,
        (client, latest) => {
            tracing::debug!("Ignoring unparseable version pair: {:?} / {:?}", client, latest);
            false
        }
    }
}
