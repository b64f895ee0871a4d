use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A semantic version as defined by semver 2.0.0.
///
/// Numeric components are 64-bit unsigned. Build metadata participates in
/// equality and ordering only as a final tie-break so that `Ord` stays
/// consistent with `Eq`; semver precedence proper ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<Identifier>,
    pub build: Vec<String>,
}

/// A single dot-separated identifier in a pre-release string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,
    #[error("expected a numeric component")]
    ExpectedNumber,
    #[error("numeric component has a leading zero")]
    LeadingZero,
    #[error("numeric component overflows 64 bits")]
    Overflow,
    #[error("empty identifier in pre-release or build metadata")]
    EmptyIdentifier,
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
            build: Vec::new(),
        }
    }

    /// Strict semver parse: `MAJOR.MINOR.PATCH[-pre][+build]`, nothing else.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        Self::parse_inner(s, false)
    }

    /// Lenient parse: additionally accepts a leading `v`/`V`, ASCII
    /// leading/trailing whitespace, and an omitted minor and/or patch
    /// component (treated as 0).
    pub fn parse_lenient(s: &str) -> Result<Self, VersionError> {
        let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
        let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
        Self::parse_inner(s, true)
    }

    fn parse_inner(s: &str, lenient: bool) -> Result<Self, VersionError> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        // Split off build metadata first: everything after the first `+`.
        let (s, build) = match s.split_once('+') {
            Some((head, meta)) => (head, parse_build(meta)?),
            None => (s, Vec::new()),
        };
        // The pre-release begins at the first `-`, which cannot occur inside
        // the numeric core.
        let (core, pre) = match s.split_once('-') {
            Some((head, pre)) => (head, parse_pre(pre)?),
            None => (s, Vec::new()),
        };

        let mut numbers = core.split('.');
        let major = parse_numeric_component(numbers.next())?;
        let minor = match numbers.next() {
            Some(part) => parse_numeric_component(Some(part))?,
            None if lenient => 0,
            None => return Err(VersionError::ExpectedNumber),
        };
        let patch = match numbers.next() {
            Some(part) => parse_numeric_component(Some(part))?,
            None if lenient => 0,
            None => return Err(VersionError::ExpectedNumber),
        };
        if let Some(extra) = numbers.next() {
            let c = extra.chars().next().unwrap_or('.');
            return Err(VersionError::UnexpectedChar(c));
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }

    /// Semver precedence, ignoring build metadata entirely.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        self.cmp_inner(other, false)
    }

    fn cmp_inner(&self, other: &Self, with_build: bool) -> Ordering {
        let core = (self.major, self.minor, self.patch).cmp(&(
            other.major,
            other.minor,
            other.patch,
        ));
        if core != Ordering::Equal {
            return core;
        }
        let pre = match (self.pre.is_empty(), other.pre.is_empty()) {
            // A pre-release sorts below the plain release.
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => self.pre.cmp(&other.pre),
        };
        if pre != Ordering::Equal || !with_build {
            return pre;
        }
        self.build.cmp(&other.build)
    }
}

fn parse_numeric_component(part: Option<&str>) -> Result<u64, VersionError> {
    let part = part.ok_or(VersionError::ExpectedNumber)?;
    if part.is_empty() {
        return Err(VersionError::ExpectedNumber);
    }
    if let Some(c) = part.chars().find(|c| !c.is_ascii_digit()) {
        return Err(VersionError::UnexpectedChar(c));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(VersionError::LeadingZero);
    }
    part.parse::<u64>().map_err(|_| VersionError::Overflow)
}

fn parse_pre(s: &str) -> Result<Vec<Identifier>, VersionError> {
    s.split('.').map(parse_pre_identifier).collect()
}

fn parse_pre_identifier(part: &str) -> Result<Identifier, VersionError> {
    if part.is_empty() {
        return Err(VersionError::EmptyIdentifier);
    }
    if let Some(c) = part
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-')
    {
        return Err(VersionError::UnexpectedChar(c));
    }
    if part.chars().all(|c| c.is_ascii_digit()) {
        if part.len() > 1 && part.starts_with('0') {
            return Err(VersionError::LeadingZero);
        }
        let n = part.parse::<u64>().map_err(|_| VersionError::Overflow)?;
        Ok(Identifier::Numeric(n))
    } else {
        Ok(Identifier::AlphaNumeric(part.to_string()))
    }
}

fn parse_build(s: &str) -> Result<Vec<String>, VersionError> {
    s.split('.')
        .map(|part| {
            if part.is_empty() {
                return Err(VersionError::EmptyIdentifier);
            }
            if let Some(c) = part
                .chars()
                .find(|c| !c.is_ascii_alphanumeric() && *c != '-')
            {
                return Err(VersionError::UnexpectedChar(c));
            }
            Ok(part.to_string())
        })
        .collect()
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            // Numeric identifiers always have lower precedence.
            (Identifier::Numeric(_), Identifier::AlphaNumeric(_)) => Ordering::Less,
            (Identifier::AlphaNumeric(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::AlphaNumeric(a), Identifier::AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_inner(other, true)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-")?;
            for (i, id) in self.pre.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match id {
                    Identifier::Numeric(n) => write!(f, "{n}")?,
                    Identifier::AlphaNumeric(s) => write!(f, "{s}")?,
                }
            }
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_plain_versions() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("0.0.0"), Version::new(0, 0, 0));
    }

    #[test]
    fn parses_pre_and_build() {
        let parsed = v("1.0.0-alpha.1+build.5");
        assert_eq!(parsed.major, 1);
        assert_eq!(
            parsed.pre,
            vec![
                Identifier::AlphaNumeric("alpha".to_string()),
                Identifier::Numeric(1)
            ]
        );
        assert_eq!(parsed.build, vec!["build".to_string(), "5".to_string()]);
    }

    #[test]
    fn rejects_leading_zeros() {
        assert_eq!(Version::parse("01.2.3"), Err(VersionError::LeadingZero));
        assert_eq!(
            Version::parse("1.2.3-01"),
            Err(VersionError::LeadingZero),
            "numeric pre-release identifiers reject leading zeros too"
        );
        // A lone zero is fine.
        assert_eq!(v("0.2.3").major, 0);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Version::parse(""), Err(VersionError::Empty));
        assert_eq!(Version::parse("1.2"), Err(VersionError::ExpectedNumber));
        assert_eq!(Version::parse("1.2.3.4"), Err(VersionError::UnexpectedChar('4')));
        assert_eq!(Version::parse("1.2.x"), Err(VersionError::UnexpectedChar('x')));
        assert_eq!(
            Version::parse("1.0.0-alpha..1"),
            Err(VersionError::EmptyIdentifier)
        );
        assert!(Version::parse("v1.2.3").is_err(), "strict parse rejects v prefix");
    }

    #[test]
    fn lenient_accepts_prefix_whitespace_and_short_forms() {
        assert_eq!(Version::parse_lenient(" v1.2.3 ").unwrap(), Version::new(1, 2, 3));
        assert_eq!(Version::parse_lenient("V2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(Version::parse_lenient("1.5").unwrap(), Version::new(1, 5, 0));
        assert_eq!(
            Version::parse_lenient("2-rc.1").unwrap(),
            Version {
                pre: vec![
                    Identifier::AlphaNumeric("rc".to_string()),
                    Identifier::Numeric(1)
                ],
                ..Version::new(2, 0, 0)
            }
        );
    }

    #[test]
    fn display_round_trips() {
        for s in [
            "1.2.3",
            "0.1.0-alpha",
            "1.0.0-alpha.1",
            "2.0.0-rc.1+build.42",
            "10.20.30+sha-deadbeef",
        ] {
            assert_eq!(v(s).to_string(), s);
            assert_eq!(Version::parse(&v(s).to_string()).unwrap(), v(s));
        }
    }

    #[test]
    fn precedence_follows_semver() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
        assert!(v("1.0.0-alpha.beta") < v("1.0.0-beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.11"));
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
        assert!(v("1.0.0") < v("2.0.0"));
        assert_eq!(
            v("1.0.0+a").cmp_precedence(&v("1.0.0+b")),
            Ordering::Equal,
            "build metadata is ignored by precedence"
        );
    }

    #[test]
    fn compare_is_antisymmetric() {
        let versions = [
            v("1.0.0-alpha"),
            v("1.0.0-alpha.1"),
            v("1.0.0-beta.2"),
            v("1.0.0-beta.11"),
            v("1.0.0"),
            v("1.2.3"),
        ];
        for a in &versions {
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
            }
        }
    }
}
