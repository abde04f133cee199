use std::fmt::{self, Display};

/// Represents a version of the HTTP spec.
///
/// HTTP/0.9 is only of historic importance. Requests that appear to be
/// HTTP/0.9 are almost always malformed HTTP/1.0 requests, so the framer
/// rejects them as such.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Version {
    /// HTTP/1.0 protocol version.
    Http10,
    /// HTTP/1.1 protocol version as described in RFC7230 and others.
    Http11,
}

impl Version {
    /// Converts the minor version reported by httparse.
    pub fn from_minor(minor: u8) -> Option<Version> {
        match minor {
            0 => Some(Version::Http10),
            1 => Some(Version::Http11),
            _ => None,
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use crate::Version::*;
        f.write_str(match *self {
            Http10 => "HTTP/1.0",
            Http11 => "HTTP/1.1",
        })
    }
}

#[cfg(test)]
mod test {
    use super::Version;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Version::Http10), "HTTP/1.0");
        assert_eq!(format!("{}", Version::Http11), "HTTP/1.1");
    }

    #[test]
    fn test_from_minor() {
        assert_eq!(Version::from_minor(0), Some(Version::Http10));
        assert_eq!(Version::from_minor(1), Some(Version::Http11));
        assert_eq!(Version::from_minor(2), None);
    }
}
