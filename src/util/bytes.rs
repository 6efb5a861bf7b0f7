//! Human-readable byte counts for log fields.

use std::fmt;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Displays a byte count in IEC units with at most one decimal, e.g.
/// `ByteSize(1536)` prints `1.5 KiB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl From<usize> for ByteSize {
    fn from(len: usize) -> Self {
        Self(len as u64)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut unit = 0;
        let mut whole = self.0;
        let mut rest = 0;
        while whole >= 1024 && unit < UNITS.len() - 1 {
            rest = whole % 1024;
            whole /= 1024;
            unit += 1;
        }

        // Tenths, rounded half up, carried into the whole part when needed.
        let mut tenths = (rest * 10 + 512) / 1024;
        if tenths == 10 {
            whole += 1;
            tenths = 0;
        }
        if unit == 0 || tenths == 0 {
            write!(f, "{whole} {}", UNITS[unit])
        } else {
            write!(f, "{whole}.{tenths} {}", UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ByteSize;

    #[test]
    fn scales_through_units() {
        assert_eq!(ByteSize(0).to_string(), "0 B");
        assert_eq!(ByteSize(1023).to_string(), "1023 B");
        assert_eq!(ByteSize(1024).to_string(), "1 KiB");
        assert_eq!(ByteSize(1536).to_string(), "1.5 KiB");
        assert_eq!(ByteSize(3 * 1024 * 1024).to_string(), "3 MiB");
        assert_eq!(
            ByteSize(5 * 1024 * 1024 * 1024 + 512 * 1024 * 1024).to_string(),
            "5.5 GiB"
        );
    }

    #[test]
    fn rounds_up_into_the_next_whole() {
        assert_eq!(ByteSize(2047).to_string(), "2 KiB");
        assert_eq!(ByteSize::from(1100usize).to_string(), "1.1 KiB");
    }
}
