use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SizeError {
    #[error("invalid size string: {0}")]
    InvalidFormat(String),
    #[error("size overflow while parsing: {0}")]
    Overflow(String),
}

/// Parse a human disk-size string ("32G", "512M", "1024K", or a bare byte
/// count) into a byte count. Suffixes are case-insensitive and only the
/// binary (1024-based) multipliers are recognized, matching qemu's `-drive
/// size=` convention.
pub fn parse_human_size(s: &str) -> Result<u64, SizeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SizeError::InvalidFormat(s.to_string()));
    }

    let (digits, mult): (&str, u64) = match s.chars().last().unwrap().to_ascii_uppercase() {
        'K' => (&s[..s.len() - 1], 1024),
        'M' => (&s[..s.len() - 1], 1024 * 1024),
        'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        'T' => (&s[..s.len() - 1], 1024 * 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| SizeError::InvalidFormat(s.to_string()))?;
    value
        .checked_mul(mult)
        .ok_or_else(|| SizeError::Overflow(s.to_string()))
}

/// Print a byte count back into the shortest human form that round-trips
/// through `parse_human_size`, preferring the largest exact unit.
pub fn format_human_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1024 * 1024 * 1024 * 1024, "T"),
        (1024 * 1024 * 1024, "G"),
        (1024 * 1024, "M"),
        (1024, "K"),
    ];
    for (unit, suffix) in UNITS {
        if bytes != 0 && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Convert a `bps*` throttling value (bytes/sec) into the `mbps*` field form
/// (megabytes/sec, as an f64) used internally. `bps*` is a compatibility
/// alias; this is the division-by-1024^2 the spec calls for.
pub fn bps_to_mbps(bps: u64) -> f64 {
    bps as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_human_size("32G").unwrap(), 32 * 1024 * 1024 * 1024);
        assert_eq!(parse_human_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_human_size("1024K").unwrap(), 1024 * 1024);
        assert_eq!(parse_human_size("100").unwrap(), 100);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_human_size("").is_err());
        assert!(parse_human_size("abc").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let bytes = 34_359_738_368u64; // 32G
        let s = format_human_size(bytes);
        assert_eq!(s, "32G");
        assert_eq!(parse_human_size(&s).unwrap(), bytes);
    }

    #[test]
    fn test_bps_to_mbps() {
        assert_eq!(bps_to_mbps(1024 * 1024), 1.0);
    }
}
