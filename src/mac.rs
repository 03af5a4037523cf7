use std::fmt;

/// MAC address in canonical form: 12 uppercase hex digits, no separators.
///
/// Parsing is lenient. `:`, `-` and `.` separators are stripped, and input
/// shorter than 12 digits is left-padded with zeros, so partial addresses
/// are accepted rather than rejected. Longer input keeps its last 12
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(String);

impl MacAddress {
    /// Canonicalizes a raw MAC-like string.
    pub fn new(raw: &str) -> Self {
        let stripped: String = raw
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        let padded: Vec<char> = format!("000000000000{}", stripped.trim().to_uppercase())
            .chars()
            .collect();
        MacAddress(padded[padded.len() - 12..].iter().collect())
    }

    /// Uppercase digits without separators.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase digits without separators (`86df11223344`).
    pub fn bare_lower(&self) -> String {
        self.0.to_lowercase()
    }

    /// Uppercase, colon-separated (`86:DF:11:22:33:44`).
    pub fn colon(&self) -> String {
        self.split(2).join(":")
    }

    /// Uppercase, hyphen-separated (`86-DF-11-22-33-44`).
    pub fn hyphen(&self) -> String {
        self.split(2).join("-")
    }

    /// Uppercase, dot-separated in groups of four (`86DF.1122.3344`).
    pub fn dot(&self) -> String {
        self.split(4).join(".")
    }

    fn split(&self, size: usize) -> Vec<String> {
        let chars: Vec<char> = self.0.chars().collect();
        chars.chunks(size).map(|c| c.iter().collect()).collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MacAddress {
    fn from(raw: &str) -> Self {
        MacAddress::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_separators_are_stripped() {
        for raw in ["86:df:11:22:33:44", "86-DF-11-22-33-44", "86df.1122.3344", "86Df11223344"] {
            assert_eq!(MacAddress::new(raw).as_str(), "86DF11223344", "input {raw}");
        }
    }

    #[test]
    fn test_short_input_is_zero_extended() {
        let mac = MacAddress::new("86:df:11:22:33");
        assert_eq!(mac.as_str(), "0086DF112233");
        assert_eq!(mac.bare_lower(), "0086df112233");
        assert_eq!(mac.hyphen(), "00-86-DF-11-22-33");

        assert_eq!(MacAddress::new("a").as_str(), "00000000000A");
    }

    #[test]
    fn test_long_input_keeps_last_twelve() {
        assert_eq!(MacAddress::new("ff:86:df:11:22:33:44").as_str(), "86DF11223344");
    }

    #[test]
    fn test_formats() {
        let mac = MacAddress::new("00:11:22:aa:bb:cc");
        assert_eq!(mac.colon(), "00:11:22:AA:BB:CC");
        assert_eq!(mac.hyphen(), "00-11-22-AA-BB-CC");
        assert_eq!(mac.dot(), "0011.22AA.BBCC");
        assert_eq!(mac.to_string(), "001122AABBCC");
    }
}
