//! Parser-local error taxonomy.
//!
//! Both variants are *user* errors per SPEC_FULL.md §7: they must never be
//! confused with infrastructure failures by callers further up the stack.

/// Errors raised while parsing or validating a suite document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    MalformedInput(String),

    #[error("{0}")]
    SchemaViolation(String),

    #[error("failed to parse {ordinal} testsuite: {source}")]
    InSuite {
        ordinal: String,
        #[source]
        source: Box<ParseError>,
    },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Renders `1` as `"1st"`, `2` as `"2nd"`, etc., matching the wording used
/// in the original parser's error messages.
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_handles_teens_specially() {
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(13), "13th");
    }

    #[test]
    fn ordinal_handles_common_cases() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(21), "21st");
        assert_eq!(ordinal(101), "101st");
    }
}
