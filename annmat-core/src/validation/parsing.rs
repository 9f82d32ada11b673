//! Parsing utilities for positional selector strings
//!
//! Used by command-line wrappers to turn `"0:10"` or `"2,0,1"` into
//! positions. Pure functions with no I/O dependencies.

use crate::FormatError;
use core::ops::Range;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Parse a range string in the format "start:end" or "start-end"
pub fn parse_range(range_str: &str) -> Result<Range<usize>, FormatError> {
    if range_str.is_empty() {
        return Err(FormatError::InvalidRange);
    }

    let separator = range_str
        .find(':')
        .or_else(|| range_str.find('-'))
        .ok_or(FormatError::InvalidRange)?;

    let start = parse_usize(&range_str[..separator])?;
    let end = parse_usize(&range_str[separator + 1..])?;

    if start > end {
        return Err(FormatError::InvalidRange);
    }

    Ok(start..end)
}

/// Parse a comma separated position list such as "2,0,1"
///
/// Order and duplicates are preserved.
#[cfg(feature = "alloc")]
pub fn parse_positions(list: &str) -> Result<Vec<usize>, FormatError> {
    if list.trim().is_empty() {
        return Err(FormatError::InvalidRange);
    }
    list.split(',').map(|part| parse_usize(part.trim())).collect()
}

/// Parse a usize from a string with error handling
fn parse_usize(s: &str) -> Result<usize, FormatError> {
    if s.is_empty() {
        return Err(FormatError::InvalidRange);
    }

    let mut result: usize = 0;

    for byte in s.bytes() {
        if !byte.is_ascii_digit() {
            return Err(FormatError::InvalidRange);
        }

        let digit = (byte - b'0') as usize;

        if result > (usize::MAX - digit) / 10 {
            return Err(FormatError::ArraySizeOverflow);
        }

        result = result * 10 + digit;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("0:10"), Ok(0..10));
        assert_eq!(parse_range("5-15"), Ok(5..15));
        assert_eq!(parse_range("3:3"), Ok(3..3));

        assert_eq!(parse_range(""), Err(FormatError::InvalidRange));
        assert_eq!(parse_range("10:5"), Err(FormatError::InvalidRange));
        assert_eq!(parse_range("abc:def"), Err(FormatError::InvalidRange));
        assert_eq!(parse_range("10"), Err(FormatError::InvalidRange));
        assert_eq!(parse_range(":10"), Err(FormatError::InvalidRange));
    }

    #[test]
    fn test_parse_usize() {
        assert_eq!(parse_usize("0"), Ok(0));
        assert_eq!(parse_usize("999999"), Ok(999999));
        assert_eq!(parse_usize("12a"), Err(FormatError::InvalidRange));
        assert_eq!(parse_usize("-123"), Err(FormatError::InvalidRange));
        assert_eq!(
            parse_usize("99999999999999999999999999"),
            Err(FormatError::ArraySizeOverflow)
        );
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn test_parse_positions() {
        assert_eq!(parse_positions("2,0,1"), Ok(alloc::vec![2, 0, 1]));
        assert_eq!(parse_positions("1, 1"), Ok(alloc::vec![1, 1]));
        assert_eq!(parse_positions(""), Err(FormatError::InvalidRange));
        assert_eq!(parse_positions("1,,2"), Err(FormatError::InvalidRange));
    }
}
