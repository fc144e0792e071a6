use crate::error::{PaymentError, Result};
use tracing::warn;

const LOCAL_LENGTH: usize = 10;

/// Normalizes a subscriber number to the local `07XXXXXXXX` form the gateway expects.
///
/// Non-digits are stripped, a `254` country prefix becomes `0`, a leading `0` is
/// enforced and anything past ten digits is dropped.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(PaymentError::ValidationError(format!(
            "Phone number has no digits: {:?}",
            raw
        )));
    }

    let mut phone = match digits.strip_prefix("254") {
        Some(rest) => format!("0{}", rest),
        None => digits,
    };
    if !phone.starts_with('0') {
        phone.insert(0, '0');
    }

    if phone.len() > LOCAL_LENGTH {
        phone.truncate(LOCAL_LENGTH);
    } else if phone.len() < LOCAL_LENGTH {
        warn!(phone = %phone, "Phone number is shorter than expected");
    }
    Ok(phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_variants() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "0712345678");
        assert_eq!(normalize_phone("254712345678").unwrap(), "0712345678");
        assert_eq!(normalize_phone("+254 712 345 678").unwrap(), "0712345678");
        assert_eq!(normalize_phone("'712345678'").unwrap(), "0712345678");
        assert_eq!(normalize_phone("07123456789999").unwrap(), "0712345678");
    }

    #[test]
    fn test_short_number_is_kept() {
        assert_eq!(normalize_phone("12345").unwrap(), "012345");
    }

    #[test]
    fn test_empty_number_rejected() {
        assert!(matches!(
            normalize_phone("n/a"),
            Err(PaymentError::ValidationError(_))
        ));
    }
}
