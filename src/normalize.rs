use correlation_types::{
    CorrelationType, DOMAIN_TYPE_ID, EMAIL_TYPE_ID, FILES_TYPE_ID, ICCID_TYPE_ID, IMEI_TYPE_ID,
    IMSI_TYPE_ID, MAC_TYPE_ID, PHONE_TYPE_ID, SSID_TYPE_ID, USBID_TYPE_ID,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot normalize {type_name} value '{value}': {reason}")]
pub struct NormalizationError {
    pub type_name: String,
    pub value: String,
    pub reason: &'static str,
}

/// Canonical form of a correlation value, as stored in the central
/// repository.
pub fn normalize(correlation_type: &CorrelationType, value: &str) -> Result<String, NormalizationError> {
    let fail = |reason| NormalizationError {
        type_name: correlation_type.display_name.clone(),
        value: value.to_string(),
        reason,
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(fail("empty value"));
    }

    match correlation_type.id {
        FILES_TYPE_ID => {
            let md5 = trimmed.to_ascii_lowercase();
            if md5.len() == 32 && md5.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(md5)
            } else {
                Err(fail("not an md5 hex digest"))
            }
        }
        DOMAIN_TYPE_ID => {
            let lower = trimmed.to_lowercase();
            let domain = lower.strip_prefix("www.").unwrap_or(&lower);
            if domain.contains('.') && !domain.chars().any(char::is_whitespace) {
                Ok(domain.to_string())
            } else {
                Err(fail("not a domain name"))
            }
        }
        EMAIL_TYPE_ID => {
            let lower = trimmed.to_lowercase();
            match lower.split_once('@') {
                Some((local, domain))
                    if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
                {
                    Ok(lower)
                }
                _ => Err(fail("not an email address")),
            }
        }
        PHONE_TYPE_ID => {
            let stripped: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
                .collect();
            let (plus, digits) = match stripped.strip_prefix('+') {
                Some(rest) => ("+", rest),
                None => ("", stripped.as_str()),
            };
            if (5..=20).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
                Ok(format!("{plus}{digits}"))
            } else {
                Err(fail("not a phone number"))
            }
        }
        SSID_TYPE_ID => Ok(trimmed.to_string()),
        MAC_TYPE_ID => {
            let hex: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ':' | '-' | '.'))
                .collect::<String>()
                .to_ascii_lowercase();
            if hex.len() == 12 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(hex)
            } else {
                Err(fail("not a MAC address"))
            }
        }
        IMEI_TYPE_ID => digits_in_range(trimmed, 14..=16).ok_or_else(|| fail("not an IMEI")),
        IMSI_TYPE_ID => digits_in_range(trimmed, 14..=15).ok_or_else(|| fail("not an IMSI")),
        ICCID_TYPE_ID => digits_in_range(trimmed, 18..=22).ok_or_else(|| fail("not an ICCID")),
        USBID_TYPE_ID => Ok(trimmed.to_lowercase()),
        _ => Ok(trimmed.to_lowercase()),
    }
}

fn digits_in_range(value: &str, range: std::ops::RangeInclusive<usize>) -> Option<String> {
    let digits: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.'))
        .collect();
    if range.contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(id: i32) -> CorrelationType {
        CorrelationType::defaults()
            .into_iter()
            .find(|t| t.id == id)
            .expect("default type")
    }

    #[test]
    fn md5_is_lowercased() {
        let value = normalize(&ty(FILES_TYPE_ID), " 5D41402ABC4B2A76B9719D911017C592 ").expect("md5");
        assert_eq!(value, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn malformed_md5_rejected() {
        let err = normalize(&ty(FILES_TYPE_ID), "xyz").expect_err("should fail");
        assert_eq!(err.reason, "not an md5 hex digest");
        assert_eq!(err.type_name, "Files");
    }

    #[test]
    fn phone_separators_removed() {
        let value = normalize(&ty(PHONE_TYPE_ID), "+1 (555) 123-4567").expect("phone");
        assert_eq!(value, "+15551234567");
        assert!(normalize(&ty(PHONE_TYPE_ID), "call me").is_err());
    }

    #[test]
    fn email_requires_single_at() {
        assert_eq!(
            normalize(&ty(EMAIL_TYPE_ID), "Alice@Example.COM").expect("email"),
            "alice@example.com"
        );
        assert!(normalize(&ty(EMAIL_TYPE_ID), "a@b@c").is_err());
        assert!(normalize(&ty(EMAIL_TYPE_ID), "@example.com").is_err());
    }

    #[test]
    fn domain_drops_www() {
        assert_eq!(
            normalize(&ty(DOMAIN_TYPE_ID), "WWW.Example.org").expect("domain"),
            "example.org"
        );
        assert!(normalize(&ty(DOMAIN_TYPE_ID), "localhost").is_err());
    }

    #[test]
    fn mac_separators_removed() {
        assert_eq!(
            normalize(&ty(MAC_TYPE_ID), "AA:BB:CC:00:11:22").expect("mac"),
            "aabbcc001122"
        );
        assert!(normalize(&ty(MAC_TYPE_ID), "AA:BB").is_err());
    }

    #[test]
    fn ssid_keeps_case() {
        assert_eq!(normalize(&ty(SSID_TYPE_ID), " HomeNet ").expect("ssid"), "HomeNet");
    }

    #[test]
    fn imei_length_checked() {
        assert_eq!(
            normalize(&ty(IMEI_TYPE_ID), "35-209900-176148-1").expect("imei"),
            "352099001761481"
        );
        assert!(normalize(&ty(IMEI_TYPE_ID), "12345").is_err());
    }

    #[test]
    fn empty_value_rejected_for_every_type() {
        for correlation_type in CorrelationType::defaults() {
            assert!(normalize(&correlation_type, "   ").is_err());
        }
    }
}
