//! Country codes in the encodings the gateway's field families expect.
//!
//! Billing fields take the ISO 3166-1 numeric code, shipping fields the
//! alpha-2 code, and the mobile phone field the international calling code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    pub alpha2: &'static str,
    pub numeric: &'static str,
    pub calling_code: &'static str,
}

const COUNTRIES: &[Country] = &[
    Country { alpha2: "ES", numeric: "724", calling_code: "34" },
    Country { alpha2: "PT", numeric: "620", calling_code: "351" },
    Country { alpha2: "FR", numeric: "250", calling_code: "33" },
    Country { alpha2: "DE", numeric: "276", calling_code: "49" },
    Country { alpha2: "IT", numeric: "380", calling_code: "39" },
    Country { alpha2: "GB", numeric: "826", calling_code: "44" },
    Country { alpha2: "IE", numeric: "372", calling_code: "353" },
    Country { alpha2: "NL", numeric: "528", calling_code: "31" },
    Country { alpha2: "BE", numeric: "056", calling_code: "32" },
    Country { alpha2: "US", numeric: "840", calling_code: "1" },
];

/// Look up a country by alpha-2 code, ignoring case and surrounding space.
pub fn lookup(code: &str) -> Option<&'static Country> {
    let code = code.trim();
    COUNTRIES.iter().find(|c| c.alpha2.eq_ignore_ascii_case(code))
}

/// Format a phone number as `<calling code>|<digits>`.
///
/// A leading `+<calling code>` or `00<calling code>` already present in the
/// number is not repeated. Returns `None` when the number has no digits.
pub fn mobile_number(country: &Country, phone: &str) -> Option<String> {
    let international = phone.trim_start().starts_with('+');
    let mut digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if international {
        if let Some(rest) = digits.strip_prefix(country.calling_code) {
            digits = rest.to_string();
        }
    } else if let Some(rest) = digits
        .strip_prefix("00")
        .and_then(|d| d.strip_prefix(country.calling_code))
    {
        digits = rest.to_string();
    }

    if digits.is_empty() {
        None
    } else {
        Some(format!("{}|{}", country.calling_code, digits))
    }
}
