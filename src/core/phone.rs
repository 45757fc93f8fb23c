use crate::utils::error::PhoneNumberError;
use phonenumber::{country, Mode};

/// 只有德國號碼可以收 CardLink 簡訊
pub const ELIGIBLE_REGION: &str = "DE";

const MIN_DIGITS: usize = 4;
const MAX_DIGITS: usize = 17;

fn invalid(reason: impl Into<String>) -> PhoneNumberError {
    PhoneNumberError::InvalidPhoneNumber {
        reason: reason.into(),
    }
}

fn region_id(region: &str) -> Result<country::Id, PhoneNumberError> {
    region
        .parse::<country::Id>()
        .map_err(|_| invalid(format!("unknown region '{}'", region)))
}

/// Parses `raw` with `region` as the fallback for a missing country code.
///
/// Letters are rejected up front instead of being mapped to keypad digits.
fn parse(raw: &str, region: &str) -> Result<phonenumber::PhoneNumber, PhoneNumberError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty input"));
    }

    let allowed = |c: char| c.is_ascii_digit() || c.is_whitespace() || "+-()/.".contains(c);
    if !trimmed.chars().all(allowed) {
        return Err(invalid("contains non-numeric characters"));
    }
    if trimmed.chars().skip(1).any(|c| c == '+') {
        return Err(invalid("'+' is only allowed as the first character"));
    }

    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < MIN_DIGITS {
        return Err(invalid(format!("too short ({} digits)", digits)));
    }
    if digits > MAX_DIGITS {
        return Err(invalid(format!("too long ({} digits)", digits)));
    }

    phonenumber::parse(Some(region_id(region)?), trimmed).map_err(|e| invalid(e.to_string()))
}

/// True iff `raw` is a valid number assigned to Germany.
///
/// Unparseable input is an error, not `false`.
pub fn is_eligible_region(raw: &str, default_region: &str) -> Result<bool, PhoneNumberError> {
    let number = parse(raw, default_region)?;
    let eligible = region_id(ELIGIBLE_REGION)?;
    Ok(phonenumber::is_valid(&number) && number.country().id() == Some(eligible))
}

/// International format with standard grouping, e.g. `+49 1512 3456789`.
pub fn to_international(raw: &str, region: &str) -> Result<String, PhoneNumberError> {
    let number = parse(raw, region)?;
    Ok(number.format().mode(Mode::International).to_string())
}

/// Ungrouped E.164, e.g. `+4915123456789`. This is what the SMS gateway expects.
pub fn to_e164(raw: &str, region: &str) -> Result<String, PhoneNumberError> {
    let number = parse(raw, region)?;
    Ok(number.format().mode(Mode::E164).to_string())
}

/// Hides all but the last three digits, for logs.
pub fn mask(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let visible = digits.len().saturating_sub(3);
    let tail: String = digits[visible..].iter().collect();
    format!("+{}{}", "*".repeat(visible), tail)
}

/// A phone number that passed validation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPhoneNumber {
    raw: String,
    region: String,
    e164: String,
    international: String,
    eligible: bool,
}

impl ValidatedPhoneNumber {
    pub fn parse(raw: &str, region: &str) -> Result<Self, PhoneNumberError> {
        let number = parse(raw, region)?;
        let eligible = phonenumber::is_valid(&number)
            && number.country().id() == Some(region_id(ELIGIBLE_REGION)?);

        Ok(Self {
            raw: raw.to_string(),
            region: region.to_string(),
            e164: number.format().mode(Mode::E164).to_string(),
            international: number.format().mode(Mode::International).to_string(),
            eligible,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn e164(&self) -> &str {
        &self.e164
    }

    pub fn international(&self) -> &str {
        &self.international
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn masked(&self) -> String {
        mask(&self.e164)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_german_mobile_is_eligible() {
        assert!(is_eligible_region("0151 23456789", "DE").unwrap());
        assert!(is_eligible_region("+49 151 23456789", "DE").unwrap());
        assert!(is_eligible_region("015123456789", "DE").unwrap());
    }

    #[test]
    fn test_international_format_has_single_plus_and_groups() {
        let formatted = to_international("0151 23456789", "DE").unwrap();
        assert!(formatted.starts_with("+49 "));
        assert_eq!(formatted.matches('+').count(), 1);
        assert!(!formatted.contains("  "));
        assert_eq!(formatted.replace(' ', ""), "+4915123456789");
    }

    #[test]
    fn test_e164_is_ungrouped() {
        assert_eq!(to_e164("0151 23456789", "DE").unwrap(), "+4915123456789");
        assert_eq!(to_e164("+4915123456789", "AT").unwrap(), "+4915123456789");
    }

    #[test]
    fn test_foreign_number_is_valid_but_not_eligible() {
        assert!(!is_eligible_region("+33 6 12 34 56 78", "DE").unwrap());
        assert!(to_international("+33 6 12 34 56 78", "DE").is_ok());
    }

    #[test]
    fn test_garbage_input_is_an_error_not_false() {
        for raw in ["abc", "", "   ", "12", "0151 ABCDEFGH", "++4915123456789", "1234567890123456789"] {
            assert!(
                matches!(
                    is_eligible_region(raw, "DE"),
                    Err(PhoneNumberError::InvalidPhoneNumber { .. })
                ),
                "expected error for {:?}",
                raw
            );
            assert!(to_international(raw, "DE").is_err(), "expected error for {:?}", raw);
        }
    }

    #[test]
    fn test_unknown_region_hint_is_rejected() {
        assert!(to_international("0151 23456789", "XX").is_err());
    }

    #[test]
    fn test_validated_number_and_mask() {
        let number = ValidatedPhoneNumber::parse("0151 23456789", "DE").unwrap();
        assert!(number.is_eligible());
        assert_eq!(number.e164(), "+4915123456789");
        assert_eq!(number.raw(), "0151 23456789");
        assert_eq!(number.masked(), "+**********789");
    }
}
