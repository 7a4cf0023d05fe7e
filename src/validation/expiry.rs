use chrono::{Datelike, NaiveDate};

use crate::utils::PassportError;

/// YYMMDD helpers for MRZ dates.
pub struct ExpiryValidator;

impl ExpiryValidator {
    /// Six digits with a real month and a day that exists in that month.
    /// February 29th is accepted since the century is not known here.
    pub fn is_plausible_date(yymmdd: &str) -> bool {
        if yymmdd.len() != 6 || !yymmdd.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        let month: u32 = yymmdd[2..4].parse().unwrap_or(0);
        let day: u32 = yymmdd[4..6].parse().unwrap_or(0);
        let max_day = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => 29,
            _ => return false,
        };
        day >= 1 && day <= max_day
    }

    /// Birth dates are never in the future, so a two-digit year above the
    /// current one belongs to the previous century.
    pub fn birth_date(yymmdd: &str, today: NaiveDate) -> Option<NaiveDate> {
        let (yy, month, day) = Self::split(yymmdd)?;
        let current_yy = today.year() % 100;
        let year = if yy > current_yy { 1900 + yy } else { 2000 + yy };
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Expiry dates are always this century.
    pub fn expiry_date(yymmdd: &str) -> Option<NaiveDate> {
        let (yy, month, day) = Self::split(yymmdd)?;
        NaiveDate::from_ymd_opt(2000 + yy, month, day)
    }

    pub fn is_expired_at(yymmdd: &str, today: NaiveDate) -> Result<bool, PassportError> {
        let expiry = Self::expiry_date(yymmdd)
            .ok_or_else(|| PassportError::InvalidDate(format!("Invalid expiry date: {}", yymmdd)))?;
        Ok(expiry < today)
    }

    fn split(yymmdd: &str) -> Option<(i32, u32, u32)> {
        if !Self::is_plausible_date(yymmdd) {
            return None;
        }
        let yy = yymmdd[0..2].parse::<i32>().ok()?;
        let month = yymmdd[2..4].parse::<u32>().ok()?;
        let day = yymmdd[4..6].parse::<u32>().ok()?;
        Some((yy, month, day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_plausible_dates() {
        assert!(ExpiryValidator::is_plausible_date("950101"));
        assert!(ExpiryValidator::is_plausible_date("000229"));
        assert!(!ExpiryValidator::is_plausible_date("951301"));
        assert!(!ExpiryValidator::is_plausible_date("950431"));
        assert!(!ExpiryValidator::is_plausible_date("95O101"));
        assert!(!ExpiryValidator::is_plausible_date("9501011"));
    }

    #[test]
    fn test_birth_century() {
        let today = day(2026, 10, 18);
        assert_eq!(ExpiryValidator::birth_date("950101", today), Some(day(1995, 1, 1)));
        assert_eq!(ExpiryValidator::birth_date("150101", today), Some(day(2015, 1, 1)));
    }

    #[test]
    fn test_expiry() {
        let today = day(2026, 10, 18);
        assert!(ExpiryValidator::is_expired_at("200101", today).unwrap());
        assert!(!ExpiryValidator::is_expired_at("301231", today).unwrap());
        assert!(ExpiryValidator::is_expired_at("30AB31", today).is_err());
    }
}
