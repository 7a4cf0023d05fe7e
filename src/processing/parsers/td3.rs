use log::debug;

use super::{compact, fit, split_name, MrzParser};
use crate::models::{CheckDigitReport, DocumentFamily, ParsedMrzRecord};
use crate::processing::field_correction::FieldCorrection;
use crate::validation::check_digit;
use crate::validation::ExpiryValidator;

const LINE_LENGTH: usize = 44;

/// Passport data line (second TD3 line). Document number, birth date and
/// expiry check digits must all verify; anything else is rejected.
pub struct Td3Parser;

impl Td3Parser {
    fn date_field(raw: &str) -> Option<String> {
        let repaired = FieldCorrection::repair_numeric(raw)?;
        if ExpiryValidator::is_plausible_date(&repaired) {
            Some(repaired)
        } else {
            None
        }
    }

    fn check_char(c: char) -> char {
        FieldCorrection::repair_char(c)
    }

    fn is_name_line(line: &str) -> bool {
        let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
        line.starts_with('P') && digits < 4
    }
}

impl MrzParser for Td3Parser {
    fn can_parse(&self, line: &str) -> bool {
        (43..=45).contains(&compact(line).len())
    }

    fn parse(&self, line: &str) -> Option<ParsedMrzRecord> {
        let line = fit(&compact(line), LINE_LENGTH);
        let chars: Vec<char> = line.chars().collect();

        let document_number_raw = &line[0..9];
        let document_check = Self::check_char(chars[9]);
        let nationality = line[10..13].trim_matches('<').to_string();
        let date_of_birth = Self::date_field(&line[13..19])?;
        let birth_check = Self::check_char(chars[19]);
        let sex = chars[20];
        let date_of_expiry = Self::date_field(&line[21..27])?;
        let expiry_check = Self::check_char(chars[27]);
        let personal_number = line[28..42].trim_matches('<').to_string();
        let personal_check = Self::check_char(chars[42]);
        let composite_check = Self::check_char(chars[43]);

        let document_ok = check_digit::verify(document_number_raw, document_check);
        let birth_ok = check_digit::verify(&date_of_birth, birth_check);
        let expiry_ok = check_digit::verify(&date_of_expiry, expiry_check);
        if !(document_ok && birth_ok && expiry_ok) {
            debug!(
                "TD3 check digits failed (document: {}, birth: {}, expiry: {})",
                document_ok, birth_ok, expiry_ok
            );
            return None;
        }

        let personal_ok = personal_number.is_empty() || check_digit::verify(&line[28..42], personal_check);
        let composite_data = format!(
            "{}{}{}{}{}{}{}",
            document_number_raw,
            document_check,
            date_of_birth,
            birth_check,
            date_of_expiry,
            expiry_check,
            &line[28..43]
        );
        let composite_ok = check_digit::verify(&composite_data, composite_check);
        if !personal_ok || !composite_ok {
            debug!("TD3 optional checks failed (personal: {}, composite: {})", personal_ok, composite_ok);
        }

        let mut record = ParsedMrzRecord::new(
            DocumentFamily::TD3,
            "P",
            &document_number_raw.replace('<', ""),
            &date_of_birth,
            &date_of_expiry,
        );
        if !nationality.is_empty() {
            record.nationality = Some(nationality);
        }
        record.sex = Some(match sex {
            'M' | 'F' => sex.to_string(),
            _ => "X".to_string(),
        });
        if !personal_number.is_empty() {
            record.personal_number = Some(personal_number);
        }
        record.check_digits = CheckDigitReport {
            document_number: document_ok,
            date_of_birth: birth_ok,
            date_of_expiry: expiry_ok,
            composite: Some(composite_ok),
        };
        Some(record)
    }

    fn document_family(&self) -> DocumentFamily {
        DocumentFamily::TD3
    }

    fn enrich(&self, record: &mut ParsedMrzRecord, lines: &[&str]) {
        let name_line = lines
            .iter()
            .map(|l| compact(l))
            .find(|l| l.len() >= 30 && Self::is_name_line(l));
        let Some(name_line) = name_line else {
            return;
        };
        let name_line = fit(&name_line, LINE_LENGTH);

        let code = name_line[0..2].trim_matches('<');
        if !code.is_empty() {
            record.document_code = code.to_string();
        }
        let issuing = name_line[2..5].trim_matches('<');
        if !issuing.is_empty() {
            record.issuing_state = Some(issuing.to_string());
        }
        let (primary, secondary) = split_name(&name_line[5..]);
        record.primary_identifier = primary;
        record.secondary_identifier = secondary;
    }
}
