use chrono::Local;
use log::debug;

use super::{compact, fit, split_name, MrzParser};
use crate::models::{CheckDigitReport, DocumentFamily, ParsedMrzRecord};
use crate::processing::chinese_name::ChineseNameDecoder;
use crate::processing::field_correction::FieldCorrection;
use crate::validation::check_digit;
use crate::validation::{ExpiryValidator, FormatClassifier};

const LINE_LENGTH: usize = 30;
const THREE_LINE_LENGTH: usize = 90;

/// Exit-Entry Permit MRZ. Handles the single 30-character card line and the
/// 90-character three-line booklet layout (data line, romanized name, GBK
/// encoded Chinese name). Check digits are reported, never enforced.
pub struct EepParser;

struct DateField {
    value: String,
    check: Option<char>,
}

impl EepParser {
    fn prepare(line: &str) -> String {
        let line = compact(line);
        FieldCorrection::correct_eep_prefix(&line).replace('$', "S")
    }

    fn repaired_date(raw: &str) -> Option<String> {
        FieldCorrection::repair_numeric(raw).filter(|d| ExpiryValidator::is_plausible_date(d))
    }

    /// Fixed offsets of the card layout:
    /// `CS` number(9) check `<` expiry check `<` birth check `<` composite.
    fn parse_canonical(line: &str) -> Option<ParsedMrzRecord> {
        let line = fit(line, LINE_LENGTH);
        let chars: Vec<char> = line.chars().collect();

        let number_field = &line[2..11];
        let date_of_expiry = Self::repaired_date(&line[13..19])?;
        let date_of_birth = Self::repaired_date(&line[21..27])?;

        let number_check = FieldCorrection::repair_char(chars[11]);
        let expiry_check = FieldCorrection::repair_char(chars[19]);
        let birth_check = FieldCorrection::repair_char(chars[27]);
        let composite_check = FieldCorrection::repair_char(chars[29]);

        let composite_data = format!(
            "{}{}{}{}{}{}",
            number_field, number_check, date_of_expiry, expiry_check, date_of_birth, birth_check
        );
        let report = CheckDigitReport {
            document_number: check_digit::verify(number_field, number_check),
            date_of_birth: check_digit::verify(&date_of_birth, birth_check),
            date_of_expiry: check_digit::verify(&date_of_expiry, expiry_check),
            composite: Some(check_digit::verify(&composite_data, composite_check)),
        };
        Some(Self::build(&number_field.replace('<', ""), &date_of_birth, &date_of_expiry, report))
    }

    /// Recover the fields from filler-separated groups when OCR shifted the
    /// line off the fixed offsets. The first group is the document number;
    /// six digit groups (optionally followed by their check digit) are dates.
    fn parse_tokens(line: &str) -> Option<ParsedMrzRecord> {
        let tokens: Vec<&str> = line.get(2..)?.split('<').filter(|t| !t.is_empty()).collect();
        let (&first, rest) = tokens.split_first()?;

        let (document_number, mut number_check, mut index) = if first.len() == 10 {
            (&first[..9], first.chars().last(), 0)
        } else {
            (first, None, 0)
        };
        if number_check.is_none() && rest.first().map(|t| t.len() == 1).unwrap_or(false) {
            number_check = rest[0].chars().next();
            index = 1;
        }

        let mut dates: Vec<DateField> = Vec::new();
        let mut composite = None;
        while index < rest.len() {
            let token = rest[index];
            index += 1;
            let (date_part, inline_check) = match token.len() {
                6 => (token, None),
                7 => (&token[..6], token.chars().last()),
                1 if dates.len() >= 2 => {
                    composite = token.chars().next();
                    continue;
                }
                _ => continue,
            };
            let Some(value) = Self::repaired_date(date_part) else {
                continue;
            };
            let check = inline_check.or_else(|| match rest.get(index) {
                Some(next) if next.len() == 1 => {
                    index += 1;
                    next.chars().next()
                }
                _ => None,
            });
            dates.push(DateField { value, check });
        }
        if dates.len() < 2 {
            debug!("EEP token scan found {} dates in {}", dates.len(), line);
            return None;
        }

        let mut birth = dates.remove(0);
        let mut expiry = dates.remove(0);
        let today = Local::now().naive_local().date();
        let impossible = match (
            ExpiryValidator::birth_date(&birth.value, today),
            ExpiryValidator::expiry_date(&expiry.value),
        ) {
            (Some(b), Some(e)) => b >= e,
            _ => false,
        };
        if impossible {
            std::mem::swap(&mut birth, &mut expiry);
        }

        let verify = |data: &str, check: Option<char>| {
            check.map(|c| check_digit::verify(data, FieldCorrection::repair_char(c))).unwrap_or(false)
        };
        let report = CheckDigitReport {
            document_number: verify(document_number, number_check),
            date_of_birth: verify(&birth.value, birth.check),
            date_of_expiry: verify(&expiry.value, expiry.check),
            composite: composite.map(|c| {
                let data = format!(
                    "{}{}{}{}{}{}",
                    document_number,
                    number_check.unwrap_or('<'),
                    expiry.value,
                    expiry.check.unwrap_or('<'),
                    birth.value,
                    birth.check.unwrap_or('<')
                );
                check_digit::verify(&data, FieldCorrection::repair_char(c))
            }),
        };
        Some(Self::build(document_number, &birth.value, &expiry.value, report))
    }

    fn build(document_number: &str, date_of_birth: &str, date_of_expiry: &str, report: CheckDigitReport) -> ParsedMrzRecord {
        if !report.all_valid() {
            debug!("EEP check digits advisory failure: {:?}", report);
        }
        let mut record =
            ParsedMrzRecord::new(DocumentFamily::EEP, "CS", document_number, date_of_birth, date_of_expiry);
        record.nationality = Some("CHN".to_string());
        record.check_digits = report;
        record
    }

    fn apply_names(record: &mut ParsedMrzRecord, name_line: &str, encoded_line: &str) {
        if name_line.contains("<<") {
            let (primary, secondary) = split_name(name_line);
            if primary.is_some() {
                record.primary_identifier = primary;
                record.secondary_identifier = secondary;
            }
        }
        if ChineseNameDecoder::looks_encoded(encoded_line.trim_end_matches('<')) {
            let decoded = ChineseNameDecoder::decode(encoded_line);
            if ChineseNameDecoder::contains_chinese(&decoded) {
                record.chinese_name = Some(decoded);
            }
        }
    }
}

impl MrzParser for EepParser {
    fn can_parse(&self, line: &str) -> bool {
        let line = compact(line);
        let length = line.len();
        FormatClassifier::has_eep_prefix(&line)
            && ((28..=44).contains(&length) || (88..=92).contains(&length))
    }

    fn parse(&self, line: &str) -> Option<ParsedMrzRecord> {
        let line = Self::prepare(line);
        if line.len() >= 88 {
            let full = fit(&line, THREE_LINE_LENGTH);
            let mut record = self.parse(&full[..LINE_LENGTH])?;
            Self::apply_names(&mut record, &full[30..60], &full[60..90]);
            return Some(record);
        }
        Self::parse_canonical(&line).or_else(|| Self::parse_tokens(&line))
    }

    fn document_family(&self) -> DocumentFamily {
        DocumentFamily::EEP
    }

    fn enrich(&self, record: &mut ParsedMrzRecord, lines: &[&str]) {
        let siblings: Vec<String> = lines
            .iter()
            .map(|l| compact(l))
            .filter(|l| !l.is_empty() && !FormatClassifier::has_eep_prefix(l))
            .collect();
        let name_line = siblings.iter().find(|l| l.contains("<<")).cloned().unwrap_or_default();
        let encoded_line = siblings
            .iter()
            .find(|l| ChineseNameDecoder::looks_encoded(l.trim_end_matches('<')))
            .cloned()
            .unwrap_or_default();
        Self::apply_names(record, &name_line, &encoded_line);
    }
}
