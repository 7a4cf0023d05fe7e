//! ICAO 9303 check digits (Part 3, section 4.9).

const WEIGHTS: [u32; 3] = [7, 3, 1];

/// Numeric value of an MRZ character: digits are themselves, A-Z map to
/// 10-35 and the filler (and anything unexpected) counts as zero.
pub fn char_value(c: char) -> u32 {
    match c {
        '0'..='9' => c as u32 - '0' as u32,
        'A'..='Z' => c as u32 - 'A' as u32 + 10,
        'a'..='z' => c as u32 - 'a' as u32 + 10,
        _ => 0,
    }
}

pub fn checksum(data: &str) -> u32 {
    data.chars()
        .enumerate()
        .map(|(i, c)| char_value(c) * WEIGHTS[i % 3])
        .sum::<u32>()
        % 10
}

pub fn checksum_char(data: &str) -> char {
    char::from_digit(checksum(data), 10).unwrap_or('0')
}

/// Verify a provided check digit. A filler stands for zero; any other
/// non-digit never verifies.
pub fn verify(data: &str, provided: char) -> bool {
    let expected = checksum(data);
    match provided {
        '<' => expected == 0,
        '0'..='9' => provided as u32 - '0' as u32 == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_specimen_digits() {
        // Doc 9303 Part 11, Appendix D.1
        assert_eq!(checksum("L898902C<"), 3);
        assert_eq!(checksum("690806"), 1);
        assert_eq!(checksum("940623"), 6);
        assert_eq!(checksum("520727"), 3);
    }

    #[test]
    fn test_verify_filler_and_garbage() {
        assert!(verify("<<<<<<", '<'));
        assert!(verify("<<<<<<", '0'));
        assert!(!verify("690806", 'X'));
        assert!(!verify("690806", '2'));
    }

    #[test]
    fn test_checksum_self_consistent_over_nine_char_strings() {
        let alphabet: Vec<char> = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".chars().collect();
        // Walk a deterministic spread of 9-character strings.
        let mut state: u64 = 0x2545F4914F6CDD1D;
        for _ in 0..2000 {
            let s: String = (0..9)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    alphabet[(state % alphabet.len() as u64) as usize]
                })
                .collect();
            assert!(verify(&s, checksum_char(&s)), "{}", s);
        }
    }
}
