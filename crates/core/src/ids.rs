//! Identity number checks and masking.

/// Whether `id` is a valid ROC national id (one letter, nine digits, checksum).
pub fn is_roc_id(id: &str) -> bool {
    let bytes = id.trim().as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let Some(area) = area_code(bytes[0].to_ascii_uppercase()) else {
        return false;
    };
    if !bytes[1..].iter().all(u8::is_ascii_digit) {
        return false;
    }
    if !matches!(bytes[1], b'1' | b'2' | b'8' | b'9') {
        return false;
    }

    let digits: Vec<u32> = bytes[1..].iter().map(|b| u32::from(b - b'0')).collect();
    let mut sum = area / 10 + (area % 10) * 9;
    for (i, digit) in digits[..8].iter().enumerate() {
        sum += digit * (8 - i as u32);
    }
    sum += digits[8];
    sum % 10 == 0
}

fn area_code(letter: u8) -> Option<u32> {
    let code = match letter {
        b'A' => 10,
        b'B' => 11,
        b'C' => 12,
        b'D' => 13,
        b'E' => 14,
        b'F' => 15,
        b'G' => 16,
        b'H' => 17,
        b'I' => 34,
        b'J' => 18,
        b'K' => 19,
        b'L' => 20,
        b'M' => 21,
        b'N' => 22,
        b'O' => 35,
        b'P' => 23,
        b'Q' => 24,
        b'R' => 25,
        b'S' => 26,
        b'T' => 27,
        b'U' => 28,
        b'V' => 29,
        b'W' => 32,
        b'X' => 30,
        b'Y' => 31,
        b'Z' => 33,
        _ => return None,
    };
    Some(code)
}

/// Whether `id` is a valid business tax id (eight digits, checksum).
pub fn is_tax_id(id: &str) -> bool {
    const WEIGHTS: [u32; 8] = [1, 2, 1, 2, 1, 2, 4, 1];

    let bytes = id.trim().as_bytes();
    if bytes.len() != 8 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let digits: Vec<u32> = bytes.iter().map(|b| u32::from(b - b'0')).collect();
    let sum: u32 = digits
        .iter()
        .zip(WEIGHTS)
        .map(|(digit, weight)| {
            let product = digit * weight;
            product / 10 + product % 10
        })
        .sum();

    sum % 5 == 0 || (digits[6] == 7 && (sum + 1) % 5 == 0)
}

/// Mask an id for logs: `A123****89`.
pub fn mask_id(id: &str) -> String {
    let chars: Vec<char> = id.trim().chars().collect();
    if chars.len() <= 6 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}****{}", head, tail)
}
