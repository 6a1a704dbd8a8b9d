//! Template filter implementations: `urlencode`, `pctEncode`, `totp`, `replace`.

use totp_lite::{Sha1, totp_custom};

/// Standard percent-encoding for use in a URL component.
pub fn urlencode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Percent-encoding that additionally escapes `( ) ! ' * ~`, which
/// `urlencode`/RFC 3986 "unreserved" sets leave untouched but some APIs
/// (notably OAuth1 signature bases) require encoded.
pub fn pct_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let c = byte as char;
        let is_unreserved = c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        let extra_escaped = matches!(c, '(' | ')' | '!' | '\'' | '*' | '~');
        if is_unreserved && !extra_escaped {
            out.push(c);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// RFC 6238 TOTP code, 6 digits, 30 second step, from a base32-encoded seed.
pub fn totp(base32_seed: &str) -> Result<String, String> {
    let seed = base32_decode(base32_seed).ok_or_else(|| "invalid base32 TOTP seed".to_string())?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| e.to_string())?
        .as_secs();
    Ok(totp_custom::<Sha1>(30, 6, &seed, now))
}

/// Literal string replace filter: `replace(' ', '%20')`.
pub fn replace(input: &str, from: &str, to: &str) -> String {
    input.replace(from, to)
}

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let mut bits: u64 = 0;
    let mut bit_count: u32 = 0;
    let mut out = Vec::new();
    for c in cleaned.chars() {
        if c == '=' {
            continue;
        }
        let val = BASE32_ALPHABET.iter().position(|&b| b as char == c)? as u64;
        bits = (bits << 5) | val;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push(((bits >> bit_count) & 0xFF) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_encodes_reserved_chars() {
        assert_eq!(urlencode("a b&c"), "a%20b%26c");
    }

    #[test]
    fn pct_encode_escapes_extra_chars() {
        let out = pct_encode("a(b)!c'd*e~f");
        assert!(out.contains("%28"));
        assert!(out.contains("%29"));
        assert!(out.contains("%21"));
        assert!(out.contains("%27"));
        assert!(out.contains("%2A"));
        assert!(out.contains("%7E"));
    }

    #[test]
    fn replace_filter_is_literal() {
        assert_eq!(replace("a b c", " ", "%20"), "a%20b%20c");
    }

    #[test]
    fn totp_produces_six_digits() {
        // RFC 6238 test seed, base32 of "12345678901234567890"
        let seed = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
        let code = totp(seed).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
