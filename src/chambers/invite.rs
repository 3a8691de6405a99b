use rand::Rng;

/// No 0/O or 1/I, so codes survive being read aloud.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 8;
/// Generation gives up after this many collisions with existing codes.
pub const MAX_ATTEMPTS: usize = 10;

pub fn generate_code() -> String {
    generate_code_with(&mut rand::rng())
}

pub fn generate_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Uppercases user input; `None` if it cannot be an invite code.
pub fn normalize(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    (code.len() == CODE_LEN && code.bytes().all(|b| ALPHABET.contains(&b))).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_alphabet() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalize_accepts_lowercase() {
        assert_eq!(normalize(" abcd2345 ").as_deref(), Some("ABCD2345"));
        assert_eq!(normalize("ABCD0000"), None);
        assert_eq!(normalize("ABC"), None);
    }
}
