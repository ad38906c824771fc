//! Synthetic message content of an exact, independently checkable length.

/// 63 символа: a–z, A–Z, 0–9, пробел.
pub const ALPHABET: &[u8; 63] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ";

/// Content ровно из `byte_size` символов, по циклу ALPHABET.
pub fn generate(byte_size: usize) -> String {
    ALPHABET
        .iter()
        .cycle()
        .take(byte_size)
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_matches_requested_size() {
        for size in [0usize, 1, 63, 64, 5000] {
            let content = generate(size);
            assert_eq!(content.len(), size);
            assert_eq!(content.chars().count(), size);
        }
    }

    #[test]
    fn cycles_the_alphabet() {
        let content = generate(65);
        assert!(content.starts_with("abc"));
        assert_eq!(&content[62..63], " ");
        assert_eq!(&content[63..], "ab");
        assert_eq!(generate(64), generate(64));
    }
}
