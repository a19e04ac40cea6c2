use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of a generated per-file key, in characters (and key bytes).
pub const FILE_KEY_LEN: usize = 32;

/// Returns a random ASCII alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a fresh per-file key.
///
/// Every file version gets its own key; keys are never reused.
pub fn generate_file_key() -> String {
    random_string(FILE_KEY_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_has_requested_length() {
        assert_eq!(random_string(12).len(), 12);
        assert!(random_string(0).is_empty());
    }

    #[test]
    fn random_string_is_alphanumeric() {
        assert!(random_string(256).chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn file_keys_are_unique() {
        let a = generate_file_key();
        let b = generate_file_key();
        assert_eq!(a.len(), FILE_KEY_LEN);
        assert_ne!(a, b);
    }
}
