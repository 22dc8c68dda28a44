use rand::Rng;
use uuid::Uuid;

/// Opaque 128-bit identifier, rendered textually. Used for file IDs,
/// upload IDs and job IDs alike.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

const PASSWORD_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PASSWORD_LENGTH: usize = 12;

/// Random 12-character alphanumeric secret (delete tokens).
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 36);
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
