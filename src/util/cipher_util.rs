use actix_web::cookie::Key;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256, Sha512};

use crate::models::User;
use crate::INVITE_CODE_LENGTH;

pub fn get_salt<const N: usize>() -> [u8; N] {
    let mut salt = [0u8; N];
    OsRng.fill_bytes(&mut salt);
    salt
}

fn hash_password(password: &str, pepper: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pepper);
    hasher.update(password);
    hasher.update(salt);
    hasher.finalize().into()
}

/// Returns `(salt, hash)`, both hex encoded.
pub fn gen_salted_password(password: &str, pepper: &str) -> (String, String) {
    let salt = get_salt::<32>();
    let hash = hash_password(password, pepper, &salt);
    (hex::encode(salt), hex::encode(hash))
}

pub fn check_salted_password<'a>(
    user: &'a User,
    password_input: &str,
    pepper: &str,
) -> Option<&'a User> {
    let mut salt = [0u8; 32];
    hex::decode_to_slice(&user.salt, &mut salt).ok()?;

    let mut expected_hash = [0u8; 32];
    hex::decode_to_slice(&user.password, &mut expected_hash).ok()?;

    (hash_password(password_input, pepper, &salt) == expected_hash).then_some(user)
}

pub fn gen_invite_code() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LENGTH)
        .map(char::from)
        .collect()
}

pub fn gen_cookie_key(cookie_token: &str) -> Key {
    let mut hasher = Sha512::new();
    hasher.update(cookie_token);
    Key::from(hasher.finalize().as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user_with(password: &str, pepper: &str) -> User {
        let (salt, hash) = gen_salted_password(password, pepper);
        User {
            id: 1,
            login: "ann".into(),
            password: hash,
            salt,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_salted_password_checks() {
        let user = user_with("hunter2", "pepper");
        assert!(check_salted_password(&user, "hunter2", "pepper").is_some());
        assert!(check_salted_password(&user, "hunter3", "pepper").is_none());
        assert!(check_salted_password(&user, "hunter2", "other").is_none());
    }

    #[test]
    fn test_same_password_gets_fresh_salt() {
        let a = user_with("hunter2", "pepper");
        let b = user_with("hunter2", "pepper");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password, b.password);
    }

    #[test]
    fn test_corrupted_hash_never_matches() {
        let mut user = user_with("hunter2", "pepper");
        user.password = "not hex".into();
        assert!(check_salted_password(&user, "hunter2", "pepper").is_none());
    }

    #[test]
    fn test_invite_code_shape() {
        let code = gen_invite_code();
        assert_eq!(code.len(), INVITE_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
