// src/utils/ids.rs

use std::future::Future;

use rand::{Rng, distributions::Alphanumeric};

use crate::error::AppError;

pub const OPAQUE_ID_LEN: usize = 16;
pub const JOIN_CODE_LEN: usize = 6;

/// Upper-case letters and digits without `0`, `O` and `I`.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ123456789";

/// A 16 character id drawn uniformly from `[A-Za-z0-9]`.
pub fn new_opaque_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(OPAQUE_ID_LEN)
        .map(char::from)
        .collect()
}

/// A 6 character code that survives being read aloud or typed from a projector.
pub fn new_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draws candidates from `generate` until `is_taken` reports a free one.
///
/// Gives up with `IdGenerationExhausted` after `attempts` collisions.
pub async fn generate_unique<G, F, Fut>(
    attempts: u32,
    generate: G,
    mut is_taken: F,
) -> Result<String, AppError>
where
    G: Fn() -> String,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, AppError>>,
{
    for attempt in 1..=attempts {
        let candidate = generate();
        if !is_taken(candidate.clone()).await? {
            return Ok(candidate);
        }
        tracing::warn!("Generated identifier collided (attempt {}/{})", attempt, attempts);
    }
    Err(AppError::IdGenerationExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_code_alphabet() {
        assert_eq!(JOIN_CODE_ALPHABET.len(), 33);
        for ambiguous in [b'0', b'O', b'I'] {
            assert!(!JOIN_CODE_ALPHABET.contains(&ambiguous));
        }
    }

    #[test]
    fn test_shapes() {
        for _ in 0..100 {
            let id = new_opaque_id();
            assert_eq!(id.len(), OPAQUE_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

            let code = new_join_code();
            assert_eq!(code.len(), JOIN_CODE_LEN);
            assert!(code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_generate_unique_retries_then_succeeds() {
        let mut calls = 0;
        let id = generate_unique(10, new_opaque_id, |_| {
            calls += 1;
            let taken = calls < 3;
            async move { Ok(taken) }
        })
        .await
        .unwrap();
        assert_eq!(id.len(), OPAQUE_ID_LEN);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_generate_unique_exhausts() {
        let result = generate_unique(10, new_join_code, |_| async { Ok(true) }).await;
        assert!(matches!(result, Err(AppError::IdGenerationExhausted)));
    }
}
