use super::AppError;

pub fn hash_password(plain: &str, cost: u32) -> Result<String, AppError> {
    bcrypt::hash(plain, cost).map_err(AppError::internal)
}

/// A malformed stored hash counts as a mismatch so login stays uniform.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    match bcrypt::verify(plain, hash) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::error!(error = %e, "bcrypt verify failed");
            false
        }
    }
}

/// Hash checked when a login names no account, so unknown usernames cost the
/// same bcrypt work as known ones.
pub fn dummy_hash(cost: u32) -> String {
    hash_password("pickup-no-such-account", cost).unwrap_or_else(|e| {
        tracing::error!(error = %e, "dummy hash unavailable");
        String::new()
    })
}

/// Hashing is CPU bound; keep it off the async workers.
pub async fn hash_password_blocking(plain: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&plain, cost))
        .await
        .map_err(AppError::internal)?
}

pub async fn verify_password_blocking(plain: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .map_err(AppError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let h = hash_password("correct", 4).unwrap();
        assert!(h.starts_with("$2"));
        assert!(verify_password("correct", &h));
        assert!(!verify_password("wrong", &h));
    }

    #[test]
    fn dummy_hash_uses_configured_cost() {
        let h = dummy_hash(4);
        assert!(h.starts_with("$2b$04$"));
        assert!(!verify_password("", &h));
    }

    #[test]
    fn garbage_hash_is_a_mismatch() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
