/// Skylinks: content references shared by uploads and downloads
///
/// A skylink row is created the first time any user uploads or downloads the
/// content and is reused afterwards. Its `name` and `size` are what listings
/// report for every upload and download pointing at it.

use crate::error::{AccountsError, AccountsResult};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Length of a skylink in its base64 URL encoding
pub const SKYLINK_LENGTH: usize = 46;

const SKYLINK_SCHEME: &str = "sia://";

/// A content reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Skylink {
    pub id: Uuid,
    pub skylink: String,
    pub name: String,
    pub size: i64,
}

/// Extracts the bare skylink from user input
///
/// Accepts `sia://` links and trailing paths or query strings.
///
/// # Errors
///
/// Returns [`AccountsError::InvalidInput`] unless the remaining value is
/// 46 characters of the base64 URL alphabet.
pub fn parse_skylink(raw: &str) -> AccountsResult<String> {
    let trimmed = raw.trim();
    let without_scheme = trimmed.strip_prefix(SKYLINK_SCHEME).unwrap_or(trimmed);
    let candidate = without_scheme
        .trim_start_matches('/')
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("");

    let valid = candidate.len() == SKYLINK_LENGTH
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(candidate.to_string())
    } else {
        Err(AccountsError::InvalidInput(format!(
            "invalid skylink {:?}",
            raw
        )))
    }
}

impl Skylink {
    /// Returns the row for `skylink`, creating it when absent
    ///
    /// `skylink` must already be validated with [`parse_skylink`].
    pub async fn find_or_create(pool: &PgPool, skylink: &str) -> AccountsResult<Self> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        sqlx::query_as::<_, Skylink>(
            r#"
            INSERT INTO skylinks (skylink)
            VALUES ($1)
            ON CONFLICT (skylink) DO UPDATE SET skylink = EXCLUDED.skylink
            RETURNING id, skylink, name, size
            "#,
        )
        .bind(skylink)
        .fetch_one(pool)
        .await
        .map_err(|e| AccountsError::storage("upsert skylink", e))
    }

    /// Stores the file name and full size of the content
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::InvalidInput`] for a negative size and
    /// [`AccountsError::NotFound`] if the skylink does not exist.
    pub async fn update_metadata(
        pool: &PgPool,
        id: Uuid,
        name: &str,
        size: i64,
    ) -> AccountsResult<()> {
        if size < 0 {
            return Err(AccountsError::InvalidInput(format!(
                "skylink size must not be negative, got {}",
                size
            )));
        }

        let result = sqlx::query("UPDATE skylinks SET name = $2, size = $3 WHERE id = $1")
            .bind(id)
            .bind(name)
            .bind(size)
            .execute(pool)
            .await
            .map_err(|e| AccountsError::storage("update skylink metadata", e))?;

        if result.rows_affected() == 0 {
            return Err(AccountsError::NotFound(format!("skylink {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "AACDPHoC2DCV_kLGUdpdRJr3CcxCmKadLGPi6OAMl7d48w";

    #[test]
    fn test_valid_skylink_length() {
        assert_eq!(VALID.len(), SKYLINK_LENGTH);
    }

    #[test]
    fn test_parse_bare_skylink() {
        assert_eq!(parse_skylink(VALID).unwrap(), VALID);
    }

    #[test]
    fn test_parse_strips_scheme_and_path() {
        assert_eq!(parse_skylink(&format!("sia://{}", VALID)).unwrap(), VALID);
        assert_eq!(
            parse_skylink(&format!("/{}/dir/file.txt?format=zip", VALID)).unwrap(),
            VALID
        );
    }

    #[test]
    fn test_parse_rejects_bad_skylinks() {
        assert!(parse_skylink("").is_err());
        assert!(parse_skylink(&VALID[1..]).is_err());
        assert!(parse_skylink(&format!("{}+", &VALID[1..])).is_err());
        assert!(matches!(
            parse_skylink("not-a-skylink"),
            Err(AccountsError::InvalidInput(_))
        ));
    }
}
