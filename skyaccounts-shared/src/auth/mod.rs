/// Authentication primitives
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and verification
/// - [`jwt`]: HS256 bearer tokens carrying the user's subject
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::auth::jwt::{create_token, Claims};
/// use skyaccounts_shared::auth::password::hash_password;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("user_password")?;
/// let token = create_token(&Claims::new("subject"), "secret-key-of-at-least-32-bytes!")?;
/// # Ok(())
/// # }
/// ```

pub mod jwt;
pub mod password;
