/// Records of the accounts service and their queries
///
/// # Models
///
/// - `user`: accounts, tiers and subscription state
/// - `skylink`: content references and skylink validation
/// - `upload`: upload records and the enriched upload listing
/// - `download`: download records and the enriched download listing
/// - `registry`: registry read/write activity
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::context::OpContext;
/// use skyaccounts_shared::db::pipeline::Pagination;
/// use skyaccounts_shared::models::upload::Upload;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = OpContext::background();
/// let page = Upload::list_by_user(&pool, &ctx, user_id, Pagination::default()).await?;
/// let total = Upload::count_by_user(&pool, &ctx, user_id).await?;
/// println!("{} of {} uploads", page.len(), total);
/// # Ok(())
/// # }
/// ```

pub mod download;
pub mod registry;
pub mod skylink;
pub mod upload;
pub mod user;
