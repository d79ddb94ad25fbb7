/// Running pipelines against the database
///
/// [`aggregate`] streams the rows of a compiled [`Pipeline`] and decodes each
/// `doc` into the caller's type. The whole run happens under an
/// [`OpContext`]; when the context is cancelled or times out the row stream
/// is dropped, which releases the cursor and its pooled connection.

use crate::context::OpContext;
use crate::db::pipeline::{count_pipeline, Filter, Pipeline};
use crate::db::schema::Collection;
use crate::error::AccountsError;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CountResult {
    count: i64,
}

/// Runs `pipeline` and decodes every resulting document as `T`
///
/// # Errors
///
/// - [`AccountsError::InvalidPipeline`] if the pipeline does not compile
/// - [`AccountsError::QueryFailure`] if execution fails
/// - [`AccountsError::DecodeFailure`] if a document does not decode as `T`
/// - [`AccountsError::Interrupted`] if the context stops the run
pub async fn aggregate<T>(
    pool: &PgPool,
    ctx: &OpContext,
    pipeline: &Pipeline,
) -> Result<Vec<T>, AccountsError>
where
    T: DeserializeOwned,
{
    let mut query = pipeline.compile()?;
    let collection = pipeline.collection();

    let result = ctx
        .run("aggregate", async {
            let mut rows = query.build().fetch(pool);
            let mut documents = Vec::new();

            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| AccountsError::storage(format!("aggregate {}", collection), e))?
            {
                let doc: JsonValue = row
                    .try_get("doc")
                    .map_err(|e| AccountsError::decode(format!("{} row", collection), e))?;
                let document = serde_json::from_value(doc)
                    .map_err(|e| AccountsError::decode(format!("{} document", collection), e))?;
                documents.push(document);
            }

            Ok(documents)
        })
        .await;

    match &result {
        Ok(documents) => {
            debug!(collection = %collection, documents = documents.len(), "Aggregation finished");
        }
        Err(AccountsError::Interrupted { reason, .. }) => {
            debug!(
                collection = %collection,
                reason = %reason,
                "Aggregation interrupted, cursor released"
            );
        }
        Err(_) => {}
    }

    result
}

/// Counts the documents of `collection` matching `filter`
///
/// An empty match produces no count document at all; that case is 0.
pub async fn count(
    pool: &PgPool,
    ctx: &OpContext,
    collection: Collection,
    filter: Filter,
) -> Result<i64, AccountsError> {
    let results: Vec<CountResult> =
        aggregate(pool, ctx, &count_pipeline(collection, filter)).await?;
    Ok(results.first().map(|r| r.count).unwrap_or(0))
}
