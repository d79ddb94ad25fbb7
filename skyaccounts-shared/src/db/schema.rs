/// Idempotent schema provisioning
///
/// The accounts service does not ship migration files. Instead every process
/// start calls [`ensure_schema`], which creates the required tables and
/// indexes when they are absent and confirms them when they are present.
/// Concurrent starters may race; "already exists" outcomes are success.
///
/// # Schema
///
/// | Collection        | Indexes                    |
/// |-------------------|----------------------------|
/// | `users`           | `sub` (unique)             |
/// | `skylinks`        | `skylink` (unique)         |
/// | `uploads`         | `user_id`, `skylink_id`    |
/// | `downloads`       | `user_id`, `skylink_id`    |
/// | `registry_reads`  | `user_id`                  |
/// | `registry_writes` | `user_id`                  |
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::db::schema::{default_schema, ensure_schema};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let indexes = ensure_schema(&pool, &default_schema()).await?;
/// println!("Confirmed {} indexes", indexes.len());
/// # Ok(())
/// # }
/// ```

use crate::error::AccountsError;
use sqlx::PgPool;
use std::fmt;
use tracing::{debug, info, warn};

/// SQLSTATE codes that mean "someone already created this"
const ALREADY_EXISTS_CODES: [&str; 3] = ["42P07", "42710", "23505"];

/// Tables owned by the accounts service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Skylinks,
    Uploads,
    Downloads,
    RegistryReads,
    RegistryWrites,
}

impl Collection {
    /// Table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Skylinks => "skylinks",
            Collection::Uploads => "uploads",
            Collection::Downloads => "downloads",
            Collection::RegistryReads => "registry_reads",
            Collection::RegistryWrites => "registry_writes",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction of an index key or a sort stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// One key of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub field: &'static str,
    pub direction: SortDirection,
}

/// A required index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexModel {
    /// Stable name, unique within its collection
    pub name: &'static str,

    /// Key fields in order
    pub keys: Vec<IndexKey>,

    /// Whether the index enforces uniqueness
    pub unique: bool,
}

impl IndexModel {
    /// Ascending single-field index
    pub fn ascending(name: &'static str, field: &'static str) -> Self {
        Self {
            name,
            keys: vec![IndexKey {
                field,
                direction: SortDirection::Ascending,
            }],
            unique: false,
        }
    }

    /// Marks the index unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Name of the index in the database
    ///
    /// Index names are global per schema in PostgreSQL, so the collection
    /// name is prefixed.
    pub fn physical_name(&self, collection: Collection) -> String {
        format!("{}_{}", collection.as_str(), self.name)
    }

    fn create_statement(&self, collection: Collection) -> String {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|key| format!("\"{}\" {}", key.field, key.direction.as_sql()))
            .collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.physical_name(collection),
            collection.as_str(),
            keys.join(", ")
        )
    }

    fn key_fields(&self) -> Vec<String> {
        self.keys.iter().map(|key| key.field.to_string()).collect()
    }
}

/// A table together with the indexes it must carry
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub collection: Collection,

    /// Column definitions used when the table has to be created
    pub columns: &'static str,

    pub indexes: Vec<IndexModel>,
}

/// Definition of an index as found in the catalog
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
struct ExistingIndex {
    is_unique: bool,
    columns: Vec<String>,
}

/// The schema the service needs, in creation order
pub fn default_schema() -> Vec<CollectionSchema> {
    vec![
        CollectionSchema {
            collection: Collection::Users,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                sub TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL DEFAULT '',
                stripe_customer_id TEXT,
                tier INTEGER NOT NULL DEFAULT 1,
                subscribed_until TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            "#,
            indexes: vec![IndexModel::ascending("sub_unique", "sub").unique()],
        },
        CollectionSchema {
            collection: Collection::Skylinks,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                skylink TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                size BIGINT NOT NULL DEFAULT 0
            "#,
            indexes: vec![IndexModel::ascending("skylink_unique", "skylink").unique()],
        },
        CollectionSchema {
            collection: Collection::Uploads,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id),
                skylink_id UUID NOT NULL REFERENCES skylinks (id),
                "timestamp" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            "#,
            indexes: vec![
                IndexModel::ascending("user_id", "user_id"),
                IndexModel::ascending("skylink_id", "skylink_id"),
            ],
        },
        CollectionSchema {
            collection: Collection::Downloads,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id),
                skylink_id UUID NOT NULL REFERENCES skylinks (id),
                bytes BIGINT NOT NULL DEFAULT 0,
                "timestamp" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            "#,
            indexes: vec![
                IndexModel::ascending("user_id", "user_id"),
                IndexModel::ascending("skylink_id", "skylink_id"),
            ],
        },
        CollectionSchema {
            collection: Collection::RegistryReads,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id),
                "timestamp" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            "#,
            indexes: vec![IndexModel::ascending("user_id", "user_id")],
        },
        CollectionSchema {
            collection: Collection::RegistryWrites,
            columns: r#"
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id),
                "timestamp" TIMESTAMPTZ NOT NULL DEFAULT NOW()
            "#,
            indexes: vec![IndexModel::ascending("user_id", "user_id")],
        },
    ]
}

/// Ensures every collection and index in `schema` exists
///
/// Safe to run on every start and from several processes at once.
///
/// # Returns
///
/// Physical names of all indexes confirmed present
///
/// # Errors
///
/// - [`AccountsError::SchemaConflict`] if an index exists with a different
///   definition
/// - [`AccountsError::QueryFailure`] for any other creation failure
pub async fn ensure_schema(
    pool: &PgPool,
    schema: &[CollectionSchema],
) -> Result<Vec<String>, AccountsError> {
    info!(collections = schema.len(), "Ensuring database schema");

    let mut confirmed = Vec::new();
    for collection_schema in schema {
        ensure_collection(pool, collection_schema).await?;
        let names = ensure_indexes(pool, collection_schema).await?;
        debug!(
            collection = %collection_schema.collection,
            indexes = ?names,
            "Ensured indexes exist"
        );
        confirmed.extend(names);
    }

    info!(indexes = confirmed.len(), "Database schema is in place");
    Ok(confirmed)
}

/// Creates the collection's table when it is absent
async fn ensure_collection(pool: &PgPool, schema: &CollectionSchema) -> Result<(), AccountsError> {
    let statement = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        schema.collection.as_str(),
        schema.columns
    );

    match sqlx::query(&statement).execute(pool).await {
        Ok(_) => Ok(()),
        Err(e) if is_already_exists(&e) => {
            debug!(collection = %schema.collection, "Collection created concurrently");
            Ok(())
        }
        Err(e) => Err(AccountsError::QueryFailure {
            context: format!("failed to create collection {}", schema.collection),
            source: e,
        }),
    }
}

/// Confirms or creates every index of the collection
async fn ensure_indexes(
    pool: &PgPool,
    schema: &CollectionSchema,
) -> Result<Vec<String>, AccountsError> {
    let mut missing = Vec::new();
    for index in &schema.indexes {
        if !verify_index(pool, schema.collection, index).await? {
            missing.push(index);
        }
    }

    if !missing.is_empty() {
        match create_indexes(pool, schema.collection, &missing).await {
            Ok(()) => {}
            Err(e) if is_already_exists(&e) => {
                warn!(
                    collection = %schema.collection,
                    "Index creation raced with another process, re-checking"
                );
                for index in &missing {
                    if !verify_index(pool, schema.collection, index).await? {
                        return Err(AccountsError::QueryFailure {
                            context: format!(
                                "index {} still missing after concurrent creation",
                                index.physical_name(schema.collection)
                            ),
                            source: e,
                        });
                    }
                }
            }
            Err(e) => {
                return Err(AccountsError::QueryFailure {
                    context: "failed to create indexes".to_string(),
                    source: e,
                })
            }
        }
    }

    Ok(schema
        .indexes
        .iter()
        .map(|index| index.physical_name(schema.collection))
        .collect())
}

/// Creates all `indexes` of a collection in one transaction
async fn create_indexes(
    pool: &PgPool,
    collection: Collection,
    indexes: &[&IndexModel],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for index in indexes {
        sqlx::query(&index.create_statement(collection))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

/// Checks whether the index exists with the required definition
///
/// # Returns
///
/// `true` if present and matching, `false` if absent
async fn verify_index(
    pool: &PgPool,
    collection: Collection,
    index: &IndexModel,
) -> Result<bool, AccountsError> {
    let name = index.physical_name(collection);
    let existing = sqlx::query_as::<_, ExistingIndex>(
        r#"
        SELECT ix.indisunique AS is_unique,
               array_agg(a.attname::text ORDER BY k.ord) AS columns
        FROM pg_class i
        JOIN pg_index ix ON ix.indexrelid = i.oid
        JOIN pg_class t ON t.oid = ix.indrelid
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE i.relname = $1 AND t.relname = $2
        GROUP BY ix.indisunique
        "#,
    )
    .bind(&name)
    .bind(collection.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| AccountsError::storage(format!("failed to inspect index {}", name), e))?;

    match existing {
        None => Ok(false),
        Some(found) if found.is_unique == index.unique && found.columns == index.key_fields() => {
            Ok(true)
        }
        Some(found) => Err(AccountsError::SchemaConflict(format!(
            "index {} exists as unique={} on {:?}, required unique={} on {:?}",
            name,
            found.is_unique,
            found.columns,
            index.unique,
            index.key_fields()
        ))),
    }
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| ALREADY_EXISTS_CODES.contains(&code.as_ref()))
        .unwrap_or(false)
}
