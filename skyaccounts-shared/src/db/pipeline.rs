/// Aggregation pipelines over `jsonb` documents
///
/// Upload and download history is listed through a small pipeline of typed
/// stages. Each row of a collection is treated as a document
/// (`to_jsonb(row)`), and the stages are compiled into nested SQL:
///
/// ```text
/// match -> sort -> skip -> limit        relational part, runs on the table
/// lookup -> merge -> project            document part, runs on jsonb
/// count                                 optional terminal stage
/// ```
///
/// The order is load-bearing: pagination applies to the matched set before
/// the join, and the join precedes projection. [`Pipeline::compile`] rejects
/// any other order.
///
/// # Example
///
/// ```
/// use skyaccounts_shared::db::pipeline::{uploads_pipeline, Filter};
/// use uuid::Uuid;
///
/// let pipeline = uploads_pipeline(Filter::eq("user_id", Uuid::new_v4()), 0, 10);
/// let query = pipeline.compile().unwrap();
/// assert!(query.sql().contains("ORDER BY r.ord"));
/// ```

use crate::db::schema::{Collection, SortDirection};
use crate::error::AccountsError;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Page size used when the caller does not specify one
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Field the joined skylinks land in before they are merged
pub const SKYLINKS_JOIN_FIELD: &str = "from_skylinks";

/// Offset and page size of a listing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of documents to skip, at least 0
    pub offset: i64,

    /// Maximum number of documents to return, at least 1
    pub page_size: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// Validates pagination parameters, applying defaults for missing ones
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::InvalidInput`] for a negative offset or a
    /// page size below 1.
    pub fn new(offset: Option<i64>, page_size: Option<i64>) -> Result<Self, AccountsError> {
        let offset = offset.unwrap_or(0);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        if offset < 0 {
            return Err(AccountsError::InvalidInput(format!(
                "offset must be at least 0, got {}",
                offset
            )));
        }
        if page_size < 1 {
            return Err(AccountsError::InvalidInput(format!(
                "page size must be at least 1, got {}",
                page_size
            )));
        }

        Ok(Self { offset, page_size })
    }
}

/// A typed value a filter compares against
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Uuid(Uuid),
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Uuid(value)
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

/// Comparison operator of a filter predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// Equality/range predicate over the fields of a collection
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    All,

    /// `field <op> value`
    Compare {
        field: &'static str,
        op: Comparison,
        value: FilterValue,
    },

    /// All predicates hold
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn gt(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn gte(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, Comparison::Gte, value)
    }

    pub fn lt(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn lte(field: &'static str, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, Comparison::Lte, value)
    }

    /// Conjunction of `self` and `other`
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    fn compare(field: &'static str, op: Comparison, value: impl Into<FilterValue>) -> Self {
        Filter::Compare {
            field,
            op,
            value: value.into(),
        }
    }
}

/// Type of the join key, used to cast the local field before comparing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Uuid,
    Text,
    BigInt,
}

impl KeyType {
    fn cast(&self) -> &'static str {
        match self {
            KeyType::Uuid => "::uuid",
            KeyType::Text => "",
            KeyType::BigInt => "::bigint",
        }
    }
}

/// One key of a sort stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: &'static str,
    pub direction: SortDirection,
}

/// Left join of each document to the documents of another collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub from: Collection,
    pub local_field: &'static str,
    pub foreign_field: &'static str,
    pub key_type: KeyType,

    /// Array field receiving the matches (empty when none match)
    pub as_field: &'static str,
}

/// Value of an included field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectedValue {
    /// Copy the field as is
    Field(&'static str),

    /// `primary` when it is present and greater than zero, else `fallback`
    PositiveOr {
        primary: &'static str,
        fallback: &'static str,
    },
}

/// Shape of the output documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Drop the listed fields, keep the rest
    Exclude(Vec<&'static str>),

    /// Keep only the listed fields
    Include(Vec<(&'static str, ProjectedValue)>),
}

/// A pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(Vec<SortKey>),
    Skip(i64),
    Limit(i64),
    Lookup(Lookup),

    /// Replace each document by the first element of `from_field` overlaid
    /// with the document itself; the document wins on key collisions
    MergeJoined { from_field: &'static str },

    Project(Projection),

    /// Replace the stream by a single `{field: n}` document, or by nothing
    /// when the stream is empty
    Count { field: &'static str },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "match",
            Stage::Sort(_) => "sort",
            Stage::Skip(_) => "skip",
            Stage::Limit(_) => "limit",
            Stage::Lookup(_) => "lookup",
            Stage::MergeJoined { .. } => "merge",
            Stage::Project(_) => "project",
            Stage::Count { .. } => "count",
        }
    }

    fn is_document_stage(&self) -> bool {
        matches!(
            self,
            Stage::Lookup(_) | Stage::MergeJoined { .. } | Stage::Project(_)
        )
    }
}

/// An ordered list of stages applied to one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    collection: Collection,
    stages: Vec<Stage>,
}

/// Stages of a pipeline sorted into the parts of the generated query
struct Plan<'a> {
    filter: Option<&'a Filter>,
    sort: &'a [SortKey],
    skip: Option<i64>,
    limit: Option<i64>,
    documents: Vec<&'a Stage>,
    count: Option<&'static str>,
}

impl Pipeline {
    /// Empty pipeline over `collection`
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            stages: Vec::new(),
        }
    }

    /// Appends a stage
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Compiles the pipeline into a query returning one `doc` column
    ///
    /// All filter values and pagination numbers are bound parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::InvalidPipeline`] if the stages are out of
    /// order or name an invalid field.
    pub fn compile(&self) -> Result<QueryBuilder<'static, Postgres>, AccountsError> {
        let plan = self.plan()?;

        let layers = plan
            .documents
            .iter()
            .enumerate()
            .map(|(depth, stage)| document_expression(stage, &format!("s{}", depth)))
            .collect::<Result<Vec<String>, AccountsError>>()?;

        let mut query = QueryBuilder::new("");

        match plan.count {
            Some(field) => query.push(format!(
                "SELECT jsonb_build_object('{}', count(*)) AS doc FROM (",
                ident(field)?
            )),
            None => query.push("SELECT r.doc FROM ("),
        };

        for (depth, expression) in layers.iter().enumerate().rev() {
            query.push(format!(
                "SELECT {} AS doc, s{}.ord FROM (",
                expression, depth
            ));
        }

        let order_by = order_by_clause(plan.sort)?;
        query.push(format!(
            "SELECT to_jsonb(t) AS doc, row_number() OVER ({}) AS ord FROM \"{}\" AS t",
            order_by.as_deref().unwrap_or(""),
            self.collection.as_str()
        ));
        if let Some(filter) = plan.filter {
            query.push(" WHERE ");
            push_filter(&mut query, filter)?;
        }
        if let Some(order_by) = &order_by {
            query.push(" ");
            query.push(order_by);
        }
        if let Some(skip) = plan.skip {
            query.push(" OFFSET ");
            query.push_bind(skip);
        }
        if let Some(limit) = plan.limit {
            query.push(" LIMIT ");
            query.push_bind(limit);
        }

        for depth in 0..layers.len() {
            query.push(format!(") AS s{}", depth));
        }

        match plan.count {
            Some(_) => query.push(") AS c HAVING count(*) > 0"),
            None => query.push(") AS r ORDER BY r.ord"),
        };

        Ok(query)
    }

    fn plan(&self) -> Result<Plan<'_>, AccountsError> {
        let mut plan = Plan {
            filter: None,
            sort: &[],
            skip: None,
            limit: None,
            documents: Vec::new(),
            count: None,
        };

        for (position, stage) in self.stages.iter().enumerate() {
            if plan.count.is_some() {
                return Err(invalid("count must be the last stage"));
            }
            if !stage.is_document_stage()
                && !matches!(stage, Stage::Count { .. })
                && !plan.documents.is_empty()
            {
                return Err(AccountsError::InvalidPipeline(format!(
                    "{} cannot follow lookup, merge or project",
                    stage.name()
                )));
            }

            match stage {
                Stage::Match(filter) => {
                    if position != 0 {
                        return Err(invalid("match must be the first stage"));
                    }
                    plan.filter = Some(filter);
                }
                Stage::Sort(keys) => {
                    if plan.skip.is_some() || plan.limit.is_some() {
                        return Err(invalid("sort must precede skip and limit"));
                    }
                    if !plan.sort.is_empty() {
                        return Err(invalid("only one sort stage is supported"));
                    }
                    if keys.is_empty() {
                        return Err(invalid("sort needs at least one key"));
                    }
                    plan.sort = keys;
                }
                Stage::Skip(skip) => {
                    if plan.limit.is_some() {
                        return Err(invalid("skip must precede limit"));
                    }
                    if plan.skip.is_some() {
                        return Err(invalid("only one skip stage is supported"));
                    }
                    if *skip < 0 {
                        return Err(invalid("skip must be at least 0"));
                    }
                    plan.skip = Some(*skip);
                }
                Stage::Limit(limit) => {
                    if plan.limit.is_some() {
                        return Err(invalid("only one limit stage is supported"));
                    }
                    if *limit < 1 {
                        return Err(invalid("limit must be at least 1"));
                    }
                    plan.limit = Some(*limit);
                }
                Stage::Lookup(_) | Stage::MergeJoined { .. } | Stage::Project(_) => {
                    plan.documents.push(stage);
                }
                Stage::Count { field } => {
                    plan.count = Some(field);
                }
            }
        }

        Ok(plan)
    }
}

/// Stages 1-6 shared by the uploads and downloads listings
fn paginated_join(collection: Collection, filter: Filter, offset: i64, page_size: i64) -> Pipeline {
    Pipeline::new(collection)
        .stage(Stage::Match(filter))
        .stage(Stage::Sort(vec![SortKey {
            field: "timestamp",
            direction: SortDirection::Descending,
        }]))
        .stage(Stage::Skip(offset))
        .stage(Stage::Limit(page_size))
        .stage(Stage::Lookup(Lookup {
            from: Collection::Skylinks,
            local_field: "skylink_id",
            foreign_field: "id",
            key_type: KeyType::Uuid,
            as_field: SKYLINKS_JOIN_FIELD,
        }))
        .stage(Stage::MergeJoined {
            from_field: SKYLINKS_JOIN_FIELD,
        })
}

/// Paginated uploads enriched with their skylink
///
/// The skylink's full size is reported as the upload's size.
pub fn uploads_pipeline(filter: Filter, offset: i64, page_size: i64) -> Pipeline {
    paginated_join(Collection::Uploads, filter, offset, page_size).stage(Stage::Project(
        Projection::Exclude(vec![SKYLINKS_JOIN_FIELD]),
    ))
}

/// Paginated downloads enriched with their skylink
///
/// A download with a positive `bytes` value was partial; its `bytes` are
/// reported as its size. Otherwise the skylink's full size is reported.
pub fn downloads_pipeline(filter: Filter, offset: i64, page_size: i64) -> Pipeline {
    paginated_join(Collection::Downloads, filter, offset, page_size).stage(Stage::Project(
        Projection::Include(vec![
            ("id", ProjectedValue::Field("id")),
            ("skylink", ProjectedValue::Field("skylink")),
            ("name", ProjectedValue::Field("name")),
            ("user_id", ProjectedValue::Field("user_id")),
            ("skylink_id", ProjectedValue::Field("skylink_id")),
            ("timestamp", ProjectedValue::Field("timestamp")),
            (
                "size",
                ProjectedValue::PositiveOr {
                    primary: "bytes",
                    fallback: "size",
                },
            ),
        ]),
    ))
}

/// `[match, count]` over `collection`
pub fn count_pipeline(collection: Collection, filter: Filter) -> Pipeline {
    Pipeline::new(collection)
        .stage(Stage::Match(filter))
        .stage(Stage::Count { field: "count" })
}

fn invalid(message: &str) -> AccountsError {
    AccountsError::InvalidPipeline(message.to_string())
}

/// Accepts lower-case identifiers only; they are spliced into SQL
fn ident(name: &str) -> Result<&str, AccountsError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest {
        Ok(name)
    } else {
        Err(AccountsError::InvalidPipeline(format!(
            "invalid field name {:?}",
            name
        )))
    }
}

fn order_by_clause(keys: &[SortKey]) -> Result<Option<String>, AccountsError> {
    if keys.is_empty() {
        return Ok(None);
    }
    let keys = keys
        .iter()
        .map(|key| Ok(format!("t.\"{}\" {}", ident(key.field)?, key.direction.as_sql())))
        .collect::<Result<Vec<String>, AccountsError>>()?;
    Ok(Some(format!("ORDER BY {}", keys.join(", "))))
}

fn push_filter(
    query: &mut QueryBuilder<'static, Postgres>,
    filter: &Filter,
) -> Result<(), AccountsError> {
    match filter {
        Filter::All => {
            query.push("TRUE");
        }
        Filter::Compare { field, op, value } => {
            query.push(format!("t.\"{}\" {} ", ident(field)?, op.as_sql()));
            match value {
                FilterValue::Uuid(v) => query.push_bind(*v),
                FilterValue::Text(v) => query.push_bind(v.clone()),
                FilterValue::Integer(v) => query.push_bind(*v),
                FilterValue::Timestamp(v) => query.push_bind(*v),
            };
        }
        Filter::And(filters) if filters.is_empty() => {
            query.push("TRUE");
        }
        Filter::And(filters) => {
            query.push("(");
            for (i, inner) in filters.iter().enumerate() {
                if i > 0 {
                    query.push(" AND ");
                }
                push_filter(query, inner)?;
            }
            query.push(")");
        }
    }
    Ok(())
}

/// SQL expression computing the new `doc` of a document stage
///
/// `input` is the alias of the subquery the stage reads from.
fn document_expression(stage: &Stage, input: &str) -> Result<String, AccountsError> {
    match stage {
        Stage::Lookup(lookup) => Ok(format!(
            "{input}.doc || jsonb_build_object('{as_field}', COALESCE((SELECT jsonb_agg(to_jsonb(f)) FROM \"{from}\" AS f WHERE f.\"{foreign}\" = ({input}.doc->>'{local}'){cast}), '[]'::jsonb))",
            input = input,
            as_field = ident(lookup.as_field)?,
            from = lookup.from.as_str(),
            foreign = ident(lookup.foreign_field)?,
            local = ident(lookup.local_field)?,
            cast = lookup.key_type.cast(),
        )),
        Stage::MergeJoined { from_field } => Ok(format!(
            "COALESCE({input}.doc->'{from}'->0, '{{}}'::jsonb) || {input}.doc",
            input = input,
            from = ident(from_field)?,
        )),
        Stage::Project(Projection::Exclude(fields)) => {
            let mut expression = format!("{}.doc", input);
            for field in fields {
                expression.push_str(&format!(" - '{}'", ident(field)?));
            }
            Ok(expression)
        }
        Stage::Project(Projection::Include(fields)) => {
            let pairs = fields
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        ProjectedValue::Field(field) => {
                            format!("{}.doc->'{}'", input, ident(field)?)
                        }
                        ProjectedValue::PositiveOr { primary, fallback } => format!(
                            "CASE WHEN COALESCE(({input}.doc->>'{primary}')::numeric, 0) > 0 THEN {input}.doc->'{primary}' ELSE {input}.doc->'{fallback}' END",
                            input = input,
                            primary = ident(primary)?,
                            fallback = ident(fallback)?,
                        ),
                    };
                    Ok(format!("'{}', {}", ident(name)?, value))
                })
                .collect::<Result<Vec<String>, AccountsError>>()?;
            Ok(format!("jsonb_build_object({})", pairs.join(", ")))
        }
        other => Err(AccountsError::InvalidPipeline(format!(
            "{} is not a document stage",
            other.name()
        ))),
    }
}
