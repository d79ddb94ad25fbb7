//! Listing and counting against a live database
//!
//! Run with: cargo test --test pipeline_tests -- --ignored

mod common;

use chrono::{Duration, Utc};
use skyaccounts_shared::context::OpContext;
use skyaccounts_shared::db::aggregate::count;
use skyaccounts_shared::db::pipeline::{Filter, Pagination};
use skyaccounts_shared::db::schema::Collection;
use skyaccounts_shared::error::AccountsError;
use skyaccounts_shared::models::download::Download;
use skyaccounts_shared::models::registry::{RegistryAccess, RegistryEntry};
use skyaccounts_shared::models::upload::Upload;
use sqlx::PgPool;
use uuid::Uuid;

async fn insert_upload_at(pool: &PgPool, user_id: Uuid, skylink_id: Uuid, minutes_ago: i64) {
    sqlx::query(r#"INSERT INTO uploads (user_id, skylink_id, "timestamp") VALUES ($1, $2, $3)"#)
        .bind(user_id)
        .bind(skylink_id)
        .bind(Utc::now() - Duration::minutes(minutes_ago))
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_uploads_are_paginated_newest_first() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    let user = common::create_test_user(&pool).await;

    let mut skylinks = Vec::new();
    for i in 0..5 {
        let skylink = common::create_test_skylink(&pool, &format!("file-{}", i), 100 + i).await;
        insert_upload_at(&pool, user.id, skylink.id, 10 - i).await;
        skylinks.push(skylink);
    }

    let pagination = Pagination::new(Some(1), Some(2)).unwrap();
    let page = Upload::list_by_user(&pool, &ctx, user.id, pagination)
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    // Newest is file-4; offset 1 starts at file-3.
    assert_eq!(page[0].name.as_deref(), Some("file-3"));
    assert_eq!(page[0].size, Some(103));
    assert_eq!(page[0].skylink.as_deref(), Some(skylinks[3].skylink.as_str()));
    assert_eq!(page[1].name.as_deref(), Some("file-2"));
    assert!(page[0].timestamp > page[1].timestamp);
    assert_ne!(page[0].id, skylinks[3].id, "record id must win over the skylink id");

    assert_eq!(Upload::count_by_user(&pool, &ctx, user.id).await.unwrap(), 5);
}

async fn insert_download_at(pool: &PgPool, user_id: Uuid, skylink_id: Uuid, minutes_ago: i64) {
    sqlx::query(
        r#"INSERT INTO downloads (user_id, skylink_id, bytes, "timestamp") VALUES ($1, $2, 0, $3)"#,
    )
    .bind(user_id)
    .bind(skylink_id)
    .bind(Utc::now() - Duration::minutes(minutes_ago))
    .execute(pool)
    .await
    .unwrap();
}

/// (offset, page size, expected names) against three records, newest first
fn page_cases() -> Vec<(i64, i64, Vec<&'static str>)> {
    vec![
        (0, 2, vec!["file-2", "file-1"]),
        (2, 2, vec!["file-0"]),
        (3, 2, vec![]),
        (10, 5, vec![]),
    ]
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_upload_pages_stop_at_the_end() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    let user = common::create_test_user(&pool).await;
    for i in 0..3 {
        let skylink = common::create_test_skylink(&pool, &format!("file-{}", i), 10).await;
        insert_upload_at(&pool, user.id, skylink.id, 10 - i).await;
    }

    for (offset, page_size, expected) in page_cases() {
        let pagination = Pagination::new(Some(offset), Some(page_size)).unwrap();
        let names: Vec<String> = Upload::list_by_user(&pool, &ctx, user.id, pagination)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|upload| upload.name)
            .collect();
        assert_eq!(names, expected, "offset {} page size {}", offset, page_size);
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_download_pages_stop_at_the_end() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    let user = common::create_test_user(&pool).await;
    for i in 0..3 {
        let skylink = common::create_test_skylink(&pool, &format!("file-{}", i), 10).await;
        insert_download_at(&pool, user.id, skylink.id, 10 - i).await;
    }

    for (offset, page_size, expected) in page_cases() {
        let pagination = Pagination::new(Some(offset), Some(page_size)).unwrap();
        let names: Vec<String> = Download::list_by_user(&pool, &ctx, user.id, pagination)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|download| download.name)
            .collect();
        assert_eq!(names, expected, "offset {} page size {}", offset, page_size);
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_download_size_prefers_partial_bytes() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    let user = common::create_test_user(&pool).await;
    let skylink = common::create_test_skylink(&pool, "movie.mkv", 1000).await;

    Download::create(&pool, user.id, skylink.id, 0).await.unwrap();
    Download::create(&pool, user.id, skylink.id, 250).await.unwrap();

    let downloads = Download::list_by_user(&pool, &ctx, user.id, Pagination::default());
    let mut sizes: Vec<Option<i64>> = downloads
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.size)
        .collect();
    sizes.sort();

    assert_eq!(sizes, vec![Some(250), Some(1000)]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_empty_match_counts_zero() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();

    let total = count(&pool, &ctx, Collection::Uploads, Filter::eq("user_id", Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(total, 0);

    let page = Upload::list_by_user(&pool, &ctx, Uuid::new_v4(), Pagination::default())
        .await
        .unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_registry_counts() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    let user = common::create_test_user(&pool).await;

    RegistryEntry::create(&pool, RegistryAccess::Read, user.id).await.unwrap();
    RegistryEntry::create(&pool, RegistryAccess::Read, user.id).await.unwrap();
    RegistryEntry::create(&pool, RegistryAccess::Write, user.id).await.unwrap();

    assert_eq!(
        RegistryEntry::count_by_user(&pool, &ctx, RegistryAccess::Read, user.id).await.unwrap(),
        2
    );
    assert_eq!(
        RegistryEntry::count_by_user(&pool, &ctx, RegistryAccess::Write, user.id).await.unwrap(),
        1
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_cancelled_listing_is_interrupted() {
    let pool = common::setup_pool().await;
    let ctx = OpContext::background();
    ctx.cancel();

    let result = Upload::list_by_user(&pool, &ctx, Uuid::new_v4(), Pagination::default()).await;

    assert!(matches!(result, Err(AccountsError::Interrupted { .. })));
}
