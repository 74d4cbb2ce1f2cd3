#![cfg(feature = "pg-tests")]

use membership::config;
use membership::model::{Membership, Project, ProjectRole};
use membership::store::postgres::PostgresStore;
use membership::store::{MembershipStore, MutationGuard, StoreError};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

static PG_STORE: tokio::sync::OnceCell<Arc<PostgresStore>> = tokio::sync::OnceCell::const_new();

async fn reset_postgres(url: &str) -> Result<(), sqlx::Error> {
    let pool = match tokio::time::timeout(
        std::time::Duration::from_secs(2),
        PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect(url),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(sqlx::Error::PoolTimedOut),
    };
    // Tables may not exist before the first migration run.
    let _ = sqlx::query("TRUNCATE project_members, projects")
        .execute(&pool)
        .await;
    Ok(())
}

async fn pg_store() -> Option<Arc<PostgresStore>> {
    let url = match std::env::var("MEMBERSHIP_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("MEMBERSHIP_PG_URL"))
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set MEMBERSHIP_PG_URL or DATABASE_URL");
            return None;
        }
    };
    if let Err(err) = reset_postgres(&url).await {
        eprintln!("skipping pg-tests: cannot connect to postgres: {err}");
        return None;
    }
    let pg_cfg = config::PostgresConfig {
        url,
        max_connections: 5,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    };
    let store = match PG_STORE
        .get_or_try_init(|| async {
            let store = PostgresStore::connect(&pg_cfg).await?;
            Ok::<_, StoreError>(Arc::new(store))
        })
        .await
    {
        Ok(store) => Arc::clone(store),
        Err(err) => {
            eprintln!("skipping pg-tests: connect postgres store failed: {err}");
            return None;
        }
    };
    Some(store)
}

async fn project_with_manager(store: &PostgresStore, manager: &str) -> Project {
    let project = store
        .upsert_project(Project::new("pg project"))
        .await
        .expect("project");
    store
        .insert_memberships(
            &MutationGuard::GlobalAuthority,
            vec![Membership::new(
                project.project_id,
                manager,
                ProjectRole::Manager,
            )],
        )
        .await
        .expect("manager");
    project
}

fn guard(project_id: Uuid, account_id: &str) -> MutationGuard {
    MutationGuard::ProjectManager {
        project_id,
        account_id: account_id.to_string(),
    }
}

#[tokio::test]
#[serial]
async fn pg_bulk_insert_is_all_or_nothing() {
    let Some(store) = pg_store().await else {
        return;
    };
    let project = project_with_manager(&store, "pm").await;
    let project_id = project.project_id;

    store
        .insert_memberships(
            &guard(project_id, "pm"),
            vec![Membership::new(project_id, "a", ProjectRole::Member)],
        )
        .await
        .expect("first insert");

    let err = store
        .insert_memberships(
            &guard(project_id, "pm"),
            vec![
                Membership::new(project_id, "b", ProjectRole::Author),
                Membership::new(project_id, "a", ProjectRole::Author),
            ],
        )
        .await
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::Conflict(_)));
    assert!(
        store
            .find_membership(project_id, "b")
            .await
            .expect("lookup")
            .is_none()
    );
    assert_eq!(store.list_memberships(project_id).await.expect("list").len(), 2);
}

#[tokio::test]
#[serial]
async fn pg_guard_is_rechecked_at_write_time() {
    let Some(store) = pg_store().await else {
        return;
    };
    let project = project_with_manager(&store, "pm").await;
    let project_id = project.project_id;

    let err = store
        .insert_memberships(
            &guard(project_id, "not-a-manager"),
            vec![Membership::new(project_id, "a", ProjectRole::Member)],
        )
        .await
        .expect_err("denied");
    assert!(matches!(err, StoreError::PreconditionFailed(_)));
    assert!(
        store
            .find_membership(project_id, "a")
            .await
            .expect("lookup")
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn pg_delete_filters_by_role_and_role_updates_return_previous() {
    let Some(store) = pg_store().await else {
        return;
    };
    let project = project_with_manager(&store, "pm").await;
    let project_id = project.project_id;
    let inserted = store
        .insert_memberships(
            &guard(project_id, "pm"),
            vec![
                Membership::new(project_id, "a", ProjectRole::Member),
                Membership::new(project_id, "b", ProjectRole::Author),
            ],
        )
        .await
        .expect("insert");
    let ids: Vec<Uuid> = inserted.iter().map(|m| m.membership_id).collect();

    let removed = store
        .delete_memberships(
            &guard(project_id, "pm"),
            project_id,
            &ids,
            Some(ProjectRole::Manager),
        )
        .await
        .expect("delete managers");
    assert!(removed.is_empty());

    let (previous, updated) = store
        .update_membership_role(
            &guard(project_id, "pm"),
            project_id,
            ids[0],
            ProjectRole::Author,
        )
        .await
        .expect("update");
    assert_eq!(previous.project_role, ProjectRole::Member);
    assert_eq!(updated.project_role, ProjectRole::Author);

    let removed = store
        .delete_memberships(&guard(project_id, "pm"), project_id, &ids, None)
        .await
        .expect("delete");
    assert_eq!(removed.len(), 2);

    let held = store
        .list_account_memberships("pm")
        .await
        .expect("account memberships");
    assert!(held.iter().any(|m| m.project_id == project_id));
    assert!(store.health_check().await.is_ok());
    assert!(store.is_durable());
}

#[tokio::test]
#[serial]
async fn pg_unknown_project_is_not_found() {
    let Some(store) = pg_store().await else {
        return;
    };
    let err = store
        .get_project(Uuid::new_v4())
        .await
        .expect_err("missing");
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!store.project_exists(Uuid::new_v4()).await.expect("exists"));
}
