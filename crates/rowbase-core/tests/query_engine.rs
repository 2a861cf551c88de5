//! Integration tests for filtering, sorting and pagination.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{editor, values, viewer, TestContext};
use rowbase_core::catalog::ViewDef;
use rowbase_core::query::ALL_ROWS;
use rowbase_core::security::{Action, RowGrant};
use rowbase_core::{EntityDef, Error, FilterOp, PropertyDef, PropertyKind, QueryRequest, RowFilter, RowId, SortSpec};
use serde_json::json;

async fn seeded() -> (TestContext, Arc<EntityDef>, Vec<RowId>) {
    let ctx = TestContext::new();
    let entity = ctx
        .define(
            EntityDef::new("ticket")
                .with_property(PropertyDef::new("title", PropertyKind::text()))
                .with_property(PropertyDef::new("priority", PropertyKind::number()))
                .with_property(PropertyDef::new("state", PropertyKind::select(["open", "closed"])))
                .with_property(PropertyDef::new("labels", PropertyKind::multi_select(["bug", "ui", "api"])))
                .with_property(PropertyDef::new("window", PropertyKind::range_number())),
        )
        .await;
    let rows = [
        json!({"title": "Login fails", "priority": 1, "state": "open", "labels": ["bug", "api"], "window": {"min": 0, "max": 5}}),
        json!({"title": "Logo blurry", "priority": 3, "state": "open", "labels": ["ui"], "window": {"min": 10, "max": 20}}),
        json!({"title": "Export slow", "priority": 2, "state": "closed", "labels": ["api"]}),
        json!({"title": "Typo", "priority": 3, "state": "closed"}),
        json!({"title": "Crash on save", "state": "open", "labels": ["bug"]}),
        json!({"title": "Dark mode", "priority": 2, "state": "open", "labels": ["ui"]}),
        json!({"title": "Search results", "priority": 3, "state": "open"}),
    ];
    let mut ids = Vec::new();
    for row in rows {
        let created = ctx
            .db
            .rows()
            .create(&entity, None, &editor(), &values(row))
            .await
            .unwrap();
        ids.push(created.id);
    }
    (ctx, entity, ids)
}

fn titles(page: &rowbase_core::RowPage) -> Vec<String> {
    page.items
        .iter()
        .map(|row| row.value("title").and_then(|v| v.as_text()).unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_pages_cover_every_row_exactly_once() {
    let (ctx, entity, ids) = seeded().await;
    let actor = editor();
    for page_size in 1..=4 {
        let request = QueryRequest::new()
            .with_sort(SortSpec::desc("priority"))
            .with_page_size(page_size);
        let first = ctx.db.query().query(&entity, None, &actor, &request).await.unwrap();
        assert_eq!(first.total_items, ids.len());

        let mut seen = Vec::new();
        for page in 1..=first.total_pages as i64 {
            let result = ctx
                .db
                .query()
                .query(&entity, None, &actor, &request.clone().with_page(page))
                .await
                .unwrap();
            seen.extend(result.ids());
        }
        let unique: HashSet<RowId> = seen.iter().copied().collect();
        assert_eq!(seen.len(), ids.len(), "page size {page_size}");
        assert_eq!(unique.len(), ids.len(), "page size {page_size}");
        assert_eq!(first.total_pages, ids.len().div_ceil(page_size as usize));
    }
}

#[tokio::test]
async fn test_all_rows_sentinel() {
    let (ctx, entity, ids) = seeded().await;
    let page = ctx
        .db
        .query()
        .query(&entity, None, &editor(), &QueryRequest::new().all())
        .await
        .unwrap();
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.items.len(), page.total_items);
    assert_eq!(page.total_items, ids.len());
    assert_eq!(page.page_size, ALL_ROWS);
}

#[tokio::test]
async fn test_invalid_paging_is_rejected() {
    let (ctx, entity, _) = seeded().await;
    for request in [
        QueryRequest::new().with_page(0),
        QueryRequest::new().with_page_size(-2),
        QueryRequest::new().with_page_size(0),
    ] {
        let err = ctx.db.query().query(&entity, None, &editor(), &request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

#[tokio::test]
async fn test_ties_break_by_creation_time_descending() {
    let (ctx, entity, ids) = seeded().await;
    let page = ctx
        .db
        .query()
        .query(
            &entity,
            None,
            &editor(),
            &QueryRequest::new().with_sort(SortSpec::desc("priority")).all(),
        )
        .await
        .unwrap();
    // Priority 3 rows newest first, then 2, then 1, then the row without one.
    assert_eq!(
        titles(&page),
        vec!["Search results", "Typo", "Logo blurry", "Dark mode", "Export slow", "Login fails", "Crash on save"]
    );

    let unsorted = ctx
        .db
        .query()
        .query(&entity, None, &editor(), &QueryRequest::new().all())
        .await
        .unwrap();
    let newest_first: Vec<RowId> = ids.iter().rev().copied().collect();
    assert_eq!(unsorted.ids(), newest_first);
}

#[tokio::test]
async fn test_filters_by_type() {
    let (ctx, entity, _) = seeded().await;
    let run = |filter: RowFilter| {
        let request = QueryRequest::new().with_filter(filter).with_sort(SortSpec::asc("title")).all();
        let ctx = &ctx;
        let entity = Arc::clone(&entity);
        async move {
            let page = ctx.db.query().query(&entity, None, &editor(), &request).await.unwrap();
            titles(&page)
        }
    };

    assert_eq!(
        run(RowFilter::new("title", FilterOp::StartsWith, json!("Lo"))).await,
        vec!["Login fails", "Logo blurry"]
    );
    assert_eq!(
        run(RowFilter::new("title", FilterOp::Like, json!("%o_ s%"))).await,
        vec!["Crash on save"]
    );
    assert_eq!(run(RowFilter::new("title", FilterOp::Like, json!("%o_ x%"))).await, Vec::<String>::new());
    assert_eq!(
        run(RowFilter::new("priority", FilterOp::Gte, json!(3))).await,
        vec!["Logo blurry", "Search results", "Typo"]
    );
    assert_eq!(
        run(RowFilter::new("state", FilterOp::In, json!(["closed"]))).await,
        vec!["Export slow", "Typo"]
    );
    assert_eq!(
        run(RowFilter::new("labels", FilterOp::In, json!(["bug"]))).await,
        vec!["Crash on save", "Login fails"]
    );
    assert_eq!(
        run(RowFilter::new("labels", FilterOp::All, json!(["bug", "api"]))).await,
        vec!["Login fails"]
    );
    assert_eq!(
        run(RowFilter::new("window", FilterOp::Overlaps, json!({"min": 4, "max": 12}))).await,
        vec!["Login fails", "Logo blurry"]
    );
    assert_eq!(run(RowFilter::is_empty("priority")).await, vec!["Crash on save"]);
    assert_eq!(run(RowFilter::new("folio", FilterOp::Lte, json!(2))).await, vec!["Login fails", "Logo blurry"]);
}

#[tokio::test]
async fn test_unknown_properties_are_ignored() {
    let (ctx, entity, ids) = seeded().await;
    let request = QueryRequest::new()
        .with_filter(RowFilter::eq("nonexistent", json!("x")))
        .with_sort(SortSpec::asc("alsoMissing"))
        .all();
    let page = ctx.db.query().query(&entity, None, &editor(), &request).await.unwrap();
    assert_eq!(page.total_items, ids.len());
}

#[tokio::test]
async fn test_unsupported_operator_is_a_field_error() {
    let (ctx, entity, _) = seeded().await;
    let request = QueryRequest::new().with_filter(RowFilter::new("priority", FilterOp::Contains, json!("1")));
    let err = ctx.db.query().query(&entity, None, &editor(), &request).await.unwrap_err();
    assert!(err.field_errors().unwrap().contains("priority"));
}

#[tokio::test]
async fn test_results_exclude_unreadable_rows() {
    let (ctx, entity, ids) = seeded().await;
    let reader = viewer();
    ctx.db
        .grant_row(RowGrant::deny(ids[0], reader.identity, Action::Read))
        .await
        .unwrap();
    let page = ctx
        .db
        .query()
        .query(&entity, None, &reader, &QueryRequest::new().all())
        .await
        .unwrap();
    assert_eq!(page.total_items, ids.len() - 1);
    assert!(!page.ids().contains(&ids[0]));

    let stranger = rowbase_core::Actor::user(rowbase_core::UserId::new());
    let page = ctx
        .db
        .query()
        .query(&entity, None, &stranger, &QueryRequest::new())
        .await
        .unwrap();
    assert_eq!(page.total_items, 0);
    assert_eq!(page.total_pages, 0);
}

#[tokio::test]
async fn test_views_and_default_order() {
    let (ctx, entity, _) = seeded().await;
    let entity = ctx
        .db
        .put_view(
            entity.id,
            ViewDef::table("open-by-priority")
                .with_filter(RowFilter::eq("state", json!("open")))
                .with_sort(SortSpec::asc("priority"))
                .with_page_size(2),
        )
        .await
        .unwrap();

    let page = ctx
        .db
        .query()
        .query_view(&entity, "open-by-priority", None, &editor(), 1)
        .await
        .unwrap();
    assert_eq!(page.total_items, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(titles(&page), vec!["Login fails", "Dark mode"]);

    let err = ctx
        .db
        .query()
        .query_view(&entity, "missing", None, &editor(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // An entity-level default order applies when a request names no sort.
    let mut ordered = entity.as_ref().clone();
    ordered.lifecycle.default_order = vec![SortSpec::asc("title")];
    let page = ctx
        .db
        .query()
        .query(&ordered, None, &editor(), &QueryRequest::new().with_page_size(2))
        .await
        .unwrap();
    assert_eq!(titles(&page), vec!["Crash on save", "Dark mode"]);
}
