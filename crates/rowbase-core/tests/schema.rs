//! Integration tests for schema changes on entities that hold rows.

mod common;

use common::{editor, values, TestContext};
use rowbase_core::{
    ConflictError, EntityDef, Error, PropertyDef, PropertyKind, QueryRequest, RelationshipDef, ResourceKind, TypedValue,
};
use serde_json::json;

fn project() -> EntityDef {
    EntityDef::new("project")
        .with_property(PropertyDef::new("name", PropertyKind::text()).required())
        .with_property(PropertyDef::new("budget", PropertyKind::number()))
        .with_property(PropertyDef::new("code", PropertyKind::text()))
}

#[tokio::test]
async fn test_type_is_fixed_once_values_exist() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;
    ctx.db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Apollo"})))
        .await
        .unwrap();

    // No row holds a budget yet, so the type may still change.
    let entity = ctx
        .db
        .update_property(entity.id, "budget", PropertyDef::new("budget", PropertyKind::text()))
        .await
        .unwrap();
    let budget = entity.property("budget").unwrap();
    assert_eq!(budget.kind, PropertyKind::text());

    ctx.db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Gemini", "budget": "lots"})))
        .await
        .unwrap();
    let err = ctx
        .db
        .update_property(entity.id, "budget", PropertyDef::new("budget", PropertyKind::number()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(ConflictError::ImmutablePropertyType { .. })));

    // Attribute changes that keep the type are fine.
    let entity = ctx
        .db
        .update_property(
            entity.id,
            "budget",
            PropertyDef::new("budget", PropertyKind::text()).with_title("Budget notes"),
        )
        .await
        .unwrap();
    assert_eq!(entity.property("budget").unwrap().title, "Budget notes");
}

#[tokio::test]
async fn test_writes_follow_the_current_definition() {
    let ctx = TestContext::new();
    let stale = ctx
        .define(EntityDef::new("item").with_property(PropertyDef::new("x", PropertyKind::number())))
        .await;
    ctx.db
        .update_property(stale.id, "x", PropertyDef::new("x", PropertyKind::text()))
        .await
        .unwrap();

    // The old definition still says NUMBER; the write is checked as TEXT.
    let row = ctx
        .db
        .rows()
        .create(&stale, None, &editor(), &values(json!({"x": "five"})))
        .await
        .unwrap();
    assert_eq!(row.value("x"), Some(&TypedValue::Text("five".into())));
    let updated = ctx
        .db
        .rows()
        .update(row.id, &stale, &editor(), &values(json!({"x": "six"})))
        .await
        .unwrap();
    assert_eq!(updated.value("x"), Some(&TypedValue::Text("six".into())));

    let current = ctx.db.entity(None, "item").unwrap();
    ctx.db.rows().cache().clear();
    ctx.db.rows().get(row.id).await.unwrap();
    let page = ctx
        .db
        .query()
        .query(&current, None, &editor(), &QueryRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total_items, 1);

    let gone = ctx.define(EntityDef::new("scratch")).await;
    ctx.db.delete_entity(gone.id).await.unwrap();
    let err = ctx
        .db
        .rows()
        .create(&gone, None, &editor(), &values(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_type_change_and_first_write_do_not_interleave() {
    let ctx = std::sync::Arc::new(TestContext::new());
    let entity = ctx
        .define(EntityDef::new("item").with_property(PropertyDef::new("x", PropertyKind::number())))
        .await;

    let writer = {
        let (ctx, entity) = (ctx.clone(), entity.clone());
        tokio::spawn(async move {
            ctx.db
                .rows()
                .create(&entity, None, &editor(), &values(json!({"x": 5})))
                .await
        })
    };
    let change = ctx
        .db
        .update_property(entity.id, "x", PropertyDef::new("x", PropertyKind::text()))
        .await;
    let written = writer.await.unwrap();

    // Either the type change ran first and the number was written as TEXT
    // or rejected, or the row came first and the change was refused.
    match change {
        Ok(_) => {}
        Err(err) => assert!(matches!(err, Error::Conflict(ConflictError::ImmutablePropertyType { .. }))),
    }
    let current = ctx.db.entity(None, "item").unwrap();
    ctx.db.rows().cache().clear();
    if let Ok(row) = written {
        ctx.db.rows().get(row.id).await.unwrap();
    }
    ctx.db
        .query()
        .query(&current, None, &editor(), &QueryRequest::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cold_catalog_reloads_off_the_executor() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;

    ctx.db.catalog().invalidate();
    assert!(ctx.db.catalog().snapshot().is_err());
    let snapshot = ctx.db.rows().snapshot().await.unwrap();
    assert!(snapshot.entity(entity.id).is_some());
    assert!(ctx.db.catalog().snapshot().is_ok());

    // A schema change leaves the catalog warm.
    ctx.db
        .add_property(entity.id, PropertyDef::new("notes", PropertyKind::text()))
        .await
        .unwrap();
    let installed = ctx.db.catalog().snapshot().unwrap();
    assert!(installed.entity(entity.id).unwrap().property("notes").is_some());
}

#[tokio::test]
async fn test_names_are_fixed_once_rows_exist() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;

    let entity = ctx
        .db
        .update_property(entity.id, "code", PropertyDef::new("reference", PropertyKind::text()))
        .await
        .unwrap();
    assert!(entity.property("code").is_none());
    assert!(entity.property("reference").is_some());

    ctx.db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Apollo"})))
        .await
        .unwrap();
    let err = ctx
        .db
        .update_property(entity.id, "reference", PropertyDef::new("ref", PropertyKind::text()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(ConflictError::ImmutablePropertyName { .. })));
}

#[tokio::test]
async fn test_unique_only_on_empty_properties() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;
    ctx.db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Apollo", "code": "AP"})))
        .await
        .unwrap();

    let err = ctx
        .db
        .update_property(entity.id, "code", PropertyDef::new("code", PropertyKind::text()).unique())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(ConflictError::UniqueOnPopulated { .. })));

    let entity = ctx
        .db
        .update_property(entity.id, "budget", PropertyDef::new("budget", PropertyKind::number()).unique())
        .await
        .unwrap();
    assert!(entity.property("budget").unwrap().unique);
}

#[tokio::test]
async fn test_removed_property_values_are_gone() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;
    let row = ctx
        .db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Apollo", "budget": 10})))
        .await
        .unwrap();

    let entity = ctx.db.remove_property(entity.id, "budget").await.unwrap();
    assert!(entity.property("budget").is_none());
    let read = ctx.db.rows().get(row.id).await.unwrap();
    assert!(read.value("budget").is_none());
    assert!(read.to_json(&entity).get("budget").is_none());

    // A new property with the old name starts empty.
    let entity = ctx
        .db
        .add_property(entity.id, PropertyDef::new("budget", PropertyKind::number()))
        .await
        .unwrap();
    let read = ctx.db.rows().get(row.id).await.unwrap();
    assert_eq!(read.to_json(&entity)["budget"], json!(null));
    assert_eq!(read.to_json(&entity)["name"], json!("Apollo"));
}

#[tokio::test]
async fn test_entities_with_rows_or_relationships_cannot_be_deleted() {
    let ctx = TestContext::new();
    let entity = ctx.define(project()).await;
    let milestone = ctx.define(EntityDef::new("milestone")).await;
    let row = ctx
        .db
        .rows()
        .create(&entity, None, &editor(), &values(json!({"name": "Apollo"})))
        .await
        .unwrap();

    let err = ctx.db.delete_entity(entity.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(ConflictError::EntityInUse { .. })));

    ctx.db.rows().delete(row.id, &editor()).await.unwrap();
    let relationship = ctx
        .db
        .define_relationship(RelationshipDef::one_to_many("milestones", entity.id, milestone.id))
        .await
        .unwrap();
    let err = ctx.db.delete_entity(entity.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(ConflictError::EntityInUse { .. })));

    ctx.db.remove_relationship(relationship.id).await.unwrap();
    ctx.db.delete_entity(entity.id).await.unwrap();
    assert!(matches!(
        ctx.db.entity(None, "project"),
        Err(Error::NotFound {
            kind: ResourceKind::Entity,
            ..
        })
    ));
    assert_eq!(ctx.db.catalog().get_all(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_definitions_report_every_field() {
    let ctx = TestContext::new();
    let err = ctx
        .db
        .define_entity(
            EntityDef::new("order")
                .with_property(PropertyDef::new("price", PropertyKind::number()))
                .with_property(PropertyDef::new("total", PropertyKind::formula("price * qty")))
                .with_property(PropertyDef::new("state", PropertyKind::select(["open"])).with_default("closed")),
        )
        .await
        .unwrap_err();
    let fields = err.field_errors().expect("validation error");
    assert!(fields.contains("total"));
    assert!(fields.contains("state"));
    assert!(ctx.db.catalog().get_all(None).unwrap().is_empty());
}
