//! Query execution: filter, sort and paginate rows of one entity.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::filter::{compile_filters, CompiledFilter};
use super::request::{QueryRequest, RowPage, ALL_ROWS};
use crate::catalog::{EntityDef, PropertyDef, SortDirection, SortSpec};
use crate::error::{Error, ResourceKind, Result, ValidationErrors};
use crate::ids::TenantId;
use crate::security::{Action, Actor, PermissionResolver};
use crate::storage::{Row, RowStore};
use crate::types::PropertyTypeRegistry;

struct SortKey {
    property: PropertyDef,
    direction: SortDirection,
}

/// Runs [`QueryRequest`]s against the row store.
///
/// Results always follow a total order: the requested sort keys (or the
/// entity's default order), then creation time descending, then row id.
/// Paging the same request over unchanged data therefore visits every row
/// exactly once.
pub struct QueryEngine {
    rows: Arc<RowStore>,
}

impl QueryEngine {
    pub fn new(rows: Arc<RowStore>) -> Self {
        Self { rows }
    }

    fn validate(request: &QueryRequest) -> Result<()> {
        let mut errors = ValidationErrors::new();
        if request.page < 1 {
            errors.add("page", "must be at least 1");
        }
        if request.page_size < ALL_ROWS || request.page_size == 0 {
            errors.add("pageSize", "must be positive, or -1 for all rows");
        }
        errors.into_result()
    }

    fn sort_keys(entity: &EntityDef, sort: &[SortSpec]) -> Vec<SortKey> {
        let specs = if sort.is_empty() {
            &entity.lifecycle.default_order
        } else {
            sort
        };
        specs
            .iter()
            .filter_map(|spec| match entity.property(&spec.property) {
                Some(property) => Some(SortKey {
                    property: property.clone(),
                    direction: spec.direction,
                }),
                None => {
                    debug!(entity = %entity.name, property = %spec.property, "ignoring sort on unknown property");
                    None
                }
            })
            .collect()
    }

    fn compare(registry: &PropertyTypeRegistry, keys: &[SortKey], a: &Row, b: &Row) -> Ordering {
        for key in keys {
            let ordering = match (a.field(&key.property), b.field(&key.property)) {
                (Some(x), Some(y)) => {
                    let ordering = registry.compare(&key.property, &x, &y);
                    match key.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
                // Rows without a value sort last in either direction.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
    }

    /// Filter, sort and page the rows of an entity the actor may read.
    #[instrument(skip(self, entity, actor, request), fields(entity = %entity.name, page = request.page, page_size = request.page_size))]
    pub async fn query(
        &self,
        entity: &EntityDef,
        tenant: Option<TenantId>,
        actor: &Actor,
        request: &QueryRequest,
    ) -> Result<RowPage> {
        Self::validate(request)?;
        if !entity.visible_to(tenant) {
            return Err(Error::not_found(ResourceKind::Entity, &entity.name));
        }
        let registry = self.rows.registry();
        let filters: Vec<CompiledFilter> =
            compile_filters(entity, registry, &request.filters).map_err(Error::Validation)?;

        let candidates = self.rows.list(entity, tenant).await?;
        let data = self
            .rows
            .permission_data(entity.id, candidates.iter().map(|r| r.id).collect())
            .await?;
        let mut matched: Vec<Arc<Row>> = candidates
            .into_iter()
            .filter(|row| {
                actor.reaches_tenant(row.tenant_id)
                    && PermissionResolver::check(Some(actor), entity, Some(row.id), Action::Read, &data)
            })
            .filter(|row| filters.iter().all(|f| f.matches(registry, row)))
            .collect();

        let keys = Self::sort_keys(entity, &request.sort);
        matched.sort_by(|a, b| Self::compare(registry, &keys, a, b));

        let total_items = matched.len();
        let page = if request.page_size == ALL_ROWS {
            RowPage {
                items: matched,
                total_items,
                total_pages: 1,
                page: 1,
                page_size: ALL_ROWS,
            }
        } else {
            let size = request.page_size as usize;
            let start = (request.page as usize - 1).saturating_mul(size);
            RowPage {
                items: matched.into_iter().skip(start).take(size).collect(),
                total_items,
                total_pages: total_items.div_ceil(size),
                page: request.page,
                page_size: request.page_size,
            }
        };
        debug!(total = page.total_items, returned = page.items.len(), "query done");
        Ok(page)
    }

    /// Run a view's saved filters and sort at the given page.
    pub async fn query_view(
        &self,
        entity: &EntityDef,
        view: &str,
        tenant: Option<TenantId>,
        actor: &Actor,
        page: i64,
    ) -> Result<RowPage> {
        let view = entity
            .view(view)
            .ok_or_else(|| Error::not_found(ResourceKind::View, view))?;
        let request = QueryRequest {
            filters: view.filters.clone(),
            sort: view.sort.clone(),
            page,
            page_size: view.page_size,
        };
        self.query(entity, tenant, actor, &request).await
    }
}
