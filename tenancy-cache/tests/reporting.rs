use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tenancy_cache::{InvalidateOnWrite, ReportingCache};
use tenancy_core::{
    carrier, Collection, CollectionSchema, Document, Filter, MemoryCollection, Pipeline, Query,
    ScopePlugin, ScopeSettings, Stage, TenancyApp, TenantContext, Update,
};

/// Counts aggregation calls reaching the store.
#[derive(Clone, Default)]
struct CountingCollection {
    inner: MemoryCollection,
    aggregates: Arc<AtomicUsize>,
}

impl CountingCollection {
    fn aggregate_calls(&self) -> usize {
        self.aggregates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collection for CountingCollection {
    async fn find(&self, query: Query) -> Result<Vec<Document>> {
        self.inner.find(query).await
    }

    async fn insert(&self, doc: Document) -> Result<Document> {
        self.inner.insert(doc).await
    }

    async fn update(&self, filter: Filter, update: Update) -> Result<u64> {
        self.inner.update(filter, update).await
    }

    async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(pipeline).await
    }
}

fn doc(v: Value) -> Document {
    v.as_object().cloned().expect("object literal")
}

struct Fixture {
    app: TenancyApp,
    store: CountingCollection,
    cache: Arc<ReportingCache>,
}

async fn fixture() -> Fixture {
    let app = TenancyApp::new();
    let store = CountingCollection::default();
    let cache = Arc::new(ReportingCache::default());

    let schema = CollectionSchema::new("tickets")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()))
        .with_plugin(ScopePlugin::entity(ScopeSettings::optional()))
        .with_plugin(ScopePlugin::user(ScopeSettings::required()));
    app.register_collection(schema, Arc::new(store.clone()))
        .await
        .unwrap();

    let _ = app.collection("tickets").unwrap().hooks(|h| {
        h.after_writes(Arc::new(InvalidateOnWrite::new(Arc::clone(&cache))));
    });

    Fixture { app, store, cache }
}

/// Tickets per status for the caller, served through the cache.
async fn status_report(fx: &Fixture, params: Value) -> Value {
    let tenant = carrier::tenant().unwrap_or_default();
    let tickets = fx.app.collection("tickets").unwrap().without_user_scope();

    fx.cache
        .get_or_load(&tenant, &params, || async move {
            let rows = tickets
                .aggregate(Pipeline::new().stage(Stage::GroupCount {
                    by: "status".into(),
                    count_as: "n".into(),
                }))
                .await?;
            Ok::<_, anyhow::Error>(Value::Array(
                rows.into_iter().map(Value::Object).collect(),
            ))
        })
        .await
        .unwrap()
}

async fn seed(fx: &Fixture, tenant: TenantContext, status: &str) {
    let tickets = fx.app.collection("tickets").unwrap();
    carrier::with_tenant(tenant, async {
        tickets.insert(doc(json!({ "status": status }))).await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn reordered_parameters_are_served_from_cache() {
    let fx = fixture().await;
    seed(&fx, TenantContext::member("A1", "E1", "u1"), "open").await;
    seed(&fx, TenantContext::member("A1", "E1", "u2"), "closed").await;
    fx.cache.invalidate_all();

    let member = TenantContext::member("A1", "E1", "u1");
    let first = carrier::with_tenant(member.clone(), async {
        status_report(
            &fx,
            json!({ "filter": { "status": "open", "priority": "high" }, "sort": { "createdAt": -1 } }),
        )
        .await
    })
    .await;
    let second = carrier::with_tenant(member, async {
        status_report(
            &fx,
            json!({ "sort": { "createdAt": -1 }, "filter": { "priority": "high", "status": "open" } }),
        )
        .await
    })
    .await;

    assert_eq!(first, second);
    assert_eq!(fx.store.aggregate_calls(), 1);
    assert_eq!(
        first,
        json!([{ "_id": "closed", "n": 1 }, { "_id": "open", "n": 1 }])
    );
}

#[tokio::test]
async fn other_tenants_never_read_a_cached_report() {
    let fx = fixture().await;
    seed(&fx, TenantContext::member("A1", "E1", "u1"), "open").await;
    seed(&fx, TenantContext::member("A2", "E1", "u2"), "closed").await;
    fx.cache.invalidate_all();

    let params = json!({ "range": "7d" });
    let a1 = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        status_report(&fx, params.clone()).await
    })
    .await;
    let a2 = carrier::with_tenant(TenantContext::member("A2", "E1", "u2"), async {
        status_report(&fx, params.clone()).await
    })
    .await;

    assert_eq!(a1, json!([{ "_id": "open", "n": 1 }]));
    assert_eq!(a2, json!([{ "_id": "closed", "n": 1 }]));
    assert_eq!(fx.store.aggregate_calls(), 2);
}

#[tokio::test]
async fn writes_invalidate_the_writers_account() {
    let fx = fixture().await;
    let member = TenantContext::member("A1", "E1", "u1");
    seed(&fx, member.clone(), "open").await;

    let params = json!({ "range": "7d" });
    let before = carrier::with_tenant(member.clone(), async {
        status_report(&fx, params.clone()).await
    })
    .await;
    assert_eq!(before, json!([{ "_id": "open", "n": 1 }]));

    // a write from another account leaves A1's entry alone
    seed(&fx, TenantContext::member("A2", "E1", "u2"), "open").await;
    assert_eq!(fx.cache.len(), 1);

    seed(&fx, member.clone(), "open").await;
    assert!(fx.cache.is_empty());

    let after = carrier::with_tenant(member, async {
        status_report(&fx, params.clone()).await
    })
    .await;
    assert_eq!(after, json!([{ "_id": "open", "n": 2 }]));
    assert_eq!(fx.store.aggregate_calls(), 2);
}

#[tokio::test]
async fn updates_matching_nothing_keep_the_cache() {
    let fx = fixture().await;
    let member = TenantContext::member("A1", "E1", "u1");
    seed(&fx, member.clone(), "open").await;

    let tickets = fx.app.collection("tickets").unwrap();
    carrier::with_tenant(member, async {
        status_report(&fx, json!({})).await;
        assert_eq!(fx.cache.len(), 1);

        let changed = tickets
            .update(Filter::new().eq("status", "archived"), Update::new().set("status", "x"))
            .await
            .unwrap();
        assert_eq!(changed, 0);
        assert_eq!(fx.cache.len(), 1);

        let changed = tickets
            .update(Filter::new().eq("status", "open"), Update::new().set("status", "closed"))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(fx.cache.is_empty());
    })
    .await;
}

fn admin_in(entity: &str) -> TenantContext {
    let mut admin = TenantContext::admin("A1", "ad");
    assert!(admin.override_entity(entity));
    admin
}

#[tokio::test]
async fn admin_writes_under_entity_override_drop_their_own_reports() {
    let fx = fixture().await;
    let admin = admin_in("E7");
    let params = json!({ "range": "7d" });

    carrier::with_tenant(admin, async {
        let before = status_report(&fx, params.clone()).await;
        assert_eq!(before, json!([]));

        let tickets = fx.app.collection("tickets").unwrap();
        let created = tickets.insert(doc(json!({ "status": "open" }))).await.unwrap();
        assert_eq!(created["entity_id"], "E7");
        assert!(fx.cache.is_empty());

        let after = status_report(&fx, params.clone()).await;
        assert_eq!(after, json!([{ "_id": "open", "n": 1 }]));
    })
    .await;

    assert_eq!(fx.store.aggregate_calls(), 2);
}

#[tokio::test]
async fn admin_entity_override_shares_the_account_wide_slot() {
    let fx = fixture().await;
    seed(&fx, TenantContext::member("A1", "E1", "u1"), "open").await;
    seed(&fx, TenantContext::member("A1", "E7", "u2"), "closed").await;
    fx.cache.invalidate_all();

    let params = json!({ "range": "7d" });
    let wide = carrier::with_tenant(TenantContext::admin("A1", "ad"), async {
        status_report(&fx, params.clone()).await
    })
    .await;
    let narrowed = carrier::with_tenant(admin_in("E7"), async {
        status_report(&fx, params.clone()).await
    })
    .await;

    // the admin key has no entity component, so the narrowed view is served
    // the account-wide entry; callers wanting both put the entity in params
    assert_eq!(wide, json!([{ "_id": "closed", "n": 1 }, { "_id": "open", "n": 1 }]));
    assert_eq!(narrowed, wide);
    assert_eq!(fx.store.aggregate_calls(), 1);

    let distinct = carrier::with_tenant(admin_in("E7"), async {
        status_report(&fx, json!({ "range": "7d", "entity": "E7" })).await
    })
    .await;
    assert_eq!(distinct, json!([{ "_id": "closed", "n": 1 }]));
    assert_eq!(fx.store.aggregate_calls(), 2);
}
