use std::sync::Arc;

use serde_json::{json, Value};
use tenancy_core::errors::{ErrorKind, TenancyError};
use tenancy_core::{
    carrier, Collection, CollectionSchema, Document, Filter, MemoryCollection, Pipeline, Query,
    ScopeDimension, ScopeOverride, ScopePlugin, ScopeSettings, SortOrder, Stage, TenancyApp,
    TenantContext, Update,
};

fn doc(v: Value) -> Document {
    v.as_object().cloned().expect("object literal")
}

fn tickets_schema() -> CollectionSchema {
    CollectionSchema::new("tickets")
        .with_plugin(ScopePlugin::user(ScopeSettings::required()))
        .with_plugin(ScopePlugin::account(ScopeSettings::required()))
        .with_plugin(ScopePlugin::entity(ScopeSettings::optional()))
}

async fn app_with_tickets() -> (TenancyApp, MemoryCollection) {
    let app = TenancyApp::new();
    let store = MemoryCollection::new();
    app.register_collection(tickets_schema(), Arc::new(store.clone()))
        .await
        .unwrap();
    (app, store)
}

fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    TenancyError::from_anyhow(err).map(|e| e.kind)
}

#[tokio::test]
async fn member_ticket_is_invisible_to_other_accounts() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    let created = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets
            .insert(doc(json!({ "title": "printer on fire", "user_id": "spoofed" })))
            .await
            .unwrap()
    })
    .await;

    assert_eq!(created["user_id"], "u1");
    assert_eq!(created["account_id"], "A1");
    assert_eq!(created["entity_id"], "E1");

    let own = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets.find(Query::new()).await.unwrap()
    })
    .await;
    assert_eq!(own.len(), 1);

    let other = carrier::with_tenant(TenantContext::member("A2", "E1", "u1"), async {
        tickets.find(Query::new()).await.unwrap()
    })
    .await;
    assert!(other.is_empty());
}

#[tokio::test]
async fn operator_without_user_scope_sees_every_users_tickets() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    for user in ["u1", "u2"] {
        carrier::with_tenant(TenantContext::member("A1", "E1", user), async {
            tickets
                .insert(doc(json!({ "title": format!("from {user}") })))
                .await
                .unwrap();
        })
        .await;
    }

    let scoped = carrier::with_tenant(TenantContext::operator("op"), async {
        tickets.find(Query::new()).await.unwrap()
    })
    .await;
    assert!(scoped.is_empty(), "operator's own user scope still applies");

    let all = carrier::with_tenant(TenantContext::operator("op"), async {
        tickets
            .without_user_scope()
            .find(Query::new().sort_by("title", SortOrder::Asc))
            .await
            .unwrap()
    })
    .await;
    let titles: Vec<_> = all.iter().map(|d| d["title"].clone()).collect();
    assert_eq!(titles, vec![json!("from u1"), json!("from u2")]);
}

#[tokio::test]
async fn caller_filter_cannot_widen_scope() {
    let (app, store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    carrier::with_tenant(TenantContext::member("A2", "E9", "u9"), async {
        tickets.insert(doc(json!({ "title": "secret" }))).await.unwrap();
    })
    .await;

    let found = carrier::with_tenant(TenantContext::member("A1", "E1", "u9"), async {
        tickets
            .find(Query::new().where_eq("account_id", "A2"))
            .await
            .unwrap()
    })
    .await;

    assert!(found.is_empty());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn missing_context_passes_through_unfiltered() {
    let (app, store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets.insert(doc(json!({ "title": "a" }))).await.unwrap();
    })
    .await;
    carrier::with_tenant(TenantContext::member("A2", "E2", "u2"), async {
        tickets.insert(doc(json!({ "title": "b" }))).await.unwrap();
    })
    .await;

    // no carrier scope at all
    assert_eq!(tickets.count(Filter::new()).await.unwrap(), 2);

    // an established but anonymous context behaves the same
    let n = carrier::with_tenant(TenantContext::anonymous(), async {
        tickets.count(Filter::new()).await.unwrap()
    })
    .await;
    assert_eq!(n, 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn hard_set_write_without_user_is_forbidden() {
    let (app, store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    let err = tickets
        .insert(doc(json!({ "title": "x", "account_id": "A1", "user_id": "u1" })))
        .await
        .unwrap_err();

    assert_eq!(kind_of(&err), Some(ErrorKind::Forbidden));
    assert!(store.is_empty());
}

#[tokio::test]
async fn for_user_does_not_spoof_writes() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    let created = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets
            .for_user("u2")
            .insert(doc(json!({ "title": "x" })))
            .await
            .unwrap()
    })
    .await;

    assert_eq!(created["user_id"], "u1");
}

#[tokio::test]
async fn soft_set_keeps_explicit_account() {
    let app = TenancyApp::new();
    let store = MemoryCollection::new();
    let schema = CollectionSchema::new("summaries")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()))
        .with_plugin(ScopePlugin::entity(ScopeSettings::optional()));
    app.register_collection(schema, Arc::new(store.clone()))
        .await
        .unwrap();
    let summaries = app.collection("summaries").unwrap();

    carrier::with_tenant(TenantContext::operator("op"), async {
        summaries
            .insert(doc(json!({ "account_id": "A7", "total": 3 })))
            .await
            .unwrap();
    })
    .await;

    carrier::with_tenant(TenantContext::admin("A1", "u1"), async {
        summaries.insert(doc(json!({ "total": 5 }))).await.unwrap();
    })
    .await;

    let stored = store.snapshot();
    assert_eq!(stored[0]["account_id"], "A7");
    assert_eq!(stored[1]["account_id"], "A1");
    // admin context has no entity, so the optional column stays unset
    assert!(stored[1].get("entity_id").is_none());
}

#[tokio::test]
async fn required_scope_column_is_validated_on_insert() {
    let app = TenancyApp::new();
    let store = MemoryCollection::new();
    let schema = CollectionSchema::new("widgets")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()));
    app.register_collection(schema, Arc::new(store.clone()))
        .await
        .unwrap();
    let widgets = app.collection("widgets").unwrap();

    // operator has no account and the payload names none
    let err = carrier::with_tenant(TenantContext::operator("op"), async {
        widgets.insert(doc(json!({ "name": "w" }))).await.unwrap_err()
    })
    .await;

    let tenancy = TenancyError::from_anyhow(&err).unwrap();
    assert_eq!(tenancy.kind, ErrorKind::Unprocessable);
    assert_eq!(tenancy.errors, Some(json!({ "account_id": ["is required"] })));
    assert!(store.is_empty());
}

#[tokio::test]
async fn escape_hatch_bypasses_only_its_own_dimension() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    for (account, entity, user) in [
        ("A1", "E1", "u1"),
        ("A1", "E1", "u2"),
        ("A2", "E1", "u3"),
        ("A1", "E2", "u1"),
    ] {
        carrier::with_tenant(TenantContext::member(account, entity, user), async {
            tickets.insert(doc(json!({ "title": user }))).await.unwrap();
        })
        .await;
    }

    let counts = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        let count = |c: tenancy_core::ScopedCollection| async move {
            c.count(Filter::new()).await.unwrap()
        };
        (
            count(tickets.clone()).await,
            count(tickets.without_user_scope()).await,
            count(tickets.without_entity_scope()).await,
            count(tickets.without_account_scope().without_user_scope()).await,
            count(tickets.clone().with_scope(
                ScopeOverride::ambient()
                    .without(ScopeDimension::Account)
                    .without(ScopeDimension::Entity)
                    .without(ScopeDimension::User),
            ))
            .await,
        )
    })
    .await;

    assert_eq!(counts.0, 1);
    assert_eq!(counts.1, 2, "account and entity scope still apply");
    assert_eq!(counts.2, 2, "u1 across both entities of A1");
    assert_eq!(counts.3, 3, "every account in E1");
    assert_eq!(counts.4, 4);
}

#[tokio::test]
async fn scoping_column_can_be_renamed() {
    let app = TenancyApp::new();
    let store = MemoryCollection::new();
    let schema = CollectionSchema::new("audit")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()).with_column("tenant"));
    app.register_collection(schema, Arc::new(store.clone()))
        .await
        .unwrap();
    let audit = app.collection("audit").unwrap();

    for account in ["A1", "A2"] {
        carrier::with_tenant(TenantContext::admin(account, "ad"), async {
            audit.insert(doc(json!({ "event": "login" }))).await.unwrap();
        })
        .await;
    }

    let found = carrier::with_tenant(TenantContext::admin("A1", "ad"), async {
        audit.find(Query::new()).await.unwrap()
    })
    .await;

    assert_eq!(store.indexes(), vec!["tenant"]);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["tenant"], "A1");
    assert!(found[0].get("account_id").is_none());
}

/// Store that only supports reads.
struct ReadOnly;

#[async_trait::async_trait]
impl Collection for ReadOnly {
    async fn find(&self, _query: Query) -> anyhow::Result<Vec<Document>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn unsupported_store_methods_are_not_implemented() {
    let app = TenancyApp::new();
    let schema = CollectionSchema::new("archive")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()));
    app.register_collection(schema, Arc::new(ReadOnly)).await.unwrap();
    let archive = app.collection("archive").unwrap();

    let err = carrier::with_tenant(TenantContext::admin("A1", "ad"), async {
        assert!(archive.find(Query::new()).await.unwrap().is_empty());
        archive.insert(doc(json!({ "n": 1 }))).await.unwrap_err()
    })
    .await;

    let e = TenancyError::from_anyhow(&err).unwrap();
    assert_eq!(e.kind, ErrorKind::NotImplemented);
    assert_eq!(e.code(), 501);
    assert_eq!(e.message, "Method not implemented: insert");
}

#[tokio::test]
async fn for_account_filters_by_explicit_id() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    for account in ["A1", "A2"] {
        carrier::with_tenant(TenantContext::member(account, "E1", "u1"), async {
            tickets.insert(doc(json!({ "title": account }))).await.unwrap();
        })
        .await;
    }

    let found = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets.for_account("A2").find(Query::new()).await.unwrap()
    })
    .await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["title"], "A2");
}

#[tokio::test]
async fn update_and_remove_stay_inside_scope() {
    let (app, store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    for account in ["A1", "A2"] {
        carrier::with_tenant(TenantContext::member(account, "E1", "u1"), async {
            tickets
                .insert(doc(json!({ "title": "t", "status": "open" })))
                .await
                .unwrap();
        })
        .await;
    }

    carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        let changed = tickets
            .update(
                Filter::new(),
                Update::new().set("status", "closed").set("account_id", "A2"),
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let removed = tickets.remove(Filter::new().eq("status", "open")).await.unwrap();
        assert_eq!(removed, 0);
    })
    .await;

    let stored = store.snapshot();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0]["status"], "closed");
    assert_eq!(stored[0]["account_id"], "A1", "account cannot be moved out of scope");
    assert_eq!(stored[1]["status"], "open");
}

#[tokio::test]
async fn get_reports_out_of_scope_documents_as_missing() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    let created = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets.insert(doc(json!({ "title": "t" }))).await.unwrap()
    })
    .await;
    let id = created["_id"].as_str().unwrap().to_string();

    let own = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets.get(&id).await.unwrap()
    })
    .await;
    assert_eq!(own["title"], "t");

    let err = carrier::with_tenant(TenantContext::member("A2", "E1", "u1"), async {
        tickets.get(&id).await.unwrap_err()
    })
    .await;
    assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn aggregation_gets_scope_stage_once() {
    let (app, _store) = app_with_tickets().await;
    let tickets = app.collection("tickets").unwrap();

    for (account, status) in [("A1", "open"), ("A1", "open"), ("A1", "closed"), ("A2", "open")] {
        carrier::with_tenant(TenantContext::member(account, "E1", "u1"), async {
            tickets
                .insert(doc(json!({ "status": status })))
                .await
                .unwrap();
        })
        .await;
    }

    let rows = carrier::with_tenant(TenantContext::member("A1", "E1", "u1"), async {
        tickets
            .aggregate(Pipeline::new().stage(Stage::GroupCount {
                by: "status".into(),
                count_as: "n".into(),
            }))
            .await
            .unwrap()
    })
    .await;

    assert_eq!(
        rows,
        vec![
            doc(json!({ "_id": "closed", "n": 1 })),
            doc(json!({ "_id": "open", "n": 2 })),
        ]
    );
}

#[tokio::test]
async fn scoping_columns_are_indexed_on_registration() {
    let (_app, store) = app_with_tickets().await;
    assert_eq!(store.indexes(), vec!["account_id", "entity_id", "user_id"]);
}

#[tokio::test]
async fn aliases_are_normalized_before_scoping() {
    let app = TenancyApp::new();
    let store = MemoryCollection::new();
    let schema = CollectionSchema::new("conversations")
        .with_plugin(ScopePlugin::account(ScopeSettings::required()).with_alias("accountId"));
    app.register_collection(schema, Arc::new(store.clone()))
        .await
        .unwrap();
    let conversations = app.collection("conversations").unwrap();

    carrier::with_tenant(TenantContext::operator("op"), async {
        conversations
            .insert(doc(json!({ "accountId": "A3", "topic": "hi" })))
            .await
            .unwrap();
    })
    .await;

    let stored = store.snapshot();
    assert_eq!(stored[0]["account_id"], "A3");
    assert!(stored[0].get("accountId").is_none());

    let found = carrier::with_tenant(TenantContext::member("A3", "E1", "u1"), async {
        conversations
            .find(Query::new().where_eq("accountId", "A3"))
            .await
            .unwrap()
    })
    .await;
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let app = TenancyApp::new();
    let err = app.collection("nope").err().unwrap();
    assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));
}
