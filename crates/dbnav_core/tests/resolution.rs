use dbnav_core::{CancelToken, NavError, NodeKind, NodePath};
use dbnav_test_support::fixtures::{database_forest, model_for, table};
use std::sync::Arc;

fn key(path: &str) -> NodePath {
    path.parse().expect("valid path")
}

#[test]
fn path_lookup_loads_each_level_once() {
    let source = database_forest();
    let model = model_for(&source);

    let users = model
        .find_node_by_path("Main/pg/public/Tables/users", &CancelToken::new())
        .expect("users");

    assert_eq!(users.name(), "users");
    assert_eq!(users.kind(), NodeKind::DatabaseContainer);
    assert_eq!(users.object_type(), "table");
    assert_eq!(
        source.stats().listed,
        vec![
            NodePath::root(),
            key("Main"),
            key("Main/pg"),
            key("Main/pg/public"),
            key("Main/pg/public/Tables"),
        ]
    );

    let again = model
        .find_node_by_path("/Main/pg/public/Tables/users/", &CancelToken::new())
        .expect("users again");
    assert!(Arc::ptr_eq(&users, &again));
    assert_eq!(source.stats().listed.len(), 5);
}

#[test]
fn resolving_an_object_maps_to_the_same_node() {
    let source = database_forest();
    let model = model_for(&source);
    let container = key("Main/pg/public/Tables");

    let first = model
        .resolve_object(&container, &table("orders"), &CancelToken::new())
        .expect("orders");
    let second = model
        .resolve_object(&container, &table("orders").with_label("Orders"), &CancelToken::new())
        .expect("orders");

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn find_node_never_loads() {
    let source = database_forest();
    let model = model_for(&source);

    assert!(model.find_node(&key("Main")).is_none());
    assert!(source.stats().listed.is_empty());
    assert!(model.find_node(&NodePath::root()).is_some());
}

#[test]
fn missing_ancestor_reports_the_first_missing_prefix() {
    let source = database_forest();
    let model = model_for(&source);

    let err = model
        .resolve(&key("Main/oracle/HR"), &CancelToken::new())
        .expect_err("no such data source");
    assert!(matches!(err, NavError::NotFound(path) if path == key("Main/oracle")));
}

#[test]
fn load_failure_during_resolution_is_reported_as_is() {
    let source = database_forest().with_error("Main/pg", "password authentication failed");
    let model = model_for(&source);

    let err = model
        .resolve(&key("Main/pg/public"), &CancelToken::new())
        .expect_err("pg unreachable");
    assert!(matches!(err, NavError::LoadFailed { path, .. } if path == key("Main/pg")));
}

#[test]
fn malformed_paths_are_rejected() {
    let source = database_forest();
    let model = model_for(&source);

    let err = model
        .find_node_by_path("Main//pg", &CancelToken::new())
        .expect_err("empty segment");
    assert!(matches!(err, NavError::InvalidPath(_)));
}

#[test]
fn names_with_slashes_resolve_through_encoded_paths() {
    let source = database_forest().with_children(
        "Main/pg/public/Tables",
        vec![table("a/b"), table("users")],
    );
    let model = model_for(&source);
    let path = key("Main/pg/public/Tables").child("a/b");

    let node = model.resolve(&path, &CancelToken::new()).expect("a/b");
    assert_eq!(node.name(), "a/b");
    assert_eq!(path.to_string(), "Main/pg/public/Tables/a%2Fb");
    assert!(Arc::ptr_eq(
        &model
            .find_node_by_path(&path.to_string(), &CancelToken::new())
            .expect("by string"),
        &node
    ));
}
