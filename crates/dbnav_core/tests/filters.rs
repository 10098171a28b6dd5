use dbnav_core::{
    CancelToken, FilterScope, JsonPreferenceStore, NavError, NavigatorModel, Node, NodeFilter,
    NodePath, ResolveOptions,
};
use dbnav_test_support::fixtures::{database_forest, model_for, sample_forest};
use std::sync::Arc;

fn key(path: &str) -> NodePath {
    path.parse().expect("valid path")
}

fn names(nodes: &[Arc<Node>]) -> Vec<String> {
    nodes.iter().map(|node| node.name()).collect()
}

fn include(patterns: &[&str]) -> NodeFilter {
    NodeFilter::new(patterns.iter().copied(), Vec::<String>::new())
}

#[test]
fn include_pattern_is_case_insensitive_by_default() {
    let source = sample_forest();
    let model = model_for(&source);
    model
        .set_filter(FilterScope::all(key("A")), include(&["a*"]))
        .expect("filter saved");

    let a = model.resolve(&key("A"), &CancelToken::new()).expect("A");
    let children = model.get_children(&a, &CancelToken::new()).expect("load");

    assert_eq!(names(&children), vec!["alpha"]);
    assert!(a.is_filtered());
}

#[test]
fn filter_change_invalidates_only_that_container() {
    let source = sample_forest();
    let model = model_for(&source);
    let cancel = CancelToken::new();
    model.resolve(&key("A/Folder1/gamma"), &cancel).expect("gamma");

    let root = model.root();
    let a = model.find_node(&key("A")).expect("A");
    let folder = model.find_node(&key("A/Folder1")).expect("Folder1");

    model
        .set_filter(FilterScope::all(key("A")), include(&["b*"]))
        .expect("filter saved");

    assert!(!a.children_loaded());
    assert!(root.children_loaded());
    assert!(folder.children_loaded());

    let children = model.get_children(&a, &cancel).expect("reload");
    assert_eq!(names(&children), vec!["beta"]);
    assert!(folder.is_disposed());
}

#[test]
fn clearing_a_filter_shows_everything_again() {
    let source = sample_forest();
    let model = model_for(&source);
    let scope = FilterScope::all(key("A"));
    model.set_filter(scope.clone(), include(&["a*"])).expect("set");

    let a = model.resolve(&key("A"), &CancelToken::new()).expect("A");
    model.get_children(&a, &CancelToken::new()).expect("filtered load");

    model.clear_filter(scope.clone()).expect("clear");
    assert_eq!(model.filter_for(&scope), None);

    let children = model.get_children(&a, &CancelToken::new()).expect("reload");
    assert_eq!(children.len(), 3);
    assert!(!a.is_filtered());
}

#[test]
fn invalid_patterns_are_rejected_before_saving() {
    let source = sample_forest();
    let model = model_for(&source);
    let scope = FilterScope::all(key("A"));

    let err = model
        .set_filter(scope.clone(), include(&["a;b"]))
        .expect_err("separator in pattern");
    assert!(matches!(err, NavError::InvalidFilter { .. }));
    assert_eq!(model.filter_for(&scope), None);
}

#[test]
fn type_scoped_filter_and_hidden_objects() {
    let source = database_forest();
    let model = model_for(&source);
    model
        .set_filter(
            FilterScope::of_type(key("Main/pg/public/Tables"), "table"),
            NodeFilter::new(["*"], ["tmp_*"]),
        )
        .expect("filter saved");

    let tables = model
        .find_node_by_path("Main/pg/public/Tables", &CancelToken::new())
        .expect("Tables");
    let children = model.get_children(&tables, &CancelToken::new()).expect("load");

    assert_eq!(names(&children), vec!["orders", "users"]);
}

#[test]
fn system_objects_follow_the_setting() {
    let source = database_forest();
    let model = model_for(&source);
    let cancel = CancelToken::new();

    let pg = model.find_node_by_path("Main/pg", &cancel).expect("pg");
    assert_eq!(names(&model.get_children(&pg, &cancel).expect("load")), vec!["public"]);

    model.set_show_system_objects(true).expect("setting saved");
    assert!(!pg.children_loaded());
    assert_eq!(
        names(&model.get_children(&pg, &cancel).expect("reload")),
        vec!["pg_catalog", "public"]
    );
}

#[test]
fn filtered_object_is_added_on_forced_resolution() {
    let source = sample_forest();
    let model = model_for(&source);
    let cancel = CancelToken::new();
    model
        .set_filter(FilterScope::all(key("A")), include(&["a*"]))
        .expect("filter saved");

    let err = model.resolve(&key("A/beta"), &cancel).expect_err("filtered out");
    assert!(matches!(err, NavError::NotFound(path) if path == key("A/beta")));

    let beta = model
        .resolve_with(&key("A/beta"), ResolveOptions { add_filtered: true }, &cancel)
        .expect("forced");
    assert_eq!(beta.name(), "beta");

    let a = beta.parent().expect("parent");
    assert_eq!(
        names(&a.cached_children().expect("loaded")),
        vec!["alpha", "beta"]
    );
    assert!(Arc::ptr_eq(
        &model.find_node(&key("A/beta")).expect("registered"),
        &beta
    ));

    let err = model
        .resolve_with(&key("A/nope"), ResolveOptions { add_filtered: true }, &cancel)
        .expect_err("not listed at all");
    assert!(matches!(err, NavError::NotFound(_)));
}

#[test]
fn filters_persist_in_the_json_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("navigator.json");
    let source = sample_forest();

    let open = || {
        let store = JsonPreferenceStore::from_path(path.clone()).expect("store");
        NavigatorModel::builder()
            .fallback_source(source.as_source_arc())
            .preferences(Arc::new(store))
            .build()
    };

    let first = open();
    first
        .set_filter(
            FilterScope::all(key("A")),
            NodeFilter::new(["a*", "F*"], ["*1"]),
        )
        .expect("filter saved");
    first.dispose();

    let second = open();
    assert_eq!(
        second.filter_for(&FilterScope::all(key("A"))),
        Some(NodeFilter::new(["a*", "F*"], ["*1"]))
    );

    let a = second.resolve(&key("A"), &CancelToken::new()).expect("A");
    let children = second.get_children(&a, &CancelToken::new()).expect("load");
    assert_eq!(names(&children), vec!["alpha"]);
}
