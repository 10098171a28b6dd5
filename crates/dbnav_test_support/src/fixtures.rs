use crate::FakeSource;
use dbnav_core::{DomainObject, NavigatorModel, NodeKind};

pub fn folder(name: &str) -> DomainObject {
    DomainObject::new(name, NodeKind::ResourceFolder)
}

pub fn resource(name: &str) -> DomainObject {
    DomainObject::new(name, NodeKind::Resource)
}

pub fn table(name: &str) -> DomainObject {
    DomainObject::new(name, NodeKind::DatabaseContainer).with_type("table")
}

pub fn column(name: &str, type_name: &str) -> DomainObject {
    DomainObject::new(name, NodeKind::DatabaseItem)
        .with_type("column")
        .with_property("type", serde_json::Value::String(type_name.to_string()))
}

/// Two resource folders `A` and `B` under the root.
///
/// ```text
/// A/ beta, alpha, Folder1/ (gamma)
/// B/
/// ```
pub fn sample_forest() -> FakeSource {
    FakeSource::new()
        .with_children("", vec![folder("A"), folder("B")])
        .with_children(
            "A",
            vec![resource("beta"), resource("alpha"), folder("Folder1")],
        )
        .with_children("A/Folder1", vec![resource("gamma")])
        .with_children("B", Vec::new())
}

/// A project with a folder of connections and one PostgreSQL-like data source.
///
/// ```text
/// Main/
///   Local/ mysql
///   pg/
///     public/ Tables/ (users (id, name), orders, tmp_log, [hidden] secrets)
///     [system] pg_catalog/
/// ```
pub fn database_forest() -> FakeSource {
    FakeSource::new()
        .with_children("", vec![DomainObject::new("Main", NodeKind::Project)])
        .with_children(
            "Main",
            vec![
                DomainObject::new("pg", NodeKind::DataSource).with_type("postgres"),
                DomainObject::new("Local", NodeKind::LocalFolder),
            ],
        )
        .with_children(
            "Main/Local",
            vec![DomainObject::new("mysql", NodeKind::DataSource).with_type("mysql")],
        )
        .with_children(
            "Main/pg",
            vec![
                DomainObject::new("public", NodeKind::DatabaseContainer).with_type("schema"),
                DomainObject::new("pg_catalog", NodeKind::DatabaseContainer)
                    .with_type("schema")
                    .system(),
            ],
        )
        .with_children(
            "Main/pg/public",
            vec![DomainObject::new("Tables", NodeKind::DatabaseFolder).with_type("tables")],
        )
        .with_children(
            "Main/pg/public/Tables",
            vec![
                table("users"),
                table("orders"),
                table("tmp_log"),
                table("secrets").hidden(),
            ],
        )
        .with_children(
            "Main/pg/public/Tables/users",
            vec![column("id", "integer"), column("name", "text")],
        )
        .with_children("Main/pg/public/Tables/orders", vec![column("id", "integer")])
}

/// Model listing everything through `source`.
pub fn model_for(source: &FakeSource) -> NavigatorModel {
    NavigatorModel::builder()
        .fallback_source(source.as_source_arc())
        .build()
}
