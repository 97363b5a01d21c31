//! Configuration sources and per-dialect rendering

use relgraph::config::{DialectKind, OrmConfig};
use relgraph::execution::SqliteProvider;
use relgraph::model::EntityType;
use relgraph::{OrmError, Query, Session};
use serial_test::serial;
use test_case::test_case;

use super::model::{Customer, TestDb};

fn rendering_session(dialect: DialectKind) -> Session {
    let config = OrmConfig {
        dialect,
        ..Default::default()
    };
    // Nothing is opened: these sessions only render
    Session::new(Box::new(SqliteProvider::new("unused.db")), config).unwrap()
}

#[test_case(DialectKind::Sqlite, r#"CREATE TABLE "CUSTOMER" ("ID" INTEGER PRIMARY KEY AUTOINCREMENT, "NAME" TEXT, "RATING" INTEGER NOT NULL)"#; "sqlite")]
#[test_case(DialectKind::Postgres, r#"CREATE TABLE "CUSTOMER" ("ID" BIGSERIAL PRIMARY KEY, "NAME" TEXT, "RATING" BIGINT NOT NULL)"#; "postgres")]
#[test_case(DialectKind::Mysql, "CREATE TABLE `CUSTOMER` (`ID` BIGINT AUTO_INCREMENT PRIMARY KEY, `NAME` TEXT, `RATING` BIGINT NOT NULL)"; "mysql")]
fn test_schema_per_dialect(dialect: DialectKind, expected: &str) {
    let session = rendering_session(dialect);
    let schema = session.schema_sql(&[Customer::entity_meta()]).unwrap();
    assert_eq!(schema, vec![expected.to_string()]);
}

#[test_case(DialectKind::Sqlite, "LIMIT 2 OFFSET 1"; "sqlite")]
#[test_case(DialectKind::Postgres, "DENSE_RANK() OVER"; "postgres")]
#[test_case(DialectKind::Mysql, "COUNT(DISTINCT"; "mysql")]
fn test_pagination_per_dialect(dialect: DialectKind, marker: &str) {
    let session = rendering_session(dialect);
    let rendered = session
        .render(
            &Query::<Customer>::new()
                .order_by(|c| c.field("name").expr())
                .skip(1)
                .take(2),
        )
        .unwrap();
    assert!(rendered.sql.contains(marker), "got {}", rendered.sql);
}

#[test]
fn test_yaml_file_config_drives_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relgraph.yaml");
    let db = dir.path().join("yaml.db");
    std::fs::write(
        &path,
        format!(
            "dialect: sqlite\ndatabase_url: \"{}\"\nlog_sql: true\nbatch_size: 25\n",
            db.display()
        ),
    )
    .unwrap();

    let config = OrmConfig::from_yaml_file(&path).unwrap();
    let session = Session::from_config(config).unwrap();

    assert_eq!(session.config().batch_size, 25);
    session.create_schema(&[Customer::entity_meta()]).unwrap();
    assert_eq!(session.count(&Query::<Customer>::new()).unwrap(), 0);
}

#[test]
fn test_small_batch_size_still_loads_everything() {
    let db = TestDb::with_config(OrmConfig {
        batch_size: 1,
        ..Default::default()
    });
    db.seed();

    let orders = db
        .session
        .list(
            Query::<super::model::Order>::new()
                .order_by(|o| o.field("id").expr())
                .load_batch(|o| o.field("customer")),
        )
        .unwrap();
    db.take_statements();
    for order in &orders {
        order.customer.get().unwrap();
    }

    // One fetch per distinct customer id
    assert_eq!(db.take_statements(), 2);
}

#[test]
#[serial]
fn test_session_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("env.db");
    std::env::set_var("RELGRAPH_DATABASE_URL", db.to_string_lossy().as_ref());
    std::env::set_var("RELGRAPH_BATCH_SIZE", "7");

    let session = Session::from_env();

    std::env::remove_var("RELGRAPH_DATABASE_URL");
    std::env::remove_var("RELGRAPH_BATCH_SIZE");
    let session = session.unwrap();
    assert_eq!(session.config().batch_size, 7);
    assert_eq!(session.config().dialect, DialectKind::Sqlite);
}

#[test]
#[serial]
fn test_invalid_environment_value_is_a_config_error() {
    std::env::set_var("RELGRAPH_BATCH_SIZE", "many");

    let result = OrmConfig::from_env();

    std::env::remove_var("RELGRAPH_BATCH_SIZE");
    assert!(result.is_err());
    let err: OrmError = result.unwrap_err().into();
    assert!(matches!(err, OrmError::Config(_)), "got {:?}", err);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_non_unicode_environment_value_is_rejected() {
    use relgraph::config::ConfigError;
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    std::env::set_var("RELGRAPH_DIALECT", OsStr::from_bytes(b"sql\xffite"));

    let result = OrmConfig::from_env();

    std::env::remove_var("RELGRAPH_DIALECT");
    assert!(
        matches!(result, Err(ConfigError::EnvVar(std::env::VarError::NotUnicode(_)))),
        "got {:?}",
        result
    );
}
