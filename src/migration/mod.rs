use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::prelude::*;
use std::fs::create_dir_all;
use std::path::Path;

mod m20250101_000001_init;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20250101_000001_init::Migration)]
    }
}

/// 连接 SQLite 数据库，文件不存在时自动创建
pub async fn connect(db_path: &str) -> anyhow::Result<DatabaseConnection> {
    let path = Path::new(db_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent)
                .with_context(|| format!("无法创建数据库目录: {}", parent.display()))?;
        }
    }

    let url = format!("sqlite://{}?mode=rwc", db_path);
    let mut opts = ConnectOptions::new(url);
    opts.sqlx_logging(false);

    let db = Database::connect(opts)
        .await
        .with_context(|| format!("无法连接数据库: {}", db_path))?;
    Ok(db)
}
