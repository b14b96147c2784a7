//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：本 crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。
//! 通过 `sqlx::migrate!()` 自动管理 schema 升级。

use crate::im::config::ClientConfig;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// 创建 SQLite 连接池并执行所有未执行的迁移
///
/// 内存数据库每个连接都是独立的库，因此只保留一个永不过期的连接。
pub async fn create_sqlite_pool_with_migration(config: &ClientConfig) -> Result<Pool<Sqlite>> {
    let options = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_db_connections.max(1))
    };

    let pool = options
        .connect(&config.db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", config.db_url))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("执行数据库迁移失败")?;

    info!("[DB] 📋 数据库已就绪: {}", config.db_url);
    Ok(pool)
}

/// 测试用：内存数据库
#[cfg(test)]
pub(crate) async fn memory_pool() -> Pool<Sqlite> {
    create_sqlite_pool_with_migration(&ClientConfig::in_memory())
        .await
        .expect("创建内存数据库失败")
}
