use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::Row;

use crate::application::ports::user_repository::{UserProfile, UserRepository};
use crate::infrastructure::db::PgPool;

pub struct SqlxUserRepository {
    pub pool: PgPool,
}

impl SqlxUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn profile_from_row(row: &sqlx::postgres::PgRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        name: row.get("name"),
        highlight_color: row.get("highlight_color"),
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn find_by_id(&self, id: &str) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query(r#"SELECT id, name, highlight_color FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    async fn find_profiles(&self, ids: &[String]) -> anyhow::Result<HashMap<String, UserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows =
            sqlx::query(r#"SELECT id, name, highlight_color FROM users WHERE id = ANY($1)"#)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(profile_from_row)
            .map(|p| (p.id.clone(), p))
            .collect())
    }
}
