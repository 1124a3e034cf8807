//! Robot operations.

use super::LongTermMemory;
use crate::types::{map_db_error, robot_from_row, Robot};
use htm_core::error::{Error, Result};

impl LongTermMemory {
    /// Fetch a robot by name, creating it on first use.
    pub async fn get_or_create_robot(&self, name: &str) -> Result<Robot> {
        if name.trim().is_empty() {
            return Err(Error::Validation("robot name must not be empty".to_string()));
        }

        let row = sqlx::query(
            "INSERT INTO robots (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET last_active = now() \
             RETURNING id, name, last_active",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        robot_from_row(&row)
    }

    /// Fetch a robot by id.
    pub async fn get_robot(&self, robot_id: i64) -> Result<Option<Robot>> {
        let row = sqlx::query("SELECT id, name, last_active FROM robots WHERE id = $1")
            .bind(robot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(robot_from_row).transpose()
    }

    /// Bump a robot's `last_active`.
    pub async fn touch_robot(&self, robot_id: i64) -> Result<()> {
        let affected = sqlx::query("UPDATE robots SET last_active = now() WHERE id = $1")
            .bind(robot_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("robot {robot_id}")));
        }
        Ok(())
    }
}
