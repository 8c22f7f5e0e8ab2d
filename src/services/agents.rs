use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Agent,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub profile_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Agent name is required".to_string()));
    }
    if name.trim().chars().count() > 120 {
        return Err(AppError::Validation("Agent name is too long".to_string()));
    }
    Ok(())
}

pub struct AgentService {
    db: PgPool,
}

impl AgentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(&self, only_active: bool) -> AppResult<Vec<Agent>> {
        let agents: Vec<Agent> = sqlx::query_as(
            "SELECT * FROM agents WHERE ($1 = false OR is_active) ORDER BY name",
        )
        .bind(only_active)
        .fetch_all(&self.db)
        .await?;
        Ok(agents)
    }

    pub async fn get(&self, agent_id: Uuid) -> AppResult<Agent> {
        sqlx::query_as("SELECT * FROM agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::AgentNotFound)
    }

    pub async fn create(&self, new: NewAgent) -> AppResult<Agent> {
        validate_name(&new.name)?;

        let agent: Agent = sqlx::query_as(
            r#"
            INSERT INTO agents (id, name, email, phone, is_active, profile_id)
            VALUES ($1, $2, $3, $4, true, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.name.trim())
        .bind(new.email)
        .bind(new.phone)
        .bind(new.profile_id)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(agent_id = %agent.id, "Agent created");
        Ok(agent)
    }

    pub async fn update(&self, agent_id: Uuid, update: AgentUpdate) -> AppResult<Agent> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        sqlx::query_as(
            r#"
            UPDATE agents
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                is_active = COALESCE($5, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.email)
        .bind(update.phone)
        .bind(update.is_active)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::AgentNotFound)
    }

    /// Conversations assigned to the agent become unassigned.
    pub async fn delete(&self, agent_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(agent_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::AgentNotFound);
        }

        tracing::info!(%agent_id, "Agent deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_names_are_validated() {
        assert!(validate_name("Carla").is_ok());
        assert!(matches!(validate_name("   "), Err(AppError::Validation(_))));
        assert!(validate_name(&"x".repeat(121)).is_err());
    }
}
