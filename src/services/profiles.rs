use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Profile, ProfileStatus, Role},
    realtime::{ChangeKind, Realtime, Table},
    storage::redis::RedisClient,
};

/// Admin-side profile management: approval, deactivation and roles.
pub struct ProfileService {
    db: PgPool,
    redis: RedisClient,
    realtime: Realtime,
}

/// An admin may not change their own status or demote themself.
fn guard_self_change(acting: &Profile, target_id: Uuid) -> AppResult<()> {
    if acting.id == target_id {
        return Err(AppError::BadRequest(
            "Admins cannot change their own access".to_string(),
        ));
    }
    Ok(())
}

impl ProfileService {
    pub fn new(db: PgPool, redis: RedisClient, realtime: Realtime) -> Self {
        Self {
            db,
            redis,
            realtime,
        }
    }

    pub async fn list(&self, status: Option<ProfileStatus>) -> AppResult<Vec<Profile>> {
        let profiles: Vec<Profile> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM profiles WHERE status = $1 ORDER BY created_at DESC")
                    .bind(status)
                    .fetch_all(&self.db)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM profiles ORDER BY created_at DESC")
                    .fetch_all(&self.db)
                    .await?
            }
        };
        Ok(profiles)
    }

    pub async fn set_status(
        &self,
        acting: &Profile,
        target_id: Uuid,
        status: ProfileStatus,
    ) -> AppResult<Profile> {
        guard_self_change(acting, target_id)?;

        let profile: Profile = sqlx::query_as(
            "UPDATE profiles SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(status)
        .bind(target_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::ProfileNotFound)?;

        if status != ProfileStatus::Active {
            // Drop refresh sessions so the change takes effect everywhere.
            sqlx::query("DELETE FROM sessions WHERE profile_id = $1")
                .bind(target_id)
                .execute(&self.db)
                .await?;
        }

        self.after_change(&profile).await?;
        tracing::info!(admin = %acting.id, profile_id = %target_id, ?status, "Profile status changed");

        Ok(profile)
    }

    pub async fn set_role(&self, acting: &Profile, target_id: Uuid, role: Role) -> AppResult<Profile> {
        guard_self_change(acting, target_id)?;

        let profile: Profile = sqlx::query_as(
            "UPDATE profiles SET role = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(role)
        .bind(target_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::ProfileNotFound)?;

        self.after_change(&profile).await?;

        Ok(profile)
    }

    pub async fn update_own(&self, profile_id: Uuid, full_name: &str) -> AppResult<Profile> {
        if full_name.trim().is_empty() {
            return Err(AppError::Validation("Full name is required".to_string()));
        }

        let profile: Profile = sqlx::query_as(
            "UPDATE profiles SET full_name = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
        )
        .bind(full_name.trim())
        .bind(profile_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::ProfileNotFound)?;

        self.after_change(&profile).await?;

        Ok(profile)
    }

    async fn after_change(&self, profile: &Profile) -> AppResult<()> {
        self.redis.invalidate_profile(&profile.id.to_string()).await?;
        self.realtime
            .publish_record(Table::Profiles, ChangeKind::Update, profile)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn admin_cannot_change_own_access() {
        let admin = Profile {
            id: Uuid::new_v4(),
            email: "admin@crm.dev".into(),
            full_name: "Admin".into(),
            password_hash: String::new(),
            role: Role::Admin,
            status: ProfileStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(guard_self_change(&admin, admin.id).is_err());
        assert!(guard_self_change(&admin, Uuid::new_v4()).is_ok());
    }
}
