use std::{collections::BTreeSet, sync::Arc};

use rand::{distributions::Alphanumeric, Rng};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Connection, ConnectionStatus, ConnectionWithFavorite, Profile},
    realtime::{ChangeEvent, ChangeKind, Notification, NotificationLevel, Realtime, Table},
    services::{
        gateway::{LinkedProfile, QrCode, SessionGateway},
        poller::{PollOutcome, PollSettings, PollerRegistry, ProfileProbe},
    },
    storage::redis::RedisClient,
};

/// Flip `id` in the favorites set; returns whether it is now a favorite.
pub fn toggle_favorite(favorites: &mut BTreeSet<Uuid>, id: Uuid) -> bool {
    if favorites.remove(&id) {
        false
    } else {
        favorites.insert(id);
        true
    }
}

/// `"Loja Centro"` → `"loja-centro-x7k2qa"`.
pub fn instance_name_for(display_name: &str) -> AppResult<String> {
    let slug = display_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        return Err(AppError::Validation(
            "Instance name must contain letters or digits".to_string(),
        ));
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();

    Ok(format!("{}-{}", slug, suffix))
}

pub struct ConnectionService {
    db: PgPool,
    redis: RedisClient,
    realtime: Realtime,
    gateway: SessionGateway,
    pollers: Arc<PollerRegistry>,
}

impl ConnectionService {
    pub fn new(
        db: PgPool,
        redis: RedisClient,
        realtime: Realtime,
        gateway: SessionGateway,
        pollers: Arc<PollerRegistry>,
    ) -> Self {
        Self {
            db,
            redis,
            realtime,
            gateway,
            pollers,
        }
    }

    /// Admins see every connection, everyone else only their own.
    pub async fn list(&self, viewer: &Profile) -> AppResult<Vec<ConnectionWithFavorite>> {
        let connections: Vec<Connection> = if viewer.is_admin() {
            sqlx::query_as("SELECT * FROM connections ORDER BY created_at DESC")
                .fetch_all(&self.db)
                .await?
        } else {
            sqlx::query_as("SELECT * FROM connections WHERE user_id = $1 ORDER BY created_at DESC")
                .bind(viewer.id)
                .fetch_all(&self.db)
                .await?
        };

        let favorites: BTreeSet<Uuid> = self
            .redis
            .get_favorites(&viewer.id.to_string())
            .await?
            .into_iter()
            .collect();

        let mut result: Vec<ConnectionWithFavorite> = connections
            .into_iter()
            .map(|connection| ConnectionWithFavorite {
                is_favorite: favorites.contains(&connection.id),
                connection,
            })
            .collect();
        // Favorites first, otherwise keep newest-first.
        result.sort_by_key(|c| !c.is_favorite);

        Ok(result)
    }

    pub async fn get(&self, viewer: &Profile, connection_id: Uuid) -> AppResult<Connection> {
        let connection: Connection = sqlx::query_as("SELECT * FROM connections WHERE id = $1")
            .bind(connection_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::ConnectionNotFound)?;

        // Foreign connections look absent to non-admins.
        if !viewer.is_admin() && connection.user_id != viewer.id {
            return Err(AppError::ConnectionNotFound);
        }

        Ok(connection)
    }

    pub async fn create_instance(&self, owner: &Profile, display_name: &str) -> AppResult<Connection> {
        let instance_name = instance_name_for(display_name)?;

        self.gateway.create_instance(&instance_name).await?;

        let connection: Connection = sqlx::query_as(
            r#"
            INSERT INTO connections (id, instance_name, user_id, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&instance_name)
        .bind(owner.id)
        .bind(ConnectionStatus::Disconnected)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(connection_id = %connection.id, %instance_name, "Instance created");
        self.realtime
            .publish_record(Table::Connections, ChangeKind::Insert, &connection)
            .await;

        Ok(connection)
    }

    /// Request a QR code and start watching for the pairing to finish.
    pub async fn connect(
        &self,
        viewer: &Profile,
        connection_id: Uuid,
        settings: PollSettings,
    ) -> AppResult<QrCode> {
        let connection = self.get(viewer, connection_id).await?;

        let qr = self.gateway.connect(&connection.instance_name).await?;
        self.set_status(connection_id, ConnectionStatus::Connecting).await?;

        self.start_polling(&connection, settings);

        Ok(qr)
    }

    pub fn start_polling(&self, connection: &Connection, settings: PollSettings) {
        let probe: Arc<dyn ProfileProbe> = Arc::new(self.gateway.clone());
        let db = self.db.clone();
        let realtime = self.realtime.clone();
        let connection_id = connection.id;
        let owner = connection.user_id;

        self.pollers.start(
            connection_id,
            probe,
            connection.instance_name.clone(),
            settings,
            move |outcome| async move {
                if let Err(e) = record_outcome(&db, &realtime, connection_id, owner, outcome).await {
                    tracing::error!(%connection_id, "Failed to record pairing outcome: {}", e);
                }
            },
        );
    }

    /// Live status from the session service; errors read as disconnected.
    pub async fn status(&self, viewer: &Profile, connection_id: Uuid) -> AppResult<Connection> {
        let connection = self.get(viewer, connection_id).await?;
        let live = self.gateway.status(&connection.instance_name).await;

        // While a poll is waiting on the QR scan the stored status stays "connecting".
        if live == connection.status
            || (live == ConnectionStatus::Disconnected && self.pollers.is_polling(connection_id))
        {
            return Ok(connection);
        }

        self.set_status(connection_id, live).await
    }

    pub async fn disconnect(&self, viewer: &Profile, connection_id: Uuid) -> AppResult<Connection> {
        let connection = self.get(viewer, connection_id).await?;

        // A failed upstream call leaves the running poll in place.
        self.gateway.disconnect(&connection.instance_name).await?;
        self.pollers.cancel(connection_id);

        let connection: Connection = sqlx::query_as(
            r#"
            UPDATE connections
            SET status = $2, whatsapp_contact = NULL, profile_name = NULL,
                profile_picture_url = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(connection_id)
        .bind(ConnectionStatus::Disconnected)
        .fetch_one(&self.db)
        .await?;

        self.realtime
            .publish_record(Table::Connections, ChangeKind::Update, &connection)
            .await;

        Ok(connection)
    }

    pub async fn delete_instance(&self, viewer: &Profile, connection_id: Uuid) -> AppResult<()> {
        let connection = self.get(viewer, connection_id).await?;

        self.gateway.delete_instance(&connection.instance_name).await?;
        self.pollers.cancel(connection_id);

        sqlx::query("DELETE FROM connections WHERE id = $1")
            .bind(connection_id)
            .execute(&self.db)
            .await?;

        self.redis
            .remove_favorite(&connection.user_id.to_string(), &connection_id.to_string())
            .await?;

        tracing::info!(%connection_id, instance_name = %connection.instance_name, "Instance deleted");
        self.realtime
            .publish(ChangeEvent::deleted(Table::Connections, connection_id))
            .await;

        Ok(())
    }

    pub async fn favorites(&self, viewer: &Profile) -> AppResult<Vec<Uuid>> {
        self.redis.get_favorites(&viewer.id.to_string()).await
    }

    pub async fn toggle_favorite(&self, viewer: &Profile, connection_id: Uuid) -> AppResult<bool> {
        self.get(viewer, connection_id).await?;

        let user_key = viewer.id.to_string();
        let mut favorites: BTreeSet<Uuid> =
            self.redis.get_favorites(&user_key).await?.into_iter().collect();

        let now_favorite = toggle_favorite(&mut favorites, connection_id);
        if now_favorite {
            self.redis
                .add_favorite(&user_key, &connection_id.to_string())
                .await?;
        } else {
            self.redis
                .remove_favorite(&user_key, &connection_id.to_string())
                .await?;
        }

        Ok(now_favorite)
    }

    async fn set_status(&self, connection_id: Uuid, status: ConnectionStatus) -> AppResult<Connection> {
        let connection: Connection = sqlx::query_as(
            "UPDATE connections SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(connection_id)
        .bind(status)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::ConnectionNotFound)?;

        self.realtime
            .publish_record(Table::Connections, ChangeKind::Update, &connection)
            .await;

        Ok(connection)
    }
}

async fn record_outcome(
    db: &PgPool,
    realtime: &Realtime,
    connection_id: Uuid,
    owner: Uuid,
    outcome: PollOutcome,
) -> AppResult<()> {
    match outcome {
        PollOutcome::Linked(profile) => {
            let Some(connection) = mark_connected(db, connection_id, &profile).await? else {
                tracing::info!(%connection_id, "Pairing finished after the connection left connecting");
                return Ok(());
            };
            realtime
                .publish_record(Table::Connections, ChangeKind::Update, &connection)
                .await;
            realtime
                .notify(
                    owner,
                    Notification {
                        level: NotificationLevel::Success,
                        title: "WhatsApp conectado".to_string(),
                        description: Some(format!(
                            "{} ({})",
                            profile.profile_name, profile.contact
                        )),
                    },
                )
                .await;
        }
        PollOutcome::GaveUp { attempts } => {
            let connection: Option<Connection> = sqlx::query_as(
                r#"
                UPDATE connections SET status = $2, updated_at = NOW()
                WHERE id = $1 AND status = $3
                RETURNING *
                "#,
            )
            .bind(connection_id)
            .bind(ConnectionStatus::Disconnected)
            .bind(ConnectionStatus::Connecting)
            .fetch_optional(db)
            .await?;

            if let Some(connection) = connection {
                realtime
                    .publish_record(Table::Connections, ChangeKind::Update, &connection)
                    .await;
            }
            realtime
                .notify(
                    owner,
                    Notification {
                        level: NotificationLevel::Error,
                        title: "Tempo esgotado".to_string(),
                        description: Some(format!(
                            "QR code não foi lido após {} tentativas",
                            attempts
                        )),
                    },
                )
                .await;
        }
    }
    Ok(())
}

/// Only a connection still waiting on its QR scan becomes connected; a
/// disconnect or delete that landed first wins.
async fn mark_connected(
    db: &PgPool,
    connection_id: Uuid,
    profile: &LinkedProfile,
) -> AppResult<Option<Connection>> {
    let connection: Option<Connection> = sqlx::query_as(
        r#"
        UPDATE connections
        SET status = $2, whatsapp_contact = $3, profile_name = $4,
            profile_picture_url = $5, updated_at = NOW()
        WHERE id = $1 AND status = $6
        RETURNING *
        "#,
    )
    .bind(connection_id)
    .bind(ConnectionStatus::Connected)
    .bind(&profile.contact)
    .bind(&profile.profile_name)
    .bind(&profile.profile_picture_url)
    .bind(ConnectionStatus::Connecting)
    .fetch_optional(db)
    .await?;

    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_twice_restores_favorites() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut favorites: BTreeSet<Uuid> = [a].into_iter().collect();
        let original = favorites.clone();

        assert!(toggle_favorite(&mut favorites, b));
        assert!(favorites.contains(&b));
        assert!(!toggle_favorite(&mut favorites, b));

        assert_eq!(favorites, original);
    }

    #[test]
    fn instance_names_are_slugged_and_suffixed() {
        let name = instance_name_for("  Loja Centro / SP ").unwrap();
        let (slug, suffix) = name.rsplit_once('-').unwrap();

        assert_eq!(slug, "loja-centro-sp");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn instance_name_requires_letters_or_digits() {
        assert!(instance_name_for(" !! ").is_err());
    }
}
