//! Database-backed tests.
//!
//! Each test starts its own Postgres and Redis containers, runs the
//! migrations and drives the services against them.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use inbox_crm::{
    config::Config,
    error::AppError,
    models::{
        Channel, Connection, ConnectionStatus, Conversation, Direction, FileRef, Profile, Role,
    },
    realtime::Realtime,
    services::{
        auth::AuthService,
        connections::ConnectionService,
        conversations::{ConversationService, NewConversation},
        crm::{CrmService, NewStage},
        gateway::SessionGateway,
        poller::{PollSettings, PollerRegistry},
    },
    storage::redis::RedisClient,
};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use testcontainers_modules::{
    postgres::Postgres,
    redis::Redis,
    testcontainers::{runners::AsyncRunner, ContainerAsync},
};
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

struct TestEnv {
    db: PgPool,
    redis: RedisClient,
    _postgres: ContainerAsync<Postgres>,
    _redis: ContainerAsync<Redis>,
}

impl TestEnv {
    async fn start() -> anyhow::Result<Self> {
        let postgres = Postgres::default().start().await?;
        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let database_url = format!(
            "postgres://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let redis_container = Redis::default().start().await?;
        let redis_host = redis_container.get_host().await?;
        let redis_port = redis_container.get_host_port_ipv4(6379).await?;
        let redis = RedisClient::new(&format!("redis://{}:{}/0", redis_host, redis_port)).await?;

        Ok(Self {
            db,
            redis,
            _postgres: postgres,
            _redis: redis_container,
        })
    }

    fn realtime(&self) -> Realtime {
        Realtime::new(self.redis.clone())
    }

    fn conversations(&self) -> ConversationService {
        ConversationService::new(self.db.clone(), self.realtime())
    }

    fn crm(&self) -> CrmService {
        CrmService::new(self.db.clone(), self.realtime())
    }

    fn auth(&self) -> AuthService {
        AuthService::new(self.db.clone(), self.redis.clone(), Config::load())
    }

    fn connections(&self, gateway_url: &str, pollers: Arc<PollerRegistry>) -> anyhow::Result<ConnectionService> {
        let mut webhooks = Config::load().webhooks;
        webhooks.profile_url = format!("{}/perfil", gateway_url);
        webhooks.disconnect_url = format!("{}/desconectar", gateway_url);
        webhooks.request_timeout = Duration::from_secs(2);

        Ok(ConnectionService::new(
            self.db.clone(),
            self.redis.clone(),
            self.realtime(),
            SessionGateway::new(&webhooks)?,
            pollers,
        ))
    }

    async fn conversation(&self, contact_name: &str) -> anyhow::Result<Conversation> {
        let conversation = self
            .conversations()
            .create_conversation(NewConversation {
                contact_name: contact_name.to_string(),
                contact_phone: Some("5511988887777".to_string()),
                contact_avatar_url: None,
                channel: Channel::Whatsapp,
                connection_id: None,
            })
            .await?;
        Ok(conversation)
    }

    async fn connection(&self, owner: &Profile, status: ConnectionStatus) -> anyhow::Result<Connection> {
        let connection: Connection = sqlx::query_as(
            "INSERT INTO connections (id, instance_name, user_id, status) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(format!("loja-{}", Uuid::new_v4().simple()))
        .bind(owner.id)
        .bind(status)
        .fetch_one(&self.db)
        .await?;
        Ok(connection)
    }

    async fn stored_connection(&self, id: Uuid) -> anyhow::Result<Connection> {
        let connection: Connection = sqlx::query_as("SELECT * FROM connections WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        Ok(connection)
    }
}

fn linked_profile() -> serde_json::Value {
    json!({
        "profileName": "Loja Centro",
        "wuid": "5511999990000",
        "profilePictureUrl": "https://pps.whatsapp.net/v/p.jpg",
    })
}

async fn wait_until_idle(pollers: &PollerRegistry, id: Uuid) {
    for _ in 0..500 {
        if !pollers.is_polling(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("poll for {} never finished", id);
}

#[tokio::test]
async fn unread_count_follows_message_direction() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let service = env.conversations();
    let conversation = env.conversation("Maria").await?;
    assert_eq!(conversation.unread_count, 0);

    let (first, after_first) = service
        .insert_message(conversation.id, "Oi, tudo bem?", Direction::Received, &FileRef::default())
        .await?;
    assert_eq!(first.number, 1);
    assert_eq!(after_first.unread_count, 1);

    let (second, after_second) = service
        .insert_message(conversation.id, "Quero um orçamento", Direction::Received, &FileRef::default())
        .await?;
    assert_eq!(second.number, 2);
    assert_eq!(after_second.unread_count, 2);

    let (reply, after_reply) = service
        .insert_message(conversation.id, "Claro!", Direction::Sent, &FileRef::default())
        .await?;
    assert_eq!(reply.number, 3);
    assert_eq!(after_reply.unread_count, 2);
    assert_eq!(after_reply.last_message.as_deref(), Some("Claro!"));

    let read = service.mark_read(conversation.id).await?;
    assert_eq!(read.unread_count, 0);

    let stored = service.get_conversation(conversation.id).await?;
    assert_eq!(stored.unread_count, 0);
    Ok(())
}

#[tokio::test]
async fn message_numbers_are_per_conversation() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let service = env.conversations();
    let maria = env.conversation("Maria").await?;
    let joao = env.conversation("João").await?;
    assert_ne!(maria.number, joao.number);

    service
        .insert_message(maria.id, "um", Direction::Received, &FileRef::default())
        .await?;
    service
        .insert_message(maria.id, "dois", Direction::Received, &FileRef::default())
        .await?;
    let (first_for_joao, _) = service
        .insert_message(joao.id, "olá", Direction::Received, &FileRef::default())
        .await?;
    assert_eq!(first_for_joao.number, 1);

    let messages = service.get_messages(maria.id, 50, None).await?;
    let numbers: Vec<i64> = messages.iter().map(|m| m.number).collect();
    assert_eq!(numbers, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn insert_into_missing_conversation_fails() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;

    let result = env
        .conversations()
        .insert_message(Uuid::new_v4(), "oi", Direction::Received, &FileRef::default())
        .await;

    assert!(matches!(result, Err(AppError::ConversationNotFound)));
    Ok(())
}

#[tokio::test]
async fn deleting_a_stage_moves_its_conversations_to_the_default() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let crm = env.crm();

    let stage = crm
        .create_stage(NewStage {
            name: "Proposta".to_string(),
            key: None,
            color: None,
        })
        .await?;
    assert_eq!(stage.key, "proposta");

    let conversation = env.conversation("Maria").await?;
    assert_eq!(conversation.crm_stage, "novo");
    let moved_in = crm.move_conversation(conversation.id, "proposta").await?;
    assert_eq!(moved_in.crm_stage, "proposta");

    let moved = crm.delete_stage(stage.id).await?;
    assert_eq!(moved, 1);

    let stored = env.conversations().get_conversation(conversation.id).await?;
    assert_eq!(stored.crm_stage, "novo");

    let stages = crm.list_stages().await?;
    assert!(stages.iter().all(|s| s.key != "proposta"));
    let positions: Vec<i32> = stages.iter().map(|s| s.position).collect();
    let expected: Vec<i32> = (0..stages.len() as i32).collect();
    assert_eq!(positions, expected);
    Ok(())
}

#[tokio::test]
async fn default_stage_cannot_be_deleted() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let crm = env.crm();

    let default_stage = crm
        .list_stages()
        .await?
        .into_iter()
        .find(|s| s.is_default)
        .ok_or_else(|| anyhow::anyhow!("no default stage seeded"))?;

    let result = crm.delete_stage(default_stage.id).await;
    assert!(matches!(result, Err(AppError::DefaultStageLocked)));
    Ok(())
}

#[tokio::test]
async fn duplicate_stage_key_is_a_conflict() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let crm = env.crm();
    let stage = |name: &str| NewStage {
        name: name.to_string(),
        key: Some("follow_up".to_string()),
        color: None,
    };

    crm.create_stage(stage("Follow up")).await?;
    let result = crm.create_stage(stage("Retorno")).await;

    assert!(matches!(result, Err(AppError::StageAlreadyExists)));
    Ok(())
}

#[tokio::test]
async fn concurrent_first_signups_make_a_single_admin() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let auth = env.auth();

    let (ana, bruno) = tokio::join!(
        auth.signup("ana@loja.com", "segredo1", "Ana"),
        auth.signup("bruno@loja.com", "segredo2", "Bruno"),
    );
    let (ana, bruno) = (ana?, bruno?);

    let admins = [&ana, &bruno]
        .iter()
        .filter(|p| p.role == Role::Admin)
        .count();
    assert_eq!(admins, 1);
    Ok(())
}

#[tokio::test]
async fn missing_profile_fails_without_retrying() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;

    let started = Instant::now();
    let result = env.auth().get_user_profile_fast(Uuid::new_v4()).await;

    assert!(matches!(result, Err(AppError::ProfileNotFound)));
    assert!(started.elapsed() < Duration::from_millis(400));
    Ok(())
}

#[tokio::test]
async fn finished_pairing_marks_connecting_instance_connected() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let gateway = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/perfil"))
        .respond_with(ResponseTemplate::new(200).set_body_json(linked_profile()))
        .mount(&gateway)
        .await;

    let owner = env.auth().signup("ana@loja.com", "segredo1", "Ana").await?;
    let connection = env.connection(&owner, ConnectionStatus::Connecting).await?;
    let pollers = Arc::new(PollerRegistry::new());
    let service = env.connections(&gateway.uri(), pollers.clone())?;

    service.start_polling(
        &connection,
        PollSettings {
            interval: Duration::from_millis(5),
            max_attempts: Some(3),
        },
    );
    wait_until_idle(&pollers, connection.id).await;

    let stored = env.stored_connection(connection.id).await?;
    assert_eq!(stored.status, ConnectionStatus::Connected);
    assert_eq!(stored.profile_name.as_deref(), Some("Loja Centro"));
    assert_eq!(stored.whatsapp_contact.as_deref(), Some("5511999990000"));
    Ok(())
}

#[tokio::test]
async fn finished_pairing_does_not_override_a_disconnect() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let gateway = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/perfil"))
        .respond_with(ResponseTemplate::new(200).set_body_json(linked_profile()))
        .mount(&gateway)
        .await;

    let owner = env.auth().signup("ana@loja.com", "segredo1", "Ana").await?;
    // The user already disconnected while the pairing result was in flight.
    let connection = env.connection(&owner, ConnectionStatus::Disconnected).await?;
    let pollers = Arc::new(PollerRegistry::new());
    let service = env.connections(&gateway.uri(), pollers.clone())?;

    service.start_polling(
        &connection,
        PollSettings {
            interval: Duration::from_millis(5),
            max_attempts: Some(3),
        },
    );
    wait_until_idle(&pollers, connection.id).await;

    let stored = env.stored_connection(connection.id).await?;
    assert_eq!(stored.status, ConnectionStatus::Disconnected);
    assert!(stored.profile_name.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_disconnect_keeps_the_poll_running() -> anyhow::Result<()> {
    let env = TestEnv::start().await?;
    let gateway = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/perfil"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&gateway)
        .await;
    Mock::given(method("POST"))
        .and(path("/desconectar"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&gateway)
        .await;

    let owner = env.auth().signup("ana@loja.com", "segredo1", "Ana").await?;
    let connection = env.connection(&owner, ConnectionStatus::Connecting).await?;
    let pollers = Arc::new(PollerRegistry::new());
    let service = env.connections(&gateway.uri(), pollers.clone())?;

    service.start_polling(
        &connection,
        PollSettings {
            interval: Duration::from_millis(20),
            max_attempts: None,
        },
    );

    let result = service.disconnect(&owner, connection.id).await;
    assert!(matches!(result, Err(AppError::Upstream(_))));
    assert!(pollers.is_polling(connection.id));

    let stored = env.stored_connection(connection.id).await?;
    assert_eq!(stored.status, ConnectionStatus::Connecting);

    pollers.cancel(connection.id);
    Ok(())
}
