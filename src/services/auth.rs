use std::time::Duration as StdDuration;

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{Profile, ProfileStatus, Role, Session, TokenPair},
    storage::redis::RedisClient,
};

const PROFILE_FETCH_ATTEMPTS: u32 = 3;
const PROFILE_FETCH_DELAY: StdDuration = StdDuration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,     // profile id
    pub sid: String,     // session id
    pub typ: TokenType,  // access or refresh
    pub iss: String,     // issuer
    pub exp: i64,        // expiry
    pub iat: i64,        // issued at
}

/// Maps a profile status to whether the dashboard may be used.
pub fn check_access(status: ProfileStatus) -> AppResult<()> {
    match status {
        ProfileStatus::Active => Ok(()),
        ProfileStatus::Pending => Err(AppError::AccountPending),
        ProfileStatus::Inactive => Err(AppError::AccountInactive),
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn validate_signup(email: &str, password: &str, full_name: &str) -> AppResult<()> {
    let email = email.trim();
    if email.len() < 3 || !email.contains('@') {
        return Err(AppError::Validation("Invalid email".to_string()));
    }
    if password.len() < 6 {
        return Err(AppError::Validation(
            "Password must have at least 6 characters".to_string(),
        ));
    }
    if full_name.trim().is_empty() {
        return Err(AppError::Validation("Full name is required".to_string()));
    }
    Ok(())
}

pub struct AuthService {
    db: PgPool,
    redis: RedisClient,
    config: Config,
}

impl AuthService {
    pub fn new(db: PgPool, redis: RedisClient, config: Config) -> Self {
        Self { db, redis, config }
    }

    /// Create a profile awaiting admin approval.
    ///
    /// The very first profile bootstraps the system and is created as an
    /// active admin.
    pub async fn signup(&self, email: &str, password: &str, full_name: &str) -> AppResult<Profile> {
        validate_signup(email, password, full_name)?;
        let email = email.trim().to_lowercase();

        let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM profiles WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.db)
            .await?;

        if existing.is_some() {
            return Err(AppError::ProfileAlreadyExists);
        }

        let password_hash = hash(password, DEFAULT_COST)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;

        let mut tx = self.db.begin().await?;

        // Serializes concurrent signups so only one can see an empty table.
        sqlx::query("LOCK TABLE profiles IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
            .fetch_one(&mut *tx)
            .await?;

        let (role, status) = if count == 0 {
            (Role::Admin, ProfileStatus::Active)
        } else {
            (Role::Viewer, ProfileStatus::Pending)
        };

        let profile: Profile = sqlx::query_as(
            r#"
            INSERT INTO profiles (id, email, full_name, password_hash, role, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(full_name.trim())
        .bind(password_hash)
        .bind(role)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(profile_id = %profile.id, ?status, "Profile created");

        Ok(profile)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<(Profile, TokenPair)> {
        let profile: Profile = sqlx::query_as("SELECT * FROM profiles WHERE email = $1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify(password, &profile.password_hash)
            .map_err(|e| anyhow::anyhow!("Verify error: {}", e))?
        {
            return Err(AppError::InvalidCredentials);
        }

        check_access(profile.status)?;

        let session_id = Uuid::new_v4();
        let tokens = self.generate_token_pair(&profile.id.to_string(), &session_id.to_string())?;
        let refresh_expires =
            Utc::now() + Duration::seconds(self.config.jwt.refresh_token_ttl.as_secs() as i64);

        sqlx::query(
            r#"
            INSERT INTO sessions (id, profile_id, refresh_token_hash, expires_at, last_used_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(session_id)
        .bind(profile.id)
        .bind(token_digest(&tokens.refresh_token))
        .bind(refresh_expires)
        .execute(&self.db)
        .await?;

        tracing::info!(profile_id = %profile.id, "Profile logged in");

        Ok((profile, tokens))
    }

    // Token validation
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let key = DecodingKey::from_secret(self.config.jwt.secret.as_bytes());
        let mut validation = Validation::default();
        validation.set_issuer(&[self.config.jwt.issuer.as_str()]);

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }

    pub fn validate_access_token(&self, token: &str) -> AppResult<Claims> {
        let claims = self.validate_token(token)?;
        if claims.typ != TokenType::Access {
            return Err(AppError::InvalidToken);
        }
        Ok(claims)
    }

    // Refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = self.validate_token(refresh_token)?;
        if claims.typ != TokenType::Refresh {
            return Err(AppError::InvalidToken);
        }

        let session_id = Uuid::parse_str(&claims.sid).map_err(|_| AppError::InvalidToken)?;
        let session: Session = sqlx::query_as("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if session.expires_at < Utc::now() || session.refresh_token_hash != token_digest(refresh_token)
        {
            return Err(AppError::InvalidToken);
        }

        // A deactivated profile cannot keep its session alive.
        let profile = self.get_user_profile_fast(session.profile_id).await?;
        check_access(profile.status)?;

        let tokens = self.generate_token_pair(&claims.sub, &claims.sid)?;

        sqlx::query(
            "UPDATE sessions SET refresh_token_hash = $1, last_used_at = NOW() WHERE id = $2",
        )
        .bind(token_digest(&tokens.refresh_token))
        .bind(session.id)
        .execute(&self.db)
        .await?;

        Ok(tokens)
    }

    pub async fn logout(&self, session_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn logout_all(&self, profile_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&self.db)
            .await?;
        self.redis.invalidate_profile(&profile_id.to_string()).await?;
        Ok(())
    }

    /// Profile lookup used on every request: Redis first, then the
    /// database with a short retry loop.
    pub async fn get_user_profile_fast(&self, profile_id: Uuid) -> AppResult<Profile> {
        let key = profile_id.to_string();

        match self.redis.get_profile(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Profile>(&cached) {
                Ok(profile) => return Ok(profile),
                Err(e) => tracing::warn!(%profile_id, "Discarding cached profile: {}", e),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(%profile_id, "Profile cache unavailable: {}", e),
        }

        // Only database errors are retried; a missing row fails at once.
        let mut last_error = AppError::ProfileNotFound;
        for attempt in 1..=PROFILE_FETCH_ATTEMPTS {
            let result: Result<Option<Profile>, sqlx::Error> =
                sqlx::query_as("SELECT * FROM profiles WHERE id = $1")
                    .bind(profile_id)
                    .fetch_optional(&self.db)
                    .await;

            match result {
                Ok(Some(profile)) => {
                    self.cache_profile(&profile).await;
                    return Ok(profile);
                }
                Ok(None) => return Err(AppError::ProfileNotFound),
                Err(e) => {
                    tracing::warn!(%profile_id, attempt, "Profile fetch failed: {}", e);
                    last_error = AppError::Database(e);
                }
            }

            if attempt < PROFILE_FETCH_ATTEMPTS {
                tokio::time::sleep(PROFILE_FETCH_DELAY).await;
            }
        }

        Err(last_error)
    }

    async fn cache_profile(&self, profile: &Profile) {
        let json = match serde_json::to_string(profile) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to encode profile: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .redis
            .set_profile(
                &profile.id.to_string(),
                &json,
                self.config.redis.profile_cache_ttl,
            )
            .await
        {
            tracing::warn!(profile_id = %profile.id, "Failed to cache profile: {}", e);
        }
    }

    fn generate_token_pair(&self, profile_id: &str, session_id: &str) -> AppResult<TokenPair> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.config.jwt.access_token_ttl.as_secs() as i64);
        let refresh_exp =
            now + Duration::seconds(self.config.jwt.refresh_token_ttl.as_secs() as i64);

        let claims = |typ, exp: chrono::DateTime<Utc>| Claims {
            sub: profile_id.to_string(),
            sid: session_id.to_string(),
            typ,
            iss: self.config.jwt.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let key = EncodingKey::from_secret(self.config.jwt.secret.as_bytes());

        let access_token = encode(&Header::default(), &claims(TokenType::Access, access_exp), &key)?;
        let refresh_token =
            encode(&Header::default(), &claims(TokenType::Refresh, refresh_exp), &key)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at: access_exp,
        })
    }
}
