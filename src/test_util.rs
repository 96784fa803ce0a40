use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::auth::{self, TOKEN_TYPE_ACCESS};
use crate::config::AppConfig;
use crate::db;
use crate::entity::{like, post, user};

pub fn test_config() -> AppConfig {
    AppConfig {
        server_port: 0,
        sqlite_path: String::new(),
        database_url: Some("sqlite::memory:".to_string()),
        jwt_secret: "test-secret".to_string(),
        token_header: "authorization".to_string(),
        access_token_minutes: 60,
        refresh_token_days: 7,
    }
}

// single pooled connection so the in-memory database is shared
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1);
    let db = Database::connect(options).await.expect("in-memory sqlite");
    db::init_schema(&db).await;
    db
}

pub fn bearer(config: &AppConfig, user_id: i32) -> String {
    let token = auth::generate_token(config, user_id, TOKEN_TYPE_ACCESS).expect("token");
    format!("Bearer {}", token)
}

pub async fn seed_user(db: &DatabaseConnection, username: &str, is_staff: bool) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set(bcrypt::hash("development", 4).expect("hash")),
        is_staff: Set(is_staff),
        created: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub async fn seed_post(db: &DatabaseConnection, user_id: i32, text: &str) -> post::Model {
    post::ActiveModel {
        user_id: Set(user_id),
        text: Set(text.to_string()),
        created: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert post")
}

pub async fn seed_like_at(
    db: &DatabaseConnection,
    user_id: i32,
    post_id: i32,
    created: DateTime<Utc>,
) -> like::Model {
    like::ActiveModel {
        user_id: Set(user_id),
        post_id: Set(post_id),
        created: Set(Some(created)),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert like")
}
