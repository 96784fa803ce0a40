use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;
use crate::policy::Actor;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    #[serde(rename = "tokenType")]
    pub token_type: String,
    pub exp: usize,
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i32,
    pub is_staff: bool,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user_id,
            is_staff: self.is_staff,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl OptionalAuthUser {
    pub fn actor(&self) -> Option<Actor> {
        self.0.as_ref().map(AuthUser::actor)
    }
}

impl FromRequest for OptionalAuthUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let db = match req.app_data::<web::Data<DatabaseConnection>>() {
            Some(db) => db.clone(),
            None => {
                return Box::pin(async { Ok(OptionalAuthUser(None)) });
            }
        };
        let config = match req.app_data::<web::Data<AppConfig>>() {
            Some(cfg) => cfg.clone(),
            None => {
                return Box::pin(async { Ok(OptionalAuthUser(None)) });
            }
        };
        let token = extract_token(req, &config);

        Box::pin(async move {
            if let Some(token) = token {
                let auth = authenticate_token(&db, &config, &token).await.ok();
                return Ok(OptionalAuthUser(auth));
            }
            Ok(OptionalAuthUser(None))
        })
    }
}

pub fn extract_token(req: &HttpRequest, config: &AppConfig) -> Option<String> {
    let header = config.token_header.as_str();
    req.headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(strip_bearer)
        .filter(|v| !v.is_empty())
}

fn strip_bearer(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        value[7..].trim().to_string()
    } else {
        value.to_string()
    }
}

pub async fn authenticate_token(
    db: &DatabaseConnection,
    config: &AppConfig,
    token: &str,
) -> Result<AuthUser, AppError> {
    let claims = decode_token(config, token)?;
    if claims.token_type != TOKEN_TYPE_ACCESS {
        return Err(AppError::unauthenticated());
    }
    let user = user::Entity::find_by_id(claims.sub)
        .one(db)
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(AppError::unauthenticated)?;

    Ok(AuthUser {
        user_id: user.id,
        is_staff: user.is_staff,
    })
}

pub fn identify(req: &HttpRequest, config: &AppConfig) -> Option<i32> {
    let token = extract_token(req, config)?;
    let claims = decode_token(config, &token).ok()?;
    if claims.token_type != TOKEN_TYPE_ACCESS {
        return None;
    }
    Some(claims.sub)
}

pub fn generate_token(
    config: &AppConfig,
    user_id: i32,
    token_type: &str,
) -> Result<String, AppError> {
    let ttl = if token_type == TOKEN_TYPE_REFRESH {
        Duration::days(config.refresh_token_days)
    } else {
        Duration::minutes(config.access_token_minutes)
    };
    let exp = (Utc::now() + ttl).timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        token_type: token_type.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|_| AppError::system_exception())
}

pub fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::unauthenticated())
}
