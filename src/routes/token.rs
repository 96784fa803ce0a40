use actix_web::{web, HttpResponse};
use bcrypt::verify;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};

use crate::auth::{self, TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH};
use crate::config::AppConfig;
use crate::entity::user;
use crate::error::AppError;
use crate::response::ResponseDto;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("").route(web::post().to(obtain)))
        .service(web::resource("/refresh").route(web::post().to(refresh)))
        .service(web::resource("/verify").route(web::post().to(verify_token)));
}

#[derive(Deserialize)]
struct ObtainRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct TokenPairDto {
    access: String,
    refresh: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh: Option<String>,
}

#[derive(Serialize)]
struct AccessTokenDto {
    access: String,
}

#[derive(Deserialize)]
struct VerifyRequest {
    token: Option<String>,
}

#[derive(Serialize)]
struct EmptyResponse {}

async fn obtain(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<ObtainRequest>,
) -> Result<HttpResponse, AppError> {
    let username = payload.username.clone().unwrap_or_default();
    let password = payload.password.clone().unwrap_or_default();
    if username.trim().is_empty() {
        return Err(AppError::param_error("username cannot be null"));
    }
    if password.trim().is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }

    let user = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(AppError::unauthenticated)?;

    let ok = verify(password, &user.password_hash).map_err(|_| AppError::system_exception())?;
    if !ok {
        return Err(AppError::unauthenticated());
    }

    let active = user::ActiveModel {
        id: Set(user.id),
        last_login: Set(Some(Utc::now())),
        ..Default::default()
    };
    user::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?;

    let pair = TokenPairDto {
        access: auth::generate_token(&config, user.id, TOKEN_TYPE_ACCESS)?,
        refresh: auth::generate_token(&config, user.id, TOKEN_TYPE_REFRESH)?,
    };
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(pair))))
}

async fn refresh(
    db: web::Data<DatabaseConnection>,
    config: web::Data<AppConfig>,
    payload: web::Json<RefreshRequest>,
) -> Result<HttpResponse, AppError> {
    let token = payload
        .refresh
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::param_error("refresh cannot be null"))?;

    let claims = auth::decode_token(&config, &token)?;
    if claims.token_type != TOKEN_TYPE_REFRESH {
        return Err(AppError::unauthenticated());
    }

    user::Entity::find_by_id(claims.sub)
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(AppError::unauthenticated)?;

    let dto = AccessTokenDto {
        access: auth::generate_token(&config, claims.sub, TOKEN_TYPE_ACCESS)?,
    };
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(dto))))
}

async fn verify_token(
    config: web::Data<AppConfig>,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, AppError> {
    let token = payload
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::param_error("token cannot be null"))?;

    auth::decode_token(&config, &token)?;
    Ok(HttpResponse::Ok().json(ResponseDto::<EmptyResponse>::success(None)))
}
