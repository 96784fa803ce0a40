use actix_web::{web, HttpResponse};
use bcrypt::hash;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use log::error;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::OptionalAuthUser;
use crate::entity::{like, post, user};
use crate::error::AppError;
use crate::likes;
use crate::policy::{self, Action};
use crate::response::ResponseDto;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(web::resource("/{id:\\d+}/activity").route(web::get().to(activity)))
    .service(web::resource("/{id:\\d+}/analytics").route(web::get().to(analytics)))
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::put().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    id: i32,
    username: String,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    is_staff: bool,
    created: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDto {
    id: i32,
    last_login: Option<String>,
    last_request: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    date_from: Option<String>,
    date_to: Option<String>,
}

#[derive(Serialize)]
struct AnalyticsItem {
    day: String,
    count: i64,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
) -> Result<HttpResponse, AppError> {
    policy::check_user_access(auth.actor(), Action::List, None)?;

    let users = user::Entity::find()
        .order_by_desc(user::Column::Created)
        .all(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?;
    let list: Vec<UserDto> = users.into_iter().map(to_user_dto).collect();
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(list))))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, AppError> {
    policy::check_user_access(auth.actor(), Action::Create, None)?;

    let username = payload.username.clone().unwrap_or_default();
    let password = payload.password.clone().unwrap_or_default();
    if username.trim().is_empty() {
        return Err(AppError::param_error("username cannot be null"));
    }
    if password.trim().is_empty() {
        return Err(AppError::param_error("password cannot be null"));
    }
    if let Some(email) = payload.email.as_deref().filter(|v| !v.is_empty()) {
        if !EMAIL_RE.is_match(email) {
            return Err(AppError::param_error("invalid email address"));
        }
    }

    let password_hash = hash(password, 10).map_err(|_| AppError::system_exception())?;
    let user_model = user::ActiveModel {
        username: Set(username),
        password_hash: Set(password_hash),
        email: Set(payload.email.clone()),
        first_name: Set(payload.first_name.clone()),
        last_name: Set(payload.last_name.clone()),
        is_staff: Set(false),
        created: Set(Some(Utc::now())),
        ..Default::default()
    };

    let inserted = match user_model.insert(db.get_ref()).await {
        Ok(model) => model,
        Err(err) => {
            let msg = err.to_string();
            if msg.contains("Duplicate") || msg.contains("UNIQUE") {
                return Err(AppError::param_error("username already exists"));
            }
            error!("user insert failed: {}", err);
            return Err(AppError::system_exception());
        }
    };

    Ok(HttpResponse::Created().json(ResponseDto::success(Some(to_user_dto(inserted)))))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user_id = *path;
    policy::check_user_access(auth.actor(), Action::Read, Some(user_id))?;

    let user = user::Entity::find_by_id(user_id)
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("user"))?;

    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(to_user_dto(user)))))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = *path;
    policy::check_user_access(auth.actor(), Action::Update, Some(user_id))?;

    let existing = user::Entity::find_by_id(user_id)
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("user"))?;

    let mut active = user::ActiveModel {
        id: Set(user_id),
        ..Default::default()
    };
    let mut changed = false;

    if let Some(v) = payload.email.clone() {
        if !v.is_empty() && !EMAIL_RE.is_match(&v) {
            return Err(AppError::param_error("invalid email address"));
        }
        active.email = Set(Some(v));
        changed = true;
    }
    if let Some(v) = payload.first_name.clone() {
        active.first_name = Set(Some(v));
        changed = true;
    }
    if let Some(v) = payload.last_name.clone() {
        active.last_name = Set(Some(v));
        changed = true;
    }

    let model = if changed {
        user::Entity::update(active)
            .exec(db.get_ref())
            .await
            .map_err(|_| AppError::system_exception())?
    } else {
        existing
    };

    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(to_user_dto(model)))))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let user_id = *path;
    policy::check_user_access(auth.actor(), Action::Delete, Some(user_id))?;

    user::Entity::find_by_id(user_id)
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("user"))?;

    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            let post_ids: Vec<i32> = post::Entity::find()
                .filter(post::Column::UserId.eq(user_id))
                .all(txn)
                .await
                .map_err(|_| AppError::system_exception())?
                .into_iter()
                .map(|p| p.id)
                .collect();

            if !post_ids.is_empty() {
                like::Entity::delete_many()
                    .filter(like::Column::PostId.is_in(post_ids))
                    .exec(txn)
                    .await
                    .map_err(|_| AppError::system_exception())?;
            }
            like::Entity::delete_many()
                .filter(like::Column::UserId.eq(user_id))
                .exec(txn)
                .await
                .map_err(|_| AppError::system_exception())?;
            post::Entity::delete_many()
                .filter(post::Column::UserId.eq(user_id))
                .exec(txn)
                .await
                .map_err(|_| AppError::system_exception())?;
            user::Entity::delete_by_id(user_id)
                .exec(txn)
                .await
                .map_err(|_| AppError::system_exception())?;
            Ok(())
        })
    })
    .await
    .map_err(map_tx_error)?;

    Ok(HttpResponse::NoContent().finish())
}

async fn activity(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    policy::check_activity_access(auth.actor())?;

    let user = user::Entity::find_by_id(*path)
        .one(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("user"))?;

    let dto = ActivityDto {
        id: user.id,
        last_login: user.last_login.map(to_rfc3339),
        last_request: user.last_request.map(to_rfc3339),
    };
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(dto))))
}

async fn analytics(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, AppError> {
    policy::check_analytics_access(auth.actor())?;

    let date_from = query.date_from.as_deref().map(parse_date).transpose()?;
    let date_to = query.date_to.as_deref().map(parse_date).transpose()?;

    let buckets = likes::aggregate_by_day(db.get_ref(), *path, date_from, date_to).await?;
    let items: Vec<AnalyticsItem> = buckets
        .into_iter()
        .map(|b| AnalyticsItem {
            day: b.day.to_string(),
            count: b.count,
        })
        .collect();
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(items))))
}

fn to_user_dto(model: user::Model) -> UserDto {
    UserDto {
        id: model.id,
        username: model.username,
        email: model.email,
        first_name: model.first_name,
        last_name: model.last_name,
        is_staff: model.is_staff,
        created: model.created.map(to_rfc3339),
    }
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

fn parse_date(input: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| AppError::param_error("invalid date"))?;
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc));
    }
    Err(AppError::param_error("invalid date format"))
}

fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(_) => AppError::system_exception(),
        TransactionError::Transaction(app) => app,
    }
}
