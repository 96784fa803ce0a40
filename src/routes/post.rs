use actix_web::{web, HttpResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::auth::OptionalAuthUser;
use crate::entity::{like, post};
use crate::error::AppError;
use crate::likes::{self, LikeState};
use crate::policy::{self, Action};
use crate::response::ResponseDto;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/{id:\\d+}/like")
            .route(web::get().to(like_state))
            .route(web::put().to(like_set))
            .route(web::delete().to(like_unset)),
    )
    .service(
        web::resource("/{id:\\d+}")
            .route(web::get().to(get))
            .route(web::put().to(update))
            .route(web::delete().to(remove)),
    );
}

#[derive(Deserialize)]
struct SavePostRequest {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<u64>,
    size: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListPostResponse {
    items: Vec<PostDto>,
    total: i64,
    total_page: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostDto {
    id: i32,
    text: String,
    author_id: i32,
    created: Option<String>,
}

async fn list(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    policy::check_post_access(auth.actor(), Action::List, None)?;

    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(20).max(1);

    let paginator = post::Entity::find()
        .order_by_desc(post::Column::Created)
        .paginate(db.get_ref(), size);
    let total = paginator
        .num_items()
        .await
        .map_err(|_| AppError::system_exception())? as i64;
    let items = paginator
        .fetch_page(page - 1)
        .await
        .map_err(|_| AppError::system_exception())?
        .into_iter()
        .map(to_post_dto)
        .collect::<Vec<_>>();

    let size = size as i64;
    let total_page = if total % size == 0 { total / size } else { total / size + 1 };
    let response = ListPostResponse { items, total, total_page };
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(response))))
}

async fn create(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    payload: web::Json<SavePostRequest>,
) -> Result<HttpResponse, AppError> {
    let actor = policy::check_post_access(auth.actor(), Action::Create, None)?;

    let text = payload.text.clone().unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::param_error("text cannot be null"));
    }

    let post_model = post::ActiveModel {
        user_id: Set(actor.id),
        text: Set(text),
        created: Set(Some(Utc::now())),
        ..Default::default()
    };
    let inserted = post_model
        .insert(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?;

    Ok(HttpResponse::Created().json(ResponseDto::success(Some(to_post_dto(inserted)))))
}

async fn get(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    policy::check_post_access(auth.actor(), Action::Read, None)?;

    let post_item = find_post(db.get_ref(), *path).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(to_post_dto(post_item)))))
}

async fn update(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
    payload: web::Json<SavePostRequest>,
) -> Result<HttpResponse, AppError> {
    let post_item = find_post(db.get_ref(), *path).await?;
    policy::check_post_access(auth.actor(), Action::Update, Some(post_item.user_id))?;

    let text = payload.text.clone().unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::param_error("text cannot be null"));
    }

    let active = post::ActiveModel {
        id: Set(post_item.id),
        text: Set(text),
        ..Default::default()
    };
    let updated = post::Entity::update(active)
        .exec(db.get_ref())
        .await
        .map_err(|_| AppError::system_exception())?;

    Ok(HttpResponse::Ok().json(ResponseDto::success(Some(to_post_dto(updated)))))
}

async fn remove(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let post_item = find_post(db.get_ref(), *path).await?;
    policy::check_post_access(auth.actor(), Action::Delete, Some(post_item.user_id))?;

    let post_id = post_item.id;
    db.transaction::<_, (), AppError>(|txn| {
        Box::pin(async move {
            like::Entity::delete_many()
                .filter(like::Column::PostId.eq(post_id))
                .exec(txn)
                .await
                .map_err(|_| AppError::system_exception())?;
            post::Entity::delete_by_id(post_id)
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

async fn like_state(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let actor = policy::check_like_access(auth.actor())?;
    let state = likes::get_like_state(db.get_ref(), actor.id, *path).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::<LikeState>::success(Some(state))))
}

async fn like_set(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let actor = policy::check_like_access(auth.actor())?;
    likes::set_liked(db.get_ref(), actor.id, *path).await?;
    Ok(HttpResponse::Ok().json(ResponseDto::<()>::success(None)))
}

async fn like_unset(
    db: web::Data<DatabaseConnection>,
    auth: OptionalAuthUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let actor = policy::check_like_access(auth.actor())?;
    likes::unset_liked(db.get_ref(), actor.id, *path).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn find_post(db: &DatabaseConnection, post_id: i32) -> Result<post::Model, AppError> {
    post::Entity::find_by_id(post_id)
        .one(db)
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("post"))
}

fn to_post_dto(model: post::Model) -> PostDto {
    PostDto {
        id: model.id,
        text: model.text,
        author_id: model.user_id,
        created: model.created.map(to_rfc3339),
    }
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

fn map_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(_) => AppError::system_exception(),
        TransactionError::Transaction(app) => app,
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web, App};

    use super::*;
    use crate::test_util::{bearer, seed_post, seed_user, setup_db, test_config};

    macro_rules! post_app {
        ($db:expr, $config:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($config.clone()))
                    .app_data(web::Data::new($db.clone()))
                    .service(web::scope("/api/posts").configure(super::config)),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn post_list_requires_authentication() {
        let db = setup_db().await;
        let config = test_config();
        let author = seed_user(&db, "author", false).await;
        seed_post(&db, author.id, "hello").await;
        let app = post_app!(db, config);

        let req = test::TestRequest::get().uri("/api/posts").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/posts")
            .insert_header(("authorization", bearer(&config, author.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["items"][0]["text"], "hello");
    }

    #[actix_rt::test]
    async fn post_create_sets_the_author() {
        let db = setup_db().await;
        let config = test_config();
        let author = seed_user(&db, "author", false).await;
        let app = post_app!(db, config);

        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(("authorization", bearer(&config, author.id)))
            .set_json(serde_json::json!({"text": "New post text"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["text"], "New post text");
        assert_eq!(body["data"]["authorId"], author.id);

        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(("authorization", bearer(&config, author.id)))
            .set_json(serde_json::json!({"text": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn post_mutation_is_author_only() {
        let db = setup_db().await;
        let config = test_config();
        let author = seed_user(&db, "author", false).await;
        let intruder = seed_user(&db, "intruder", false).await;
        let post_row = seed_post(&db, author.id, "original").await;
        let app = post_app!(db, config);

        let req = test::TestRequest::put()
            .uri(&format!("/api/posts/{}", post_row.id))
            .insert_header(("authorization", bearer(&config, intruder.id)))
            .set_json(serde_json::json!({"text": "defaced"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri(&format!("/api/posts/{}", post_row.id))
            .insert_header(("authorization", bearer(&config, author.id)))
            .set_json(serde_json::json!({"text": "edited"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["text"], "edited");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/posts/{}", post_row.id))
            .insert_header(("authorization", bearer(&config, intruder.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/posts/{}", post_row.id))
            .insert_header(("authorization", bearer(&config, author.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(post::Entity::find_by_id(post_row.id).one(&db).await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn unknown_post_is_not_found() {
        let db = setup_db().await;
        let config = test_config();
        let member = seed_user(&db, "member", false).await;
        let app = post_app!(db, config);

        let req = test::TestRequest::get()
            .uri("/api/posts/9999")
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/api/posts/9999/like")
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn like_toggle_round_trip() {
        let db = setup_db().await;
        let config = test_config();
        let author = seed_user(&db, "author", false).await;
        let member = seed_user(&db, "member", false).await;
        let post_row = seed_post(&db, author.id, "likeable").await;
        let app = post_app!(db, config);
        let uri = format!("/api/posts/{}/like", post_row.id);

        let req = test::TestRequest::get().uri(&uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], "NotLiked");

        for _ in 0..2 {
            let req = test::TestRequest::put()
                .uri(&uri)
                .insert_header(("authorization", bearer(&config, member.id)))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], "Liked");

        let rows = like::Entity::find().all(&db).await.unwrap();
        assert_eq!(rows.len(), 1);

        let req = test::TestRequest::delete()
            .uri(&uri)
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(("authorization", bearer(&config, member.id)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], "NotLiked");
    }
}
