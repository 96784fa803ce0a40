use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error,
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

use crate::auth;
use crate::config::AppConfig;
use crate::entity::user;

// Stamps last_request on the acting user's row once the response is ready.
pub async fn track_last_request<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<B>, Error>
where
    B: MessageBody,
{
    let db = req.app_data::<web::Data<DatabaseConnection>>().cloned();
    let config = req.app_data::<web::Data<AppConfig>>().cloned();
    let user_id = config.and_then(|cfg| auth::identify(req.request(), &cfg));

    let res = next.call(req).await?;

    if let (Some(db), Some(user_id)) = (db, user_id) {
        let active = user::ActiveModel {
            id: Set(user_id),
            last_request: Set(Some(Utc::now())),
            ..Default::default()
        };
        let _ = user::Entity::update(active).exec(db.get_ref()).await;
    }

    Ok(res)
}
