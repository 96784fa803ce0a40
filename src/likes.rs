use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;

use crate::entity::{like, post};
use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LikeState {
    Liked,
    NotLiked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: i64,
}

pub async fn get_like_state<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    post_id: i32,
) -> Result<LikeState, AppError> {
    ensure_post_exists(db, post_id).await?;
    let existing = find_like(db, user_id, post_id).await?;
    Ok(if existing.is_some() {
        LikeState::Liked
    } else {
        LikeState::NotLiked
    })
}

pub async fn set_liked<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    post_id: i32,
) -> Result<(), AppError> {
    ensure_post_exists(db, post_id).await?;
    if find_like(db, user_id, post_id).await?.is_some() {
        return Ok(());
    }

    let relation = like::ActiveModel {
        user_id: Set(user_id),
        post_id: Set(post_id),
        created: Set(Some(Utc::now())),
        ..Default::default()
    };
    if let Err(err) = relation.insert(db).await {
        let msg = err.to_string();
        // a concurrent insert hit the unique (user_id, post_id) index first
        if msg.contains("Duplicate") || msg.contains("UNIQUE") {
            return Ok(());
        }
        error!("like insert failed: {}", err);
        return Err(AppError::system_exception());
    }
    Ok(())
}

pub async fn unset_liked<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    post_id: i32,
) -> Result<(), AppError> {
    ensure_post_exists(db, post_id).await?;
    like::Entity::delete_many()
        .filter(like::Column::UserId.eq(user_id))
        .filter(like::Column::PostId.eq(post_id))
        .exec(db)
        .await
        .map_err(|_| AppError::system_exception())?;
    Ok(())
}

pub async fn aggregate_by_day<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
) -> Result<Vec<DayCount>, AppError> {
    let mut query = like::Entity::find().filter(like::Column::UserId.eq(user_id));
    if let Some(from) = date_from {
        query = query.filter(like::Column::Created.gte(from));
    }
    if let Some(to) = date_to {
        query = query.filter(like::Column::Created.lte(to));
    }

    let rows = query
        .order_by_desc(like::Column::Created)
        .all(db)
        .await
        .map_err(|e| {
            error!("like aggregation query failed: {}", e);
            AppError::system_exception()
        })?;

    // bucket by UTC calendar day, newest day first
    let mut buckets: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for row in rows {
        if let Some(created) = row.created {
            *buckets.entry(created.date_naive()).or_insert(0) += 1;
        }
    }
    Ok(buckets
        .into_iter()
        .rev()
        .map(|(day, count)| DayCount { day, count })
        .collect())
}

async fn ensure_post_exists<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<(), AppError> {
    post::Entity::find_by_id(post_id)
        .one(db)
        .await
        .map_err(|_| AppError::system_exception())?
        .ok_or_else(|| AppError::not_found("post"))?;
    Ok(())
}

async fn find_like<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    post_id: i32,
) -> Result<Option<like::Model>, AppError> {
    like::Entity::find()
        .filter(like::Column::UserId.eq(user_id))
        .filter(like::Column::PostId.eq(post_id))
        .one(db)
        .await
        .map_err(|_| AppError::system_exception())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    use super::*;
    use crate::entity::like;
    use crate::test_util::{seed_like_at, seed_post, seed_user, setup_db};

    #[tokio::test]
    async fn set_liked_is_idempotent() {
        let db = setup_db().await;
        let user = seed_user(&db, "alice", false).await;
        let post = seed_post(&db, user.id, "first post").await;

        set_liked(&db, user.id, post.id).await.unwrap();
        set_liked(&db, user.id, post.id).await.unwrap();

        assert_eq!(get_like_state(&db, user.id, post.id).await.unwrap(), LikeState::Liked);
        let rows = like::Entity::find()
            .filter(like::Column::UserId.eq(user.id))
            .filter(like::Column::PostId.eq(post.id))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unset_liked_is_a_noop_without_a_like() {
        let db = setup_db().await;
        let user = seed_user(&db, "alice", false).await;
        let post = seed_post(&db, user.id, "first post").await;

        unset_liked(&db, user.id, post.id).await.unwrap();
        assert_eq!(
            get_like_state(&db, user.id, post.id).await.unwrap(),
            LikeState::NotLiked
        );

        set_liked(&db, user.id, post.id).await.unwrap();
        unset_liked(&db, user.id, post.id).await.unwrap();
        assert_eq!(
            get_like_state(&db, user.id, post.id).await.unwrap(),
            LikeState::NotLiked
        );
    }

    #[tokio::test]
    async fn like_operations_require_an_existing_post() {
        let db = setup_db().await;
        let user = seed_user(&db, "alice", false).await;

        assert!(matches!(
            get_like_state(&db, user.id, 404).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(set_liked(&db, user.id, 404).await, Err(AppError::NotFound(_))));
        assert!(matches!(unset_liked(&db, user.id, 404).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn aggregation_buckets_by_day_descending() {
        let db = setup_db().await;
        let user = seed_user(&db, "alice", false).await;
        let other = seed_user(&db, "bob", false).await;
        let p1 = seed_post(&db, other.id, "one").await;
        let p2 = seed_post(&db, other.id, "two").await;
        let p3 = seed_post(&db, other.id, "three").await;

        let at = |y, m, d, h| Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap();
        seed_like_at(&db, user.id, p1.id, at(2019, 3, 12, 10)).await;
        seed_like_at(&db, user.id, p2.id, at(2020, 12, 25, 8)).await;
        seed_like_at(&db, user.id, p3.id, at(2020, 12, 25, 23)).await;
        seed_like_at(&db, other.id, p1.id, at(2020, 12, 25, 12)).await;

        let result = aggregate_by_day(&db, user.id, None, None).await.unwrap();
        assert_eq!(
            result,
            vec![
                DayCount { day: NaiveDate::from_ymd_opt(2020, 12, 25).unwrap(), count: 2 },
                DayCount { day: NaiveDate::from_ymd_opt(2019, 3, 12).unwrap(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn aggregation_bounds_are_inclusive() {
        let db = setup_db().await;
        let user = seed_user(&db, "alice", false).await;
        let author = seed_user(&db, "bob", false).await;
        let p1 = seed_post(&db, author.id, "one").await;
        let p2 = seed_post(&db, author.id, "two").await;

        let at = |y, m, d, h| Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        seed_like_at(&db, user.id, p1.id, at(2019, 3, 12, 10)).await;
        seed_like_at(&db, user.id, p2.id, at(2020, 12, 25, 8)).await;

        let result = aggregate_by_day(&db, user.id, Some(at(2019, 5, 25, 0)), None)
            .await
            .unwrap();
        assert_eq!(
            result,
            vec![DayCount { day: NaiveDate::from_ymd_opt(2020, 12, 25).unwrap(), count: 1 }]
        );

        let result = aggregate_by_day(
            &db,
            user.id,
            Some(at(2019, 3, 12, 10)),
            Some(at(2020, 12, 25, 8)),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 2);

        let result = aggregate_by_day(&db, user.id, None, Some(at(2018, 1, 1, 0)))
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
