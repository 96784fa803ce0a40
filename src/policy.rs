use crate::error::AppError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    List,
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: i32,
    pub is_staff: bool,
}

fn require_actor(actor: Option<Actor>) -> Result<Actor, AppError> {
    actor.ok_or_else(AppError::unauthenticated)
}

fn staff_only(actor: Actor) -> Result<(), AppError> {
    if actor.is_staff {
        Ok(())
    } else {
        Err(AppError::forbidden("staff access required"))
    }
}

// Profile access follows the owner-or-staff variant: list is staff only,
// read/update/delete require the owner or staff, signup is open to anyone.
pub fn check_user_access(
    actor: Option<Actor>,
    action: Action,
    target_id: Option<i32>,
) -> Result<(), AppError> {
    match action {
        Action::Create => Ok(()),
        Action::List => staff_only(require_actor(actor)?),
        Action::Read | Action::Update | Action::Delete => {
            let actor = require_actor(actor)?;
            if actor.is_staff || target_id == Some(actor.id) {
                Ok(())
            } else {
                Err(AppError::forbidden("profile access restricted to owner or staff"))
            }
        }
    }
}

pub fn check_activity_access(actor: Option<Actor>) -> Result<(), AppError> {
    staff_only(require_actor(actor)?)
}

// Posts are readable by any authenticated actor; only the author may change
// or remove one, staff included.
pub fn check_post_access(
    actor: Option<Actor>,
    action: Action,
    author_id: Option<i32>,
) -> Result<Actor, AppError> {
    let actor = require_actor(actor)?;
    match action {
        Action::List | Action::Read | Action::Create => Ok(actor),
        Action::Update | Action::Delete => {
            if author_id == Some(actor.id) {
                Ok(actor)
            } else {
                Err(AppError::forbidden("only the author can modify a post"))
            }
        }
    }
}

// Like operations are always scoped to the acting user's own relation.
pub fn check_like_access(actor: Option<Actor>) -> Result<Actor, AppError> {
    require_actor(actor)
}

pub fn check_analytics_access(actor: Option<Actor>) -> Result<Actor, AppError> {
    require_actor(actor)
}
