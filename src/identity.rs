//! Identity types supplied by the upstream auth gateway.
//!
//! The core does not authenticate users itself. Each request arrives with
//! `X-User-Id` and `X-User-Role` headers set by the gateway, extracted here
//! into a [RequestIdentity]. State changes triggered without a user behind
//! them (automatic budget locking, season setup) are attributed to
//! [Actor::System].

use std::fmt;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::{Error, ids::UserId};

/// The role a user holds on their team or association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// A parent attached to a roster family.
    Parent,
    /// The team treasurer.
    Treasurer,
    /// The assistant team treasurer.
    AssistantTreasurer,
    /// The team president.
    President,
    /// A team board member.
    BoardMember,
    /// An administrator at the association level.
    AssociationAdmin,
}

impl Role {
    /// Parse a role from its wire form, e.g. `ASSISTANT_TREASURER`.
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "PARENT" => Some(Role::Parent),
            "TREASURER" => Some(Role::Treasurer),
            "ASSISTANT_TREASURER" => Some(Role::AssistantTreasurer),
            "PRESIDENT" => Some(Role::President),
            "BOARD_MEMBER" => Some(Role::BoardMember),
            "ASSOCIATION_ADMIN" => Some(Role::AssociationAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Role::Parent => "PARENT",
            Role::Treasurer => "TREASURER",
            Role::AssistantTreasurer => "ASSISTANT_TREASURER",
            Role::President => "PRESIDENT",
            Role::BoardMember => "BOARD_MEMBER",
            Role::AssociationAdmin => "ASSOCIATION_ADMIN",
        };

        write!(f, "{text}")
    }
}

/// Who performed an action: a user, or the system itself.
///
/// Automatic transitions (threshold locking, season setup) are recorded with
/// [Actor::System] rather than a sentinel user ID, so audit rows can always
/// be attributed unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A user identified by the auth gateway.
    User(UserId),
    /// The system acting on its own, e.g. the threshold engine.
    System,
}

impl Actor {
    /// The `actor_type` column value for this actor.
    pub fn type_str(&self) -> &'static str {
        match self {
            Actor::User(_) => "USER",
            Actor::System => "SYSTEM",
        }
    }

    /// The `actor_id` column value for this actor, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }

    /// Reconstruct an actor from its stored columns.
    pub fn from_columns(actor_type: &str, actor_id: Option<UserId>) -> Actor {
        match (actor_type, actor_id) {
            ("USER", Some(id)) => Actor::User(id),
            _ => Actor::System,
        }
    }
}

/// The identity of the user making the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestIdentity {
    /// The ID of the user, as assigned by the auth gateway.
    pub user_id: UserId,
    /// The role the user holds.
    pub role: Role,
}

impl RequestIdentity {
    /// This identity as an audit [Actor].
    pub fn actor(&self) -> Actor {
        Actor::User(self.user_id)
    }
}

impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<UserId>().ok())
            .ok_or_else(|| {
                Error::Permission("the request is missing a valid X-User-Id header".to_owned())
            })?;

        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|value| value.to_str().ok())
            .and_then(Role::parse)
            .ok_or_else(|| {
                Error::Permission("the request is missing a valid X-User-Role header".to_owned())
            })?;

        Ok(RequestIdentity { user_id, role })
    }
}
