//! HTTP endpoints for the budget lifecycle.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    budget::{
        db,
        models::{ApprovalProgress, Budget, BudgetAllocation, BudgetStatus, BudgetVersion},
        workflow,
    },
    governance::ThresholdChoice,
    identity::RequestIdentity,
    ids::{BudgetId, BudgetVersionId, FamilyId, TeamId, TeamSeasonId},
    notify::Notification,
};

/// A budget in wire form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetResponse {
    /// The budget's database ID.
    pub id: BudgetId,
    /// The team whose money this budget plans.
    pub team_id: TeamId,
    /// The season the budget covers.
    pub team_season_id: TeamSeasonId,
    /// The lifecycle status.
    pub status: BudgetStatus,
    /// The latest version number.
    pub current_version_number: i64,
    /// The version open for acknowledgment, once presented.
    pub presented_version_number: Option<i64>,
    /// Whether the board approved the budget during review.
    pub board_approved: bool,
    /// When the budget locked.
    pub locked_at: Option<OffsetDateTime>,
    /// `SYSTEM` for threshold locks, `USER` for association sign-offs.
    pub locked_by: Option<&'static str>,
    /// The board's notes from the most recent review.
    pub review_notes: Option<String>,
}

impl From<Budget> for BudgetResponse {
    fn from(budget: Budget) -> Self {
        Self {
            id: budget.id,
            team_id: budget.team_id,
            team_season_id: budget.team_season_id,
            status: budget.status,
            current_version_number: budget.current_version_number,
            presented_version_number: budget.presented_version_number,
            board_approved: budget.board_approved,
            locked_at: budget.locked_at,
            locked_by: budget.locked_by.map(|actor| actor.type_str()),
            review_notes: budget.review_notes,
        }
    }
}

/// The request body for [create_budget_endpoint].
#[derive(Debug, Deserialize)]
pub struct CreateBudgetRequest {
    /// The team the budget belongs to.
    pub team_id: TeamId,
    /// The season the budget covers.
    pub team_season_id: TeamSeasonId,
    /// The version-1 allocations.
    pub allocations: Vec<BudgetAllocation>,
}

/// Create a DRAFT budget for a (team, season) pair.
pub async fn create_budget_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(request): Json<CreateBudgetRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    let budget = workflow::create_budget(
        request.team_id,
        request.team_season_id,
        &request.allocations,
        identity,
        &connection,
    )?;

    Ok((StatusCode::CREATED, Json(BudgetResponse::from(budget))))
}

/// A budget with its relevant version, allocations and progress.
#[derive(Debug, Serialize)]
pub struct BudgetDetailResponse {
    /// The budget itself.
    pub budget: BudgetResponse,
    /// The presented version if one exists, otherwise the current draft.
    pub version: BudgetVersion,
    /// The version's allocations.
    pub allocations: Vec<BudgetAllocation>,
    /// Acknowledgment progress, absent before presentation.
    pub progress: Option<ApprovalProgress>,
}

/// Fetch a budget with its active version and acknowledgment progress.
pub async fn get_budget_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    let budget = db::get_budget(budget_id, &connection)?;
    let version_number = budget
        .presented_version_number
        .unwrap_or(budget.current_version_number);
    let version = db::get_version(budget_id, version_number, &connection)?;
    let allocations = db::get_allocations(version.id, &connection)?;
    let progress = workflow::get_approval_progress(budget_id, &connection)?;

    Ok(Json(BudgetDetailResponse {
        budget: budget.into(),
        version,
        allocations,
        progress,
    }))
}

/// The request body for [update_draft_endpoint].
#[derive(Debug, Deserialize)]
pub struct UpdateDraftRequest {
    /// The replacement allocations.
    pub allocations: Vec<BudgetAllocation>,
}

/// Replace a DRAFT budget's allocations.
pub async fn update_draft_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
    Json(request): Json<UpdateDraftRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    workflow::update_budget_draft(budget_id, &request.allocations, identity, &connection)?;
    let budget = db::get_budget(budget_id, &connection)?;

    Ok(Json(BudgetResponse::from(budget)))
}

/// Submit a DRAFT budget for board review.
pub async fn submit_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    workflow::submit_for_review(budget_id, identity, &connection)?;
    let budget = db::get_budget(budget_id, &connection)?;

    Ok(Json(BudgetResponse::from(budget)))
}

/// The request body for [review_endpoint].
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    /// `true` to approve, `false` to send back to DRAFT.
    pub approve: bool,
    /// Notes for the treasurer.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Record the board's review decision.
pub async fn review_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
    Json(request): Json<ReviewRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    workflow::review_budget(
        budget_id,
        request.approve,
        request.notes.as_deref(),
        identity,
        &connection,
    )?;
    let budget = db::get_budget(budget_id, &connection)?;

    Ok(Json(BudgetResponse::from(budget)))
}

/// The request body for [present_endpoint].
#[derive(Debug, Default, Deserialize)]
pub struct PresentRequest {
    /// The team's threshold choice, omitted to accept the association
    /// default.
    #[serde(default)]
    pub threshold: Option<ThresholdChoice>,
}

/// Present a board-approved budget to parents.
pub async fn present_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
    Json(request): Json<PresentRequest>,
) -> Result<impl IntoResponse, Error> {
    let budget = {
        let connection = state.connection()?;
        workflow::present_to_parents(budget_id, request.threshold, identity, &connection)?;
        db::get_budget(budget_id, &connection)?
    };

    state.notifier.notify(Notification::BudgetPresented { budget_id });

    Ok(Json(BudgetResponse::from(budget)))
}

/// The request body for [acknowledge_endpoint].
#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    /// The version the family is acknowledging. Must be the presented one.
    pub budget_version_id: BudgetVersionId,
    /// The acknowledging family.
    pub family_id: FamilyId,
    /// An optional comment for the treasurer.
    #[serde(default)]
    pub comment: Option<String>,
    /// Whether the family wants a follow-up conversation.
    #[serde(default)]
    pub has_questions: bool,
}

/// Acknowledge the presented budget version on behalf of a family.
pub async fn acknowledge_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<impl IntoResponse, Error> {
    let outcome = {
        let connection = state.connection()?;
        workflow::acknowledge_budget(
            budget_id,
            request.budget_version_id,
            request.family_id,
            identity,
            request.comment.as_deref(),
            request.has_questions,
            &connection,
        )?
    };

    if outcome.locked {
        state.notifier.notify(Notification::BudgetLocked { budget_id });
    }

    Ok(Json(outcome))
}

/// The request body for [propose_update_endpoint].
#[derive(Debug, Deserialize)]
pub struct ProposeUpdateRequest {
    /// What changed relative to the presented version, at least 10
    /// characters.
    pub change_summary: String,
    /// The new version's allocations.
    pub allocations: Vec<BudgetAllocation>,
}

/// Propose a new version of a PRESENTED budget, voiding prior
/// acknowledgments.
pub async fn propose_update_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
    Json(request): Json<ProposeUpdateRequest>,
) -> Result<impl IntoResponse, Error> {
    let version = {
        let connection = state.connection()?;
        workflow::propose_update(
            budget_id,
            &request.change_summary,
            &request.allocations,
            identity,
            &connection,
        )?
    };

    // A new version reopens acknowledgment, so parents hear about it the
    // same way they heard about the original presentation.
    state.notifier.notify(Notification::BudgetPresented { budget_id });

    Ok((StatusCode::CREATED, Json(version)))
}

/// Read acknowledgment progress against the threshold.
pub async fn progress_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    let progress = workflow::get_approval_progress(budget_id, &connection)?
        .ok_or_else(|| {
            Error::InvalidState("the budget has not been presented to parents".to_owned())
        })?;

    Ok(Json(progress))
}

/// The association's final sign-off on a threshold-met budget.
pub async fn association_approval_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(budget_id): Path<BudgetId>,
) -> Result<impl IntoResponse, Error> {
    let budget = {
        let connection = state.connection()?;
        workflow::approve_as_association(budget_id, identity, &connection)?;
        db::get_budget(budget_id, &connection)?
    };

    state.notifier.notify(Notification::BudgetLocked { budget_id });

    Ok(Json(BudgetResponse::from(budget)))
}
