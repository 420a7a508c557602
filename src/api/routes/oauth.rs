//! OAuth helper routes.
//!
//! These are the out-of-band repair path for `reauth required` jobs:
//! the authorize redirect sends the operator to the sink's consent
//! page, and the callback (or a manual exchange-code call) turns the
//! returned code into stored tokens.

use axum::extract::{Path, Query, State};
use axum::response::{Html, Redirect};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use crate::api::error::ApiResult;
use crate::api::models::{
    ExchangeCodeRequest, ExchangeCodeResponse, JobResponse, OAuthCallbackQuery,
};
use crate::api::server::AppState;
use crate::database::models::JobDbModel;
use crate::Error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/exchange-code", post(exchange_code))
        .route("/authorize/{job_id}", get(authorize))
        .route("/callback", get(callback))
}

/// Exchange an authorization code and store the resulting tokens on a
/// job selected by id or by sink account id.
async fn exchange_code(
    State(state): State<AppState>,
    Json(request): Json<ExchangeCodeRequest>,
) -> ApiResult<Json<ExchangeCodeResponse>> {
    if request.code.is_empty() {
        return Err(Error::validation("code is required").into());
    }

    let job = find_target_job(&state, &request.job_id, &request.sink_account_id).await?;

    let redirect_uri = if request.redirect_uri.is_empty() {
        state.credentials.redirect_uri().to_string()
    } else {
        request.redirect_uri
    };

    let pair = state.sink.exchange_code(&request.code, &redirect_uri).await?;
    let has_refresh_token = !pair.refresh_token.is_empty();
    if !has_refresh_token {
        warn!(
            job_id = %job.id,
            "No refresh token granted; the access token will need manual renewal when it expires"
        );
    }

    let updated = state
        .manager
        .update_tokens(&job.id, &pair.access_token, &pair.refresh_token, pair.expires_in)
        .await?;

    info!(job_id = %job.id, "Tokens updated via code exchange");

    Ok(Json(ExchangeCodeResponse {
        status: "success",
        job: JobResponse::from(&updated),
        expires_in: pair.expires_in,
        token_type: pair.token_type,
        scope: pair.scope,
        has_refresh_token,
        warning: (!has_refresh_token)
            .then_some("No refresh token granted; the token will need manual renewal."),
    }))
}

/// Redirect the operator to the sink's authorize page for a job.
async fn authorize(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Redirect> {
    let job = state
        .manager
        .get_mapping(&job_id)
        .await?
        .ok_or_else(|| Error::not_found("Job", &job_id))?;

    let url = state.credentials.authorize_url(&job.id);
    Ok(Redirect::to(&url))
}

/// OAuth callback: the job id travels in `state`; the code is
/// exchanged immediately and the tokens stored.
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> ApiResult<Html<String>> {
    if !query.error.is_empty() {
        warn!(
            error = %query.error,
            description = %query.error_description,
            "Authorization denied by the sink"
        );
        return Ok(result_page(false, &format!(
            "Authorization failed: {} {}",
            query.error, query.error_description
        )));
    }
    if query.code.is_empty() {
        return Err(Error::validation("authorization code is missing").into());
    }
    if query.state.is_empty() {
        return Err(Error::validation("state (job id) is missing").into());
    }

    let job = state
        .manager
        .get_mapping(&query.state)
        .await?
        .ok_or_else(|| Error::not_found("Job", &query.state))?;

    let redirect_uri = state.credentials.redirect_uri().to_string();
    let pair = match state.sink.exchange_code(&query.code, &redirect_uri).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Code exchange failed");
            return Ok(result_page(false, &format!("Code exchange failed: {e}")));
        }
    };

    let has_refresh_token = !pair.refresh_token.is_empty();
    state
        .manager
        .update_tokens(&job.id, &pair.access_token, &pair.refresh_token, pair.expires_in)
        .await?;

    info!(
        job_id = %job.id,
        has_refresh_token,
        "Tokens updated via OAuth callback"
    );

    Ok(result_page(true, "Tokens updated successfully."))
}

async fn find_target_job(
    state: &AppState,
    job_id: &str,
    sink_account_id: &str,
) -> ApiResult<JobDbModel> {
    if !job_id.is_empty() {
        return Ok(state
            .manager
            .get_mapping(job_id)
            .await?
            .ok_or_else(|| Error::not_found("Job", job_id))?);
    }
    if !sink_account_id.is_empty() {
        let jobs = state.manager.list_mappings().await?;
        return Ok(jobs
            .into_iter()
            .find(|j| j.sink_account_id == sink_account_id)
            .ok_or_else(|| Error::not_found("Job", sink_account_id))?);
    }
    Err(Error::validation("either job_id or sink_account_id is required").into())
}

fn result_page(success: bool, message: &str) -> Html<String> {
    let heading = if success {
        "Authorization complete"
    } else {
        "Authorization failed"
    };
    Html(format!(
        "<!DOCTYPE html><html><head><title>{heading}</title></head>\
         <body><h1>{heading}</h1><p>{message}</p>\
         <p>You can close this window.</p></body></html>"
    ))
}
