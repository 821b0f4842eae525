use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use ks_common::analysis::AnalysisMode;
use ks_common::api::{
    ProgressResponse, ResultResponse, StartAnalysisRequest, StartAnalysisResponse,
};
use ks_common::db::get_session;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::SharedState;

/// 接続元 IP。テスト (oneshot) では ConnectInfo が無いので欠落を許す。
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip()),
        ))
    }
}

/// 感情のみの解析セッションを開始する。
pub async fn start_sentiment(
    State(state): State<SharedState>,
    client_ip: ClientIp,
    _auth: AuthUser,
    Json(request): Json<StartAnalysisRequest>,
) -> Result<Json<StartAnalysisResponse>, ApiError> {
    start(state, client_ip, request, AnalysisMode::Sentiment).await
}

/// 感情 + 財務 + 統合の総合解析セッションを開始する。
pub async fn start_comprehensive(
    State(state): State<SharedState>,
    client_ip: ClientIp,
    _auth: AuthUser,
    Json(request): Json<StartAnalysisRequest>,
) -> Result<Json<StartAnalysisResponse>, ApiError> {
    start(state, client_ip, request, AnalysisMode::Comprehensive).await
}

async fn start(
    state: SharedState,
    client_ip: ClientIp,
    request: StartAnalysisRequest,
    mode: AnalysisMode,
) -> Result<Json<StartAnalysisResponse>, ApiError> {
    if request.doc_id.chars().count() != 8 {
        return Err(ApiError::BadRequest(
            "doc_id must be an 8 character EDINET document id".into(),
        ));
    }

    let user_ip = client_ip.0.map(|ip| ip.to_string());
    let outcome = state
        .orchestrator
        .start_analysis(&request.doc_id, mode, request.force, user_ip.as_deref())
        .await?;

    Ok(Json(StartAnalysisResponse::from(outcome)))
}

pub async fn get_progress(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    _auth: AuthUser,
) -> Result<Json<ProgressResponse>, ApiError> {
    let record = get_session(&state.pool, session_id).await?;
    Ok(Json(ProgressResponse::from_record(
        record.as_ref(),
        Utc::now(),
    )))
}

pub async fn get_result(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    _auth: AuthUser,
) -> Result<Json<ResultResponse>, ApiError> {
    let record = get_session(&state.pool, session_id).await?;
    Ok(Json(ResultResponse::from_record(record, Utc::now())))
}
