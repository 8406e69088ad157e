use crate::error::{AppError, ErrorDetail};
use crate::models::{
    check_answer, AnswerRecord, AttemptRecord, AttemptSummary, LeaderboardRow, Participant,
    QuizQuestion, Session,
};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PARTICIPANT_COOKIE: &str = "participant_id";
const PARTICIPANT_COOKIE_TTL_HOURS: i64 = 24;
static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > Duration::from_secs(60) {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_ip(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
}

async fn participant_from_jar(jar: &CookieJar, state: &AppState) -> Option<Participant> {
    let id = jar.get(PARTICIPANT_COOKIE)?.value().to_string();
    state.store.participant(&id).await
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.store.list_sessions().to_vec(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub participant_id: String,
    pub session_id: String,
    pub display_name: String,
}

pub async fn join(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<JoinPayload>,
) -> Result<(CookieJar, Json<JoinResponse>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("join", client_ip(&headers), 60) {
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }

    let display_name = payload.display_name.trim().to_string();
    let session_id = payload.session_id.trim().to_string();
    let mut details = Vec::new();
    if display_name.is_empty() {
        details.push(ErrorDetail {
            field: "displayName".into(),
            issue: "must not be empty".into(),
        });
    }
    if session_id.is_empty() {
        details.push(ErrorDetail {
            field: "sessionId".into(),
            issue: "must not be empty".into(),
        });
    }
    if !details.is_empty() {
        return Err(AppError::bad_request("missing required fields", req_id).with_details(details));
    }

    let joinable = state
        .store
        .session_by_id(&session_id)
        .map(|s| s.is_active)
        .unwrap_or(false);
    if !joinable {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_SESSION",
            "session is unknown or not accepting participants",
            req_id,
        ));
    }

    let participant_id = jar
        .get(PARTICIPANT_COOKIE)
        .map(|c| c.value().to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Rejoin returns the original registration; the payload's name and
    // session are ignored for an already-known cookie.
    let participant = state
        .store
        .ensure_participant(&participant_id, &display_name, &session_id)
        .await;
    if let Err(err) = state.persist().await {
        warn!("failed to persist local state after join: {}", err);
    }
    info!(
        participant_id = %participant.id,
        session_id = %participant.session_id,
        "participant joined"
    );

    let cookie = Cookie::build((PARTICIPANT_COOKIE, participant.id.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::hours(PARTICIPANT_COOKIE_TTL_HOURS))
        .build();

    Ok((
        jar.add(cookie),
        Json(JoinResponse {
            participant_id: participant.id,
            session_id: participant.session_id,
            display_name: participant.display_name,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct QuizHeader {
    pub key: String,
    pub title: String,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CurrentQuizzesResponse {
    pub quizzes: Vec<QuizHeader>,
    pub questions: HashMap<String, Vec<QuizQuestion>>,
}

/// Serves the full catalog, correct answers included. Acceptable for a
/// trusted in-person workshop; a hardened deployment would strip
/// `correctAnswer` and validate purely server-side.
pub async fn current_quizzes(State(state): State<AppState>) -> Json<CurrentQuizzesResponse> {
    let all = state.store.list_quizzes();
    let quizzes = all
        .iter()
        .map(|q| QuizHeader {
            key: q.key.clone(),
            title: q.title.clone(),
            total: q.questions.len(),
        })
        .collect();
    let questions = all
        .iter()
        .map(|q| (q.key.clone(), q.questions.clone()))
        .collect();
    Json(CurrentQuizzesResponse { quizzes, questions })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    #[serde(default)]
    pub quiz_key: String,
    #[serde(default)]
    pub question_id: String,
    #[serde(default)]
    pub answer: String,
    pub time_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub ok: bool,
    pub is_correct: bool,
    pub summary: AttemptSummary,
}

pub async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<AnswerResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let participant = participant_from_jar(&jar, &state)
        .await
        .ok_or_else(|| AppError::unauthorized("join a session first", req_id.clone()))?;

    let quiz_key = payload.quiz_key.trim().to_string();
    let question_id = payload.question_id.trim().to_string();
    // Submitted answers are recorded and compared verbatim; only the
    // emptiness check tolerates whitespace.
    let answer = payload.answer;
    if quiz_key.is_empty() || question_id.is_empty() || answer.trim().is_empty() {
        return Err(AppError::bad_request(
            "quizKey, questionId and answer are required",
            req_id,
        ));
    }

    let quiz = state
        .store
        .quiz(&quiz_key)
        .ok_or_else(|| AppError::not_found("quiz not found", req_id.clone()))?;
    let question = quiz
        .questions
        .iter()
        .find(|q| q.id == question_id)
        .ok_or_else(|| AppError::not_found("question not found", req_id.clone()))?;

    let is_correct = check_answer(question, &answer);
    // Replays return the stored record, so the feedback always matches the
    // answer that actually counts.
    let stored = state
        .store
        .record_answer(AnswerRecord {
            participant_id: participant.id.clone(),
            quiz_key: quiz_key.clone(),
            question_id,
            answer,
            is_correct,
            time_ms: payload.time_ms,
            submitted_at: Utc::now(),
        })
        .await;
    if let Err(err) = state.persist().await {
        warn!("failed to persist local state after answer: {}", err);
    }

    let summary = state.store.attempt_summary(&participant.id, &quiz_key).await;
    Ok(Json(AnswerResponse {
        ok: true,
        is_correct: stored.is_correct,
        summary,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub session_id: Option<String>,
    pub quiz: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardRow>,
}

pub async fn leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let (Some(session_id), Some(quiz_key)) = (query.session_id, query.quiz) else {
        return Err(AppError::bad_request(
            "session_id and quiz query params are required",
            req_id,
        ));
    };
    let mut rows = state.store.leaderboard(&session_id, &quiz_key).await;
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Ok(Json(LeaderboardResponse { leaderboard: rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPayload {
    #[serde(default)]
    pub quiz_key: String,
    pub score: u32,
    pub total: u32,
    #[serde(default)]
    pub total_time_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub attempt_id: String,
}

pub async fn create_attempt(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<AttemptPayload>,
) -> Result<(StatusCode, Json<AttemptResponse>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let participant = participant_from_jar(&jar, &state)
        .await
        .ok_or_else(|| AppError::unauthorized("join a session first", req_id.clone()))?;

    let quiz_key = payload.quiz_key.trim().to_string();
    if quiz_key.is_empty() {
        return Err(AppError::bad_request("quizKey is required", req_id));
    }

    let record = state
        .store
        .record_attempt(AttemptRecord {
            id: uuid::Uuid::new_v4().to_string(),
            participant_id: participant.id,
            quiz_key,
            score: payload.score,
            total: payload.total,
            total_time_ms: payload.total_time_ms,
            created_at: Utc::now(),
        })
        .await;
    if let Err(err) = state.persist().await {
        warn!("failed to persist local state after attempt: {}", err);
    }

    Ok((
        StatusCode::CREATED,
        Json(AttemptResponse { attempt_id: record.id }),
    ))
}
