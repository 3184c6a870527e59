//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ControlError, Error, SourceError};
use crate::mixer::{ChannelStatus, MixerStatus, NamedLevel};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// HTTP status for a failed control operation
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Control(ControlError::UnknownChannel(_))
        | Error::Control(ControlError::UnknownEffect(_))
        | Error::Source(SourceError::Unavailable(_)) => StatusCode::NOT_FOUND,
        Error::Control(ControlError::AlreadyAttached(_))
        | Error::Control(ControlError::TooManySources(_)) => StatusCode::CONFLICT,
        Error::Control(_) | Error::Source(_) | Error::Effect(_) => StatusCode::BAD_REQUEST,
        Error::Config(_) | Error::Network(_) | Error::Device(_) | Error::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn reply<T, E>(result: Result<T, E>, success: StatusCode) -> ApiResult<T>
where
    E: Into<Error>,
{
    match result {
        Ok(data) => (success, Json(ApiResponse::ok(data))),
        Err(e) => {
            let e = e.into();
            (status_for(&e), Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// Effect stage with its enabled flag
#[derive(Serialize)]
pub struct EffectState {
    pub name: String,
    pub enabled: bool,
}

/// System status
#[derive(Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub mixer: MixerStatus,
    pub effects: Vec<EffectState>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let effects = state
        .mixer
        .effect_states()
        .into_iter()
        .map(|(name, enabled)| EffectState { name, enabled })
        .collect();

    let status = SystemStatus {
        mixer: state.mixer.status(),
        effects,
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    };

    Json(ApiResponse::ok(status))
}

/// Get all attached channels
pub async fn get_channels(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<ChannelStatus>>> {
    Json(ApiResponse::ok(state.mixer.channels()))
}

#[derive(Deserialize)]
pub struct AttachRequest {
    pub name: String,
}

/// Attach a source from the directory
pub async fn attach_channel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AttachRequest>,
) -> ApiResult<ChannelStatus> {
    let result = state
        .mixer
        .attach(&req.name)
        .and_then(|_| state.mixer.channel(req.name.trim()).map_err(Error::from));
    reply(result, StatusCode::CREATED)
}

/// Detach a source
pub async fn detach_channel(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    reply(state.mixer.detach(&name), StatusCode::OK)
}

#[derive(Deserialize)]
pub struct GainRequest {
    pub gain: f32,
}

/// Set a channel's gain
pub async fn set_gain(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<GainRequest>,
) -> ApiResult<()> {
    reply(state.mixer.set_gain(&name, req.gain), StatusCode::OK)
}

#[derive(Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

pub async fn set_mute(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<MuteRequest>,
) -> ApiResult<()> {
    reply(state.mixer.set_mute(&name, req.muted), StatusCode::OK)
}

#[derive(Deserialize)]
pub struct DelayRequest {
    pub delay_ms: f32,
}

/// Set a channel's delay; responds with the delay actually applied
pub async fn set_delay(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<DelayRequest>,
) -> ApiResult<f32> {
    reply(state.mixer.set_delay_ms(&name, req.delay_ms), StatusCode::OK)
}

/// Set master gain
pub async fn set_master(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GainRequest>,
) -> ApiResult<()> {
    reply(state.mixer.set_master_gain(req.gain), StatusCode::OK)
}

#[derive(Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// Enable or disable an effect stage
pub async fn set_effect(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> ApiResult<()> {
    reply(
        state.mixer.set_effect_enabled(&name, req.enabled),
        StatusCode::OK,
    )
}

/// Leave load shedding
pub async fn restore_effects(State(state): State<Arc<AppState>>) -> Json<ApiResponse<()>> {
    state.mixer.restore_effects();
    Json(ApiResponse::ok(()))
}

#[derive(Deserialize)]
pub struct OutputRequest {
    pub name: String,
}

/// Rename the output stream
pub async fn set_output(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OutputRequest>,
) -> ApiResult<()> {
    reply(state.mixer.rename_output(&req.name), StatusCode::OK)
}

/// Current meter readings
pub async fn get_levels(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<NamedLevel>>> {
    Json(ApiResponse::ok(state.mixer.levels()))
}

/// Write the mixer state file; responds with its path
pub async fn save_state(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    let result = state
        .mixer
        .save_state(&state.state_path)
        .map(|_| state.state_path.display().to_string());
    reply(result, StatusCode::OK)
}

/// Read the mixer state file; responds with the number of gains applied
pub async fn load_state(State(state): State<Arc<AppState>>) -> ApiResult<usize> {
    reply(state.mixer.load_state(&state.state_path), StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::port::AudioSourcePort;
    use crate::config::EngineConfig;
    use crate::mixer::{MixCycle, MixerEngine, MixerHandle};
    use crate::ui::server::router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Silence;

    impl AudioSourcePort for Silence {
        fn receive(&mut self, out: &mut [f32]) -> usize {
            out.fill(0.0);
            out.len()
        }
    }

    fn app(state_path: std::path::PathBuf) -> (axum::Router, MixerHandle, MixCycle) {
        let (mixer, cycle) = MixerEngine::create(EngineConfig::default(), None).unwrap();
        mixer.attach_port("cam", Box::new(Silence)).unwrap();
        let state = Arc::new(AppState::new(mixer.clone(), state_path));
        (router(state), mixer, cycle)
    }

    async fn send(app: axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_set_gain() {
        let (app, mixer, _cycle) = app("state.json".into());
        let (status, json) = send(app, "PUT", "/api/channels/cam/gain", r#"{"gain":0.25}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(mixer.channel("cam").unwrap().gain, 0.25);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let (app, _mixer, _cycle) = app("state.json".into());

        let (status, json) =
            send(app.clone(), "PUT", "/api/channels/nobody/mute", r#"{"muted":true}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);

        let (status, _) = send(app.clone(), "PUT", "/api/master", r#"{"gain":2.0}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(app.clone(), "PUT", "/api/effects/reverb", r#"{"enabled":true}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // No directory behind this mixer
        let (status, _) = send(app, "POST", "/api/channels", r#"{"name":"cam2"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_conflicts_are_409() {
        let e = Error::Control(ControlError::AlreadyAttached("cam".into()));
        assert_eq!(status_for(&e), StatusCode::CONFLICT);
        let e = Error::Control(ControlError::TooManySources(16));
        assert_eq!(status_for(&e), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_levels_and_channels() {
        let (app, _mixer, _cycle) = app("state.json".into());

        let (status, json) = send(app.clone(), "GET", "/api/levels", "").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cam", "mix"]);

        let (_, json) = send(app, "GET", "/api/channels", "").await;
        assert_eq!(json["data"][0]["name"], "cam");
        assert_eq!(json["data"][0]["muted"], false);
    }

    #[tokio::test]
    async fn test_state_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixer_state.json");
        let (app, mixer, _cycle) = app(path.clone());

        mixer.set_gain("cam", 0.5).unwrap();
        let (status, _) = send(app.clone(), "POST", "/api/state/save", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(path.exists());

        mixer.set_gain("cam", 1.0).unwrap();
        let (status, json) = send(app, "POST", "/api/state/load", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"], 1);
        assert_eq!(mixer.channel("cam").unwrap().gain, 0.5);
    }

    #[tokio::test]
    async fn test_status_reports_output_name() {
        let (app, mixer, _cycle) = app("state.json".into());
        let (status, _) = send(app.clone(), "PUT", "/api/output", r#"{"name":"Stage Mix"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mixer.output_name(), "Stage Mix");

        let (_, json) = send(app, "GET", "/api/status", "").await;
        assert_eq!(json["data"]["output_name"], "Stage Mix");
        assert_eq!(json["data"]["channel_count"], 1);
    }
}
