use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated; applies to calls started from now on",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

/// Public view of the configuration. The API key is reported only as set/unset.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port,
            "public_url": config.server.public_url
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions
        },
        "bridge": config.bridge,
        "realtime": {
            "url": config.realtime.url,
            "api_key_set": !config.realtime.api_key.is_empty(),
            "voice": config.realtime.voice,
            "instructions": config.realtime.instructions,
            "greeting_instructions": config.realtime.greeting_instructions,
            "sample_rate": config.realtime.sample_rate,
            "turn_detection": config.realtime.turn_detection
        }
    })
}
