//! HTTP request layer
//!
//! Routing, body validation and response shaping over [`RecommenderService`].
//! Training runs on the blocking thread pool.

use crate::error::{RecommenderError, Result};
use crate::features::ItemMetadata;
use crate::interactions::RawInteraction;
use crate::service::RecommenderService;
use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MIN_RATING: f32 = 1.0;
const MAX_RATING: f32 = 5.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    #[serde(default)]
    pub user_interactions: Option<Vec<RawInteraction>>,
    #[serde(default)]
    pub item_features: Option<Vec<ItemMetadata>>,
}

impl TrainRequest {
    /// Unwrap both lists, rejecting absent or empty ones and out-of-range ratings
    fn validate(self) -> Result<(Vec<RawInteraction>, Vec<ItemMetadata>)> {
        let interactions = match self.user_interactions {
            Some(list) if !list.is_empty() => list,
            _ => {
                return Err(RecommenderError::Validation(
                    "userInteractions must be a non-empty list".to_string(),
                ))
            }
        };
        let items = match self.item_features {
            Some(list) if !list.is_empty() => list,
            _ => {
                return Err(RecommenderError::Validation(
                    "itemFeatures must be a non-empty list".to_string(),
                ))
            }
        };

        if let Some(bad) = interactions
            .iter()
            .find(|i| !i.rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&i.rating))
        {
            return Err(RecommenderError::Validation(format!(
                "rating {} for user '{}' and item '{}' is outside [{}, {}]",
                bad.rating, bad.user_id, bad.item_id, MIN_RATING, MAX_RATING
            )));
        }

        Ok((interactions, items))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub status: String,
    pub trained_at: DateTime<Utc>,
    pub generation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub num: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub user_id: String,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
}

/// Health check endpoint
async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        time: Utc::now(),
    })
}

/// POST /train
async fn train(
    service: web::Data<RecommenderService>,
    body: web::Json<TrainRequest>,
) -> Result<HttpResponse> {
    let (interactions, items) = body.into_inner().validate()?;
    tracing::info!(
        interactions = interactions.len(),
        items = items.len(),
        "Received training request"
    );

    let service = service.into_inner();
    let generation = web::block(move || service.train(&interactions, &items))
        .await
        .map_err(|e| RecommenderError::Internal(format!("training task failed: {}", e)))??;

    Ok(HttpResponse::Ok().json(TrainResponse {
        status: "trained".to_string(),
        trained_at: generation.trained_at,
        generation_id: generation.id,
    }))
}

/// GET /recommend/{user_id}?num=N
async fn recommend(
    service: web::Data<RecommenderService>,
    path: web::Path<String>,
    query: web::Query<RecommendQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let num_items = parse_num(query.num.as_deref())?;

    let recommendations = service.recommend(&user_id, num_items)?;

    Ok(HttpResponse::Ok().json(RecommendResponse {
        user_id,
        recommendations,
        generated_at: Utc::now(),
    }))
}

fn parse_num(raw: Option<&str>) -> Result<Option<usize>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(RecommenderError::Validation(format!(
            "num must be a positive integer, got '{}'",
            raw
        ))),
    }
}

/// Malformed or mistyped JSON bodies get the same `{error, message}` reply as
/// every other rejected request
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| RecommenderError::Validation(err.to_string()).into())
}

/// Configure application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health))
        .route("/train", web::post().to(train))
        .route("/recommend/{user_id}", web::get().to(recommend));
}
