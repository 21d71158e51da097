use {
    super::{correlation_from, errors::ApiError, respond},
    crate::AppState,
    crate::domain::{
        error::GatewayError,
        money::Currency,
        provider::{Provider, ProviderDraft, ProviderStatus, RegionConfig},
    },
    axum::{
        Json,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
    uuid::Uuid,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfigBody {
    region: String,
    base_url: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBody {
    name: String,
    display_name: String,
    #[serde(default)]
    status: Option<String>,
    supported_currencies: Vec<String>,
    #[serde(default)]
    priority: Option<i32>,
    /// Plaintext on the way in; encrypted before persistence and never
    /// echoed back.
    #[serde(default)]
    credentials: Option<BTreeMap<String, String>>,
    #[serde(default)]
    configurations: Vec<RegionConfigBody>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    currency: String,
}

/// Outbound view; credentials deliberately absent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    id: Uuid,
    name: String,
    display_name: String,
    status: String,
    supported_currencies: Vec<String>,
    priority: i32,
    configurations: Vec<RegionConfigView>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfigView {
    region: String,
    base_url: String,
    active: bool,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
}

impl From<&Provider> for ProviderView {
    fn from(p: &Provider) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            display_name: p.display_name.clone(),
            status: p.status.as_str().to_string(),
            supported_currencies: p
                .supported_currencies
                .iter()
                .map(|c| c.to_string())
                .collect(),
            priority: p.priority,
            configurations: p
                .configurations
                .iter()
                .map(|c| RegionConfigView {
                    region: c.region.clone(),
                    base_url: c.base_url.clone(),
                    active: c.active,
                    max_retries: c.max_retries,
                    timeout_secs: c.timeout_secs,
                })
                .collect(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

fn draft_from(body: ProviderBody) -> Result<ProviderDraft, GatewayError> {
    let status = match body.status.as_deref() {
        None => ProviderStatus::Active,
        Some(s) => ProviderStatus::try_from(s)?,
    };
    let supported_currencies = body
        .supported_currencies
        .iter()
        .map(|c| Currency::new(c))
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(ProviderDraft {
        name: body.name,
        display_name: body.display_name,
        status,
        supported_currencies,
        priority: body.priority.unwrap_or(100),
        credentials: body.credentials.unwrap_or_default(),
        configurations: body
            .configurations
            .into_iter()
            .map(|c| RegionConfig {
                region: c.region,
                base_url: c.base_url,
                active: c.active,
                max_retries: c.max_retries,
                timeout_secs: c.timeout_secs,
            })
            .collect(),
    })
}

pub async fn list_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let providers = state
        .registry
        .list_all()
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), "/v1/providers"))?;
    let views: Vec<ProviderView> = providers.iter().map(ProviderView::from).collect();
    Ok(respond(StatusCode::OK, &correlation_id, views))
}

pub async fn active_providers(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = "/v1/providers/active";

    let currency = Currency::new(&query.currency)
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;
    let providers = state
        .registry
        .list_active_by_currency(&currency)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;
    let views: Vec<ProviderView> = providers.iter().map(ProviderView::from).collect();
    Ok(respond(StatusCode::OK, &correlation_id, views))
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let provider = state
        .registry
        .get_by_id(id)
        .await
        .and_then(|p| p.ok_or_else(|| GatewayError::NotFound(format!("provider {id}"))))
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), format!("/v1/providers/{id}")))?;
    Ok(respond(StatusCode::OK, &correlation_id, ProviderView::from(&provider)))
}

pub async fn create_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProviderBody>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = "/v1/providers";

    let draft = draft_from(body).map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;
    let provider = state
        .registry
        .register(draft)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;
    Ok(respond(StatusCode::CREATED, &correlation_id, ProviderView::from(&provider)))
}

pub async fn update_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ProviderBody>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = format!("/v1/providers/{id}");

    let draft =
        draft_from(body).map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;
    let provider = state
        .registry
        .update(id, draft)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;
    Ok(respond(StatusCode::OK, &correlation_id, ProviderView::from(&provider)))
}

pub async fn update_provider_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = format!("/v1/providers/{id}/status");

    let status = ProviderStatus::try_from(body.status.as_str())
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;
    state
        .registry
        .update_status(id, status)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;

    let provider = state
        .registry
        .get_by_id(id)
        .await
        .and_then(|p| p.ok_or_else(|| GatewayError::NotFound(format!("provider {id}"))))
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;
    Ok(respond(StatusCode::OK, &correlation_id, ProviderView::from(&provider)))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    state
        .registry
        .delete(id)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), format!("/v1/providers/{id}")))?;
    Ok(super::with_correlation(
        &correlation_id,
        StatusCode::NO_CONTENT.into_response(),
    ))
}
