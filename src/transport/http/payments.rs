use {
    super::{IDEMPOTENCY_HEADER, correlation_from, errors::ApiError, respond},
    crate::AppState,
    crate::domain::{
        error::GatewayError,
        id::IdempotencyKey,
        money::{Currency, MoneyAmount},
        payment::{PaymentRequest, PaymentRequestParams, PaymentTransaction},
        refund::{RefundRequest, RefundTransaction, RefundType},
    },
    axum::{
        Json,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::Response,
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
    uuid::Uuid,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    amount: serde_json::Value,
    currency: String,
    customer_id: String,
    order_id: String,
    #[serde(default)]
    description: Option<String>,
    return_url: String,
    cancel_url: String,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    amount: serde_json::Value,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    refund_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    transaction_id: Uuid,
    status: String,
    amount: String,
    currency: String,
    customer_id: String,
    order_id: String,
    provider: String,
    provider_transaction_id: Option<String>,
    payment_url: Option<String>,
    error_message: Option<String>,
    provider_error_code: Option<String>,
    correlation_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<&PaymentTransaction> for PaymentResponse {
    fn from(txn: &PaymentTransaction) -> Self {
        Self {
            transaction_id: txn.id,
            status: txn.status.as_str().to_string(),
            amount: txn.money.amount().to_decimal_string(),
            currency: txn.money.currency().to_string(),
            customer_id: txn.customer_id.clone(),
            order_id: txn.order_id.clone(),
            provider: txn.provider_name.clone(),
            provider_transaction_id: txn.provider_transaction_id.clone(),
            payment_url: txn.payment_url.clone(),
            error_message: txn.error_message.clone(),
            provider_error_code: txn.provider_error_code.clone(),
            correlation_id: txn.correlation_id.as_str().to_string(),
            created_at: txn.created_at,
            updated_at: txn.updated_at,
            completed_at: txn.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    refund_id: Uuid,
    payment_transaction_id: Uuid,
    status: String,
    amount: String,
    currency: String,
    refund_type: String,
    provider_refund_id: Option<String>,
    reason: Option<String>,
    error_message: Option<String>,
    correlation_id: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<&RefundTransaction> for RefundResponse {
    fn from(refund: &RefundTransaction) -> Self {
        Self {
            refund_id: refund.id,
            payment_transaction_id: refund.payment_transaction_id,
            status: refund.status.as_str().to_string(),
            amount: refund.money.amount().to_decimal_string(),
            currency: refund.money.currency().to_string(),
            refund_type: refund.refund_type.as_str().to_string(),
            provider_refund_id: refund.provider_refund_id.clone(),
            reason: refund.reason.clone(),
            error_message: refund.error_message.clone(),
            correlation_id: refund.correlation_id.as_str().to_string(),
            created_at: refund.created_at,
            completed_at: refund.completed_at,
        }
    }
}

/// Amounts arrive as a JSON number or decimal string; both go through the
/// exact parser, never through a float.
pub fn parse_amount(value: &serde_json::Value) -> Result<MoneyAmount, GatewayError> {
    match value {
        serde_json::Value::String(s) => MoneyAmount::parse_decimal(s),
        serde_json::Value::Number(n) => MoneyAmount::parse_decimal(&n.to_string()),
        _ => Err(GatewayError::Validation(
            "amount must be a number or decimal string".into(),
        )),
    }
}

fn idempotency_key_from(headers: &HeaderMap) -> Result<IdempotencyKey, GatewayError> {
    let value = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::IdempotencyKeyRequired)?;
    IdempotencyKey::new(value)
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = "/v1/payments";
    let fail = |e: GatewayError| ApiError::new(e, correlation_id.as_str(), path);

    let request = PaymentRequest::new(PaymentRequestParams {
        idempotency_key: idempotency_key_from(&headers).map_err(fail)?,
        amount: parse_amount(&body.amount).map_err(fail)?,
        currency: Currency::new(&body.currency).map_err(fail)?,
        customer_id: body.customer_id,
        order_id: body.order_id,
        description: body.description,
        return_url: body.return_url,
        cancel_url: body.cancel_url,
        metadata: body.metadata.unwrap_or_default(),
        preferred_provider: body.provider,
    })
    .map_err(fail)?;

    let txn = state
        .payments
        .process_payment(request, correlation_id.clone())
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path))?;

    // A FAILED transaction is still a 201: the caller gets a durable id to
    // query and reconcile against.
    Ok(respond(
        StatusCode::CREATED,
        &correlation_id,
        PaymentResponse::from(&txn),
    ))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let txn = state
        .payments
        .get_payment(id)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), format!("/v1/payments/{id}")))?;
    Ok(respond(StatusCode::OK, &correlation_id, PaymentResponse::from(&txn)))
}

/// Explicit provider status query — the settlement path for flows whose
/// provider never delivers (or loses) the webhook.
pub async fn sync_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let txn = state
        .payments
        .sync_status(id)
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), format!("/v1/payments/{id}/sync")))?;
    Ok(respond(StatusCode::OK, &correlation_id, PaymentResponse::from(&txn)))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<RefundBody>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_from(&headers);
    let path = format!("/v1/payments/{id}/refund");
    let fail = |e: GatewayError| ApiError::new(e, correlation_id.as_str(), path.clone());

    let refund_type = match body.refund_type.as_deref() {
        None => RefundType::Partial,
        Some(s) => RefundType::try_from(s).map_err(&fail)?,
    };
    let request = RefundRequest::new(
        idempotency_key_from(&headers).map_err(&fail)?,
        id,
        parse_amount(&body.amount).map_err(&fail)?,
        refund_type,
        body.reason,
    )
    .map_err(&fail)?;

    let refund = state
        .refunds
        .process_refund(request, correlation_id.clone())
        .await
        .map_err(|e| ApiError::new(e, correlation_id.as_str(), path.clone()))?;

    Ok(respond(StatusCode::OK, &correlation_id, RefundResponse::from(&refund)))
}
