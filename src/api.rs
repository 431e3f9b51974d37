//! HTTP surface over the storefront services.
//!
//! Identity comes from the `x-user-id` header (set by the authenticating
//! proxy) or the `x-session-token` header. Requests carrying neither get a
//! fresh anonymous session, returned in the `x-session-token` response header.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::aggregates::{CartLine, LineChange, Order, OrderStatus};
use crate::domain::value_objects::{Identity, SessionToken, Size};
use crate::services::{CartSummary, ShippingDetails, Storefront};
use crate::CommerceError;

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Clone)]
pub struct AppState {
    pub shop: Storefront,
}

pub fn router(shop: Storefront) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_to_cart))
        .route("/api/v1/cart/items/:line_id", delete(remove_from_cart))
        .route("/api/v1/cart/items/:line_id/step", post(step_cart_line))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(order_history))
        .route("/api/v1/orders/:order_number", get(order_detail))
        .route("/api/v1/orders/:order_number/status", put(update_order_status))
        .layer(middleware::from_fn(ensure_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { shop })
}

// =============================================================================
// Identity
// =============================================================================

/// Allocates an anonymous session for callers that have no identity yet.
async fn ensure_session(mut req: Request, next: Next) -> Response {
    let headers = req.headers();
    if headers.contains_key(USER_HEADER) || headers.contains_key(SESSION_HEADER) {
        return next.run(req).await;
    }
    let token = SessionToken::generate();
    req.extensions_mut().insert(token.clone());
    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(token.as_str()) {
        res.headers_mut().insert(SESSION_HEADER, value);
    }
    res
}

pub struct Caller(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(USER_HEADER) {
            let id = value
                .to_str()
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .ok_or_else(|| CommerceError::InvalidArgument(format!("malformed {USER_HEADER} header")))?;
            return Ok(Caller(Identity::user(id)));
        }
        if let Some(value) = parts.headers.get(SESSION_HEADER) {
            let token = value
                .to_str()
                .map_err(|_| CommerceError::InvalidArgument(format!("malformed {SESSION_HEADER} header")))
                .and_then(|s| SessionToken::new(s).map_err(CommerceError::from))?;
            return Ok(Caller(Identity::anonymous(token)));
        }
        match parts.extensions.get::<SessionToken>() {
            Some(token) => Ok(Caller(Identity::anonymous(token.clone()))),
            None => Err(CommerceError::PermissionDenied.into()),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

pub struct ApiError {
    pub error: CommerceError,
    /// Where a permission failure sends the user.
    denied_redirect: &'static str,
}

impl ApiError {
    /// Permission failures on cart routes re-render the cart.
    fn in_cart(mut self) -> Self {
        self.denied_redirect = "cart";
        self
    }
}

impl From<CommerceError> for ApiError {
    fn from(error: CommerceError) -> Self {
        Self { error, denied_redirect: "home" }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        CommerceError::InvalidArgument(rejection.body_text()).into()
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        CommerceError::InvalidArgument(rejection.body_text()).into()
    }
}

fn cart_error(error: CommerceError) -> ApiError {
    ApiError::from(error).in_cart()
}

/// `Json` whose rejections use the API error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejections use the API error body.
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            CommerceError::NotFound(_) => StatusCode::NOT_FOUND,
            CommerceError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CommerceError::PermissionDenied => StatusCode::FORBIDDEN,
            CommerceError::EmptyCart | CommerceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CommerceError::OrderNumberExhausted { .. } | CommerceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        // Where the presentation layer should send the user next.
        let redirect = match &self.error {
            CommerceError::EmptyCart => Some("cart"),
            CommerceError::PermissionDenied => Some(self.denied_redirect),
            _ => None,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        }
        let body = serde_json::json!({
            "error": self.error.code(),
            "message": self.error.to_string(),
            "retryable": self.error.is_retryable(),
            "redirect": redirect,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Cart
// =============================================================================

async fn get_cart(State(s): State<AppState>, Caller(who): Caller) -> ApiResult<Json<CartSummary>> {
    let cart = s.shop.carts.get_or_create_cart(&who).await?;
    Ok(Json(s.shop.carts.summary(&who, &cart).await.map_err(cart_error)?))
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: Option<u32>,
    pub size: Option<String>,
}

async fn add_to_cart(
    State(s): State<AppState>,
    Caller(who): Caller,
    ApiJson(r): ApiJson<AddToCartRequest>,
) -> ApiResult<(StatusCode, Json<CartLine>)> {
    let cart = s.shop.carts.get_or_create_cart(&who).await?;
    let line = s
        .shop
        .carts
        .add_item(&who, &cart, r.product_id, r.quantity.unwrap_or(1), Size::from(r.size))
        .await
        .map_err(cart_error)?;
    Ok((StatusCode::CREATED, Json(line)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Increase,
    Decrease,
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub action: Option<StepAction>,
    pub delta: Option<i32>,
}

async fn step_cart_line(
    State(s): State<AppState>,
    Caller(who): Caller,
    ApiPath(line_id): ApiPath<Uuid>,
    ApiJson(r): ApiJson<StepRequest>,
) -> ApiResult<Json<LineChange>> {
    let delta = match (r.action, r.delta) {
        (Some(StepAction::Increase), _) => 1,
        (Some(StepAction::Decrease), _) => -1,
        (None, Some(delta)) => delta,
        (None, None) => return Err(CommerceError::InvalidArgument("either action or delta is required".into()).into()),
    };
    let cart = s.shop.carts.get_or_create_cart(&who).await?;
    Ok(Json(s.shop.carts.set_line_quantity(&who, &cart, line_id, delta).await.map_err(cart_error)?))
}

async fn remove_from_cart(State(s): State<AppState>, Caller(who): Caller, ApiPath(line_id): ApiPath<Uuid>) -> ApiResult<StatusCode> {
    let cart = s.shop.carts.get_or_create_cart(&who).await?;
    s.shop.carts.remove_item(&who, &cart, line_id).await.map_err(cart_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Checkout & orders
// =============================================================================

/// An order with its display status.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub status_label: &'static str,
    pub status_step: u8,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self { status_label: order.status_label(), status_step: order.status_step(), order }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub shipping: ShippingDetails,
    #[serde(default)]
    pub notes: String,
}

async fn checkout(State(s): State<AppState>, Caller(who): Caller, ApiJson(r): ApiJson<CheckoutRequest>) -> ApiResult<(StatusCode, Json<OrderView>)> {
    let cart = s.shop.carts.get_or_create_cart(&who).await?;
    let order = s.shop.checkout.checkout(&who, &cart, r.shipping, &r.notes).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

async fn order_history(State(s): State<AppState>, Caller(who): Caller) -> ApiResult<Json<Vec<OrderView>>> {
    let orders = s.shop.orders.order_history(&who).await?;
    Ok(Json(orders.into_iter().map(OrderView::from).collect()))
}

async fn order_detail(State(s): State<AppState>, Caller(who): Caller, ApiPath(order_number): ApiPath<String>) -> ApiResult<Json<OrderView>> {
    Ok(Json(s.shop.orders.order_detail(&who, &order_number).await?.into()))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

async fn update_order_status(
    State(s): State<AppState>,
    ApiPath(order_number): ApiPath<String>,
    ApiJson(r): ApiJson<StatusRequest>,
) -> ApiResult<Json<OrderView>> {
    let next: OrderStatus = r.status.parse().map_err(|e: crate::domain::aggregates::UnknownStatus| CommerceError::InvalidArgument(e.to_string()))?;
    Ok(Json(s.shop.orders.update_status(&order_number, next).await?.into()))
}
