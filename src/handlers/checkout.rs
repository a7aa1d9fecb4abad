use std::str::FromStr;

use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::stripe::{to_minor_units, CartLine, SessionLineItem, StripeClient};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutItemRequest {
    pub product_id: i32,
    pub quantity: i32,
    /// Decimal price as a string to avoid floating-point issues, e.g. "12.50"
    pub price: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Product photo shown on the provider's payment page.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCheckoutSessionRequest {
    pub customer_email: String,
    pub cart_items: Vec<CheckoutItemRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateCheckoutSessionResponse {
    /// Provider-hosted payment page to redirect the customer to.
    pub url: String,
}

/// POST /checkout-session
///
/// Validates the cart lines, converts prices to minor units, and asks the
/// payment provider for a hosted checkout session. The minimal cart travels
/// in the session metadata so the webhook can reconcile the purchase later.
#[utoipa::path(
    post,
    path = "/checkout-session",
    request_body = CreateCheckoutSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateCheckoutSessionResponse),
        (status = 400, description = "Malformed cart"),
        (status = 502, description = "Payment provider rejected the session"),
    ),
    tag = "checkout"
)]
pub async fn create_checkout_session(
    stripe_client: web::Data<StripeClient>,
    body: web::Json<CreateCheckoutSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();

    if body.cart_items.is_empty() {
        return Err(AppError::Validation("cart is empty".to_string()));
    }
    if !body.customer_email.contains('@') {
        return Err(AppError::Validation(
            "a valid customer_email is required".to_string(),
        ));
    }

    let mut items = Vec::with_capacity(body.cart_items.len());
    let mut cart = Vec::with_capacity(body.cart_items.len());
    for line in &body.cart_items {
        if line.quantity < 1 {
            return Err(AppError::Validation(format!(
                "quantity must be at least 1 for product {}",
                line.product_id
            )));
        }
        let price = BigDecimal::from_str(&line.price)
            .map_err(|e| AppError::Validation(format!("invalid price '{}': {e}", line.price)))?;

        items.push(SessionLineItem {
            name: line.name.clone(),
            description: line.description.clone(),
            image: line.image.clone(),
            quantity: line.quantity,
            unit_amount: to_minor_units(&price)?,
        });
        cart.push(CartLine {
            product_id: line.product_id,
            quantity: line.quantity,
            price: line.price.clone(),
        });
    }

    let url = stripe_client
        .create_checkout_session(&body.customer_email, &items, &cart)
        .await?;

    Ok(HttpResponse::Ok().json(CreateCheckoutSessionResponse { url }))
}
