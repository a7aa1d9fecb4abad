use std::collections::HashMap;
use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse};
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde_json::json;

use crate::db::DbPool;
use crate::email::{EmailLineItem, Mailer};
use crate::errors::AppError;
use crate::models::order::{NewOrder, OrderStatus};
use crate::models::order_item::NewOrderItem;
use crate::schema::{order_items, orders, products};
use crate::stripe::{
    from_minor_units, parse_cart_metadata, CheckoutSessionObject, StripeClient, WebhookEvent,
    CAPTURE_EVENT,
};

const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// A cart line from the session metadata with its price parsed.
#[derive(Debug, Clone)]
struct CapturedLine {
    product_id: i32,
    quantity: i32,
    price: BigDecimal,
}

/// Everything extracted from a capture notification before storage is
/// touched. The total comes from the provider-reported captured amount, not
/// from recomputing the lines.
#[derive(Debug)]
struct Capture {
    customer_email: String,
    total_amount: BigDecimal,
    payment_ref: String,
    lines: Vec<CapturedLine>,
}

/// Order and items as committed, plus what the confirmation email needs.
struct StoredOrder {
    order_id: i32,
    total_amount: BigDecimal,
    items: Vec<EmailLineItem>,
}

fn extract_capture(session: CheckoutSessionObject) -> Result<Capture, AppError> {
    let CheckoutSessionObject {
        id,
        customer_email,
        amount_total,
        payment_intent,
        metadata,
    } = session;

    let customer_email = customer_email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| AppError::Validation("capture event has no customer email".to_string()))?;
    let amount_total = amount_total
        .ok_or_else(|| AppError::Validation("capture event has no amount_total".to_string()))?;
    // The session id still identifies the payment when no payment intent is
    // attached.
    let payment_ref = payment_intent.unwrap_or(id);

    let lines = parse_cart_metadata(&metadata)?
        .into_iter()
        .map(|line| {
            if line.quantity < 1 {
                return Err(AppError::Validation(format!(
                    "invalid quantity {} for product {}",
                    line.quantity, line.product_id
                )));
            }
            let price = BigDecimal::from_str(&line.price).map_err(|e| {
                AppError::Validation(format!(
                    "invalid price '{}' in cart metadata: {e}",
                    line.price
                ))
            })?;
            Ok(CapturedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                price,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if lines.is_empty() {
        return Err(AppError::Validation("cart metadata is empty".to_string()));
    }

    Ok(Capture {
        customer_email,
        total_amount: from_minor_units(amount_total),
        payment_ref,
        lines,
    })
}

/// POST /webhook
///
/// The provider signs the raw request bytes; those exact bytes feed the
/// signature check, and parsing happens only after verification succeeds.
/// Non-capture events are acknowledged without side effects. A capture event
/// inserts the order and all of its items in one transaction; a storage
/// failure rolls everything back, is logged, and the provider still gets a
/// success acknowledgement so its retry queue is not blocked.
#[utoipa::path(
    post,
    path = "/webhook",
    request_body(content = String, description = "Raw signed webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Invalid signature or malformed payload"),
    ),
    tag = "checkout"
)]
pub async fn handle_webhook(
    req: HttpRequest,
    body: web::Bytes,
    stripe_client: web::Data<StripeClient>,
    mailer: web::Data<Mailer>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, AppError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::SignatureInvalid)?;
    stripe_client.verify_signature(&body, signature)?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;

    if event.event_type != CAPTURE_EVENT {
        log::debug!("acknowledging webhook event '{}' without action", event.event_type);
        return Ok(HttpResponse::Ok().json(json!({ "received": true })));
    }

    let capture = extract_capture(event.data.object)?;
    let customer_email = capture.customer_email.clone();

    let outcome = match web::block(move || store_order(&pool, capture)).await {
        Ok(inner) => inner,
        Err(e) => Err(AppError::Storage(e.to_string())),
    };

    match outcome {
        Ok(Some(stored)) => {
            // Best-effort: the order is committed whether or not this lands.
            if let Err(e) = mailer
                .send_order_confirmation(
                    &customer_email,
                    stored.order_id,
                    &stored.total_amount,
                    &stored.items,
                )
                .await
            {
                log::error!("order {} confirmation email failed: {e}", stored.order_id);
            }
        }
        Ok(None) => {} // duplicate delivery, already captured
        Err(e) => {
            log::error!("order capture failed, acknowledging webhook anyway: {e}");
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

fn store_order(pool: &DbPool, capture: Capture) -> Result<Option<StoredOrder>, AppError> {
    let mut conn = pool.get()?;

    // Redelivered notifications are detected by payment reference; the
    // unique index on orders.payment_ref backstops a concurrent duplicate.
    let existing = orders::table
        .filter(orders::payment_ref.eq(&capture.payment_ref))
        .select(orders::id)
        .first::<i32>(&mut conn)
        .optional()?;
    if let Some(order_id) = existing {
        log::info!(
            "payment {} already captured as order {order_id}; skipping duplicate delivery",
            capture.payment_ref
        );
        return Ok(None);
    }

    let order_id = conn.transaction::<_, AppError, _>(|conn| {
        let order_id = diesel::insert_into(orders::table)
            .values(&NewOrder {
                customer_email: capture.customer_email.clone(),
                total_amount: capture.total_amount.clone(),
                payment_ref: capture.payment_ref.clone(),
                status: OrderStatus::Paid.to_string(),
            })
            .returning(orders::id)
            .get_result::<i32>(conn)?;

        let new_items: Vec<NewOrderItem> = capture
            .lines
            .iter()
            .map(|line| NewOrderItem {
                order_id,
                product_id: line.product_id,
                quantity: line.quantity,
                price_at_purchase: line.price.clone(),
            })
            .collect();
        diesel::insert_into(order_items::table)
            .values(&new_items)
            .execute(conn)?;

        Ok(order_id)
    })?;

    log::info!(
        "captured payment {} as order {order_id} with {} item(s)",
        capture.payment_ref,
        capture.lines.len()
    );

    // Product names for the confirmation email; read-only, outside the
    // consistency boundary, so a failure here only degrades the email.
    let product_ids: Vec<i32> = capture.lines.iter().map(|line| line.product_id).collect();
    let names: HashMap<i32, String> = match products::table
        .filter(products::id.eq_any(&product_ids))
        .select((products::id, products::name))
        .load::<(i32, String)>(&mut conn)
    {
        Ok(rows) => rows.into_iter().collect(),
        Err(e) => {
            log::warn!("could not resolve product names for order {order_id}: {e}");
            HashMap::new()
        }
    };

    let items = capture
        .lines
        .iter()
        .map(|line| EmailLineItem {
            name: names
                .get(&line.product_id)
                .cloned()
                .unwrap_or_else(|| format!("Product #{}", line.product_id)),
            quantity: line.quantity,
            unit_price: line.price.clone(),
        })
        .collect();

    Ok(Some(StoredOrder {
        order_id,
        total_amount: capture.total_amount,
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(cart: &str) -> CheckoutSessionObject {
        let mut metadata = HashMap::new();
        metadata.insert("cart".to_string(), cart.to_string());
        CheckoutSessionObject {
            id: "cs_test_1".to_string(),
            customer_email: Some("bonnie@example.com".to_string()),
            amount_total: Some(3300),
            payment_intent: Some("pi_123".to_string()),
            metadata,
        }
    }

    const CART: &str =
        r#"[{"product_id":7,"quantity":2,"price":"12.50"},{"product_id":9,"quantity":1,"price":"8.00"}]"#;

    #[test]
    fn capture_extracts_order_fields() {
        let capture = extract_capture(session(CART)).unwrap();
        assert_eq!(capture.customer_email, "bonnie@example.com");
        assert_eq!(capture.total_amount.to_string(), "33.00");
        assert_eq!(capture.payment_ref, "pi_123");
        assert_eq!(capture.lines.len(), 2);
        assert_eq!(capture.lines[0].product_id, 7);
        assert_eq!(capture.lines[0].quantity, 2);
        assert_eq!(capture.lines[0].price.to_string(), "12.50");
    }

    #[test]
    fn session_id_backs_missing_payment_intent() {
        let mut s = session(CART);
        s.payment_intent = None;
        let capture = extract_capture(s).unwrap();
        assert_eq!(capture.payment_ref, "cs_test_1");
    }

    #[test]
    fn missing_email_is_rejected() {
        let mut s = session(CART);
        s.customer_email = None;
        assert!(matches!(
            extract_capture(s),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn missing_amount_is_rejected() {
        let mut s = session(CART);
        s.amount_total = None;
        assert!(extract_capture(s).is_err());
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let s = session(r#"[{"product_id":7,"quantity":0,"price":"12.50"}]"#);
        assert!(extract_capture(s).is_err());
    }

    #[test]
    fn unparseable_price_is_rejected() {
        let s = session(r#"[{"product_id":7,"quantity":1,"price":"twelve"}]"#);
        assert!(extract_capture(s).is_err());
    }

    #[test]
    fn empty_cart_is_rejected() {
        let s = session("[]");
        assert!(extract_capture(s).is_err());
    }
}
