use actix_web::{web, HttpResponse};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::AdminToken;
use crate::db::DbPool;
use crate::email::{EmailLineItem, Mailer};
use crate::errors::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::order_item::OrderItem;
use crate::schema::{order_items, orders, products};

// ── Response DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: i32,
    pub product_id: i32,
    /// Resolved through the product foreign key; soft-deleted products still
    /// resolve here.
    pub product_name: String,
    pub quantity: i32,
    /// Decimal price as a string to avoid floating-point issues, e.g. "12.50"
    pub price_at_purchase: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: i32,
    pub customer_email: String,
    pub total_amount: String,
    pub payment_ref: String,
    pub status: String,
    pub created_at: String,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    /// One of "pending", "paid", "shipped".
    pub status: String,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /orders (admin)
///
/// All orders newest-first with their line items nested.
#[utoipa::path(
    get,
    path = "/orders",
    responses(
        (status = 200, description = "Orders with nested items", body = Vec<OrderResponse>),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 500, description = "Internal server error"),
    ),
    security(("admin_token" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    _admin: AdminToken,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, AppError> {
    let result = web::block(move || {
        let mut conn = pool.get()?;

        let order_rows = orders::table
            .select(Order::as_select())
            .order(orders::created_at.desc())
            .load(&mut conn)?;

        let item_rows: Vec<(OrderItem, String)> = OrderItem::belonging_to(&order_rows)
            .inner_join(products::table)
            .select((OrderItem::as_select(), products::name))
            .load(&mut conn)?;
        let grouped = item_rows.grouped_by(&order_rows);

        let responses: Vec<OrderResponse> = order_rows
            .into_iter()
            .zip(grouped)
            .map(|(order, items)| OrderResponse {
                id: order.id,
                customer_email: order.customer_email,
                total_amount: order.total_amount.to_string(),
                payment_ref: order.payment_ref,
                status: order.status,
                created_at: order.created_at.to_rfc3339(),
                items: items
                    .into_iter()
                    .map(|(item, product_name)| OrderItemResponse {
                        id: item.id,
                        product_id: item.product_id,
                        product_name,
                        quantity: item.quantity,
                        price_at_purchase: item.price_at_purchase.to_string(),
                    })
                    .collect(),
            })
            .collect();

        Ok::<_, AppError>(responses)
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    Ok(HttpResponse::Ok().json(result))
}

/// PATCH /orders/{id}/status (admin)
///
/// Statuses form a one-way ladder; moving an order to "shipped" sends the
/// shipment confirmation as a side effect. The email is best-effort and
/// never undoes the status change.
#[utoipa::path(
    patch,
    path = "/orders/{id}/status",
    params(("id" = i32, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Unknown status or backwards transition"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(("admin_token" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    _admin: AdminToken,
    path: web::Path<i32>,
    body: web::Json<UpdateOrderStatusRequest>,
    pool: web::Data<DbPool>,
    mailer: web::Data<Mailer>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let new_status: OrderStatus = body.status.parse().map_err(AppError::Validation)?;

    let shipped = web::block(move || {
        let mut conn = pool.get()?;

        let order = orders::table
            .find(order_id)
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?;
        let Some(order) = order else {
            return Err(AppError::NotFound);
        };

        let current: OrderStatus = order
            .status
            .parse()
            .map_err(|e: String| AppError::Storage(format!("order {order_id}: {e}")))?;
        if new_status <= current {
            return Err(AppError::Validation(format!(
                "cannot move order status from '{current}' to '{new_status}'"
            )));
        }

        diesel::update(orders::table.find(order_id))
            .set(orders::status.eq(new_status.as_str()))
            .execute(&mut conn)?;

        if new_status != OrderStatus::Shipped {
            return Ok(None);
        }

        let items: Vec<(OrderItem, String)> = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .inner_join(products::table)
            .select((OrderItem::as_select(), products::name))
            .load(&mut conn)?;
        let email_items: Vec<EmailLineItem> = items
            .into_iter()
            .map(|(item, name)| EmailLineItem {
                name,
                quantity: item.quantity,
                unit_price: item.price_at_purchase,
            })
            .collect();

        Ok(Some((order.customer_email, email_items)))
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    if let Some((customer_email, items)) = shipped {
        if let Err(e) = mailer
            .send_shipping_confirmation(&customer_email, order_id, &items)
            .await
        {
            log::error!("order {order_id} shipping email failed: {e}");
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "id": order_id, "status": new_status.as_str() })))
}
