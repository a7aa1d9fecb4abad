use std::str::FromStr;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::AdminToken;
use crate::config::Config;
use crate::db::DbPool;
use crate::errors::AppError;
use crate::models::category::{Category, NewCategory};
use crate::models::product::{NewProduct, Product};
use crate::schema::{categories, products};
use crate::uploads;

// ── Response DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Decimal price as a string to avoid floating-point issues, e.g. "12.50"
    pub price: String,
    pub category_id: i32,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub category_name: String,
    /// The category description doubles as display dimensions in the gallery.
    pub category_dimensions: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryResponse {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
}

fn product_response(
    product: Product,
    category_name: String,
    category_dimensions: Option<String>,
) -> ProductResponse {
    ProductResponse {
        id: product.id,
        name: product.name,
        description: product.description,
        price: product.price.to_string(),
        category_id: product.category_id,
        image_url: product.image_url,
        is_active: product.is_active,
        created_at: product.created_at.to_rfc3339(),
        category_name,
        category_dimensions,
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

fn parse_price(raw: Option<&str>) -> Result<BigDecimal, AppError> {
    let raw = raw.ok_or_else(|| AppError::Validation("price is required".to_string()))?;
    BigDecimal::from_str(raw.trim())
        .map_err(|e| AppError::Validation(format!("invalid price '{raw}': {e}")))
}

/// A numeric reference selects an existing category; anything else names a
/// category to create inline.
fn resolve_category(conn: &mut PgConnection, reference: &str) -> Result<i32, AppError> {
    let reference = reference.trim();
    match reference.parse::<i32>() {
        Ok(id) => Ok(id),
        Err(_) => {
            let id = diesel::insert_into(categories::table)
                .values(&NewCategory {
                    name: reference.to_string(),
                    description: None,
                })
                .returning(categories::id)
                .get_result(conn)?;
            Ok(id)
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /products
///
/// Active products joined with their category's name and dimensions, ordered
/// by id. Soft-deleted products never appear here.
#[utoipa::path(
    get,
    path = "/products",
    responses(
        (status = 200, description = "Active products", body = Vec<ProductResponse>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "catalog"
)]
pub async fn list_products(pool: web::Data<DbPool>) -> Result<HttpResponse, AppError> {
    let rows = web::block(move || {
        let mut conn = pool.get()?;
        let rows: Vec<(Product, String, Option<String>)> = products::table
            .inner_join(categories::table)
            .filter(products::is_active.eq(true))
            .order(products::id.asc())
            .select((
                Product::as_select(),
                categories::name,
                categories::description,
            ))
            .load(&mut conn)?;
        Ok::<_, AppError>(rows)
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    let items: Vec<ProductResponse> = rows
        .into_iter()
        .map(|(product, name, dimensions)| product_response(product, name, dimensions))
        .collect();

    Ok(HttpResponse::Ok().json(items))
}

/// GET /categories
#[utoipa::path(
    get,
    path = "/categories",
    responses(
        (status = 200, description = "All categories, alphabetical", body = Vec<CategoryResponse>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "catalog"
)]
pub async fn list_categories(pool: web::Data<DbPool>) -> Result<HttpResponse, AppError> {
    let rows = web::block(move || {
        let mut conn = pool.get()?;
        let rows = categories::table
            .select(Category::as_select())
            .order(categories::name.asc())
            .load(&mut conn)?;
        Ok::<_, AppError>(rows)
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    let items: Vec<CategoryResponse> = rows
        .into_iter()
        .map(|c| CategoryResponse {
            id: c.id,
            name: c.name,
            description: c.description,
        })
        .collect();

    Ok(HttpResponse::Ok().json(items))
}

/// POST /products (admin)
///
/// Multipart form: `name`, `price`, `description`, `category_id` and a
/// required `image` file. A non-numeric `category_id` creates that category
/// inline.
#[utoipa::path(
    post,
    path = "/products",
    responses(
        (status = 201, description = "Product created"),
        (status = 400, description = "Missing or malformed form fields"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 500, description = "Internal server error"),
    ),
    security(("admin_token" = [])),
    tag = "catalog"
)]
pub async fn create_product(
    _admin: AdminToken,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let form = uploads::read_product_form(payload, &config.upload_dir).await?;

    let name = form
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Validation("name is required".to_string()))?;
    let price = parse_price(form.price.as_deref())?;
    let category_ref = form
        .category_id
        .ok_or_else(|| AppError::Validation("category_id is required".to_string()))?;
    let image_url = form
        .image_url
        .ok_or_else(|| AppError::Validation("No image uploaded.".to_string()))?;
    let description = form.description;

    let product = web::block(move || {
        let mut conn = pool.get()?;
        let category_id = resolve_category(&mut conn, &category_ref)?;
        let product: Product = diesel::insert_into(products::table)
            .values(&NewProduct {
                name,
                description,
                price,
                category_id,
                image_url: Some(image_url),
            })
            .returning(Product::as_returning())
            .get_result(&mut conn)?;
        Ok::<_, AppError>(product)
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    log::info!("created product {} ({})", product.id, product.name);

    Ok(HttpResponse::Created().json(json!({
        "id": product.id,
        "image_url": product.image_url,
    })))
}

/// PUT /products/{id} (admin)
///
/// Multipart form like creation, but `image` is optional. When a new image
/// is uploaded the previous file is removed only after the row points at the
/// new one.
#[utoipa::path(
    put,
    path = "/products/{id}",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product updated"),
        (status = 400, description = "Missing or malformed form fields"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Product not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(("admin_token" = [])),
    tag = "catalog"
)]
pub async fn update_product(
    _admin: AdminToken,
    path: web::Path<i32>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();
    let form = uploads::read_product_form(payload, &config.upload_dir).await?;

    let name = form
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Validation("name is required".to_string()))?;
    let price = parse_price(form.price.as_deref())?;
    let category_ref = form
        .category_id
        .ok_or_else(|| AppError::Validation("category_id is required".to_string()))?;
    let description = form.description;
    let new_image = form.image_url;
    let upload_dir = config.upload_dir.clone();

    web::block(move || {
        let mut conn = pool.get()?;

        let current = products::table
            .find(product_id)
            .select(Product::as_select())
            .first(&mut conn)
            .optional()?;
        let Some(current) = current else {
            return Err(AppError::NotFound);
        };

        let category_id = resolve_category(&mut conn, &category_ref)?;

        match &new_image {
            Some(url) => {
                diesel::update(products::table.find(product_id))
                    .set((
                        products::name.eq(name.clone()),
                        products::description.eq(description.clone()),
                        products::price.eq(price.clone()),
                        products::category_id.eq(category_id),
                        products::image_url.eq(url.clone()),
                    ))
                    .execute(&mut conn)?;
                // The new image is written and referenced; drop the file it
                // replaced.
                if let Some(old) = &current.image_url {
                    uploads::remove_image(old, &upload_dir);
                }
            }
            None => {
                diesel::update(products::table.find(product_id))
                    .set((
                        products::name.eq(name.clone()),
                        products::description.eq(description.clone()),
                        products::price.eq(price.clone()),
                        products::category_id.eq(category_id),
                    ))
                    .execute(&mut conn)?;
            }
        }

        Ok(())
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({ "id": product_id })))
}

/// DELETE /products/{id} (admin)
///
/// Soft-delete: the row stays so historical order items keep resolving, it
/// just stops rendering in the active listing.
#[utoipa::path(
    delete,
    path = "/products/{id}",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product deactivated"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Product not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(("admin_token" = [])),
    tag = "catalog"
)]
pub async fn deactivate_product(
    _admin: AdminToken,
    path: web::Path<i32>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, AppError> {
    let product_id = path.into_inner();

    let updated = web::block(move || {
        let mut conn = pool.get()?;
        let updated = diesel::update(products::table.find(product_id))
            .set(products::is_active.eq(false))
            .execute(&mut conn)?;
        Ok::<_, AppError>(updated)
    })
    .await
    .map_err(|e| AppError::Storage(e.to_string()))??;

    if updated == 0 {
        return Err(AppError::NotFound);
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "Product archived successfully" })))
}
