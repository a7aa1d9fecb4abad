pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod stripe;
pub mod uploads;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub use config::Config;
pub use db::{create_pool, DbPool};
pub use email::Mailer;
pub use stripe::StripeClient;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) {
    let mut conn = pool.get().expect("Failed to get DB connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run database migrations");
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::products::list_products,
        handlers::products::list_categories,
        handlers::products::create_product,
        handlers::products::update_product,
        handlers::products::deactivate_product,
        handlers::checkout::create_checkout_session,
        handlers::webhook::handle_webhook,
        handlers::orders::list_orders,
        handlers::orders::update_order_status,
    ),
    components(schemas(
        handlers::products::ProductResponse,
        handlers::products::CategoryResponse,
        handlers::checkout::CheckoutItemRequest,
        handlers::checkout::CreateCheckoutSessionRequest,
        handlers::checkout::CreateCheckoutSessionResponse,
        handlers::orders::OrderItemResponse,
        handlers::orders::OrderResponse,
        handlers::orders::UpdateOrderStatusRequest,
    )),
    modifiers(&AdminSecurity),
    tags(
        (name = "catalog", description = "Product and category catalog"),
        (name = "checkout", description = "Checkout sessions and payment webhooks"),
        (name = "orders", description = "Admin order management"),
    )
)]
pub struct ApiDoc;

struct AdminSecurity;

impl Modify for AdminSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_token",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Build and return an actix-web `Server` bound to the configured address.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server. The pool, provider clients and config are constructed
/// once here and cloned into every worker.
pub fn build_server(config: Config, pool: DbPool) -> std::io::Result<actix_web::dev::Server> {
    let stripe_client = StripeClient::new(
        &config.stripe_secret_key,
        &config.stripe_webhook_secret,
        &config.client_url,
    );
    let mailer = Mailer::new(config.sendgrid_api_key.clone(), config.email_from.clone());
    let bind_addr = (config.host.clone(), config.port);

    Ok(HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(stripe_client.clone()))
            .app_data(web::Data::new(mailer.clone()))
            .wrap(Logger::default())
            .route("/health", web::get().to(handlers::health))
            .route("/products", web::get().to(handlers::products::list_products))
            .route("/products", web::post().to(handlers::products::create_product))
            .route(
                "/products/{id}",
                web::put().to(handlers::products::update_product),
            )
            .route(
                "/products/{id}",
                web::delete().to(handlers::products::deactivate_product),
            )
            .route(
                "/categories",
                web::get().to(handlers::products::list_categories),
            )
            .route(
                "/checkout-session",
                web::post().to(handlers::checkout::create_checkout_session),
            )
            .route("/webhook", web::post().to(handlers::webhook::handle_webhook))
            .route("/orders", web::get().to(handlers::orders::list_orders))
            .route(
                "/orders/{id}/status",
                web::patch().to(handlers::orders::update_order_status),
            )
            .service(actix_files::Files::new("/uploads", config.upload_dir.clone()))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind(bind_addr)?
    .run())
}
