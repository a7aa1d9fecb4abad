use dotenvy::dotenv;
use sewing_shop_api::{build_server, create_pool, run_migrations, Config};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env();
    std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload directory");

    let pool = create_pool(&config.database_url);
    run_migrations(&pool);

    log::info!("Starting server at http://{}:{}", config.host, config.port);

    build_server(config, pool)?.await
}
