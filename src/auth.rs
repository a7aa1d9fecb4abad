use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};

use crate::config::Config;
use crate::errors::AppError;

/// Extractor gating the admin-only endpoints. Resolves only when the request
/// carries `Authorization: Bearer <token>` matching the configured shared
/// secret. The webhook endpoint is deliberately NOT behind this gate; its
/// authentication is the provider signature.
#[derive(Debug)]
pub struct AdminToken;

impl FromRequest for AdminToken {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn authorize(req: &HttpRequest) -> Result<AdminToken, AppError> {
    let config = req
        .app_data::<web::Data<Config>>()
        .ok_or_else(|| AppError::Storage("application config not registered".to_string()))?;

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if token == config.admin_token {
        Ok(AdminToken)
    } else {
        Err(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/shop_test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            client_url: "http://127.0.0.1:5500".to_string(),
            stripe_secret_key: "sk_test_xxx".to_string(),
            stripe_webhook_secret: "whsec_xxx".to_string(),
            admin_token: "super-secret".to_string(),
            sendgrid_api_key: None,
            email_from: "orders@sewingshop.example".to_string(),
            upload_dir: "uploads".into(),
        }
    }

    #[test]
    fn matching_bearer_token_is_accepted() {
        let req = TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .insert_header((header::AUTHORIZATION, "Bearer super-secret"))
            .to_http_request();
        assert!(authorize(&req).is_ok());
    }

    #[test]
    fn wrong_token_is_rejected() {
        let req = TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .insert_header((header::AUTHORIZATION, "Bearer not-the-secret"))
            .to_http_request();
        assert!(matches!(authorize(&req), Err(AppError::Unauthorized)));
    }

    #[test]
    fn missing_header_is_rejected() {
        let req = TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .to_http_request();
        assert!(matches!(authorize(&req), Err(AppError::Unauthorized)));
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let req = TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .insert_header((header::AUTHORIZATION, "Basic super-secret"))
            .to_http_request();
        assert!(matches!(authorize(&req), Err(AppError::Unauthorized)));
    }
}
