//! Transactional email delivery over the SendGrid REST API.
//!
//! Confirmation emails are best-effort: failures are logged by the caller and
//! never roll back committed orders. With no API key configured the mailer
//! logs the would-be send and reports success.

use bigdecimal::BigDecimal;
use serde_json::json;

use crate::errors::AppError;

const MAIL_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// One purchased item as rendered into confirmation emails. The name is
/// resolved through the order item's product foreign key, so it survives
/// catalog soft-deletes.
#[derive(Debug, Clone)]
pub struct EmailLineItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_key: Option<String>,
    from_address: String,
}

impl Mailer {
    pub fn new(api_key: Option<String>, from_address: String) -> Self {
        if api_key.is_none() {
            log::warn!("SENDGRID_API_KEY not set; confirmation emails will only be logged");
        }
        Mailer {
            http: reqwest::Client::new(),
            api_key,
            from_address,
        }
    }

    pub async fn send_order_confirmation(
        &self,
        to: &str,
        order_id: i32,
        total: &BigDecimal,
        items: &[EmailLineItem],
    ) -> Result<(), AppError> {
        let subject = format!("Order Confirmation #{order_id} - Bonnie's Sewing Shop");
        let body = render_order_confirmation(order_id, total, items);
        self.send(to, &subject, &body).await
    }

    pub async fn send_shipping_confirmation(
        &self,
        to: &str,
        order_id: i32,
        items: &[EmailLineItem],
    ) -> Result<(), AppError> {
        let subject = format!("Your order from Bonnie's Sewing Shop has shipped! (#{order_id})");
        let body = render_shipping_confirmation(order_id, items);
        self.send(to, &subject, &body).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let Some(api_key) = &self.api_key else {
            log::info!("email delivery disabled; would send '{subject}' to {to}");
            return Ok(());
        };

        let message = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from_address },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });

        let response = self
            .http
            .post(MAIL_SEND_URL)
            .bearer_auth(api_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("mail send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "mail provider returned {status}: {body}"
            )));
        }

        log::info!("sent '{subject}' to {to}");
        Ok(())
    }
}

fn render_items(items: &[EmailLineItem]) -> String {
    items
        .iter()
        .map(|item| {
            let line_total = (&item.unit_price * BigDecimal::from(item.quantity)).with_scale(2);
            format!(
                "<li>{}x <strong>{}</strong> (${line_total})</li>",
                item.quantity, item.name
            )
        })
        .collect()
}

fn render_order_confirmation(order_id: i32, total: &BigDecimal, items: &[EmailLineItem]) -> String {
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: auto;\">\
         <h2>Thank you for your order!</h2>\
         <p>We've received your order <strong>#{order_id}</strong> and Bonnie is already \
         getting her sewing machine ready!</p>\
         <h3>Order Summary:</h3>\
         <ul>{}</ul>\
         <p><strong>Total Paid: ${}</strong></p>\
         <p>You'll get another email as soon as your order ships.</p>\
         <p>Warmly,<br>Bonnie's Sewing Shop</p>\
         </div>",
        render_items(items),
        total.with_scale(2),
    )
}

fn render_shipping_confirmation(order_id: i32, items: &[EmailLineItem]) -> String {
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: auto;\">\
         <h2>Your order is on the way!</h2>\
         <p>Order <strong>#{order_id}</strong> is finished and officially headed your way.</p>\
         <p>Your package includes:</p>\
         <ul>{}</ul>\
         <p>Thank you so much for supporting Bonnie's craft.</p>\
         </div>",
        render_items(items),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_items() -> Vec<EmailLineItem> {
        vec![
            EmailLineItem {
                name: "Quilted Pot Holder".to_string(),
                quantity: 2,
                unit_price: BigDecimal::from_str("12.50").unwrap(),
            },
            EmailLineItem {
                name: "Tea Towel".to_string(),
                quantity: 1,
                unit_price: BigDecimal::from_str("8.00").unwrap(),
            },
        ]
    }

    #[test]
    fn order_confirmation_lists_items_and_total() {
        let total = BigDecimal::from_str("33.00").unwrap();
        let html = render_order_confirmation(42, &total, &sample_items());
        assert!(html.contains("#42"));
        assert!(html.contains("2x <strong>Quilted Pot Holder</strong> ($25.00)"));
        assert!(html.contains("1x <strong>Tea Towel</strong> ($8.00)"));
        assert!(html.contains("Total Paid: $33.00"));
    }

    #[test]
    fn shipping_confirmation_lists_items() {
        let html = render_shipping_confirmation(42, &sample_items());
        assert!(html.contains("#42"));
        assert!(html.contains("Quilted Pot Holder"));
        assert!(html.contains("Tea Towel"));
    }
}
