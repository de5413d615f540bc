use crate::errors::NotificationError;
use async_trait::async_trait;
use log::info;
use serde_json::json;
use std::env;
use std::time::Duration;

/// Delivers one alert message for a plate. Implementations own their
/// transport and timeout.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, contact: &str, plate_number: &str) -> Result<(), NotificationError>;
}

const DEFAULT_SMS_URL: &str = "http://localhost:8998/messages";
const SEND_TIMEOUT_SECS: u64 = 15;

/// SMS gateway client. The bearer token is read at send time so a
/// missing token shows up as a per-plate delivery failure instead of
/// refusing to boot.
pub struct SmsGateway {
    client: reqwest::Client,
    api_url: String,
}

impl SmsGateway {
    pub fn from_env() -> SmsGateway {
        SmsGateway {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
                .build()
                .expect("Unable to build SMS gateway client"),
            api_url: env::var("SMS_URL").unwrap_or_else(|_| DEFAULT_SMS_URL.to_string()),
        }
    }
}

fn message_for(plate_number: &str) -> String {
    format!(
        "A traffic fine was found for plate {}. Check the fines portal for details.",
        plate_number
    )
}

#[async_trait]
impl NotificationSender for SmsGateway {
    async fn send(&self, contact: &str, plate_number: &str) -> Result<(), NotificationError> {
        let token = env::var("SMS_TOKEN")
            .map_err(|_| NotificationError("SMS_TOKEN environment variable unset".to_string()))?;
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", "Bearer ".to_string() + &token)
            .json(&json!({
                "to": contact,
                "message": message_for(plate_number),
            }))
            .send()
            .await
            .map_err(|e| NotificationError(format!("gateway unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(NotificationError(format!(
                "gateway returned {}",
                response.status()
            )));
        }
        info!("Notification sent to {} for plate {}", contact, plate_number);
        Ok(())
    }
}
