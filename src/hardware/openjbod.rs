//! OpenJBOD controller boards: chassis temperatures and one external fan header over HTTP.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::idrac::reading;
use crate::hardware::types::SpeedValue;
use crate::hardware::Device;
use crate::system::http::JsonClient;
use crate::system::parser::max_temperature;

pub struct OpenJbod {
    hostname: String,
    client: JsonClient,
    controlling: bool,
}

impl OpenJbod {
    pub fn new(oob: &Credentials) -> Result<Self> {
        Ok(Self {
            hostname: oob.hostname.clone(),
            client: JsonClient::plain(&oob.hostname)?,
            controlling: false,
        })
    }
}

/// `api/temperatures` answers with an object of sensor name -> reading.
pub(crate) fn temperatures(body: &Value) -> Vec<f64> {
    body.as_object()
        .map(|sensors| sensors.values().filter_map(reading).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Device for OpenJbod {
    fn vendor(&self) -> Vendor {
        Vendor::OpenJbod
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let body = self.client.get("api/temperatures").await?;
        max_temperature(&temperatures(&body))
            .ok_or_else(|| HushError::protocol(format!("{} reported no temperatures: {}", self.hostname, body)))
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        self.client
            .post("api/fans", &json!({"fan0": speed.to_percent()}))
            .await?;
        self.controlling = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.controlling {
            return Ok(());
        }
        self.client
            .post("api/fanmode", &json!({"use_ext_fan_ctrl": false}))
            .await?;
        self.controlling = false;
        info!("{} fan control returned to the board", self.hostname);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperatures_from_object_values() {
        let body = json!({"temp0": 31.5, "temp1": 38, "temp2": null});
        let temps = temperatures(&body);
        assert_eq!(temps, vec![31.5, 38.0]);
        assert_eq!(max_temperature(&temps), Some(38));
        assert!(temperatures(&json!([1, 2])).is_empty());
    }

    #[tokio::test]
    async fn close_without_control_sends_nothing() {
        let oob = Credentials { hostname: "127.0.0.1:9".into(), ..Default::default() };
        let mut jbod = OpenJbod::new(&oob).unwrap();
        jbod.close().await.unwrap();
    }
}
