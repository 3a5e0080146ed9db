//! Cisco UCS C-series (M3/M4/M5) over the IMC XML API.
//! Every request carries a session cookie obtained with `aaaLogin`.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::cache::CachedValue;
use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::{SpeedValue, Vocabulary};
use crate::hardware::Device;
use crate::system::http::XmlClient;
use crate::system::parser::max_temperature;
use crate::system::xml::{element, elements, escape};

const FAN_POLICY_DN: &str = "sys/rack-unit-1/board/fan-policy";
/// Refresh the cookie this long before the server-declared refresh period ends.
const COOKIE_MARGIN: Duration = Duration::from_secs(10);
/// Policy names as the IMC expects them on the wire.
const WIRE_POLICIES: [&str; 5] = ["Low Power", "Balanced", "Performance", "High Power", "Maximum Power"];

pub struct Cisco {
    vendor: Vendor,
    hostname: String,
    username: String,
    password: String,
    xml: XmlClient,
    session: CachedValue<String>,
}

impl Cisco {
    pub fn new(vendor: Vendor, oob: &Credentials) -> Result<Self> {
        Ok(Self {
            vendor,
            hostname: oob.hostname.clone(),
            username: oob.username.clone(),
            password: oob.password_or_empty().to_string(),
            xml: XmlClient::new(format!("https://{}/nuova", oob.hostname))?,
            session: CachedValue::new(Duration::ZERO),
        })
    }

    async fn login(&self) -> Result<(String, Duration)> {
        let body = format!(
            "<aaaLogin inName='{}' inPassword='{}'></aaaLogin>",
            escape(&self.username),
            escape(&self.password)
        );
        let response = self.xml.post(body).await?;
        parse_login(&response).map_err(|e| {
            error!("{} failed to get cookie", self.hostname);
            e
        })
    }

    /// A valid session cookie, logging in again when the cached one is about to expire.
    async fn cookie(&mut self) -> Result<String> {
        let now = Instant::now();
        if let Some(cookie) = self.session.get(now) {
            return Ok(cookie.clone());
        }
        let (cookie, refresh) = self.login().await?;
        debug!("{} new session, refresh period {:?}", self.hostname, refresh);
        self.session.set_ttl(refresh.saturating_sub(COOKIE_MARGIN));
        self.session.store(cookie.clone(), now);
        Ok(cookie)
    }

    /// Post a cookie-bearing request. A rejected request drops the session so the
    /// next call logs in again.
    async fn request(&mut self, body: String, root: &str) -> Result<String> {
        let response = self.xml.post(body).await?;
        if let Some(reply) = element(&response, root) {
            if let Some(code) = reply.attr("errorCode") {
                self.session.invalidate();
                let descr = reply.attr("errorDescr").unwrap_or("");
                error!("{} rejected {}: {} {}", self.hostname, root, code, descr);
                return Err(HushError::protocol(format!("{} {} failed: {} {}", self.hostname, root, code, descr)));
            }
        }
        Ok(response)
    }
}

pub(crate) fn parse_login(response: &str) -> Result<(String, Duration)> {
    let login = element(response, "aaaLogin")
        .ok_or_else(|| HushError::protocol(format!("unexpected login response: {}", response)))?;
    let cookie = login
        .attr("outCookie")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| HushError::protocol("login response carries no cookie"))?
        .to_string();
    let refresh = login
        .attr("outRefreshPeriod")
        .and_then(|p| p.trim().parse::<u64>().ok())
        .ok_or_else(|| HushError::protocol("login response carries no refresh period"))?;
    Ok((cookie, Duration::from_secs(refresh)))
}

pub(crate) fn fan_policy_request(cookie: &str, policy: &str) -> String {
    format!(
        "<configConfMo cookie='{cookie}' inHierarchical='false' dn='{dn}'><inConfig>\
         <fanPolicy configuredFanPolicy='{policy}' dn='{dn}'></fanPolicy>\
         </inConfig></configConfMo>",
        cookie = escape(cookie),
        dn = FAN_POLICY_DN,
        policy = policy,
    )
}

pub(crate) fn processor_temperatures(response: &str) -> Vec<f64> {
    elements(response, "processorEnvStats")
        .iter()
        .filter_map(|e| e.attr("temperature"))
        .filter_map(|t| t.trim().parse().ok())
        .collect()
}

#[async_trait]
impl Device for Cisco {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let cookie = self.cookie().await?;
        let body = format!(
            "<configResolveClass cookie='{}' inHierarchical='false' classId='processorEnvStats'></configResolveClass>",
            escape(&cookie)
        );
        let response = self.request(body, "configResolveClass").await?;
        max_temperature(&processor_temperatures(&response)).ok_or_else(|| {
            error!("{} failed to get cpu temp, response = {}", self.hostname, response);
            HushError::protocol(format!("{} reported no processor temperatures", self.hostname))
        })
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        let policy = WIRE_POLICIES[usize::from(speed.to_tier(Vocabulary::FanPolicy))];
        let cookie = self.cookie().await?;
        let response = self
            .request(fan_policy_request(&cookie, policy), "configConfMo")
            .await?;
        match element(&response, "configConfMo").as_ref().and_then(|e| e.attr("response")) {
            Some("yes") => {
                info!("{} fan policy set to {}", self.hostname, policy);
                Ok(())
            }
            _ => {
                error!("{} failed to set fan policy, response = {}", self.hostname, response);
                Err(HushError::protocol(format!("{} did not accept fan policy {}", self.hostname, policy)))
            }
        }
    }

    /// Logs out the current session, if any.
    async fn close(&mut self) -> Result<()> {
        let Some(cookie) = self.session.invalidate() else {
            return Ok(());
        };
        self.xml
            .post(format!("<aaaLogout inCookie='{}'></aaaLogout>", escape(&cookie)))
            .await?;
        debug!("{} logged out", self.hostname);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_yields_cookie_and_period() {
        let (cookie, period) = parse_login(
            r#"<aaaLogin cookie="" response="yes" outCookie="1700000000/abc-123" outRefreshPeriod="600" outPriv="admin" outSessionId="17"> </aaaLogin>"#,
        )
        .unwrap();
        assert_eq!(cookie, "1700000000/abc-123");
        assert_eq!(period, Duration::from_secs(600));
    }

    #[test]
    fn failed_login_is_protocol_error() {
        let err = parse_login(r#"<aaaLogin cookie="" response="yes" errorCode="551" errorDescr="Authorization failed"> </aaaLogin>"#)
            .unwrap_err();
        assert!(matches!(err, HushError::Protocol(_)));
    }

    #[test]
    fn fan_policy_body() {
        assert_eq!(
            fan_policy_request("c00kie", "Maximum Power"),
            "<configConfMo cookie='c00kie' inHierarchical='false' dn='sys/rack-unit-1/board/fan-policy'><inConfig>\
             <fanPolicy configuredFanPolicy='Maximum Power' dn='sys/rack-unit-1/board/fan-policy'></fanPolicy>\
             </inConfig></configConfMo>"
        );
    }

    #[test]
    fn processor_temperatures_from_resolve_class() {
        let response = "<configResolveClass cookie='c' response='yes' classId='processorEnvStats'><outConfigs>\
            <processorEnvStats id='1' description='Processor Environment Statistics' temperature='55.0'></processorEnvStats>\
            <processorEnvStats id='2' description='Processor Environment Statistics' temperature='61.5'></processorEnvStats>\
            </outConfigs></configResolveClass>";
        assert_eq!(processor_temperatures(response), vec![55.0, 61.5]);
    }

    #[test]
    fn named_and_percent_speeds_pick_the_same_policy() {
        let named = SpeedValue::named(Vocabulary::FanPolicy, "Max Power").unwrap();
        assert_eq!(WIRE_POLICIES[usize::from(named.to_tier(Vocabulary::FanPolicy))], "Maximum Power");
        let pct = SpeedValue::Percent(30);
        assert_eq!(WIRE_POLICIES[usize::from(pct.to_tier(Vocabulary::FanPolicy))], "Balanced");
    }

    #[tokio::test]
    async fn close_without_session_is_a_no_op() {
        let oob = Credentials { hostname: "cimc.lan".into(), username: "admin".into(), password: None };
        let mut cisco = Cisco::new(Vendor::CiscoM4, &oob).unwrap();
        cisco.close().await.unwrap();
        cisco.close().await.unwrap();
    }
}
