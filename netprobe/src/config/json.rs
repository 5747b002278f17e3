use probe_engine::capture::DEFAULT_LOSS_RSSI_THRESHOLD_DBM;
use probe_engine::probe::ProbeTimeouts;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct JsonConfig {
    pub node_id: String,
    /// The monitored radio channel
    pub channel: u8,
    pub collector: CollectorJsonConfig,
    pub mqtt: MqttJsonConfig,
    pub schedule: ScheduleJsonConfig,
    pub timeouts: TimeoutsJsonConfig,
    /// Captured frames with a weaker signal than this (in dBm) count as lost
    pub loss_rssi_threshold_dbm: i8,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            node_id: "netprobe".to_string(),
            channel: 1,
            collector: CollectorJsonConfig::default(),
            mqtt: MqttJsonConfig::default(),
            schedule: ScheduleJsonConfig::default(),
            timeouts: TimeoutsJsonConfig::default(),
            loss_rssi_threshold_dbm: DEFAULT_LOSS_RSSI_THRESHOLD_DBM,
        }
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CollectorJsonConfig {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub address: Option<IpAddr>,
    pub http_port: u16,
    /// Where reports are POSTed
    pub ingest_path: String,
    /// Where the HTTP probe POSTs its test payload
    pub http_probe_path: String,
    pub tcp_port: u16,
    pub tcp_probe_path: String,
    pub udp_port: u16,
    pub smtp_port: u16,
}

impl Default for CollectorJsonConfig {
    fn default() -> Self {
        Self {
            address: None,
            http_port: 5000,
            ingest_path: "/api/data".to_string(),
            http_probe_path: "/api/test/http".to_string(),
            tcp_port: 5000,
            tcp_probe_path: "/api/test/tcp".to_string(),
            udp_port: 5001,
            smtp_port: 25,
        }
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MqttJsonConfig {
    /// Defaults to the collector's address
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub broker: Option<IpAddr>,
    pub port: u16,
    pub topic: String,
    /// Zero disables the broker's keep-alive check
    pub keep_alive_secs: u16,
}

impl Default for MqttJsonConfig {
    fn default() -> Self {
        Self {
            broker: None,
            port: 1883,
            topic: "netprobe/ping".to_string(),
            keep_alive_secs: 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScheduleJsonConfig {
    /// How long each protocol stays under test, in milliseconds
    pub switch_interval_ms: u64,
    /// How often the current protocol is probed and reported, in milliseconds
    pub report_interval_ms: u64,
}

impl Default for ScheduleJsonConfig {
    fn default() -> Self {
        Self {
            switch_interval_ms: 30_000,
            report_interval_ms: 5_000,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TimeoutsJsonConfig {
    pub connect_ms: u64,
    pub http_ms: u64,
    pub tcp_response_ms: u64,
    pub smtp_response_ms: u64,
    pub udp_grace_ms: u64,
    pub mqtt_ms: u64,
    pub icmp_ms: u64,
}

impl Default for TimeoutsJsonConfig {
    fn default() -> Self {
        ProbeTimeouts::default().into()
    }
}

impl From<ProbeTimeouts> for TimeoutsJsonConfig {
    fn from(value: ProbeTimeouts) -> Self {
        let ms = |d: Duration| d.as_millis() as u64;
        Self {
            connect_ms: ms(value.connect),
            http_ms: ms(value.http_request),
            tcp_response_ms: ms(value.tcp_response),
            smtp_response_ms: ms(value.smtp_response),
            udp_grace_ms: ms(value.udp_grace),
            mqtt_ms: ms(value.mqtt),
            icmp_ms: ms(value.icmp_reply),
        }
    }
}

impl From<TimeoutsJsonConfig> for ProbeTimeouts {
    fn from(value: TimeoutsJsonConfig) -> Self {
        Self {
            connect: Duration::from_millis(value.connect_ms),
            http_request: Duration::from_millis(value.http_ms),
            tcp_response: Duration::from_millis(value.tcp_response_ms),
            smtp_response: Duration::from_millis(value.smtp_response_ms),
            udp_grace: Duration::from_millis(value.udp_grace_ms),
            mqtt: Duration::from_millis(value.mqtt_ms),
            icmp_reply: Duration::from_millis(value.icmp_ms),
        }
    }
}
