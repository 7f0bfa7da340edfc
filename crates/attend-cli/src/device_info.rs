//! Best-effort host, OS, network and geolocation metadata.
//!
//! Every lookup degrades to a missing field; nothing here can fail the run.

use crate::config::{Config, APP_VERSION};
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::path::Path;
use std::time::Duration;

const PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";
const GEO_URL: &str = "https://ipapi.co/json/";
/// Route probe target; connecting a UDP socket sends nothing.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";
const SYS_CLASS_NET: &str = "/sys/class/net";
const PROC_CPUINFO: &str = "/proc/cpuinfo";

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    pub timezone: String,
    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeoInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Controls the two external HTTP lookups.
#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub enabled: bool,
    pub timeout: Duration,
}

impl From<&Config> for LookupSettings {
    fn from(config: &Config) -> Self {
        Self {
            enabled: config.network_lookups,
            timeout: config.lookup_timeout(),
        }
    }
}

/// Gather everything available about this machine.
pub fn collect(lookups: &LookupSettings) -> DeviceInfo {
    let uname = uname();
    let mut info = DeviceInfo {
        device_id: device_id(Path::new(SYS_CLASS_NET)),
        local_ip: local_ip_guess(),
        processor: processor_name(Path::new(PROC_CPUINFO)),
        timezone: Local::now().format("%:z").to_string(),
        app_version: APP_VERSION.to_string(),
        ..Default::default()
    };
    if let Some(u) = uname {
        info.platform_node = Some(u.nodename.clone());
        info.platform_system = Some(u.sysname.clone());
        info.platform_release = Some(u.release.clone());
        info.platform_version = Some(u.version.clone());
        info.hostname = Some(u.nodename);
        info.os_system = Some(u.sysname);
        info.os_release = Some(u.release);
        info.os_version = Some(u.version);
        info.machine = Some(u.machine);
    }

    if lookups.enabled {
        let agent = ureq::AgentBuilder::new().timeout(lookups.timeout).build();
        info.public_ip = fetch_json::<IpifyResponse>(&agent, PUBLIC_IP_URL).and_then(|r| r.ip);
        info.geo = fetch_json::<IpApiResponse>(&agent, GEO_URL).and_then(IpApiResponse::into_geo);
    } else {
        tracing::debug!("network lookups disabled");
    }

    info
}

fn fetch_json<T: DeserializeOwned>(agent: &ureq::Agent, url: &str) -> Option<T> {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url, error = %e, "lookup failed");
            return None;
        }
    };
    match response.into_json::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(url, error = %e, "lookup returned unexpected body");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: Option<String>,
}

/// Subset of the ipapi.co document; errors come back as `{"error": true, ...}`.
#[derive(Debug, Default, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    error: bool,
    country_name: Option<String>,
    region: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    org: Option<String>,
    timezone: Option<String>,
}

impl IpApiResponse {
    fn into_geo(self) -> Option<GeoInfo> {
        if self.error {
            return None;
        }
        let geo = GeoInfo {
            country: self.country_name,
            region: self.region,
            city: self.city,
            latitude: self.latitude,
            longitude: self.longitude,
            org: self.org,
            timezone: self.timezone,
        };
        (geo != GeoInfo::default()).then_some(geo)
    }
}

/// UDP "connect" picks the outbound interface without sending a datagram.
fn local_ip_guess() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(ROUTE_PROBE_ADDR).ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// First non-loopback, non-zero MAC address under `net_dir`, as 12 hex digits.
fn device_id(net_dir: &Path) -> Option<String> {
    let mut interfaces: Vec<_> = std::fs::read_dir(net_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .collect();
    interfaces.sort_by_key(|e| e.file_name());

    interfaces.iter().find_map(|iface| {
        if iface.file_name() == "lo" {
            return None;
        }
        let raw = std::fs::read_to_string(iface.path().join("address")).ok()?;
        let hex: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .collect::<String>()
            .to_ascii_lowercase();
        let valid = hex.len() == 12
            && hex.chars().all(|c| c.is_ascii_hexdigit())
            && hex.chars().any(|c| c != '0');
        valid.then_some(hex)
    })
}

/// CPU model string from the first `model name` entry of a cpuinfo file.
fn processor_name(cpuinfo: &Path) -> Option<String> {
    let text = std::fs::read_to_string(cpuinfo).ok()?;
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (key.trim() == "model name" && !value.is_empty()).then(|| value.to_string())
    })
}

struct Uname {
    sysname: String,
    nodename: String,
    release: String,
    version: String,
    machine: String,
}

fn uname() -> Option<Uname> {
    // SAFETY: `utsname` is plain data, so an all-zero value is valid; `uname`
    // only writes NUL-terminated strings into the struct we own.
    let mut buf: libc::utsname = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::uname(&mut buf) };
    if ret != 0 {
        tracing::debug!(error = %std::io::Error::last_os_error(), "uname failed");
        return None;
    }
    Some(Uname {
        sysname: c_field(&buf.sysname),
        nodename: c_field(&buf.nodename),
        release: c_field(&buf.release),
        version: c_field(&buf.version),
        machine: c_field(&buf.machine),
    })
}

fn c_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
