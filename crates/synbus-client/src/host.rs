//! ホストのメタデータとクライアント UUID
//!
//! 取得できない値は null / "unknown" にし、エラーにはしない。

use std::path::Path;
use std::process::Command;

use serde_json::{Map, Value};
use synbus_proto::ClientInfo;
use uuid::Uuid;

const UNKNOWN: &str = "unknown";

/// register ペイロードに載せるホスト情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub os: String,
    pub hostname: String,
    pub user: String,
    /// 最初に見つかった物理 NIC の MAC アドレス（48 ビット整数）
    pub mac: Option<u64>,
}

impl HostInfo {
    /// 現在のホストから収集する
    pub fn collect() -> Self {
        HostInfo {
            os: std::env::consts::OS.to_string(),
            hostname: hostname(),
            user: user(),
            mac: mac_address(Path::new("/sys/class/net")),
        }
    }

    /// register ペイロードのメタデータ部分
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("os".into(), Value::from(self.os.clone()));
        map.insert("hostname".into(), Value::from(self.hostname.clone()));
        map.insert("user".into(), Value::from(self.user.clone()));
        map.insert("mac".into(), self.mac.map(Value::from).unwrap_or(Value::Null));
        map
    }
}

/// (hostname, user, name) から決まる安定した UUID
///
/// 同じホスト・ユーザーで同じ名前のサービスが再起動すると同じ UUID になり、
/// broker 側の登録が置き換えられる。
pub fn client_uuid(hostname: &str, user: &str, name: &str) -> Uuid {
    let key = format!("{hostname}/{user}/{name}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

/// 現在のホストで `name` として登録するための識別情報
pub fn client_info(name: &str) -> ClientInfo {
    let host = HostInfo::collect();
    let uuid = client_uuid(&host.hostname, &host.user, name);
    ClientInfo::new(uuid.to_string(), name).with_metadata(host.to_metadata())
}

fn hostname() -> String {
    if let Some(name) = non_empty_env("HOSTNAME") {
        return name;
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(hostname_command)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// `hostname` コマンドの出力（/etc/hostname がない環境向け）
fn hostname_command() -> Option<String> {
    let output = Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())?;

    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn user() -> String {
    non_empty_env("USER")
        .or_else(|| non_empty_env("USERNAME"))
        .or_else(|| non_empty_env("LOGNAME"))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `/sys/class/net/*/address` から lo 以外で最初の非ゼロ MAC を探す
fn mac_address(net_dir: &Path) -> Option<u64> {
    let mut interfaces: Vec<_> = std::fs::read_dir(net_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() != "lo")
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces
        .iter()
        .filter_map(|iface| std::fs::read_to_string(iface.join("address")).ok())
        .filter_map(|text| parse_mac(text.trim()))
        .find(|mac| *mac != 0)
}

fn parse_mac(text: &str) -> Option<u64> {
    let octets: Vec<&str> = text.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    octets
        .iter()
        .try_fold(0u64, |acc, octet| Some((acc << 8) | u64::from(u8::from_str_radix(octet, 16).ok()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_is_stable() {
        let a = client_uuid("build-01", "ci", "worker");
        let b = client_uuid("build-01", "ci", "worker");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
        assert_ne!(a, client_uuid("build-01", "ci", "other"));
        assert_ne!(a, client_uuid("build-02", "ci", "worker"));
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("00:00:00:00:00:01"), Some(1));
        assert_eq!(parse_mac("de:ad:be:ef:00:01"), Some(0xdead_beef_0001));
        assert_eq!(parse_mac("de:ad:be:ef:00"), None);
        assert_eq!(parse_mac("zz:ad:be:ef:00:01"), None);
    }

    #[test]
    fn test_mac_from_missing_dir() {
        assert_eq!(mac_address(Path::new("/nonexistent/net")), None);
    }

    #[test]
    fn test_mac_skips_loopback_and_zero() {
        let dir = std::env::temp_dir().join(format!("synbus-net-{}", std::process::id()));
        for (iface, addr) in [("lo", "00:00:00:00:00:00"), ("dummy0", "00:00:00:00:00:00"), ("eth0", "02:42:ac:11:00:02")] {
            std::fs::create_dir_all(dir.join(iface)).unwrap();
            std::fs::write(dir.join(iface).join("address"), format!("{addr}\n")).unwrap();
        }
        let mac = mac_address(&dir);
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(mac, Some(0x0242_ac11_0002));
    }

    #[test]
    fn test_client_info_payload_shape() {
        let info = client_info("svc");
        let payload = info.to_payload();
        assert_eq!(payload["name"], "svc");
        for key in ["uuid", "os", "hostname", "user", "mac"] {
            assert!(payload.get(key).is_some(), "missing {key}");
        }
    }
}
