use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

const HOST_NAME: &str = "HostName";
const DEVICE_ID: &str = "DeviceId";
const X509: &str = "x509";

/// A hub connection string, eg. `HostName=my-hub.azure-devices.net;DeviceId=abc;x509=true`
///
/// Parsing never fails: unknown or malformed segments are kept as they are,
/// and missing keys are reported as `None` by the accessors. Whether the
/// string is complete enough to connect is decided by the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(into = "String", from = "String")]
pub struct ConnectionString {
    segments: Vec<(String, String)>,
}

impl ConnectionString {
    /// Connection string for a device authenticating with an X.509 certificate
    pub fn x509(host_name: &str, device_id: &str) -> Self {
        Self {
            segments: vec![
                (HOST_NAME.to_owned(), host_name.to_owned()),
                (DEVICE_ID.to_owned(), device_id.to_owned()),
                (X509.to_owned(), "true".to_owned()),
            ],
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn host_name(&self) -> Option<&str> {
        self.get(HOST_NAME)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.get(DEVICE_ID)
    }
}

impl FromStr for ConnectionString {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split(';')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((k, v)) => (k.trim().to_owned(), v.trim().to_owned()),
                None => (segment.to_owned(), String::new()),
            })
            .collect();
        Ok(Self { segments })
    }
}

impl From<String> for ConnectionString {
    fn from(value: String) -> Self {
        let Ok(conn) = value.parse::<ConnectionString>();
        conn
    }
}

impl From<ConnectionString> for String {
    fn from(value: ConnectionString) -> Self {
        value.to_string()
    }
}

impl Display for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .segments
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";");
        f.write_str(&joined)
    }
}
