//! Option pairs, credentials, endpoints and connection strings
//! 配置项、凭证、端点与连接字符串解析

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::{Result, StorageError};

/// Key-to-value construction options / 构造参数
pub type Pairs = BTreeMap<String, String>;

/// Credential in `protocol:value[:value...]` form / 凭证
///
/// - `hmac:<access_key_id>:<secret_access_key>`
/// - `file:<absolute path to a credential file>`
/// - `oauth:<client_id>:<client_secret>:<refresh_token>`
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Hmac {
        access_key_id: String,
        secret_access_key: String,
    },
    File(PathBuf),
    OAuth {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Hmac { access_key_id, .. } => write!(f, "Hmac({}:***)", access_key_id),
            Credential::File(path) => write!(f, "File({})", path.display()),
            Credential::OAuth { client_id, .. } => write!(f, "OAuth({}:***)", client_id),
        }
    }
}

impl Credential {
    pub fn protocol(&self) -> &'static str {
        match self {
            Credential::Hmac { .. } => "hmac",
            Credential::File(_) => "file",
            Credential::OAuth { .. } => "oauth",
        }
    }
}

impl FromStr for Credential {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, rest) = s
            .split_once(':')
            .ok_or_else(|| StorageError::invalid_config("credential must look like <protocol>:<value>"))?;

        match protocol {
            "hmac" => {
                let (ak, sk) = rest
                    .split_once(':')
                    .ok_or_else(|| StorageError::invalid_config("hmac credential needs access key and secret key"))?;
                if ak.is_empty() || sk.is_empty() {
                    return Err(StorageError::invalid_config("hmac credential has an empty key"));
                }
                Ok(Credential::Hmac {
                    access_key_id: ak.to_string(),
                    secret_access_key: sk.to_string(),
                })
            }
            "file" => {
                if rest.is_empty() {
                    return Err(StorageError::invalid_config("file credential needs a path"));
                }
                Ok(Credential::File(PathBuf::from(rest)))
            }
            "oauth" => {
                let parts: Vec<&str> = rest.splitn(3, ':').collect();
                match parts.as_slice() {
                    [id, secret, token] if !id.is_empty() && !secret.is_empty() && !token.is_empty() => {
                        Ok(Credential::OAuth {
                            client_id: id.to_string(),
                            client_secret: secret.to_string(),
                            refresh_token: token.to_string(),
                        })
                    }
                    _ => Err(StorageError::invalid_config(
                        "oauth credential needs client_id, client_secret and refresh_token",
                    )),
                }
            }
            other => Err(StorageError::invalid_config(format!("unsupported credential protocol: {}", other))),
        }
    }
}

/// Endpoint in `protocol:host[:port]` form, e.g. `https:play.min.io:9000` / 服务端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn to_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.host, port),
            None => format!("{}://{}", self.protocol, self.host),
        }
    }
}

impl FromStr for Endpoint {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let protocol = parts.next().unwrap_or_default();
        let host = parts.next().unwrap_or_default();
        let port = parts.next();

        if protocol != "http" && protocol != "https" {
            return Err(StorageError::invalid_config(format!("endpoint protocol must be http or https: {}", s)));
        }
        if host.is_empty() || host.starts_with("//") {
            return Err(StorageError::invalid_config(format!("endpoint must look like https:host:port: {}", s)));
        }
        let port = match port {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| StorageError::invalid_config(format!("invalid endpoint port: {}", p)))?,
            ),
            None => None,
        };

        Ok(Endpoint {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Parse `scheme://name/work_dir?key=value&...` into a scheme and its options
/// 解析连接字符串
pub fn parse_connection_string(conn: &str) -> Result<(String, Pairs)> {
    let url = Url::parse(conn)
        .map_err(|e| StorageError::invalid_config(format!("invalid connection string {}: {}", conn, e)))?;

    let scheme = url.scheme().to_string();
    let mut pairs = Pairs::new();

    if let Some(host) = url.host_str() {
        if !host.is_empty() {
            let name = urlencoding::decode(host)
                .map_err(|e| StorageError::invalid_config(e.to_string()))?;
            pairs.insert("name".to_string(), name.into_owned());
        }
    }

    let path = url.path();
    if !path.is_empty() {
        let work_dir = urlencoding::decode(path)
            .map_err(|e| StorageError::invalid_config(e.to_string()))?;
        pairs.insert("work_dir".to_string(), work_dir.into_owned());
    }

    for (key, value) in url.query_pairs() {
        if pairs.contains_key(key.as_ref()) {
            return Err(StorageError::invalid_config(format!("duplicate option in connection string: {}", key)));
        }
        pairs.insert(key.into_owned(), value.into_owned());
    }

    Ok((scheme, pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential() {
        let cred: Credential = "hmac:ak:sk".parse().unwrap();
        assert_eq!(
            cred,
            Credential::Hmac {
                access_key_id: "ak".to_string(),
                secret_access_key: "sk".to_string()
            }
        );

        let cred: Credential = "file:/etc/gdrive.json".parse().unwrap();
        assert_eq!(cred, Credential::File(PathBuf::from("/etc/gdrive.json")));

        let cred: Credential = "oauth:id:secret:1//token:with:colons".parse().unwrap();
        assert_eq!(cred.protocol(), "oauth");

        assert!("hmac:only".parse::<Credential>().is_err());
        assert!("basic:user:pass".parse::<Credential>().is_err());
        assert!("nocolon".parse::<Credential>().is_err());
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let cred: Credential = "hmac:ak:topsecret".parse().unwrap();
        assert!(!format!("{:?}", cred).contains("topsecret"));
    }

    #[test]
    fn test_parse_endpoint() {
        let ep: Endpoint = "https:play.min.io:9000".parse().unwrap();
        assert_eq!(ep.to_url(), "https://play.min.io:9000");

        let ep: Endpoint = "http:localhost".parse().unwrap();
        assert_eq!(ep.to_url(), "http://localhost");

        assert!("ftp:host:21".parse::<Endpoint>().is_err());
        assert!("https:host:notaport".parse::<Endpoint>().is_err());
        assert!("https://host".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_parse_connection_string() {
        let (scheme, pairs) =
            parse_connection_string("gdrive://my-drive/work/dir?credential=file:/tmp/cred.json").unwrap();
        assert_eq!(scheme, "gdrive");
        assert_eq!(pairs.get("name").unwrap(), "my-drive");
        assert_eq!(pairs.get("work_dir").unwrap(), "/work/dir");
        assert_eq!(pairs.get("credential").unwrap(), "file:/tmp/cred.json");
    }

    #[test]
    fn test_parse_connection_string_without_name() {
        let (scheme, pairs) = parse_connection_string("fs:///tmp/storager").unwrap();
        assert_eq!(scheme, "fs");
        assert!(pairs.get("name").is_none());
        assert_eq!(pairs.get("work_dir").unwrap(), "/tmp/storager");
    }

    #[test]
    fn test_parse_connection_string_duplicate_option() {
        let err = parse_connection_string("s3://bucket/dir?name=other").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
    }
}
