use crate::{Error, Result};
use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| Error::Configuration(format!("{}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Gateway configuration, populated from the environment.
///
/// `PUBLIC_IP=auto` picks the first non-loopback IPv4 interface; the
/// resulting address is what the gateway advertises in Contact, Via,
/// Record-Route and Call-ID.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub enable_ssl: bool,
    pub ssl_key_path: Option<String>,
    pub ssl_cert_path: Option<String>,
    pub enable_sip_gateway: bool,
    pub sip_server_host: String,
    pub sip_server_port: u16,
    pub sip_domain: String,
    pub local_sip_port: u16,
    pub rtpengine_host: String,
    pub rtpengine_port: u16,
    pub public_ip: IpAddr,
    pub max_sessions: usize,
    pub log_level: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let public_ip = match env_or("PUBLIC_IP", "auto").as_str() {
            "auto" => detect_public_ip()?,
            literal => literal
                .parse::<Ipv4Addr>()
                .map(IpAddr::V4)
                .map_err(|e| Error::Configuration(format!("PUBLIC_IP: {}", e)))?,
        };

        let config = GatewayConfig {
            http_port: env_parse("PORT", 8080)?,
            enable_ssl: env_bool("ENABLE_SSL", false),
            ssl_key_path: std::env::var("SSL_KEY_PATH").ok(),
            ssl_cert_path: std::env::var("SSL_CERT_PATH").ok(),
            enable_sip_gateway: env_bool("ENABLE_SIP_GATEWAY", true),
            sip_server_host: env_or("SIP_SERVER_HOST", "127.0.0.1"),
            sip_server_port: env_parse("SIP_SERVER_PORT", 5060)?,
            sip_domain: env_or("SIP_DOMAIN", &public_ip.to_string()),
            local_sip_port: env_parse("LOCAL_SIP_PORT", 5060)?,
            rtpengine_host: env_or("RTPENGINE_HOST", "127.0.0.1"),
            rtpengine_port: env_parse("RTPENGINE_PORT", 22222)?,
            public_ip,
            max_sessions: env_parse("MAX_SESSIONS", 50)?,
            log_level: env_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Configuration(
                "MAX_SESSIONS must be at least 1".to_string(),
            ));
        }
        if self.enable_ssl {
            for (name, path) in [
                ("SSL_KEY_PATH", &self.ssl_key_path),
                ("SSL_CERT_PATH", &self.ssl_cert_path),
            ] {
                match path {
                    Some(p) if std::path::Path::new(p).is_file() => {}
                    Some(p) => {
                        return Err(Error::Configuration(format!(
                            "{}: {} is not readable",
                            name, p
                        )))
                    }
                    None => {
                        return Err(Error::Configuration(format!(
                            "{} is required when ENABLE_SSL is set",
                            name
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// The address written into Contact, Via, Record-Route and Call-ID.
    pub fn advertised_addr(&self) -> String {
        self.public_ip.to_string()
    }

    pub fn sip_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.local_sip_port)
    }

    pub fn http_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.http_port)
    }

    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.sip_server_host, self.sip_server_port)
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.rtpengine_host, self.rtpengine_port)
    }
}

fn detect_public_ip() -> Result<IpAddr> {
    get_if_addrs()?
        .iter()
        .find(|i| !i.is_loopback())
        .and_then(|i| match i.addr {
            get_if_addrs::IfAddr::V4(ref addr) => Some(IpAddr::V4(addr.ip)),
            _ => None,
        })
        .ok_or_else(|| Error::Configuration("no non-loopback IPv4 interface found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_public_ip_is_used_verbatim() {
        std::env::set_var("PUBLIC_IP", "192.0.2.10");
        std::env::remove_var("SIP_DOMAIN");
        let config = GatewayConfig::from_env().expect("config");
        assert_eq!(config.public_ip.to_string(), "192.0.2.10");
        assert_eq!(config.sip_domain, "192.0.2.10");
        std::env::remove_var("PUBLIC_IP");
    }

    #[test]
    fn ssl_without_paths_is_rejected() {
        let config = GatewayConfig {
            http_port: 8080,
            enable_ssl: true,
            ssl_key_path: None,
            ssl_cert_path: None,
            enable_sip_gateway: true,
            sip_server_host: "127.0.0.1".into(),
            sip_server_port: 5060,
            sip_domain: "example.com".into(),
            local_sip_port: 5060,
            rtpengine_host: "127.0.0.1".into(),
            rtpengine_port: 22222,
            public_ip: "127.0.0.1".parse().unwrap(),
            max_sessions: 10,
            log_level: "info".into(),
        };
        assert!(config.validate().is_err());
    }
}
