//! Server configuration
//!
//! CLI arguments with environment fallbacks, mirroring the deployment
//! surface of the reference: identity of this domain (fqdn, ccid, csid,
//! private key), registration policy, federation dimension, and the
//! storage DSN.

use clap::Parser;
use std::net::SocketAddr;

use crate::crypto;
use crate::model::{REGISTRATION_CLOSE, REGISTRATION_INVITE, REGISTRATION_OPEN};

#[derive(Parser, Debug, Clone)]
#[command(name = "concrnt")]
#[command(about = "Federated timeline server")]
pub struct Args {
    /// Fully-qualified domain name this server answers for
    #[arg(long, env = "FQDN")]
    pub fqdn: String,

    /// Domain root address (con1...)
    #[arg(long, env = "CCID")]
    pub ccid: String,

    /// Domain signing address (ccs1...)
    #[arg(long, env = "CSID")]
    pub csid: String,

    /// Domain signing private key, 32-byte hex
    #[arg(long, env = "PRIVATEKEY")]
    pub privatekey: String,

    /// Registration policy: open, invite or close
    #[arg(long, env = "REGISTRATION", default_value = "open")]
    pub registration: String,

    /// Captcha site key; when set, local affiliations require a verified
    /// captcha on the request
    #[arg(long, env = "SITE_KEY")]
    pub site_key: Option<String>,

    /// Federation namespace; peers in another dimension are rejected
    #[arg(long, env = "DIMENSION", default_value = "")]
    pub dimension: String,

    /// Storage DSN
    #[arg(long, env = "DB_URI", default_value = "mongodb://localhost:27017")]
    pub db_uri: String,

    /// Database name
    #[arg(long, env = "DB_NAME", default_value = "concrnt")]
    pub db_name: String,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Refuse to start on a nonsensical identity.
    pub fn validate(&self) -> Result<(), String> {
        if self.fqdn.is_empty() || self.fqdn.contains('@') {
            return Err(format!("invalid fqdn: {}", self.fqdn));
        }
        if !crypto::is_ccid(&self.ccid) {
            return Err(format!("invalid ccid: {}", self.ccid));
        }
        if !crypto::is_csid(&self.csid) {
            return Err(format!("invalid csid: {}", self.csid));
        }
        if !matches!(
            self.registration.as_str(),
            REGISTRATION_OPEN | REGISTRATION_INVITE | REGISTRATION_CLOSE
        ) {
            return Err(format!("invalid registration: {}", self.registration));
        }
        let key = crypto::parse_private_key(&self.privatekey).map_err(|e| e.to_string())?;
        let derived =
            crypto::private_key_to_address(&key, crypto::HRP_CSID).map_err(|e| e.to_string())?;
        if derived != self.csid {
            return Err("private key does not match csid".into());
        }
        Ok(())
    }
}
