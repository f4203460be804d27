//! SGWC endpoint configuration
//!
//! Resolved network addresses for the gateway's three control-plane and two
//! user-plane endpoints. File loading and schema validation belong to the
//! hosting application; this module only carries the resolved values and
//! enforces the all-endpoints-present precondition before the context may
//! serve.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ContextResult};

/// GTPv2-C UDP port (2123)
pub const GTPV2_C_UDP_PORT: u16 = 2123;
/// GTPv1-U UDP port (2152)
pub const GTPV1_U_UDP_PORT: u16 = 2152;

/// Default maximum number of UE contexts
pub const MAX_NUM_OF_UE: usize = 1024;
/// Default maximum number of session contexts
pub const MAX_NUM_OF_SESS: usize = 4096;
/// Default maximum number of bearer contexts
pub const MAX_NUM_OF_BEARER: usize = 16384;

/// SGWC configuration
///
/// Addresses are optional until `validate()`; ports default to the standard
/// GTP-C/GTP-U ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgwConfig {
    /// SGW S11 address (MME-facing control plane)
    pub s11_addr: Option<IpAddr>,
    pub s11_port: u16,
    /// SGW S5-C address (PGW-facing control plane)
    pub s5c_addr: Option<IpAddr>,
    pub s5c_port: u16,
    /// SGW S1-U address (eNB-facing user plane)
    pub s1u_addr: Option<IpAddr>,
    pub s1u_port: u16,
    /// SGW S5-U address (PGW-facing user plane)
    pub s5u_addr: Option<IpAddr>,
    pub s5u_port: u16,
    /// MME S11 address
    pub mme_s11_addr: Option<IpAddr>,
    pub mme_s11_port: u16,
    /// PGW S5-C address
    pub pgw_s5c_addr: Option<IpAddr>,
    pub pgw_s5c_port: u16,

    /// UE pool capacity
    pub max_ue: usize,
    /// Session pool capacity
    pub max_sess: usize,
    /// Bearer pool capacity
    pub max_bearer: usize,
}

impl Default for SgwConfig {
    fn default() -> Self {
        Self {
            s11_addr: None,
            s11_port: GTPV2_C_UDP_PORT,
            s5c_addr: None,
            s5c_port: GTPV2_C_UDP_PORT,
            s1u_addr: None,
            s1u_port: GTPV1_U_UDP_PORT,
            s5u_addr: None,
            s5u_port: GTPV1_U_UDP_PORT,
            mme_s11_addr: None,
            mme_s11_port: GTPV2_C_UDP_PORT,
            pgw_s5c_addr: None,
            pgw_s5c_port: GTPV2_C_UDP_PORT,
            max_ue: MAX_NUM_OF_UE,
            max_sess: MAX_NUM_OF_SESS,
            max_bearer: MAX_NUM_OF_BEARER,
        }
    }
}

/// Fully resolved gateway endpoints, produced by `SgwConfig::resolve()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayAddrs {
    pub s11: SocketAddr,
    pub s5c: SocketAddr,
    pub s1u: SocketAddr,
    pub s5u: SocketAddr,
    pub mme_s11: SocketAddr,
    pub pgw_s5c: SocketAddr,
}

impl SgwConfig {
    /// Load from a YAML document
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Resolve all six endpoints, failing on the first unset address.
    ///
    /// Initialization must not proceed past this point with a partial
    /// configuration.
    pub fn resolve(&self) -> ContextResult<GatewayAddrs> {
        let endpoint = |addr: Option<IpAddr>, port: u16, name: &'static str| {
            addr.map(|a| SocketAddr::new(a, port))
                .ok_or(ContextError::ConfigIncomplete(name))
        };

        Ok(GatewayAddrs {
            mme_s11: endpoint(self.mme_s11_addr, self.mme_s11_port, "MME S11")?,
            pgw_s5c: endpoint(self.pgw_s5c_addr, self.pgw_s5c_port, "PGW S5-C")?,
            s11: endpoint(self.s11_addr, self.s11_port, "SGW S11")?,
            s5c: endpoint(self.s5c_addr, self.s5c_port, "SGW S5-C")?,
            s1u: endpoint(self.s1u_addr, self.s1u_port, "SGW S1-U")?,
            s5u: endpoint(self.s5u_addr, self.s5u_port, "SGW S5-U")?,
        })
    }

    /// Check that every required endpoint address is present
    pub fn validate(&self) -> ContextResult<()> {
        self.resolve().map(|_| ())
    }
}

// ============================================================================
// Tests
// ============================================================================
