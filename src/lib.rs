//! EPC Serving Gateway control-plane context manager
//!
//! This crate tracks every attached subscriber (UE), every PDN connection
//! (session) that subscriber has established, and every QoS tunnel (bearer)
//! within each session, across GTP-C signaling exchanges with the MME and
//! the PGW.
//!
//! Pool slot indices double as the gateway's local TEIDs, so a TEID carried
//! in an inbound message resolves to its entity without a separate lookup
//! table. Message encode/decode, transactions, and transport live in the
//! signaling layer on top of this crate.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod pool;


pub use config::{GatewayAddrs, SgwConfig, GTPV1_U_UDP_PORT, GTPV2_C_UDP_PORT};
pub use context::{SgwBearer, SgwContext, SgwSess, SgwUe, MAX_NUM_OF_PACKET_BUFFER};
pub use error::{ContextError, ContextResult};
pub use message::{CreateSessionRequest, MAX_APN_LEN, MAX_IMSI_BCD_LEN, MAX_IMSI_LEN};
pub use pool::{Pool, PoolError, PoolId};
