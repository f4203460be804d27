//! SGWC context error types

use thiserror::Error;

use crate::message::MAX_APN_LEN;

/// SGWC context error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A context pool is at capacity; the triggering request must be
    /// rejected at the protocol level, the process keeps serving.
    #[error("Maximum number of {kind} contexts [{max}] reached")]
    PoolExhausted { kind: &'static str, max: usize },

    /// Zero, out-of-range, or stale identity passed to a by-identity
    /// operation.
    #[error("Invalid identity [0x{0:x}]")]
    InvalidIdentity(u32),

    /// Creation-driving request carried no IMSI
    #[error("No IMSI in request")]
    MissingImsi,

    /// Creation-driving request carried no APN
    #[error("No APN in request")]
    MissingApn,

    /// IMSI is empty, too long, or not digits
    #[error("Invalid IMSI: {0}")]
    InvalidImsi(String),

    /// A UE with this IMSI is already registered
    #[error("UE with IMSI[{0}] already exists")]
    DuplicateImsi(String),

    /// APN exceeds the bounded length; rejected, never truncated
    #[error("APN too long: {0} bytes (maximum {MAX_APN_LEN})")]
    ApnTooLong(usize),

    /// Wire APN label encoding is malformed
    #[error("Malformed APN encoding")]
    MalformedApn,

    /// EBI 0 is not a valid EPS bearer id
    #[error("Invalid EBI [{0}]")]
    InvalidEbi(u8),

    /// A bearer with this EBI already exists in the session
    #[error("EBI [{0}] already exists in session")]
    DuplicateEbi(u8),

    /// A required endpoint address is unset; fatal at initialization
    #[error("No {0} address in configuration")]
    ConfigIncomplete(&'static str),

    /// The context has already been torn down
    #[error("SGWC context already has been finalized")]
    AlreadyFinalized,

    /// Downlink packet buffer for a bearer is at capacity
    #[error("Packet buffer full ({0} packets)")]
    PacketBufferFull(usize),
}

/// SGWC context result type
pub type ContextResult<T> = Result<T, ContextError>;
