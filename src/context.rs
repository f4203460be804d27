//! SGWC context management
//!
//! The UE / session / bearer hierarchy and the context manager every
//! signaling handler calls into. Pool indices double as the gateway's local
//! TEIDs (S11 for UEs, S5-C for sessions, S1-U/S5-U for bearers), so no
//! separate TEID table exists; ownership runs strictly downward and upward
//! navigation is by identity only.
//!
//! All mutation happens from a single control-plane event context; the API
//! is `&mut self` with no internal locking. A host with concurrent event
//! loops must wrap the whole context in one mutex so cascading removals
//! stay atomic with respect to lookups.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::config::{GatewayAddrs, SgwConfig};
use crate::error::{ContextError, ContextResult};
use crate::message::{
    apn_parse, imsi_buffer_to_bcd, CreateSessionRequest, MAX_APN_LEN, MAX_IMSI_LEN,
};
use crate::pool::{Pool, PoolError, PoolId};

/// Maximum number of buffered downlink packets per bearer
pub const MAX_NUM_OF_PACKET_BUFFER: usize = 512;

// ============================================================================
// SGWC UE Context
// ============================================================================

/// UE context: one attached subscriber
#[derive(Debug, Clone, Default)]
pub struct SgwUe {
    /// SGW-S11-TEID (equals the UE's pool index)
    pub s11_teid: u32,
    /// MME-S11-TEID (learned from signaling)
    pub mme_s11_teid: u32,
    /// SGW S11 endpoint bound to this UE
    pub s11_addr: Option<SocketAddr>,
    /// IMSI in packed TBCD bytes
    pub imsi: Vec<u8>,
    /// IMSI as a digit string, for logging and display
    pub imsi_bcd: String,
    /// Owned sessions, in creation order
    pub sess_ids: Vec<PoolId>,
}

// ============================================================================
// SGWC Session Context
// ============================================================================

/// Session context: one PDN connection, owned by exactly one UE
#[derive(Debug, Clone, Default)]
pub struct SgwSess {
    /// SGW-S5C-TEID (equals the session's pool index)
    pub s5c_teid: u32,
    /// PGW-S5C-TEID (learned from signaling)
    pub pgw_s5c_teid: u32,
    /// SGW S5-C endpoint bound to this session
    pub s5c_addr: Option<SocketAddr>,
    /// Access point name; not necessarily unique within a UE
    pub apn: String,
    /// Owned bearers, in creation order
    pub bearer_ids: Vec<PoolId>,
    /// Owning UE
    pub ue_id: Option<PoolId>,
}

// ============================================================================
// SGWC Bearer Context
// ============================================================================

/// Bearer context: one QoS tunnel, owned by exactly one session.
///
/// The pool index serves as both user-plane TEIDs: S1-U toward the eNB and
/// S5-U toward the PGW are two tunnel roles sharing one identity value.
#[derive(Debug, Clone, Default)]
pub struct SgwBearer {
    /// EPS bearer id, unique within the owning session
    pub ebi: u8,
    /// SGW-S1U-TEID (equals the bearer's pool index)
    pub s1u_teid: u32,
    pub s1u_addr: Option<SocketAddr>,
    /// SGW-S5U-TEID (equals the bearer's pool index)
    pub s5u_teid: u32,
    pub s5u_addr: Option<SocketAddr>,
    /// eNB S1-U remote end (learned from signaling)
    pub enb_s1u_teid: u32,
    pub enb_s1u_addr: Option<SocketAddr>,
    /// PGW S5-U remote end (learned from signaling)
    pub pgw_s5u_teid: u32,
    pub pgw_s5u_addr: Option<SocketAddr>,
    /// Owning session
    pub sess_id: Option<PoolId>,
    /// Owning UE
    pub ue_id: Option<PoolId>,
    /// Downlink packets held while the user-plane path is not established
    pub buffered_pkts: Vec<Bytes>,
}

// ============================================================================
// SGWC Context (Main)
// ============================================================================

/// SGWC context: the three pools, the IMSI index, and the gateway's own
/// endpoints.
///
/// Constructed once at startup from a validated configuration, torn down
/// once at shutdown; multiple independent instances may coexist in tests.
pub struct SgwContext {
    addrs: GatewayAddrs,

    ue_pool: Pool<SgwUe>,
    sess_pool: Pool<SgwSess>,
    bearer_pool: Pool<SgwBearer>,

    /// IMSI -> UE identity, ordered for deterministic bulk teardown
    imsi_ue_hash: BTreeMap<Vec<u8>, PoolId>,

    finalized: bool,
}

impl SgwContext {
    /// Build a context from a complete configuration.
    ///
    /// Fails with `ConfigIncomplete` before any pool is usable if one of
    /// the six endpoint addresses is unset.
    pub fn new(config: &SgwConfig) -> ContextResult<Self> {
        let addrs = config.resolve()?;

        log::info!(
            "SGWC context initialized: max {} UEs, {} sessions, {} bearers",
            config.max_ue,
            config.max_sess,
            config.max_bearer
        );

        Ok(Self {
            addrs,
            ue_pool: Pool::new(config.max_ue),
            sess_pool: Pool::new(config.max_sess),
            bearer_pool: Pool::new(config.max_bearer),
            imsi_ue_hash: BTreeMap::new(),
            finalized: false,
        })
    }

    /// The gateway's resolved endpoints
    pub fn addrs(&self) -> &GatewayAddrs {
        &self.addrs
    }

    /// Tear down the context: cascade-remove every UE.
    ///
    /// Calling twice is a lifecycle violation and is reported as
    /// `AlreadyFinalized`.
    pub fn teardown(&mut self) -> ContextResult<()> {
        if self.finalized {
            log::error!("SGWC context already has been finalized");
            return Err(ContextError::AlreadyFinalized);
        }

        self.ue_remove_all()?;
        self.finalized = true;
        log::info!("SGWC context finalized");
        Ok(())
    }

    fn pool_exhausted(kind: &'static str, max: usize) -> ContextError {
        log::error!("Maximum number of {kind} contexts [{max}] reached");
        ContextError::PoolExhausted { kind, max }
    }

    // ========================================================================
    // UE Management
    // ========================================================================

    /// Add a UE with its default session and default bearer.
    ///
    /// The UE is only registered in the IMSI index once the default session
    /// exists; a session-creation failure rolls the UE slot back, so a
    /// UE-without-session is never observable.
    pub fn ue_add(&mut self, imsi: &[u8], apn: &str, ebi: u8) -> ContextResult<PoolId> {
        if self.finalized {
            return Err(ContextError::AlreadyFinalized);
        }
        if imsi.is_empty() || imsi.len() > MAX_IMSI_LEN {
            return Err(ContextError::InvalidImsi(imsi_buffer_to_bcd(imsi)));
        }
        let imsi_bcd = imsi_buffer_to_bcd(imsi);
        if self.imsi_ue_hash.contains_key(imsi) {
            return Err(ContextError::DuplicateImsi(imsi_bcd));
        }

        let ue_id = self
            .ue_pool
            .alloc()
            .map_err(|_| Self::pool_exhausted("UE", self.ue_pool.capacity()))?;

        let s11_addr = self.addrs.s11;
        let ue = self
            .ue_pool
            .find_mut(ue_id)
            .ok_or(ContextError::InvalidIdentity(ue_id.teid()))?;
        ue.s11_teid = ue_id.teid();
        ue.s11_addr = Some(s11_addr);
        ue.imsi = imsi.to_vec();
        ue.imsi_bcd = imsi_bcd.clone();

        if let Err(e) = self.sess_add(ue_id, apn, ebi) {
            self.ue_pool.free(ue_id);
            return Err(e);
        }

        self.imsi_ue_hash.insert(imsi.to_vec(), ue_id);

        log::info!(
            "[Added] SGWC UE IMSI[{imsi_bcd}] S11-TEID[0x{:x}]",
            ue_id.teid()
        );
        Ok(ue_id)
    }

    /// Remove a UE and everything it owns.
    ///
    /// The IMSI index entry goes first, so no lookup can observe a
    /// half-torn-down UE.
    pub fn ue_remove(&mut self, ue_id: PoolId) -> ContextResult<()> {
        let ue = self
            .ue_pool
            .find(ue_id)
            .ok_or(ContextError::InvalidIdentity(ue_id.teid()))?;
        let imsi = ue.imsi.clone();
        let imsi_bcd = ue.imsi_bcd.clone();
        let sess_ids = ue.sess_ids.clone();

        if !imsi.is_empty() {
            self.imsi_ue_hash.remove(&imsi);
        }

        for sess_id in sess_ids {
            self.sess_remove(sess_id)?;
        }

        self.ue_pool.free(ue_id);
        log::info!("[Removed] SGWC UE IMSI[{imsi_bcd}]");
        Ok(())
    }

    /// Remove every registered UE
    pub fn ue_remove_all(&mut self) -> ContextResult<()> {
        let ue_ids: Vec<PoolId> = self.imsi_ue_hash.values().copied().collect();
        for ue_id in ue_ids {
            self.ue_remove(ue_id)?;
        }
        Ok(())
    }

    /// Find a UE by its S11 TEID.
    ///
    /// TEID 0 and out-of-range TEIDs are rejected; a valid TEID with no
    /// live UE is "not found".
    pub fn ue_find(&self, teid: u32) -> ContextResult<Option<&SgwUe>> {
        map_index_lookup(self.ue_pool.find_by_index(teid), teid)
    }

    /// Generation-checked UE lookup
    pub fn ue_find_by_id(&self, ue_id: PoolId) -> Option<&SgwUe> {
        self.ue_pool.find(ue_id)
    }

    /// UE identity registered under an IMSI
    pub fn ue_id_by_imsi(&self, imsi: &[u8]) -> Option<PoolId> {
        self.imsi_ue_hash.get(imsi).copied()
    }

    /// Find a UE by IMSI (exact byte-sequence match)
    pub fn ue_find_by_imsi(&self, imsi: &[u8]) -> Option<&SgwUe> {
        self.ue_id_by_imsi(imsi)
            .and_then(|ue_id| self.ue_pool.find(ue_id))
    }

    /// Find a UE by IMSI digit string, packing it to TBCD first
    pub fn ue_find_by_imsi_bcd(&self, imsi_bcd: &str) -> ContextResult<Option<&SgwUe>> {
        let imsi = crate::message::imsi_bcd_to_buffer(imsi_bcd)?;
        Ok(self.ue_find_by_imsi(&imsi))
    }

    /// The single admission point for inbound session-creation signaling.
    ///
    /// Idempotent for a known IMSI: the existing UE is returned and no
    /// duplicate default session is created. A rejected request leaves the
    /// pools untouched.
    pub fn ue_find_or_add_by_message(
        &mut self,
        req: &CreateSessionRequest,
    ) -> ContextResult<PoolId> {
        let imsi = req
            .imsi
            .as_deref()
            .filter(|imsi| !imsi.is_empty())
            .ok_or_else(|| {
                log::error!("No IMSI in Create Session Request");
                ContextError::MissingImsi
            })?;
        let apn_wire = req.apn.as_deref().ok_or_else(|| {
            log::error!("No APN in Create Session Request");
            ContextError::MissingApn
        })?;

        if let Some(ue_id) = self.ue_id_by_imsi(imsi) {
            return Ok(ue_id);
        }

        let apn = apn_parse(apn_wire)?;
        self.ue_add(imsi, &apn, req.ebi)
    }

    /// Record the MME's S11 TEID for a UE
    pub fn ue_set_mme_s11_teid(&mut self, ue_id: PoolId, teid: u32) -> ContextResult<()> {
        let ue = self
            .ue_pool
            .find_mut(ue_id)
            .ok_or(ContextError::InvalidIdentity(ue_id.teid()))?;
        ue.mme_s11_teid = teid;
        Ok(())
    }

    /// Number of live UEs
    pub fn ue_count(&self) -> usize {
        self.ue_pool.len()
    }

    // ========================================================================
    // Session Management
    // ========================================================================

    /// Add a session with its default bearer.
    ///
    /// APN length policy: over-long APNs are rejected, never truncated, so
    /// two subscribers can never be confused by a shared prefix.
    pub fn sess_add(&mut self, ue_id: PoolId, apn: &str, ebi: u8) -> ContextResult<PoolId> {
        self.ue_pool
            .find(ue_id)
            .ok_or(ContextError::InvalidIdentity(ue_id.teid()))?;
        if ebi == 0 {
            return Err(ContextError::InvalidEbi(ebi));
        }
        if apn.len() > MAX_APN_LEN {
            return Err(ContextError::ApnTooLong(apn.len()));
        }

        let sess_id = self
            .sess_pool
            .alloc()
            .map_err(|_| Self::pool_exhausted("session", self.sess_pool.capacity()))?;

        let s5c_addr = self.addrs.s5c;
        let sess = self
            .sess_pool
            .find_mut(sess_id)
            .ok_or(ContextError::InvalidIdentity(sess_id.teid()))?;
        sess.s5c_teid = sess_id.teid();
        sess.s5c_addr = Some(s5c_addr);
        sess.apn = apn.to_string();
        sess.ue_id = Some(ue_id);

        if let Some(ue) = self.ue_pool.find_mut(ue_id) {
            ue.sess_ids.push(sess_id);
        }

        if let Err(e) = self.bearer_add(sess_id, ebi) {
            if let Some(ue) = self.ue_pool.find_mut(ue_id) {
                ue.sess_ids.retain(|&id| id != sess_id);
            }
            self.sess_pool.free(sess_id);
            return Err(e);
        }

        log::info!(
            "[Added] SGWC Session APN[{apn}] S5C-TEID[0x{:x}]",
            sess_id.teid()
        );
        Ok(sess_id)
    }

    /// Remove a session and all its bearers, in list order
    pub fn sess_remove(&mut self, sess_id: PoolId) -> ContextResult<()> {
        let sess = self
            .sess_pool
            .find(sess_id)
            .ok_or(ContextError::InvalidIdentity(sess_id.teid()))?;
        let bearer_ids = sess.bearer_ids.clone();

        for bearer_id in bearer_ids {
            self.bearer_remove(bearer_id)?;
        }

        let sess = self
            .sess_pool
            .free(sess_id)
            .ok_or(ContextError::InvalidIdentity(sess_id.teid()))?;
        if let Some(ue_id) = sess.ue_id {
            if let Some(ue) = self.ue_pool.find_mut(ue_id) {
                ue.sess_ids.retain(|&id| id != sess_id);
            }
        }

        log::info!("[Removed] SGWC Session APN[{}]", sess.apn);
        Ok(())
    }

    /// Find a session by its S5-C TEID
    pub fn sess_find(&self, teid: u32) -> ContextResult<Option<&SgwSess>> {
        map_index_lookup(self.sess_pool.find_by_index(teid), teid)
    }

    /// Generation-checked session lookup
    pub fn sess_find_by_id(&self, sess_id: PoolId) -> Option<&SgwSess> {
        self.sess_pool.find(sess_id)
    }

    /// First session of a UE carrying this APN, oldest first
    pub fn sess_find_by_apn(&self, ue_id: PoolId, apn: &str) -> Option<PoolId> {
        let ue = self.ue_pool.find(ue_id)?;
        ue.sess_ids
            .iter()
            .copied()
            .find(|&sess_id| self.sess_pool.find(sess_id).is_some_and(|s| s.apn == apn))
    }

    /// Owning session of the bearer matching an EBI within a UE
    pub fn sess_find_by_ebi(&self, ue_id: PoolId, ebi: u8) -> Option<PoolId> {
        let bearer_id = self.bearer_find_by_ue_ebi(ue_id, ebi)?;
        self.bearer_pool.find(bearer_id)?.sess_id
    }

    /// Record the PGW's S5-C TEID for a session
    pub fn sess_set_pgw_s5c_teid(&mut self, sess_id: PoolId, teid: u32) -> ContextResult<()> {
        let sess = self
            .sess_pool
            .find_mut(sess_id)
            .ok_or(ContextError::InvalidIdentity(sess_id.teid()))?;
        sess.pgw_s5c_teid = teid;
        Ok(())
    }

    /// Number of live sessions
    pub fn sess_count(&self) -> usize {
        self.sess_pool.len()
    }

    // ========================================================================
    // Bearer Management
    // ========================================================================

    /// Add a bearer to a session.
    ///
    /// The EBI must be unique within the session; duplicates are rejected
    /// rather than trusted to the signaling layer.
    pub fn bearer_add(&mut self, sess_id: PoolId, ebi: u8) -> ContextResult<PoolId> {
        let sess = self
            .sess_pool
            .find(sess_id)
            .ok_or(ContextError::InvalidIdentity(sess_id.teid()))?;
        if ebi == 0 {
            return Err(ContextError::InvalidEbi(ebi));
        }
        let duplicate = sess.bearer_ids.iter().any(|&bearer_id| {
            self.bearer_pool
                .find(bearer_id)
                .is_some_and(|b| b.ebi == ebi)
        });
        if duplicate {
            return Err(ContextError::DuplicateEbi(ebi));
        }
        let ue_id = sess.ue_id;

        let bearer_id = self
            .bearer_pool
            .alloc()
            .map_err(|_| Self::pool_exhausted("bearer", self.bearer_pool.capacity()))?;

        let (s1u_addr, s5u_addr) = (self.addrs.s1u, self.addrs.s5u);
        let bearer = self
            .bearer_pool
            .find_mut(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;
        bearer.ebi = ebi;
        bearer.s1u_teid = bearer_id.teid();
        bearer.s1u_addr = Some(s1u_addr);
        bearer.s5u_teid = bearer_id.teid();
        bearer.s5u_addr = Some(s5u_addr);
        bearer.sess_id = Some(sess_id);
        bearer.ue_id = ue_id;

        if let Some(sess) = self.sess_pool.find_mut(sess_id) {
            sess.bearer_ids.push(bearer_id);
        }

        log::debug!(
            "[Added] SGWC Bearer EBI[{ebi}] S1U-TEID[0x{:x}]",
            bearer_id.teid()
        );
        Ok(bearer_id)
    }

    /// Remove a bearer, releasing its buffered downlink packets
    pub fn bearer_remove(&mut self, bearer_id: PoolId) -> ContextResult<()> {
        let bearer = self
            .bearer_pool
            .free(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;

        if let Some(sess_id) = bearer.sess_id {
            if let Some(sess) = self.sess_pool.find_mut(sess_id) {
                sess.bearer_ids.retain(|&id| id != bearer_id);
            }
        }

        if !bearer.buffered_pkts.is_empty() {
            log::debug!(
                "Released {} buffered packets for EBI[{}]",
                bearer.buffered_pkts.len(),
                bearer.ebi
            );
        }
        log::debug!("[Removed] SGWC Bearer EBI[{}]", bearer.ebi);
        Ok(())
    }

    /// Find a bearer by its S1-U/S5-U TEID
    pub fn bearer_find(&self, teid: u32) -> ContextResult<Option<&SgwBearer>> {
        map_index_lookup(self.bearer_pool.find_by_index(teid), teid)
    }

    /// Generation-checked bearer lookup
    pub fn bearer_find_by_id(&self, bearer_id: PoolId) -> Option<&SgwBearer> {
        self.bearer_pool.find(bearer_id)
    }

    /// Bearer matching an EBI within one session, linear scan
    pub fn bearer_find_by_sess_ebi(&self, sess_id: PoolId, ebi: u8) -> Option<PoolId> {
        let sess = self.sess_pool.find(sess_id)?;
        sess.bearer_ids.iter().copied().find(|&bearer_id| {
            self.bearer_pool
                .find(bearer_id)
                .is_some_and(|b| b.ebi == ebi)
        })
    }

    /// Bearer matching an EBI across every session of a UE.
    ///
    /// Linear over the UE's sessions and bearers; the EBI space is at most
    /// 15 per UE, so no secondary index is kept.
    pub fn bearer_find_by_ue_ebi(&self, ue_id: PoolId, ebi: u8) -> Option<PoolId> {
        let ue = self.ue_pool.find(ue_id)?;
        ue.sess_ids
            .iter()
            .find_map(|&sess_id| self.bearer_find_by_sess_ebi(sess_id, ebi))
    }

    /// The default bearer is the first bearer of a session
    pub fn default_bearer_in_sess(&self, sess_id: PoolId) -> Option<PoolId> {
        self.sess_pool.find(sess_id)?.bearer_ids.first().copied()
    }

    /// Record the eNB's S1-U remote end for a bearer
    pub fn bearer_set_enb_s1u(
        &mut self,
        bearer_id: PoolId,
        teid: u32,
        addr: SocketAddr,
    ) -> ContextResult<()> {
        let bearer = self
            .bearer_pool
            .find_mut(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;
        bearer.enb_s1u_teid = teid;
        bearer.enb_s1u_addr = Some(addr);
        Ok(())
    }

    /// Record the PGW's S5-U remote end for a bearer
    pub fn bearer_set_pgw_s5u(
        &mut self,
        bearer_id: PoolId,
        teid: u32,
        addr: SocketAddr,
    ) -> ContextResult<()> {
        let bearer = self
            .bearer_pool
            .find_mut(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;
        bearer.pgw_s5u_teid = teid;
        bearer.pgw_s5u_addr = Some(addr);
        Ok(())
    }

    /// Buffer a downlink packet while the user-plane path is down
    pub fn bearer_buffer_packet(&mut self, bearer_id: PoolId, pkt: Bytes) -> ContextResult<()> {
        let bearer = self
            .bearer_pool
            .find_mut(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;
        if bearer.buffered_pkts.len() >= MAX_NUM_OF_PACKET_BUFFER {
            return Err(ContextError::PacketBufferFull(MAX_NUM_OF_PACKET_BUFFER));
        }
        bearer.buffered_pkts.push(pkt);
        Ok(())
    }

    /// Drain the buffered downlink packets once the path is established
    pub fn bearer_take_buffered(&mut self, bearer_id: PoolId) -> ContextResult<Vec<Bytes>> {
        let bearer = self
            .bearer_pool
            .find_mut(bearer_id)
            .ok_or(ContextError::InvalidIdentity(bearer_id.teid()))?;
        Ok(std::mem::take(&mut bearer.buffered_pkts))
    }

    /// Number of live bearers
    pub fn bearer_count(&self) -> usize {
        self.bearer_pool.len()
    }
}

fn map_index_lookup<T>(
    result: Result<Option<T>, PoolError>,
    teid: u32,
) -> ContextResult<Option<T>> {
    result.map_err(|_| ContextError::InvalidIdentity(teid))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::imsi_bcd_to_buffer;

    fn test_config() -> SgwConfig {
        SgwConfig {
            s11_addr: Some("127.0.0.2".parse().unwrap()),
            s5c_addr: Some("127.0.0.2".parse().unwrap()),
            s1u_addr: Some("127.0.0.3".parse().unwrap()),
            s5u_addr: Some("127.0.0.3".parse().unwrap()),
            mme_s11_addr: Some("127.0.0.1".parse().unwrap()),
            pgw_s5c_addr: Some("127.0.0.4".parse().unwrap()),
            max_ue: 8,
            max_sess: 16,
            max_bearer: 32,
            ..SgwConfig::default()
        }
    }

    fn test_context() -> SgwContext {
        SgwContext::new(&test_config()).unwrap()
    }

    fn imsi(bcd: &str) -> Vec<u8> {
        imsi_bcd_to_buffer(bcd).unwrap()
    }

    #[test]
    fn test_incomplete_config_rejected() {
        let mut config = test_config();
        config.s5u_addr = None;
        assert_eq!(
            SgwContext::new(&config).err(),
            Some(ContextError::ConfigIncomplete("SGW S5-U"))
        );
    }

    #[test]
    fn test_ue_add_creates_default_session_and_bearer() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();

        let ue = ctx.ue_find_by_id(ue_id).unwrap();
        assert_eq!(ue.s11_teid, ue_id.teid());
        assert_eq!(ue.imsi_bcd, "001010000000001");
        assert_eq!(ue.sess_ids.len(), 1);

        let sess_id = ctx.sess_find_by_apn(ue_id, "internet").unwrap();
        let sess = ctx.sess_find_by_id(sess_id).unwrap();
        assert_eq!(sess.s5c_teid, sess_id.teid());
        assert_eq!(sess.ue_id, Some(ue_id));

        let bearer_id = ctx.bearer_find_by_ue_ebi(ue_id, 5).unwrap();
        let bearer = ctx.bearer_find_by_id(bearer_id).unwrap();
        assert_eq!(bearer.s1u_teid, bearer_id.teid());
        assert_eq!(bearer.s5u_teid, bearer_id.teid());
        assert_eq!(ctx.default_bearer_in_sess(sess_id), Some(bearer_id));
        assert_eq!(ctx.sess_find_by_ebi(ue_id, 5), Some(sess_id));
    }

    #[test]
    fn test_ue_lookup_by_imsi_across_slot_reuse() {
        let mut ctx = test_context();
        let key = imsi("001010000000001");
        let ue_id = ctx.ue_add(&key, "internet", 5).unwrap();
        assert!(ctx.ue_find_by_imsi(&key).is_some());
        assert!(ctx
            .ue_find_by_imsi_bcd("001010000000001")
            .unwrap()
            .is_some());

        ctx.ue_remove(ue_id).unwrap();
        assert!(ctx.ue_find_by_imsi(&key).is_none());

        // A new UE reusing the slot must not be reachable through the old
        // IMSI or the old handle.
        let other = ctx.ue_add(&imsi("001010000000002"), "internet", 5).unwrap();
        assert_eq!(other.index(), ue_id.index());
        assert!(ctx.ue_find_by_imsi(&key).is_none());
        assert!(ctx.ue_find_by_id(ue_id).is_none());
    }

    #[test]
    fn test_duplicate_imsi_rejected() {
        let mut ctx = test_context();
        let key = imsi("001010000000001");
        ctx.ue_add(&key, "internet", 5).unwrap();
        assert!(matches!(
            ctx.ue_add(&key, "ims", 6),
            Err(ContextError::DuplicateImsi(_))
        ));
        assert_eq!(ctx.ue_count(), 1);
    }

    #[test]
    fn test_cascading_remove_isolation() {
        let mut ctx = test_context();
        let a = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let b = ctx.ue_add(&imsi("001010000000002"), "internet", 5).unwrap();
        let b_sess = ctx.sess_add(b, "ims", 6).unwrap();
        ctx.bearer_add(b_sess, 7).unwrap();

        ctx.ue_remove(a).unwrap();

        // Sibling UE and its whole subtree are unaffected.
        assert_eq!(ctx.ue_count(), 1);
        assert_eq!(ctx.sess_count(), 2);
        assert_eq!(ctx.bearer_count(), 3);
        assert!(ctx.bearer_find_by_ue_ebi(b, 7).is_some());
    }

    #[test]
    fn test_sess_remove_releases_bearers_and_buffers() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let sess_id = ctx.sess_find_by_apn(ue_id, "internet").unwrap();
        let bearer_id = ctx.bearer_find_by_sess_ebi(sess_id, 5).unwrap();
        let bearer_teid = bearer_id.teid();

        ctx.bearer_buffer_packet(bearer_id, Bytes::from_static(b"dl-data"))
            .unwrap();
        ctx.sess_remove(sess_id).unwrap();

        assert!(ctx.bearer_find(bearer_teid).unwrap().is_none());
        assert_eq!(ctx.bearer_count(), 0);
        let ue = ctx.ue_find_by_id(ue_id).unwrap();
        assert!(ue.sess_ids.is_empty());
    }

    #[test]
    fn test_find_rejects_invalid_teid() {
        let ctx = test_context();
        assert!(matches!(
            ctx.ue_find(0),
            Err(ContextError::InvalidIdentity(0))
        ));
        assert!(matches!(
            ctx.ue_find(9999),
            Err(ContextError::InvalidIdentity(9999))
        ));
        assert!(ctx.ue_find(1).unwrap().is_none());
        assert!(ctx.sess_find(0).is_err());
        assert!(ctx.bearer_find(0).is_err());
    }

    #[test]
    fn test_apn_policy_reject_not_truncate() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let long_apn = "a".repeat(MAX_APN_LEN + 1);
        assert_eq!(
            ctx.sess_add(ue_id, &long_apn, 6),
            Err(ContextError::ApnTooLong(MAX_APN_LEN + 1))
        );
        assert_eq!(ctx.sess_count(), 1);
    }

    #[test]
    fn test_duplicate_ebi_rejected() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let sess_id = ctx.sess_find_by_apn(ue_id, "internet").unwrap();
        assert_eq!(
            ctx.bearer_add(sess_id, 5),
            Err(ContextError::DuplicateEbi(5))
        );
        assert_eq!(ctx.bearer_add(sess_id, 0), Err(ContextError::InvalidEbi(0)));
        assert!(ctx.bearer_add(sess_id, 6).is_ok());
    }

    #[test]
    fn test_apn_not_unique_first_match_wins() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let first = ctx.sess_find_by_apn(ue_id, "internet").unwrap();
        let second = ctx.sess_add(ue_id, "internet", 6).unwrap();
        assert_ne!(first, second);
        // Oldest session wins.
        assert_eq!(ctx.sess_find_by_apn(ue_id, "internet"), Some(first));
    }

    #[test]
    fn test_find_or_add_by_message() {
        let mut ctx = test_context();
        let req = CreateSessionRequest {
            imsi: Some(imsi("001010000000001")),
            apn: Some(b"\x08internet".to_vec()),
            ebi: 5,
        };

        let first = ctx.ue_find_or_add_by_message(&req).unwrap();
        let sess_count = ctx.ue_find_by_id(first).unwrap().sess_ids.len();

        // Idempotent: same UE, no extra default session.
        let second = ctx.ue_find_or_add_by_message(&req).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            ctx.ue_find_by_id(second).unwrap().sess_ids.len(),
            sess_count
        );
    }

    #[test]
    fn test_find_or_add_missing_fields_leave_pools_untouched() {
        let mut ctx = test_context();
        let before = (ctx.ue_count(), ctx.sess_count(), ctx.bearer_count());

        let no_imsi = CreateSessionRequest {
            imsi: None,
            apn: Some(b"\x08internet".to_vec()),
            ebi: 5,
        };
        assert_eq!(
            ctx.ue_find_or_add_by_message(&no_imsi),
            Err(ContextError::MissingImsi)
        );

        let no_apn = CreateSessionRequest {
            imsi: Some(imsi("001010000000001")),
            apn: None,
            ebi: 5,
        };
        assert_eq!(
            ctx.ue_find_or_add_by_message(&no_apn),
            Err(ContextError::MissingApn)
        );

        assert_eq!(
            (ctx.ue_count(), ctx.sess_count(), ctx.bearer_count()),
            before
        );
    }

    #[test]
    fn test_packet_buffering() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let bearer_id = ctx.bearer_find_by_ue_ebi(ue_id, 5).unwrap();

        ctx.bearer_buffer_packet(bearer_id, Bytes::from_static(b"p1"))
            .unwrap();
        ctx.bearer_buffer_packet(bearer_id, Bytes::from_static(b"p2"))
            .unwrap();

        let pkts = ctx.bearer_take_buffered(bearer_id).unwrap();
        assert_eq!(pkts.len(), 2);
        assert!(ctx.bearer_take_buffered(bearer_id).unwrap().is_empty());
    }

    #[test]
    fn test_packet_buffer_bounded() {
        let mut ctx = test_context();
        let ue_id = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        let bearer_id = ctx.bearer_find_by_ue_ebi(ue_id, 5).unwrap();

        for _ in 0..MAX_NUM_OF_PACKET_BUFFER {
            ctx.bearer_buffer_packet(bearer_id, Bytes::from_static(b"p"))
                .unwrap();
        }
        assert_eq!(
            ctx.bearer_buffer_packet(bearer_id, Bytes::from_static(b"p")),
            Err(ContextError::PacketBufferFull(MAX_NUM_OF_PACKET_BUFFER))
        );
    }

    #[test]
    fn test_pool_exhaustion_is_reported_not_fatal() {
        let mut config = test_config();
        config.max_ue = 2;
        let mut ctx = SgwContext::new(&config).unwrap();

        let a = ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        ctx.ue_add(&imsi("001010000000002"), "internet", 5).unwrap();
        assert!(matches!(
            ctx.ue_add(&imsi("001010000000003"), "internet", 5),
            Err(ContextError::PoolExhausted { kind: "UE", .. })
        ));

        // Capacity frees up again after one removal.
        ctx.ue_remove(a).unwrap();
        assert!(ctx.ue_add(&imsi("001010000000003"), "internet", 5).is_ok());
    }

    #[test]
    fn test_rollback_on_default_bearer_failure() {
        let mut config = test_config();
        config.max_bearer = 1;
        let mut ctx = SgwContext::new(&config).unwrap();

        ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        // The bearer pool is now full; the whole ue_add must roll back.
        let err = ctx.ue_add(&imsi("001010000000002"), "internet", 5);
        assert!(matches!(
            err,
            Err(ContextError::PoolExhausted { kind: "bearer", .. })
        ));
        assert_eq!(ctx.ue_count(), 1);
        assert_eq!(ctx.sess_count(), 1);
        assert!(ctx.ue_find_by_imsi(&imsi("001010000000002")).is_none());
    }

    #[test]
    fn test_teardown_once() {
        let mut ctx = test_context();
        ctx.ue_add(&imsi("001010000000001"), "internet", 5).unwrap();
        ctx.ue_add(&imsi("001010000000002"), "internet", 5).unwrap();

        ctx.teardown().unwrap();
        assert_eq!(ctx.ue_count(), 0);
        assert_eq!(ctx.sess_count(), 0);
        assert_eq!(ctx.bearer_count(), 0);

        assert_eq!(ctx.teardown(), Err(ContextError::AlreadyFinalized));
        assert_eq!(
            ctx.ue_add(&imsi("001010000000003"), "internet", 5),
            Err(ContextError::AlreadyFinalized)
        );
    }
}
