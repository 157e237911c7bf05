//! Connection state machine: discovery, binding, status and command traffic.
//!
//! The engine performs no IO. Inbound datagrams go in through
//! [`Engine::handle_datagram`]; outbound datagrams come out of
//! [`Engine::start`], [`Engine::bind_request`], [`Engine::status_request`] and
//! [`Engine::command_request`]. The device task in [`crate::device`] owns the
//! socket and the timers and is the only caller, so no locking happens here.

use crate::cache::PropertyCache;
use crate::crypto::{CodecKey, GreeCipher};
use crate::error::{GreeError, Result};
use crate::event::DeviceSnapshot;
use crate::params::ParameterTable;
use crate::protocol::{self, Datagram, Envelope, InboundPacket, Pack, PacketType};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

/// Authoritative connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    AwaitingIdentity,
    Identified,
    AwaitingBindAck,
    Bound,
}

impl ConnectionState {
    pub fn is_bound(self) -> bool {
        self == ConnectionState::Bound
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Idle => "idle",
            ConnectionState::AwaitingIdentity => "awaiting identity",
            ConnectionState::Identified => "identified",
            ConnectionState::AwaitingBindAck => "awaiting bind ack",
            ConnectionState::Bound => "bound",
        })
    }
}

/// The unit's self-reported identity, captured from its `dev` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device id (its MAC), used as `mac` in bind and status requests
    pub id: String,
    pub name: String,
}

// The session cipher lives inside `Bound` so it cannot exist in any other state.
#[derive(Debug)]
enum Phase {
    Idle,
    AwaitingIdentity,
    Identified,
    AwaitingBindAck,
    Bound { session: GreeCipher },
}

/// What an accepted datagram means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// A `dev` reply was recorded; send [`Engine::bind_request`] next.
    Identified,
    /// A `bindok` was accepted and the session key installed.
    Bound,
    /// A `bindok` arrived that cannot be matched to the identified unit.
    BindRejected,
    /// The cache was refreshed from a `dat` reply.
    Status,
    /// The cache was updated from a `res` reply.
    Update,
}

pub struct Engine {
    target: SocketAddr,
    generic: GreeCipher,
    params: Arc<ParameterTable>,
    phase: Phase,
    identity: Option<DeviceIdentity>,
    endpoint: Option<SocketAddr>,
    cache: PropertyCache,
}

impl Engine {
    /// `target` is where discovery requests go: the configured host and the
    /// unit's port. `default_key` encrypts everything until binding succeeds.
    pub fn new(target: SocketAddr, default_key: CodecKey, params: Arc<ParameterTable>) -> Self {
        Self {
            target,
            generic: GreeCipher::new(default_key),
            params,
            phase: Phase::Idle,
            identity: None,
            endpoint: None,
            cache: PropertyCache::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::AwaitingIdentity => ConnectionState::AwaitingIdentity,
            Phase::Identified => ConnectionState::Identified,
            Phase::AwaitingBindAck => ConnectionState::AwaitingBindAck,
            Phase::Bound { .. } => ConnectionState::Bound,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.phase, Phase::Bound { .. })
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn cache(&self) -> &PropertyCache {
        &self.cache
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            state: self.state(),
            identity: self.identity.clone(),
            endpoint: self.endpoint,
            properties: self.cache.to_map(),
        }
    }

    /// Begin a discovery round. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<Datagram> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(GreeError::violation(PacketType::Scan.as_str(), self.state()));
        }
        let datagram = protocol::scan_datagram(self.target)?;
        self.phase = Phase::AwaitingIdentity;
        Ok(datagram)
    }

    /// Drop the session and return to `Idle`.
    ///
    /// Identity and cached values are kept as the last-known state; they are
    /// replaced when the next `dev` reply arrives.
    pub fn reset(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            debug!("Resetting connection to {} from {}", self.target, self.state());
        }
        self.phase = Phase::Idle;
    }

    /// Build the bind request for the identified unit. Only valid from `Identified`.
    pub fn bind_request(&mut self) -> Result<Datagram> {
        let (identity, endpoint) = match (&self.phase, &self.identity, self.endpoint) {
            (Phase::Identified, Some(identity), Some(endpoint)) => (identity, endpoint),
            _ => return Err(GreeError::violation(PacketType::Bind.as_str(), self.state())),
        };
        let pack = Pack::Bind {
            mac: identity.id.clone(),
            uid: 0,
        };
        let datagram = protocol::pack_datagram(&pack, &self.generic, true, endpoint)?;
        self.phase = Phase::AwaitingBindAck;
        Ok(datagram)
    }

    /// Build a status poll for every code in the parameter table.
    pub fn status_request(&self) -> Result<Datagram> {
        let (session, identity, endpoint) = self.bound_context()?;
        let pack = Pack::Status {
            cols: self.params.codes(),
            mac: identity.id.clone(),
        };
        protocol::pack_datagram(&pack, session, false, endpoint)
    }

    /// Build a `cmd` packet setting `codes[i]` to `values[i]`.
    ///
    /// Fails with `NotConnected` unless bound, and with `InvalidArgument` when
    /// the values do not fit the parameter table.
    pub fn command_request(&self, codes: &[String], values: &[i64]) -> Result<Datagram> {
        let (session, _, endpoint) = self.bound_context()?;
        self.params.validate(codes, values)?;
        let pack = Pack::Cmd {
            opt: codes.to_vec(),
            p: values.to_vec(),
        };
        protocol::pack_datagram(&pack, session, false, endpoint)
    }

    fn bound_context(&self) -> Result<(&GreeCipher, &DeviceIdentity, SocketAddr)> {
        match (&self.phase, &self.identity, self.endpoint) {
            (Phase::Bound { session }, Some(identity), Some(endpoint)) => {
                Ok((session, identity, endpoint))
            }
            _ => Err(GreeError::NotConnected),
        }
    }

    /// Process one inbound datagram from `from`.
    ///
    /// Errors describe a dropped datagram; the engine state is left as it was.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) -> Result<Reaction> {
        let envelope = Envelope::parse(data)?;
        let packet = self.open(&envelope)?;

        let Some(pack) = packet.pack else {
            return Err(GreeError::violation(packet.tag, self.state()));
        };

        match pack {
            Pack::Dev { name, mac } => self.on_identity(packet.cid, name, mac, from),
            Pack::BindOk { key, mac } => self.on_bind_ok(&packet.cid, &key, mac),
            Pack::Dat { cols, dat } => {
                self.apply(PacketType::Dat, &cols, &dat)?;
                Ok(Reaction::Status)
            }
            Pack::Res { opt, val } => {
                self.apply(PacketType::Res, &opt, &val)?;
                Ok(Reaction::Update)
            }
            other => Err(GreeError::violation(
                other.packet_type().as_str(),
                self.state(),
            )),
        }
    }

    // Pick the key: session key while bound, generic key otherwise. A bound
    // unit that reboots answers discovery with the generic key again, so the
    // generic key is tried as a fallback, but only to let a `dev` through.
    fn open(&self, envelope: &Envelope) -> Result<InboundPacket> {
        let Phase::Bound { session } = &self.phase else {
            return InboundPacket::decode(envelope, &self.generic);
        };
        match InboundPacket::decode(envelope, session) {
            Ok(packet) => Ok(packet),
            Err(session_err) => match InboundPacket::decode(envelope, &self.generic) {
                Ok(packet) if packet.tag == PacketType::Dev.as_str() => Ok(packet),
                Ok(packet) => Err(GreeError::violation(packet.tag, self.state())),
                Err(_) => Err(session_err),
            },
        }
    }

    fn on_identity(
        &mut self,
        cid: String,
        name: String,
        mac: Option<String>,
        from: SocketAddr,
    ) -> Result<Reaction> {
        if matches!(self.phase, Phase::Idle) {
            return Err(GreeError::violation(PacketType::Dev.as_str(), self.state()));
        }
        let id = match (cid.is_empty(), mac) {
            (false, _) => cid,
            (true, Some(mac)) if !mac.is_empty() => mac,
            _ => return Err(GreeError::Codec("device reply carries no id".into())),
        };

        if self.is_bound() {
            info!("Device {} re-identified at {}, binding again", id, from);
        } else {
            info!("Device identified: id={}, name={}, address={}", id, name, from);
        }

        self.identity = Some(DeviceIdentity { id, name });
        self.endpoint = Some(from);
        self.cache.clear();
        self.phase = Phase::Identified;
        Ok(Reaction::Identified)
    }

    fn on_bind_ok(&mut self, cid: &str, key: &str, mac: Option<String>) -> Result<Reaction> {
        let Some(identity) = &self.identity else {
            warn!("Bind confirmation from {} before any device was identified", self.target);
            return Ok(Reaction::BindRejected);
        };
        if !matches!(self.phase, Phase::AwaitingBindAck) {
            return Err(GreeError::violation(PacketType::BindOk.as_str(), self.state()));
        }

        let sender = if cid.is_empty() { mac.as_deref() } else { Some(cid) };
        if sender != Some(identity.id.as_str()) {
            warn!(
                "Bind confirmation for {:?} does not match identified device {}",
                sender, identity.id
            );
            return Ok(Reaction::BindRejected);
        }

        let session = GreeCipher::new(CodecKey::from_str(key)?);
        self.cache.clear();
        self.phase = Phase::Bound { session };
        info!("Binding confirmed for device {}", identity.id);
        Ok(Reaction::Bound)
    }

    fn apply(&mut self, packet: PacketType, codes: &[String], values: &[i64]) -> Result<()> {
        if !self.is_bound() {
            return Err(GreeError::violation(packet.as_str(), self.state()));
        }
        let written = self.cache.apply(codes, values)?;
        debug!("Applied {} values from '{}' packet", written, packet);
        Ok(())
    }
}
