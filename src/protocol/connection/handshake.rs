use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, ServerStatusFlags,
};
use crate::error::{Error, Result};
use crate::protocol::connection::auth::AuthPlugin;
use crate::protocol::connection::ssl_request::write_ssl_request;
use crate::protocol::packet::ErrPayloadBytes;
use crate::protocol::primitive::*;

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; 8],
    filler: u8,
    capability_flags_lower: U16LE,
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    auth_data_len: u8,
    reserved: [u8; 10],
}

/// Server greeting (Protocol::HandshakeV10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Scramble seed, without the trailing NUL
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: String,
}

/// Read the initial handshake packet
///
/// A server that refuses the connection (e.g. too many connections) sends an ERR instead.
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;
    if protocol_version == 0xFF {
        return Err(ErrPayloadBytes(payload).into());
    }
    if protocol_version != 10 {
        return Err(Error::InvalidPacket);
    }

    let (server_version, data) = read_string_null(data)?;
    let (fixed, mut data) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

    let capability_flags = CapabilityFlags::from_bits_truncate(
        (u32::from(fixed.capability_flags_upper.get()) << 16)
            | u32::from(fixed.capability_flags_lower.get()),
    );

    let mut auth_plugin_data = fixed.auth_data_part1.to_vec();
    if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let part2_len = usize::from(fixed.auth_data_len).saturating_sub(8).max(13);
        let (part2, rest) = read_string_fix(data, part2_len.min(data.len()))?;
        auth_plugin_data.extend_from_slice(part2);
        data = rest;
    }
    if auth_plugin_data.last() == Some(&0) {
        auth_plugin_data.pop();
    }

    // Some servers omit the NUL after the plugin name
    let auth_plugin_name = if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        let name = read_string_null(data).map_or(data, |(name, _)| name);
        String::from_utf8_lossy(name).into_owned()
    } else {
        AuthPlugin::NativePassword.name().to_string()
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: String::from_utf8_lossy(server_version).into_owned(),
        connection_id: fixed.connection_id.get(),
        auth_plugin_data,
        capability_flags,
        charset: fixed.charset,
        status_flags: ServerStatusFlags::from_bits_truncate(fixed.status_flags.get()),
        auth_plugin_name,
    })
}

/// Write a greeting (scripted servers and tests)
pub fn write_initial_handshake(out: &mut Vec<u8>, greeting: &InitialHandshake) {
    let caps = greeting.capability_flags.bits();
    let seed = &greeting.auth_plugin_data;
    let (part1, part2) = seed.split_at(seed.len().min(8));
    let mut auth_data_part1 = [0u8; 8];
    auth_data_part1[..part1.len()].copy_from_slice(part1);

    write_int_1(out, greeting.protocol_version);
    write_string_null(out, &greeting.server_version);
    let fixed = HandshakeFixedFields {
        connection_id: U32LE::new(greeting.connection_id),
        auth_data_part1,
        filler: 0,
        capability_flags_lower: U16LE::new(caps as u16),
        charset: greeting.charset,
        status_flags: U16LE::new(greeting.status_flags.bits()),
        capability_flags_upper: U16LE::new((caps >> 16) as u16),
        auth_data_len: (seed.len() + 1) as u8,
        reserved: [0; 10],
    };
    out.extend_from_slice(fixed.as_bytes());
    out.extend_from_slice(part2);
    out.extend(std::iter::repeat_n(0u8, 13usize.saturating_sub(part2.len())));
    write_string_null(out, &greeting.auth_plugin_name);
}

/// Server version split into numeric parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub raw: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub is_mariadb: bool,
}

impl ServerVersion {
    /// MariaDB prefixes its version with this to stay compatible with MySQL 5.5 replicas
    pub const MARIADB_RPL_PREFIX: &'static str = "5.5.5-";

    /// Parse the version from its digit runs, e.g. `8.0.36-log` or `5.5.5-10.11.6-MariaDB`
    pub fn parse(raw: &str) -> Self {
        let (version, is_mariadb) = match raw.strip_prefix(Self::MARIADB_RPL_PREFIX) {
            Some(rest) => (rest, true),
            None => (raw, raw.contains("MariaDB")),
        };

        let mut parts = [0u32; 3];
        let mut found = 0;
        let mut current: Option<u32> = None;
        for c in version.chars() {
            match c.to_digit(10) {
                Some(d) => {
                    current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(d));
                }
                None => {
                    if let Some(value) = current.take() {
                        parts[found] = value;
                        found += 1;
                        if found == parts.len() || c != '.' {
                            break;
                        }
                    }
                }
            }
        }
        if let Some(value) = current
            && found < parts.len()
        {
            parts[found] = value;
        }

        Self {
            raw: raw.to_string(),
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            is_mariadb,
        }
    }

    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

/// Handshake response packet sent by client (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a str,
}

/// Write handshake response packet (HandshakeResponse41)
pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41) {
    write_int_4(out, response.capability_flags.bits());
    write_int_4(out, response.max_packet_size);
    write_int_1(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);
    write_string_null(out, response.username);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_bytes_lenenc(out, response.auth_response);
    } else {
        write_int_1(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if let Some(db) = response.database
        && response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, db);
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        write_string_null(out, response.auth_plugin_name);
    }
}

/// Auth switch request from server (0xFE, plugin name, plugin data)
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let (plugin_name, data) = read_string_null(data)?;
    let plugin_data = data.strip_suffix(&[0]).unwrap_or(data);
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

/// Configuration for handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// Requested configurable capabilities (masked with `CAPABILITIES_CONFIGURABLE`)
    pub capabilities: CapabilityFlags,
    pub tls: bool,
    /// Unix sockets count as secure for plugins that send the password in clear
    pub secure_transport: bool,
    pub max_packet_size: u32,
    pub charset: u8,
}

/// What the caller must do after [`Handshake::drive`]
#[derive(Debug)]
pub enum HandshakeAction {
    /// Write this payload, then read the next packet
    Write(Vec<u8>),
    /// Write this SSL request, upgrade the stream to TLS, then call [`Handshake::resume_after_tls`]
    UpgradeTls(Vec<u8>),
    /// Read the next packet without writing
    Read,
    /// Authenticated with these negotiated capabilities
    Connected(CapabilityFlags),
}

#[derive(Debug)]
enum HandshakeState {
    AwaitingGreeting,
    AwaitingTlsUpgrade,
    Authenticating { plugin: AuthPlugin },
    /// Fast auth succeeded; only the final OK is left
    AwaitingOk,
    Connected,
}

/// Greeting, authentication and optional TLS upgrade, without I/O
///
/// The caller owns the packet channel: it reads a payload, calls `drive`, and performs the
/// returned [`HandshakeAction`]. Sequence numbers continue across the whole exchange.
#[derive(Debug)]
pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
    greeting: Option<InitialHandshake>,
    capabilities: CapabilityFlags,
    secure: bool,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        let secure = config.secure_transport;
        Self {
            config,
            state: HandshakeState::AwaitingGreeting,
            greeting: None,
            capabilities: CapabilityFlags::empty(),
            secure,
        }
    }

    /// Greeting received from the server, once the first packet was driven
    pub fn greeting(&self) -> Option<&InitialHandshake> {
        self.greeting.as_ref()
    }

    pub fn into_greeting(self) -> Option<InitialHandshake> {
        self.greeting
    }

    /// Capabilities the client would ask for, before intersecting with the server's
    pub fn client_capabilities(&self) -> CapabilityFlags {
        let mut caps =
            CAPABILITIES_ALWAYS_ENABLED | (self.config.capabilities & CAPABILITIES_CONFIGURABLE);
        caps.set(
            CapabilityFlags::CLIENT_CONNECT_WITH_DB,
            self.config.database.is_some(),
        );
        caps.set(CapabilityFlags::CLIENT_SSL, self.config.tls);
        caps
    }

    #[tracing::instrument(skip_all)]
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        match self.state {
            HandshakeState::AwaitingGreeting => self.on_greeting(payload),
            HandshakeState::Authenticating { .. } => self.on_auth_result(payload),
            HandshakeState::AwaitingOk => match payload.first() {
                Some(0x00) => self.connected(),
                Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                _ => Err(Error::InvalidPacket),
            },
            HandshakeState::AwaitingTlsUpgrade | HandshakeState::Connected => Err(
                Error::from_debug("Handshake::drive called in a state that expects no packet"),
            ),
        }
    }

    /// Continue after the stream was upgraded to TLS
    pub fn resume_after_tls(&mut self) -> Result<HandshakeAction> {
        if !matches!(self.state, HandshakeState::AwaitingTlsUpgrade) {
            return Err(Error::from_debug("resume_after_tls without a pending upgrade"));
        }
        self.secure = true;
        let greeting = self
            .greeting
            .as_ref()
            .ok_or_else(|| Error::from_debug("TLS upgrade before greeting"))?;
        let plugin = AuthPlugin::from_name(greeting.auth_plugin_name.as_bytes())
            .unwrap_or(AuthPlugin::NativePassword);
        let seed = greeting.auth_plugin_data.clone();
        self.write_response(plugin, seed)
    }

    fn on_greeting(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        let greeting = read_initial_handshake(payload)?;
        let negotiated = self.client_capabilities() & greeting.capability_flags;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = %greeting.auth_plugin_name,
            ?negotiated,
            "greeting"
        );
        if self.config.tls && !negotiated.contains(CapabilityFlags::CLIENT_SSL) {
            return Err(Error::BadConfigError(
                "TLS requested but the server does not support it".to_string(),
            ));
        }
        self.capabilities = negotiated;

        // An unknown initial plugin is answered with native password and usually switched.
        let plugin = AuthPlugin::from_name(greeting.auth_plugin_name.as_bytes())
            .unwrap_or(AuthPlugin::NativePassword);
        let seed = greeting.auth_plugin_data.clone();
        self.greeting = Some(greeting);

        if negotiated.contains(CapabilityFlags::CLIENT_SSL) {
            let mut out = Vec::new();
            write_ssl_request(
                &mut out,
                negotiated,
                self.config.max_packet_size,
                self.config.charset,
            );
            self.state = HandshakeState::AwaitingTlsUpgrade;
            return Ok(HandshakeAction::UpgradeTls(out));
        }
        self.write_response(plugin, seed)
    }

    fn write_response(&mut self, plugin: AuthPlugin, seed: Vec<u8>) -> Result<HandshakeAction> {
        let auth_response = plugin.scramble(&self.config.password, &seed, self.secure)?;
        let mut out = Vec::new();
        write_handshake_response(
            &mut out,
            &HandshakeResponse41 {
                capability_flags: self.capabilities,
                max_packet_size: self.config.max_packet_size,
                charset: self.config.charset,
                username: &self.config.username,
                auth_response: &auth_response,
                database: self.config.database.as_deref(),
                auth_plugin_name: plugin.name(),
            },
        );
        self.state = HandshakeState::Authenticating { plugin };
        Ok(HandshakeAction::Write(out))
    }

    fn on_auth_result(&mut self, payload: &[u8]) -> Result<HandshakeAction> {
        let HandshakeState::Authenticating { plugin, .. } = &self.state else {
            return Err(Error::from_debug("on_auth_result outside Authenticating"));
        };
        let plugin = *plugin;
        match payload.first() {
            Some(0x00) => self.connected(),
            Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
            Some(0x01) => {
                // AuthMoreData
                if plugin != AuthPlugin::CachingSha2Password {
                    return Err(Error::InvalidPacket);
                }
                match payload.get(1) {
                    Some(0x03) => {
                        self.state = HandshakeState::AwaitingOk;
                        Ok(HandshakeAction::Read)
                    }
                    Some(0x04) if self.secure => {
                        let mut out = self.config.password.as_bytes().to_vec();
                        out.push(0);
                        Ok(HandshakeAction::Write(out))
                    }
                    Some(0x04) => Err(Error::UnsupportedAuthPlugin(
                        "caching_sha2_password full authentication requires a secured connection"
                            .to_string(),
                    )),
                    _ => Err(Error::InvalidPacket),
                }
            }
            Some(0xFE) => {
                let switch = read_auth_switch_request(payload)?;
                let plugin = AuthPlugin::from_name(switch.plugin_name)?;
                tracing::debug!(plugin = plugin.name(), "auth switch");
                let seed = switch.plugin_data.to_vec();
                let out = plugin.scramble(&self.config.password, &seed, self.secure)?;
                self.state = HandshakeState::Authenticating { plugin };
                Ok(HandshakeAction::Write(out))
            }
            _ => Err(Error::InvalidPacket),
        }
    }

    fn connected(&mut self) -> Result<HandshakeAction> {
        self.state = HandshakeState::Connected;
        Ok(HandshakeAction::Connected(self.capabilities))
    }
}
