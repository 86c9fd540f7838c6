pub mod auth;
mod handshake;
pub mod ssl_request;

pub use auth::AuthPlugin;
pub use handshake::{
    AuthSwitchRequest, Handshake, HandshakeAction, HandshakeConfig, HandshakeResponse41,
    InitialHandshake, ServerVersion, read_auth_switch_request, read_initial_handshake,
    write_handshake_response, write_initial_handshake,
};
