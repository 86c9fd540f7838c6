use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Authentication plugins the client can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    /// Sends the password as-is; only allowed on a secured channel
    ClearPassword,
}

impl AuthPlugin {
    pub fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"mysql_native_password" => Ok(Self::NativePassword),
            b"caching_sha2_password" => Ok(Self::CachingSha2Password),
            b"mysql_clear_password" => Ok(Self::ClearPassword),
            other => Err(Error::UnsupportedAuthPlugin(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NativePassword => "mysql_native_password",
            Self::CachingSha2Password => "caching_sha2_password",
            Self::ClearPassword => "mysql_clear_password",
        }
    }

    /// Compute the auth response for `password` against the server's seed
    ///
    /// An empty password always answers with an empty response.
    pub fn scramble(self, password: &str, seed: &[u8], secure: bool) -> Result<Vec<u8>> {
        match self {
            Self::NativePassword if password.is_empty() => Ok(Vec::new()),
            Self::NativePassword => Ok(auth_mysql_native_password(password, seed).to_vec()),
            Self::CachingSha2Password if password.is_empty() => Ok(Vec::new()),
            Self::CachingSha2Password => Ok(auth_caching_sha2_password(password, seed).to_vec()),
            Self::ClearPassword if secure => {
                let mut out = password.as_bytes().to_vec();
                out.push(0);
                Ok(out)
            }
            Self::ClearPassword => Err(Error::UnsupportedAuthPlugin(
                "mysql_clear_password requires a secured connection".to_string(),
            )),
        }
    }
}

/// mysql_native_password: SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
pub fn auth_mysql_native_password(password: &str, seed: &[u8]) -> [u8; 20] {
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let token = hasher.finalize();

    let mut result = [0u8; 20];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(token.iter())) {
        *out = a ^ b;
    }
    result
}

/// caching_sha2_password fast path: SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
pub fn auth_caching_sha2_password(password: &str, seed: &[u8]) -> [u8; 32] {
    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(seed);
    let scramble = hasher.finalize();

    let mut result = [0u8; 32];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(scramble.iter())) {
        *out = a ^ b;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn seed() -> Vec<u8> {
        (1..=20).collect()
    }

    #[test]
    fn native_password_vector() {
        assert_eq!(
            auth_mysql_native_password("secret", &seed()).to_vec(),
            hex("b32bb3a583e1340c0a1108d58b1be49781ad8c2f")
        );
    }

    #[test]
    fn caching_sha2_vector() {
        assert_eq!(
            auth_caching_sha2_password("secret", &seed()).to_vec(),
            hex("746ebe205d56a0707acb3e796e834e0dd7b1d61743b26bd5202c7a623230c7c9")
        );
    }

    #[test]
    fn empty_password_sends_nothing() {
        assert!(AuthPlugin::NativePassword.scramble("", &seed(), false).unwrap().is_empty());
        assert!(
            AuthPlugin::CachingSha2Password
                .scramble("", &seed(), false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn clear_password_needs_secure_channel() {
        assert!(AuthPlugin::ClearPassword.scramble("pw", &[], false).is_err());
        assert_eq!(
            AuthPlugin::ClearPassword.scramble("pw", &[], true).unwrap(),
            b"pw\0"
        );
    }

    #[test]
    fn plugin_names() {
        for plugin in [
            AuthPlugin::NativePassword,
            AuthPlugin::CachingSha2Password,
            AuthPlugin::ClearPassword,
        ] {
            assert_eq!(AuthPlugin::from_name(plugin.name().as_bytes()).unwrap(), plugin);
        }
        assert!(matches!(
            AuthPlugin::from_name(b"auth_gssapi_client"),
            Err(Error::UnsupportedAuthPlugin(name)) if name == "auth_gssapi_client"
        ));
    }
}
