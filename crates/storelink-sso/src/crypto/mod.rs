//! Cryptographic primitives: secrets at rest, deterministic passwords,
//! multipass tokens, signed relay state and random tokens.

pub mod codec;
pub mod multipass;
pub mod password;
pub mod relay_state;

pub use codec::{CodecError, SecretCodec};
pub use multipass::{MultipassEncoder, MultipassPayload};
pub use password::PasswordGenerator;
pub use relay_state::RelayStateSigner;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Random URL-safe token from `bytes` bytes of OS entropy.
#[must_use]
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Constant-time byte comparison.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
