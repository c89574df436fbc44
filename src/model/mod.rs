use data_encoding::HEXLOWER;

pub mod auth;
pub mod device;
pub mod election;
pub mod nonce;
pub mod results;
pub mod risk;
pub mod vote;
pub mod voter;

/// A 128-bit random identifier, hex encoded.
pub(crate) fn random_id() -> String {
    let bytes: [u8; 16] = rand::random();
    HEXLOWER.encode(&bytes)
}
