//! HTTP surface of the vote core.

mod common;
mod device;
mod voting;

/// All routes, mounted by [`crate::rocket_base`] under `/v1`.
pub fn routes() -> Vec<rocket::Route> {
    routes![
        device::register_device,
        voting::issue_nonce,
        voting::cast_vote,
    ]
}
