//! Wire types shared by the Duet server crates and the client.
//!
//! Field names follow the JSON the browser client has always spoken:
//! camelCase, with document ids under `_id`.

pub mod api;
pub mod events;
pub mod models;
