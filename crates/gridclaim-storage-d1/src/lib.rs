//! Cloudflare D1 `DurableStore` for gridclaim, over the D1 REST query API.

mod client;
mod store;

pub use client::D1Client;
pub use store::D1Store;
