//! Protobuf models for the network-slice configuration service.
//!
//! The configuration distributor exposes a single server-streaming RPC,
//! `sdcoreConfig.ConfigService/NetworkSliceSubscribe`, which pushes full
//! network-slice snapshots to subscribed network functions. Messages and the
//! client stub are generated from `proto/sdcoreConfig/config.proto` and derive
//! `serde` so snapshots can be logged or bridged to JSON.

#[allow(clippy::all)]
#[allow(missing_docs)]
pub mod sdcore_config {
    include!(concat!(env!("OUT_DIR"), "/sdcore_config.rs"));
}

pub use sdcore_config::*;
