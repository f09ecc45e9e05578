//! Voxel state and token codec

pub mod codec;
pub mod state;

pub use codec::{decode_token, decode_token_or_air, encode_token, TOKEN_VERSION};
pub use state::VoxelState;
