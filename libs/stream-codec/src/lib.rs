mod codec;
mod wire;

pub use codec::MessageCodec;
