//! Protocol module: text codec, chunking, sequencing, reordering and the
//! JSON envelope format.

pub mod address;
pub mod chunker;
pub mod codec;
pub mod envelope;
pub mod reorder;
pub mod sequence;
pub mod text;

pub use address::split_host_port;
pub use chunker::chunk;
pub use codec::{decode_envelope, encode_envelope, ProtocolError};
pub use envelope::*;
pub use reorder::ReorderBuffer;
pub use sequence::Sequencer;
pub use text::{decode_text, encode_bytes};
