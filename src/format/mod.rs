//! Container format handling
//!
//! Only FLV is read: the delivery engine needs framed tags with a
//! timestamp it can inspect and rewrite, nothing more.

pub mod flv;

pub use flv::{FlvDemuxer, FlvHeader, FlvTag, FlvTagType};
