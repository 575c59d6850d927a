//! Image evidence: locating a row's images and encoding them for the model.

pub mod codec;
pub mod resolver;

pub use codec::{CodecError, ImageCodec, CLASSIFY_SHORT_SIDE, DETAILED_SHORT_SIDE};
pub use resolver::{
    detect_project_root, parse_image_refs, ImageColumn, MediaResolver, ResolvedMedia, Selection,
    MAX_IMAGES,
};
