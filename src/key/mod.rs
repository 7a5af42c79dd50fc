//! Request key grammar.
//!
//! A request key is a path naming a source image plus an optional chain of
//! processing tokens appended to the base filename:
//!
//! ```text
//!   /sub/dir/image_s150x150_q60.jpg
//!   └──┬───┘ └─┬─┘ └────┬────┘ └┬┘
//!     dir    head   config    ext
//!
//!   source key:      /sub/dir/image.jpg
//!   thumbnail mask:  /sub/dir/image*.jpg
//! ```
//!
//! - [`validator`] holds the acceptance rules for source keys and directory names
//! - [`parser`] splits a request path into [`SourceKey`], [`ThumbnailMask`] and
//!   the raw configuration string handed to
//!   [`ProcessingConfiguration::parse`](crate::transform::ProcessingConfiguration::parse)

pub mod parser;
pub mod validator;

pub use parser::{
    parse_request_key, ParsedKey, SourceKey, ThumbnailMask, MASK_MATCH_OPTIONS,
    SUPPORTED_EXTENSIONS,
};
pub use validator::{
    is_valid_directory_name, is_valid_source_key, validate_source_key, Violation,
};
