//! Container metadata embedding and the save-node surface.
//!
//! Pixel encoding is delegated to the `image` crate; this crate splices the
//! metadata the capture pipeline produced into the encoded byte streams:
//! PNG text chunks, JPEG APP1/COM segments, WebP EXIF chunks. The staged
//! fallback controller degrades JPEG metadata through defined stages when
//! the single-segment EXIF ceiling is exceeded.

pub mod error;
pub mod exif;
pub mod filename;
pub mod jpeg;
pub mod png;
pub mod save;
pub mod stage;
pub mod webp;

pub use error::EncodeError;
pub use filename::format_filename;
pub use save::{FileFormat, SaveOptions, SaveOutcome, SavedImage, SaveTarget};
pub use stage::{minimal_parameters, stage_exif, FallbackStage, StagedExif};
