//! Content store: the file-system tree owning media, subtitles, per-stage
//! intermediate JSON and output cuts.
//!
//! Layout, rooted at `STORAGE_ROOT` (default `./data`):
//!
//! ```text
//! data/projects/<project_id>/
//!   raw/{video.<ext>, subtitle.srt}
//!   processing/{subtitle_chunks, step1_outline, ..., step5_clustering}.json
//!   output/{clips,collections}/<id>.mp4
//!   metadata/{clips_metadata, collections_metadata}.json
//! data/temp/   data/cache/   data/uploads/
//! ```
//!
//! All paths handed across component boundaries are canonical absolute
//! paths; no other component builds paths into this tree. Writes are atomic
//! (temp file + rename), so readers only ever observe the old file or the
//! complete new one.

mod error;
mod layout;
mod store;

pub use error::{ContentError, ContentResult};
pub use layout::ProjectLayout;
pub use store::ContentStore;
