pub mod codec;
pub mod file;
pub mod output;
pub mod source;

pub use codec::PlaybackBuffer;
pub use file::AudioFile;
pub use output::{AudioOutput, ClockOutput, UnitId};
pub use source::{FileMediaSource, MediaSource};
