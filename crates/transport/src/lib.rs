//! Timeline data shared by the playback engine and its collaborators: segment
//! audio, segments and their resolver, and the transport that owns the cursor.

mod audio;
pub mod clock;
mod segment;
mod timeline;
mod transport;

pub use audio::{AudioArc, resample_audio_arc};
pub use clock::{Clock, ManualClock, SystemClock};
pub use segment::{Segment, SegmentId, SegmentResolver, SourceId};
pub use timeline::Timeline;
pub use transport::{Transport, TransportControl, TransportHandle};
