// Domain models: summary points and the raw fragments they are built from.

mod point;
pub mod raw;

pub use point::{FieldValue, MergeError, MonitorPoint, TIME_KEY, Tag, epoch_seconds};
pub use raw::{RawTimestamp, RecordError};
