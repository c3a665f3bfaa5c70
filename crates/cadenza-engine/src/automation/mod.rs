mod curve;
mod reader;
mod record;

pub use curve::{CurveTable, SharedTable, DEFAULT_TABLE_SIZE};
pub use reader::TableReader;
pub use record::{automation_track, AutomationSample, AutomationWriter, RecordTap, AUTOMATION_RATE};
