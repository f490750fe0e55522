mod execution;
mod ids;
mod schedule;
mod track;

pub use execution::ExecutionRecord;
pub use ids::{ScheduleId, TrackId};
pub use schedule::{
    AnnualSpan, AudioMode, DateRange, MonthDay, Periodicity, ScheduleDefinition, TimeWindow,
};
pub use track::{AudioTrack, TrackCategory};
