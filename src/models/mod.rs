pub mod block;
pub mod event;
pub mod evidence;

pub use block::{
    block_id, BlockKind, BlockMeta, Category, DataQuality, EvidenceSummary, SleepMetrics, Source,
    TimeBlock, DAY_MINUTES,
};
pub use event::{DerivedEvent, EventMeta, ReconciliationEvent, WindowLock, WindowStats};
pub use evidence::{
    AppSession, HealthDaily, HourlyAppUsage, HourlyLocation, HourlyUsage, LocationBlock,
    LocationSample, PatternSlot, UserPlace,
};
