pub mod device_check;
pub mod flow;
pub mod recording;
pub mod script;

pub use device_check::DeviceCheck;
pub use flow::{ExamFlow, ExamStep, FlowError, User};
pub use recording::{suggested_filename, Recording, RecordingSummary};
pub use script::{SessionScript, EXAM_RULES, SESSION_COUNT};
