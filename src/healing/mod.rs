pub mod advisor;
pub mod arbiter;
pub mod history;
pub mod vitals;

pub use advisor::{Advice, HealAdvisor, LlmAdvisor};
pub use arbiter::HealingArbiter;
pub use history::{DecisionLog, DecisionRecord, HealAction, HealthSnapshot};
pub use vitals::{FixedProbe, SysinfoProbe, Vitals, VitalsProbe};
