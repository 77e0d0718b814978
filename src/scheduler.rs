pub mod daemon;
pub mod jobs;
pub mod ledger;
pub mod roster;

pub use daemon::spawn_briefing_daemon;
pub use jobs::{Scheduler, TickSummary};
pub use ledger::SendLedger;
pub use roster::{RosterError, Subscriber};
