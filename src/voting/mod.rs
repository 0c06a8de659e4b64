pub mod ledger;
pub mod tally;

pub use ledger::VoteLedger;
pub use tally::TallyEngine;
