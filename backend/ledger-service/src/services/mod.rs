mod ledger;

pub use ledger::LedgerService;
