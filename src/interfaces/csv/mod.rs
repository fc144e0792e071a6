pub mod callback_reader;
pub mod ledger_writer;
