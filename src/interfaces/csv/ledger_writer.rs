use crate::domain::ledger::{LedgerEntry, PaymentStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow<'a> {
    username: &'a str,
    word_balance: u64,
    payment_status: PaymentStatus,
}

/// Writes ledger entries as `username,word_balance,payment_status` CSV.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Result<()> {
        for entry in entries {
            self.writer.serialize(LedgerRow {
                username: &entry.username,
                word_balance: entry.word_balance,
                payment_status: entry.payment_status,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let mut paid = LedgerEntry::new("alice");
        paid.credit(&"CO1".into(), 1_500);
        let fresh = LedgerEntry::new("bob");

        let mut out = Vec::new();
        LedgerWriter::new(&mut out)
            .write_entries([&paid, &fresh])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "username,word_balance,payment_status\nalice,1500,paid\nbob,0,pending\n"
        );
    }
}
