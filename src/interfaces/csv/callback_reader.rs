use crate::application::callbacks::CallbackNotice;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Reads exported gateway callbacks from a CSV source.
///
/// Expects a `CheckoutRequestID,reference` header. Whitespace is trimmed and an
/// empty reference is read as missing.
pub struct CallbackReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CallbackReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one notice per row.
    pub fn notices(self) -> impl Iterator<Item = Result<CallbackNotice>> {
        self.reader.into_deserialize().map(|result| {
            result
                .map(|mut notice: CallbackNotice| {
                    if notice.reference.as_deref() == Some("") {
                        notice.reference = None;
                    }
                    notice
                })
                .map_err(PaymentError::from)
        })
    }
}
