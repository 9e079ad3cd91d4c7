pub mod chunked_reader;
pub mod coercion;
pub mod retry;

pub use chunked_reader::{ChunkedReader, RowBatch};
pub use coercion::{coerce, parse_timestamp, NullTokens, Rejection, TypedValue};
pub use retry::RetryingReader;
