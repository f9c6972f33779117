//! The three explicit ledgers the settlement engine converts between:
//! vault shares and strategy shares (both [`ShareLedger`]) and pending-claim
//! receipts ([`ReceiptLedger`]). Conversions between them live with the
//! component that performs them and always state their rounding.

pub mod receipts;
pub mod shares;

pub use receipts::{Receipt, ReceiptId, ReceiptKind, ReceiptLedger};
pub use shares::ShareLedger;
