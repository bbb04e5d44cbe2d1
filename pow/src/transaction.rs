//! Layout of a serialized transaction.
//!
//! Only the nonce is ever written; the rest is streamed as-is.

use core::ops::Range;

use crate::{
    error::{Error, Result},
    nonce::NONCE_TRYTES,
    trinary::ALPHABET,
};

/// Trytes of a serialized transaction.
pub const TRANSACTION_TRYTES: usize = 2673;

pub const SIGNATURE: Range<usize> = 0..2187;
pub const ADDRESS: Range<usize> = 2187..2268;
pub const VALUE: Range<usize> = 2268..2295;
pub const OBSOLETE_TAG: Range<usize> = 2295..2322;
pub const TIMESTAMP: Range<usize> = 2322..2331;
pub const CURRENT_INDEX: Range<usize> = 2331..2340;
pub const LAST_INDEX: Range<usize> = 2340..2349;
pub const BUNDLE: Range<usize> = 2349..2430;
pub const TRUNK: Range<usize> = 2430..2511;
pub const BRANCH: Range<usize> = 2511..2592;
pub const TAG: Range<usize> = 2592..2619;
pub const ATTACHMENT_TIMESTAMP: Range<usize> = 2619..2628;
pub const ATTACHMENT_TIMESTAMP_LOWER: Range<usize> = 2628..2637;
pub const ATTACHMENT_TIMESTAMP_UPPER: Range<usize> = 2637..2646;
pub const NONCE: Range<usize> = 2646..2673;

/// Check length and alphabet of a transaction.
pub fn validate(trytes: &str) -> Result<()> {
    if trytes.len() != TRANSACTION_TRYTES {
        return Err(Error::InvalidInput(format!(
            "transaction of {} trytes, expected {}",
            trytes.len(),
            TRANSACTION_TRYTES
        )));
    }
    if let Some(position) = trytes.bytes().position(|c| !ALPHABET.contains(&c)) {
        return Err(Error::InvalidInput(format!(
            "not a tryte at position {}",
            position
        )));
    }
    Ok(())
}

/// Transaction with its nonce field replaced.
pub fn attach_nonce(trytes: &str, nonce: &str) -> Result<String> {
    validate(trytes)?;
    if nonce.len() != NONCE_TRYTES || !nonce.bytes().all(|c| ALPHABET.contains(&c)) {
        return Err(Error::InvalidInput(format!("malformed nonce {:?}", nonce)));
    }
    let mut attached = String::with_capacity(TRANSACTION_TRYTES);
    attached.push_str(&trytes[..NONCE.start]);
    attached.push_str(nonce);
    Ok(attached)
}
