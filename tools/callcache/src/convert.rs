//! Conversions applied to raw bytes read back from the store. Each has the
//! shape `Cache::get` expects: take the bytes, return the value or a
//! `Format` error.

use crate::errors::CacheError;

pub fn identity(raw: Vec<u8>) -> Result<Vec<u8>, CacheError> {
    Ok(raw)
}

pub fn utf8_text(raw: Vec<u8>) -> Result<String, CacheError> {
    String::from_utf8(raw).map_err(|e| CacheError::Format(format!("invalid utf-8: {e}")))
}

/// Parses a decimal integer literal; surrounding whitespace is allowed.
pub fn integer(raw: Vec<u8>) -> Result<i64, CacheError> {
    let text = literal_text(&raw)?;
    text.parse::<i64>()
        .map_err(|_| CacheError::Format(format!("invalid integer literal: {text:?}")))
}

pub fn float(raw: Vec<u8>) -> Result<f64, CacheError> {
    let text = literal_text(&raw)?;
    text.parse::<f64>()
        .map_err(|_| CacheError::Format(format!("invalid float literal: {text:?}")))
}

fn literal_text(raw: &[u8]) -> Result<&str, CacheError> {
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|e| CacheError::Format(format!("invalid utf-8: {e}")))
}
