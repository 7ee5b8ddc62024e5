//! Kubernetes quantity parsing for storage sizes

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::controller::error::{Error, Result};

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 7] = [
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string (e.g. "2Gi", "500M", "1e9") into its base-unit value
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let qty = raw.trim();
    if qty.is_empty() {
        return Err(Error::InvalidQuantity(raw.to_string()));
    }

    // Binary suffixes first so "Mi" is not read as "M" followed by garbage
    let (number, multiplier) = if let Some((suffix, factor)) =
        BINARY_SUFFIXES.iter().find(|(s, _)| qty.ends_with(s))
    {
        (&qty[..qty.len() - suffix.len()], *factor)
    } else if let Some((suffix, factor)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| {
        // "1E" is exa, but "1e9" is a plain exponent
        qty.ends_with(s) && !qty[..qty.len() - s.len()].is_empty()
    }) {
        (&qty[..qty.len() - suffix.len()], *factor)
    } else {
        (qty, 1.0)
    };

    let value: f64 = number
        .parse()
        .map_err(|_| Error::InvalidQuantity(raw.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidQuantity(raw.to_string()));
    }

    Ok(value * multiplier)
}

/// Parse a `Quantity` object from the Kubernetes API
pub fn quantity_bytes(quantity: &Quantity) -> Result<f64> {
    parse_quantity(&quantity.0)
}

/// Larger of two quantities, keeping the original notation of the winner
pub fn max_quantity<'a>(a: &'a str, b: &'a str) -> Result<&'a str> {
    Ok(if parse_quantity(a)? >= parse_quantity(b)? {
        a
    } else {
        b
    })
}
