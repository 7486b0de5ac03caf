//! VID:PID device filters
//!
//! Filters are written `0xVVVV:0xPPPP`; either half may be `*`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid filter format '{0}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')")]
    Format(String),

    #[error("Invalid {field} '{value}', must start with '0x' (e.g., '0x1234')")]
    MissingPrefix { field: &'static str, value: String },

    #[error("Invalid {field} '{value}', hex part must be 1-4 digits")]
    Length { field: &'static str, value: String },

    #[error("Invalid {field} '{value}', not a valid hex number")]
    Hex { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    vendor_id: Option<u16>,
    product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }

    /// Whether any of `filters` admits the device; an empty list admits all
    pub fn any_matches(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
        filters.is_empty() || filters.iter().any(|f| f.matches(vendor_id, product_id))
    }

    /// Parse every pattern, stopping at the first bad one
    pub fn parse_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<DeviceFilter>, FilterError> {
        patterns.iter().map(|p| p.as_ref().parse()).collect()
    }
}

fn parse_id(value: &str, field: &'static str) -> Result<Option<u16>, FilterError> {
    if value == "*" {
        return Ok(None);
    }
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| FilterError::MissingPrefix {
            field,
            value: value.to_string(),
        })?;
    if hex.is_empty() || hex.len() > 4 {
        return Err(FilterError::Length {
            field,
            value: value.to_string(),
        });
    }
    u16::from_str_radix(hex, 16)
        .map(Some)
        .map_err(|_| FilterError::Hex {
            field,
            value: value.to_string(),
        })
}

impl FromStr for DeviceFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .filter(|(_, pid)| !pid.contains(':'))
            .ok_or_else(|| FilterError::Format(s.to_string()))?;

        Ok(Self {
            vendor_id: parse_id(vid, "VID")?,
            product_id: parse_id(pid, "PID")?,
        })
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(v) => write!(f, "{:#06x}", v)?,
            None => write!(f, "*")?,
        }
        match self.product_id {
            Some(p) => write!(f, ":{:#06x}", p),
            None => write!(f, ":*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        assert!("0x1234:0x5678".parse::<DeviceFilter>().is_ok());
        assert!("0x1234:*".parse::<DeviceFilter>().is_ok());
        assert!("*:0x5678".parse::<DeviceFilter>().is_ok());
        assert!("*:*".parse::<DeviceFilter>().is_ok());
        assert!("0XABCD:0xef01".parse::<DeviceFilter>().is_ok());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            "1234:5678".parse::<DeviceFilter>(),
            Err(FilterError::MissingPrefix { field: "VID", .. })
        ));
        assert!(matches!(
            "0x1234".parse::<DeviceFilter>(),
            Err(FilterError::Format(_))
        ));
        assert!(matches!(
            "0x1234:0x5678:0x9abc".parse::<DeviceFilter>(),
            Err(FilterError::Format(_))
        ));
        assert!(matches!(
            "0xGHIJ:0x5678".parse::<DeviceFilter>(),
            Err(FilterError::Hex { .. })
        ));
        assert!(matches!(
            "0x12345:0x5678".parse::<DeviceFilter>(),
            Err(FilterError::Length { .. })
        ));
    }

    #[test]
    fn test_filter_logic() {
        let filters = DeviceFilter::parse_all(&["0x1234:0x5678", "0xABCD:*"]).unwrap();

        assert!(DeviceFilter::any_matches(&filters, 0x1234, 0x5678));
        assert!(DeviceFilter::any_matches(&filters, 0xABCD, 0x1111));
        assert!(DeviceFilter::any_matches(&filters, 0xABCD, 0x9999));

        assert!(!DeviceFilter::any_matches(&filters, 0x1234, 0x9999));
        assert!(!DeviceFilter::any_matches(&filters, 0x9999, 0x5678));

        // Empty filters = allow all
        assert!(DeviceFilter::any_matches(&[], 0x1234, 0x5678));
    }

    #[test]
    fn test_display() {
        let filter: DeviceFilter = "0x4f9:*".parse().unwrap();
        assert_eq!(filter.to_string(), "0x04f9:*");
    }
}
