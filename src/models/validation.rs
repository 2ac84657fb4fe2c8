use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::NaiveDateTime;
use lettre::Address;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::message::NotificationMessage;

pub const TXN_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_mobile_number(value: &str) -> Result<()> {
    if value.len() != 10 {
        return Err(anyhow!("must be exactly 10 digits"));
    }

    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("must contain only digits"));
    }

    Ok(())
}

/// Most significant digits a `Decimal` holds exactly.
const MAX_AMOUNT_DIGITS: usize = 28;

/// Parses a money amount written as a plain JSON-style decimal: an integer
/// part without leading zeros and an optional fraction. Separators, signs and
/// exponents are refused so the parsed value renders back to the same text.
pub fn parse_amount(value: &str) -> Result<Decimal> {
    let value = value.trim();
    let (integer, fraction) = match value.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (value, None),
    };

    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    if !all_digits(integer) || fraction.is_some_and(|f| !all_digits(f)) {
        return Err(anyhow!("must be a plain decimal number"));
    }
    if integer.len() > 1 && integer.starts_with('0') {
        return Err(anyhow!("must not have leading zeros"));
    }
    if integer.len() + fraction.map_or(0, str::len) > MAX_AMOUNT_DIGITS {
        return Err(anyhow!("must have at most {} digits", MAX_AMOUNT_DIGITS));
    }

    Decimal::from_str(value).map_err(|_| anyhow!("must be a plain decimal number"))
}

pub fn validate_amount(value: &str) -> Result<()> {
    if parse_amount(value)? <= Decimal::ZERO {
        return Err(anyhow!("must be a positive number"));
    }

    Ok(())
}

/// Signs are refused by [`parse_amount`], so any parsable commission is
/// non-negative.
pub fn validate_commission(value: &str) -> Result<()> {
    parse_amount(value)?;
    Ok(())
}

pub fn validate_email(value: &str) -> Result<()> {
    Address::from_str(value).map_err(|e| anyhow!("is not a valid email address: {}", e))?;
    Ok(())
}

pub fn validate_txn_date(value: &str) -> Result<()> {
    NaiveDateTime::parse_from_str(value, TXN_DATE_FORMAT)
        .map_err(|_| anyhow!("must match format {}", TXN_DATE_FORMAT))?;
    Ok(())
}

fn validate_required(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("must not be empty"));
    }
    Ok(())
}

/// Collects every field problem instead of stopping at the first one.
pub fn validate_notification(message: &NotificationMessage) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    let mut check = |field: &str, outcome: Result<()>| {
        if let Err(e) = outcome {
            errors.push(FieldError::new(field, e.to_string()));
        }
    };

    check("mobileNumber", validate_mobile_number(&message.mobile_number));
    check("amount", validate_amount(&message.amount));
    check("merchantId", validate_required(&message.merchant_id));
    check("terminalId", validate_required(&message.terminal_id));
    check(
        "retrievalReferenceNumber",
        validate_required(&message.retrieval_reference_number),
    );
    check("remark1", validate_required(&message.remark1));
    check("uniqueId", validate_required(&message.unique_id));

    if let Some(properties) = &message.properties {
        if let Some(secondary) = &properties.secondary_mobile_number {
            check(
                "properties.secondaryMobileNumber",
                validate_mobile_number(secondary),
            );
        }
        if let Some(email) = &properties.email {
            check("properties.email", validate_email(email));
        }
        if let Some(commission) = &properties.commission {
            check("properties.commission", validate_commission(commission));
        }
        if let Some(txn_date) = &properties.txn_date {
            check("properties.txnDate", validate_txn_date(txn_date));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
