use anyhow::Result;
use notification_dispatcher::models::{
    message::NotificationMessage,
    validation::{
        parse_amount, validate_amount, validate_commission, validate_email, validate_mobile_number,
        validate_notification, validate_txn_date,
    },
};
use serde_json::json;

use crate::support::notification;

/// Test: The reference payment notification is valid
#[tokio::test]
async fn test_valid_notification_passes() -> Result<()> {
    assert!(validate_notification(&notification("U1")).is_ok());
    Ok(())
}

/// Test: Mobile numbers must be exactly ten digits
#[tokio::test]
async fn test_mobile_number_rules() -> Result<()> {
    assert!(validate_mobile_number("9841234567").is_ok());
    assert!(validate_mobile_number("984123456").is_err());
    assert!(validate_mobile_number("98412345678").is_err());
    assert!(validate_mobile_number("98412345a7").is_err());
    assert!(validate_mobile_number("९८४१२३४५६७").is_err());
    Ok(())
}

/// Test: Amounts are positive decimals, commissions non-negative
#[tokio::test]
async fn test_amount_and_commission_rules() -> Result<()> {
    assert!(validate_amount("100.00").is_ok());
    assert!(validate_amount("0.01").is_ok());
    assert!(validate_amount("0").is_err());
    assert!(validate_amount("-1").is_err());
    assert!(validate_amount("abc").is_err());
    assert!(validate_amount("12345678901234567.89").is_ok());
    Ok(())
}

/// Test: Amounts use the plain decimal grammar the IPN forwarder sends
#[tokio::test]
async fn test_amount_grammar_is_strict() -> Result<()> {
    for amount in ["1_000.00", "1e3", "+1", "0100", "1.", ".5", "1.2.3", "1 000"] {
        assert!(validate_amount(amount).is_err(), "{amount} should be rejected");
    }
    assert!(validate_amount("12345678901234567890123456789").is_err());

    assert_eq!(parse_amount("100.00")?.to_string(), "100.00");
    assert_eq!(
        parse_amount("12345678901234567.89")?.to_string(),
        "12345678901234567.89"
    );
    assert_eq!(parse_amount("0.50")?.to_string(), "0.50");

    assert!(validate_commission("1_0").is_err());

    assert!(validate_commission("0").is_ok());
    assert!(validate_commission("2.50").is_ok());
    assert!(validate_commission("-0.01").is_err());
    Ok(())
}

/// Test: Email addresses and transaction dates are checked when present
#[tokio::test]
async fn test_email_and_txn_date_rules() -> Result<()> {
    assert!(validate_email("a@b.com").is_ok());
    assert!(validate_email("a.b").is_err());

    assert!(validate_txn_date("2024-01-31 13:45:00").is_ok());
    assert!(validate_txn_date("2024-01-31T13:45:00").is_err());
    assert!(validate_txn_date("31/01/2024").is_err());
    Ok(())
}

/// Test: Every failing field is reported, in field order
#[tokio::test]
async fn test_all_errors_collected() -> Result<()> {
    let message: NotificationMessage = serde_json::from_value(json!({
        "mobileNumber": "123",
        "amount": "0",
        "merchantId": "",
        "terminalId": "T1",
        "retrievalReferenceNumber": "R1",
        "remark1": "x",
        "uniqueId": " ",
        "properties": {
            "secondaryMobileNumber": "12",
            "commission": "-1"
        }
    }))?;

    let errors = validate_notification(&message).err().unwrap_or_default();
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();

    assert_eq!(
        fields,
        vec![
            "mobileNumber",
            "amount",
            "merchantId",
            "uniqueId",
            "properties.secondaryMobileNumber",
            "properties.commission",
        ]
    );

    Ok(())
}

/// Test: Optional fields may be omitted entirely
#[tokio::test]
async fn test_optional_fields_may_be_absent() -> Result<()> {
    let message: NotificationMessage = serde_json::from_value(json!({
        "mobileNumber": "9841234567",
        "amount": "1",
        "merchantId": "M1",
        "terminalId": "T1",
        "retrievalReferenceNumber": "R1",
        "remark1": "x",
        "uniqueId": "U1"
    }))?;

    assert!(message.notification_type.is_none());
    assert!(message.properties.is_none());
    assert!(validate_notification(&message).is_ok());

    Ok(())
}
