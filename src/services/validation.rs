//! Field validators shared by request types.

use rust_decimal::Decimal;
use validator::ValidationError;

pub fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        let mut err = ValidationError::new("positive");
        err.message = Some("must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_is_non_negative_but_not_positive() {
        assert!(validate_non_negative(&Decimal::ZERO).is_ok());
        assert_eq!(validate_positive(&Decimal::ZERO).unwrap_err().code, "positive");
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert_eq!(
            validate_non_negative(&dec!(-0.01)).unwrap_err().code,
            "non_negative"
        );
        assert!(validate_positive(&dec!(0.0001)).is_ok());
    }
}
