//! Property-based tests for the login handshake
//!
//! Tests for:
//! - Phone validation accepts exactly `+` and eleven ASCII digits
//! - Code normalization accepts exactly `d d d d d` and strips the spaces
//! - Malformed phones never reach the transport

use super::auth::{normalize_code, validate_phone, AuthError, AuthOrchestrator};
use super::mock::MockProtocolFactory;
use super::registry::SessionRegistry;
use super::retry::Timeouts;
use super::traits::ApiCredentials;
use crate::identity::UserId;
use crate::persistence::{MemoryDocumentStore, PreferenceStore};
use proptest::prelude::*;
use std::sync::Arc;

fn is_valid_phone_shape(s: &str) -> bool {
    s.len() == 12 && s.starts_with('+') && s[1..].chars().all(|c| c.is_ascii_digit())
}

proptest! {
    /// Property: well-formed phones are accepted
    #[test]
    fn valid_phones_accepted(digits in "[0-9]{11}") {
        let phone = format!("+{}", digits);
        prop_assert!(validate_phone(&phone));
    }

    /// Property: acceptance matches the `+` + 11 digits shape exactly
    #[test]
    fn phone_validation_matches_shape(phone in "\\+?[0-9 a-z-]{0,14}") {
        prop_assert_eq!(validate_phone(&phone), is_valid_phone_shape(&phone));
    }

    /// Property: wrong digit counts are rejected
    #[test]
    fn wrong_length_phones_rejected(digits in "[0-9]{0,20}") {
        prop_assume!(digits.len() != 11);
        let phone = format!("+{}", digits);
        prop_assert!(!validate_phone(&phone));
    }

    /// Property: spaced codes are accepted and submitted without spaces
    #[test]
    fn spaced_codes_normalized(digits in prop::collection::vec(0u8..10, 5)) {
        let spaced = digits.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(" ");
        let expected: String = digits.iter().map(|d| d.to_string()).collect();
        prop_assert_eq!(normalize_code(&spaced), Some(expected));
    }

    /// Property: anything else is rejected
    #[test]
    fn other_code_shapes_rejected(code in "[0-9 x]{0,12}") {
        let b = code.as_bytes();
        let well_formed = b.len() == 9
            && b.iter().enumerate().all(|(i, c)| if i % 2 == 0 { c.is_ascii_digit() } else { *c == b' ' });
        prop_assert_eq!(normalize_code(&code).is_some(), well_formed);
    }

    /// Property: malformed phones never reach the transport
    #[test]
    fn malformed_phone_not_requested(phone in "[0-9a-z+ ]{0,16}") {
        prop_assume!(!is_valid_phone_shape(&phone));

        let factory = MockProtocolFactory::new();
        let registry = SessionRegistry::new(
            factory.clone(),
            PreferenceStore::new(Arc::new(MemoryDocumentStore::new())),
        );
        let auth = AuthOrchestrator::new(
            Arc::new(registry),
            ApiCredentials { api_id: 1, api_hash: "h".to_string() },
            None,
            Timeouts::default(),
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(auth.request_code(UserId(1), &phone));

        prop_assert_eq!(result, Err(AuthError::InvalidPhone));
        prop_assert!(factory.client(UserId(1)).code_requests().is_empty());
    }
}
