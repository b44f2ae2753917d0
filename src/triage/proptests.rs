//! Property-based tests for triage
//!
//! Tests for:
//! - Keyword gating: the oracle is never consulted for non-matching text
//! - Matching text anywhere in a message reaches the oracle exactly once
//! - Nothing is forwarded without approval

use super::filter::KeywordFilter;
use super::mock::{ScriptedClassifier, Verdict};
use super::relay::{RelayLedger, RelayOutcome, TriageRelay};
use crate::protocol::mock::MockProtocolClient;
use crate::protocol::retry::Timeouts;
use crate::protocol::traits::{Destination, InboundMessage, Peer};
use proptest::prelude::*;
use std::sync::Arc;

/// Mixed-case Latin and Cyrillic text that can never spell a keyword:
/// no `s`/`S` and no `с`/`С`
const NON_MATCHING: &str = "[0-9a-eA-Eа-рт-яА-РТ-ЯёЁ ,.!?]{0,80}";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn relay(classifier: &ScriptedClassifier) -> TriageRelay {
    TriageRelay::new(
        KeywordFilter::default(),
        Arc::new(classifier.clone()),
        Destination("@dest".to_string()),
        Arc::new(RelayLedger::default()),
        Timeouts::default(),
    )
}

fn group_message(text: String) -> InboundMessage {
    InboundMessage {
        id: 1,
        peer: Peer::Group(10),
        sender: Some(20),
        text: Some(text),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the oracle is never called for text failing the filter
    #[test]
    fn oracle_not_called_for_non_matching_text(
        texts in prop::collection::vec(NON_MATCHING, 1..20),
    ) {
        let classifier = ScriptedClassifier::new(Verdict::Approve);
        let relay = relay(&classifier);
        let client = MockProtocolClient::new();

        let outcomes: Vec<RelayOutcome> = runtime().block_on(async {
            let mut outcomes = Vec::new();
            for text in texts {
                outcomes.push(relay.handle_message(&client, &group_message(text)).await);
            }
            outcomes
        });

        prop_assert_eq!(classifier.call_count(), 0);
        prop_assert!(client.forwarded().is_empty());
        prop_assert!(outcomes
            .iter()
            .all(|o| matches!(o, RelayOutcome::FilteredOut | RelayOutcome::SkippedNoText)));
    }

    /// Property: the filter itself rejects mixed-case Cyrillic noise
    #[test]
    fn filter_rejects_mixed_case_noise(text in NON_MATCHING) {
        prop_assert!(!KeywordFilter::default().matches(&text));
        prop_assert!(!KeywordFilter::default().matches(&text.to_uppercase()));
    }

    /// Property: a keyword anywhere in the text reaches the oracle once
    #[test]
    fn keyword_anywhere_reaches_oracle(
        prefix in "[a-eA-Eа-рА-Р ]{0,30}",
        suffix in "[a-eA-Eа-рА-Р ]{0,30}",
        keyword in prop::sample::select(vec!["серф", "СЁРФ", "Surf"]),
    ) {
        let classifier = ScriptedClassifier::new(Verdict::Approve);
        let relay = relay(&classifier);
        let client = MockProtocolClient::new();
        let text = format!("{}{}{}", prefix, keyword, suffix);

        let outcome = runtime().block_on(relay.handle_message(&client, &group_message(text.clone())));

        prop_assert_eq!(outcome, RelayOutcome::Forwarded);
        prop_assert_eq!(classifier.calls(), vec![text]);
        prop_assert_eq!(client.forwarded().len(), 1);
    }

    /// Property: without approval nothing is forwarded
    #[test]
    fn no_forward_without_approval(
        body in "[a-e ]{0,40}",
        fail in any::<bool>(),
    ) {
        let verdict = if fail { Verdict::Fail } else { Verdict::Reject };
        let classifier = ScriptedClassifier::new(verdict);
        let relay = relay(&classifier);
        let client = MockProtocolClient::new();

        runtime().block_on(relay.handle_message(&client, &group_message(format!("surf {}", body))));

        prop_assert_eq!(classifier.call_count(), 1);
        prop_assert!(client.forwarded().is_empty());
    }
}
