//! Option Chain Subscription
//!
//! Resolves the instrument keys of one underlying's option chain and builds
//! the single `OPTION/SUBS` request sent right after login.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::session::{SessionContext, SessionError};

/// Service tag for option level-one data.
pub const OPTION_SERVICE: &str = "OPTION";

/// Command for a subscription request.
pub const SUBS_COMMAND: &str = "SUBS";

/// Request id of the subscription request.
pub const SUBS_REQUEST_ID: &str = "1";

/// Field mask requested for every contract.
pub const OPTION_FIELDS: &str = "0,1,2,3,4,5,6,7,8,9";

// =============================================================================
// Instrument Key
// =============================================================================

/// Brokerage identifier of one options contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentKey(String);

impl InstrumentKey {
    /// Wrap a raw contract identifier.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Option Chain (discovery response)
// =============================================================================

/// Contract descriptors keyed by expiration group, then by price level.
pub type ExpirationMap = BTreeMap<String, BTreeMap<String, Vec<ContractDescriptor>>>;

/// Option chain as returned by the instrument-discovery endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChain {
    /// Put contracts.
    #[serde(default)]
    pub put_exp_date_map: ExpirationMap,
    /// Call contracts.
    #[serde(default)]
    pub call_exp_date_map: ExpirationMap,
}

/// One contract at a price level. Only the identifier is kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContractDescriptor {
    /// Contract identifier.
    pub symbol: String,
}

/// Collect one instrument key per price level, puts first, then calls.
///
/// Only the first descriptor listed at a price level is used.
#[must_use]
pub fn collect_instrument_keys(chain: &OptionChain) -> Vec<InstrumentKey> {
    let mut keys = first_per_price_level(&chain.put_exp_date_map);
    keys.extend(first_per_price_level(&chain.call_exp_date_map));
    keys
}

fn first_per_price_level(map: &ExpirationMap) -> Vec<InstrumentKey> {
    map.iter()
        .flat_map(|(expiration, levels)| {
            levels.iter().filter_map(move |(price, contracts)| {
                let first = contracts.first();
                if first.is_none() {
                    tracing::debug!(expiration, price, "Price level lists no contracts");
                }
                first.map(|c| InstrumentKey::new(c.symbol.clone()))
            })
        })
        .collect()
}

// =============================================================================
// Subscription Request
// =============================================================================

/// `OPTION/SUBS` request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    requests: [SubscriptionEntry; 1],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SubscriptionEntry {
    service: &'static str,
    requestid: &'static str,
    command: &'static str,
    account: String,
    source: String,
    parameters: SubscriptionParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct SubscriptionParameters {
    keys: String,
    fields: &'static str,
}

impl SubscriptionRequest {
    /// Build a subscription for the given contracts.
    ///
    /// An empty key list is valid; the streamer simply matches nothing.
    #[must_use]
    pub fn new(session: &SessionContext, keys: &[InstrumentKey]) -> Self {
        let joined = keys
            .iter()
            .map(InstrumentKey::as_str)
            .collect::<Vec<_>>()
            .join(",");

        Self {
            requests: [SubscriptionEntry {
                service: OPTION_SERVICE,
                requestid: SUBS_REQUEST_ID,
                command: SUBS_COMMAND,
                account: session.account_id().to_string(),
                source: session.app_id().to_string(),
                parameters: SubscriptionParameters {
                    keys: joined,
                    fields: OPTION_FIELDS,
                },
            }],
        }
    }

    /// Comma-joined instrument keys.
    #[must_use]
    pub fn keys(&self) -> &str {
        &self.requests[0].parameters.keys
    }

    /// Number of instrument keys in the request.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let keys = self.keys();
        if keys.is_empty() {
            0
        } else {
            keys.split(',').count()
        }
    }

    /// Serialize the request to the text frame sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_frame(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::tests::sample_principals;
    use proptest::prelude::*;

    fn chain(value: serde_json::Value) -> OptionChain {
        serde_json::from_value(value).unwrap()
    }

    fn session() -> SessionContext {
        SessionContext::from_principals(&sample_principals()).unwrap()
    }

    #[test]
    fn first_contract_per_price_level_puts_then_calls() {
        let chain = chain(serde_json::json!({
            "symbol": "NVDA",
            "putExpDateMap": {
                "2021-02-05:7": {
                    "500.0": [{"symbol": "NVDA_020521P500"}, {"symbol": "NVDA_DUP"}],
                    "510.0": [{"symbol": "NVDA_020521P510"}]
                }
            },
            "callExpDateMap": {
                "2021-02-05:7": {
                    "500.0": [{"symbol": "NVDA_020521C500"}]
                }
            }
        }));

        let keys = collect_instrument_keys(&chain);
        assert_eq!(
            keys,
            vec![
                InstrumentKey::new("NVDA_020521P500"),
                InstrumentKey::new("NVDA_020521P510"),
                InstrumentKey::new("NVDA_020521C500"),
            ]
        );
    }

    #[test]
    fn empty_chain_yields_no_keys() {
        let chain = chain(serde_json::json!({"putExpDateMap": {}, "callExpDateMap": {}}));
        assert!(collect_instrument_keys(&chain).is_empty());
        assert!(collect_instrument_keys(&OptionChain::default()).is_empty());
    }

    #[test]
    fn empty_price_level_is_skipped() {
        let chain = chain(serde_json::json!({
            "putExpDateMap": {"2021-02-05:7": {"500.0": []}},
            "callExpDateMap": {"2021-02-05:7": {"500.0": [{"symbol": "C"}]}}
        }));
        assert_eq!(collect_instrument_keys(&chain), vec![InstrumentKey::new("C")]);
    }

    #[test]
    fn subscription_frame_shape() {
        let keys = vec![InstrumentKey::new("P1"), InstrumentKey::new("C1")];
        let request = SubscriptionRequest::new(&session(), &keys);
        assert_eq!(request.key_count(), 2);

        let value: serde_json::Value =
            serde_json::from_str(&request.to_frame().unwrap()).unwrap();
        let entry = &value["requests"][0];
        assert_eq!(entry["service"], "OPTION");
        assert_eq!(entry["requestid"], "1");
        assert_eq!(entry["command"], "SUBS");
        assert_eq!(entry["account"], "123456789");
        assert_eq!(entry["source"], "APP01");
        assert_eq!(entry["parameters"]["keys"], "P1,C1");
        assert_eq!(entry["parameters"]["fields"], "0,1,2,3,4,5,6,7,8,9");
    }

    #[test]
    fn empty_subscription_is_valid() {
        let request = SubscriptionRequest::new(&session(), &[]);
        assert_eq!(request.keys(), "");
        assert_eq!(request.key_count(), 0);
        assert!(request.to_frame().is_ok());
    }

    fn expiration_map() -> impl Strategy<Value = ExpirationMap> {
        let level = prop::collection::vec("[A-Z]{1,6}", 1..4)
            .prop_map(|symbols| {
                symbols
                    .into_iter()
                    .map(|symbol| ContractDescriptor { symbol })
                    .collect::<Vec<_>>()
            });
        let levels = prop::collection::btree_map("[0-9]{1,4}\\.0", level, 0..6);
        prop::collection::btree_map("2021-0[1-9]-1[0-9]:[0-9]", levels, 0..4)
    }

    proptest! {
        #[test]
        fn one_key_per_price_level(puts in expiration_map(), calls in expiration_map()) {
            let expected: usize = puts.values().chain(calls.values()).map(BTreeMap::len).sum();
            let chain = OptionChain { put_exp_date_map: puts, call_exp_date_map: calls };
            prop_assert_eq!(collect_instrument_keys(&chain).len(), expected);
        }
    }
}
