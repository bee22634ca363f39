//! One-time provider registration on the Zap Registry contract.
//!
//! If `getProviderTitle(provider)` is empty: `initiateProvider`, `setEndpointParams` (when
//! params are configured) and one `initiateProviderCurve` per registry entry, in that order.

use crate::abi::{
    get_provider_title_calldata, initiate_provider_calldata, initiate_provider_curve_calldata,
    set_endpoint_params_calldata, utf8_to_bytes32, bytes32_to_utf8,
};
use crate::registry::ResolverRegistry;
use crate::submitter::Transactor;
use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};

/// Provider identity as registered on-chain.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub title: String,
    pub public_key: U256,
    /// Endpoint the `endpoint_params` apply to.
    pub endpoint: String,
    pub endpoint_params: Vec<String>,
}

/// One registration transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStep {
    pub label: String,
    pub calldata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    AlreadyRegistered { title: String },
    Registered { transactions: Vec<B256> },
}

/// Registration transactions for `provider` and every endpoint in `registry`.
pub fn registration_plan(provider: &ProviderInfo, registry: &ResolverRegistry) -> Result<Vec<RegistrationStep>> {
    let title = utf8_to_bytes32(&provider.title).context("provider title")?;
    let mut steps = vec![RegistrationStep {
        label: format!("initiateProvider({})", provider.title),
        calldata: initiate_provider_calldata(&provider.public_key, &title),
    }];
    if !provider.endpoint_params.is_empty() {
        let endpoint = utf8_to_bytes32(&provider.endpoint).context("provider endpoint")?;
        let params = provider
            .endpoint_params
            .iter()
            .map(|p| utf8_to_bytes32(p))
            .collect::<Result<Vec<_>>>()
            .context("endpoint params")?;
        steps.push(RegistrationStep {
            label: format!("setEndpointParams({})", provider.endpoint),
            calldata: set_endpoint_params_calldata(&endpoint, &params),
        });
    }
    for entry in registry.entries() {
        let endpoint = utf8_to_bytes32(entry.endpoint())?;
        steps.push(RegistrationStep {
            label: format!("initiateProviderCurve({})", entry.endpoint()),
            calldata: initiate_provider_curve_calldata(&endpoint, entry.curve().terms(), &Address::ZERO),
        });
    }
    Ok(steps)
}

/// Register the provider unless it already has a title on-chain.
pub async fn ensure_registered(
    transactor: &Transactor,
    registry_address: &Address,
    provider: &ProviderInfo,
    registry: &ResolverRegistry,
) -> Result<RegistrationOutcome> {
    let owner = transactor.address();
    let ret = transactor
        .rpc()
        .call(registry_address, &get_provider_title_calldata(&owner))
        .await
        .context("getProviderTitle")?;
    let word = ret
        .get(..32)
        .ok_or_else(|| anyhow::anyhow!("getProviderTitle returned {} bytes", ret.len()))?;
    let existing = bytes32_to_utf8(word)?;
    if !existing.is_empty() {
        tracing::info!(title = %existing, provider = %owner, "oracle exists");
        return Ok(RegistrationOutcome::AlreadyRegistered { title: existing });
    }

    tracing::info!(title = %provider.title, provider = %owner, "initializing provider");
    let mut transactions = Vec::new();
    for step in registration_plan(provider, registry)? {
        let tx_hash = transactor
            .send(registry_address, step.calldata)
            .await
            .with_context(|| step.label.clone())?;
        tracing::info!(step = %step.label, %tx_hash, "registration transaction sent");
        transactions.push(tx_hash);
    }
    Ok(RegistrationOutcome::Registered { transactions })
}
