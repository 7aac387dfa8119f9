use waypost_domain::wire::{ContractResponseDto, PolicyResponseDto};
use waypost_domain::{MetricContract, Policy};

/// Serves the process-wide reporting policy and metric contract.
///
/// Both documents are loaded from configuration at startup; their content
/// hashes double as cache-validation tokens so an unchanged policy costs a
/// device one conditional request, not a payload.
pub struct PolicyService {
    policy: Policy,
    policy_token: String,
    contract: MetricContract,
    contract_hash: String,
    refresh_after_s: u64,
}

impl PolicyService {
    pub fn new(policy: Policy, contract: MetricContract, refresh_after_s: u64) -> Self {
        let policy_token = policy.content_hash();
        let contract_hash = contract.content_hash();
        Self {
            policy,
            policy_token,
            contract,
            contract_hash,
            refresh_after_s,
        }
    }

    pub fn policy_token(&self) -> &str {
        &self.policy_token
    }

    pub fn refresh_after_s(&self) -> u64 {
        self.refresh_after_s
    }

    pub fn contract(&self) -> &MetricContract {
        &self.contract
    }

    pub fn policy_response(&self) -> PolicyResponseDto {
        PolicyResponseDto {
            policy: self.policy.clone(),
            token: self.policy_token.clone(),
            refresh_after_s: self.refresh_after_s,
        }
    }

    pub fn contract_response(&self) -> ContractResponseDto {
        ContractResponseDto {
            version: self.contract.version,
            hash: self.contract_hash.clone(),
            keys: self.contract.keys.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use waypost_domain::MetricType;

    fn service() -> PolicyService {
        let mut keys = BTreeMap::new();
        keys.insert("temp_c".to_string(), MetricType::Number);
        PolicyService::new(
            Policy::conservative_default(),
            MetricContract { version: 2, keys },
            300,
        )
    }

    #[test]
    fn test_policy_token_is_content_hash() {
        let service = service();
        assert_eq!(
            service.policy_token(),
            Policy::conservative_default().content_hash()
        );
        assert_eq!(service.policy_response().token, service.policy_token());
    }

    #[test]
    fn test_contract_response_carries_hash_and_keys() {
        let service = service();
        let response = service.contract_response();
        assert_eq!(response.version, 2);
        assert_eq!(response.hash, service.contract().content_hash());
        assert!(response.keys.contains_key("temp_c"));
    }
}
