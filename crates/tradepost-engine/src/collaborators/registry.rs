use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tradepost_types::{Address, MarketError, Result, TokenId};

use super::TokenRegistry;

/// In-process token registry with per-token and operator-wide approvals.
///
/// Mirrors the usual NFT approval rules: a per-token approval is cleared
/// on transfer, an operator approval survives it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryTokenRegistry {
    owners: BTreeMap<TokenId, Address>,
    token_approvals: HashMap<TokenId, Address>,
    operator_approvals: BTreeSet<(Address, Address)>,
    /// Tokens whose transfers are refused (locked or under dispute).
    frozen: BTreeSet<TokenId>,
}

impl InMemoryTokenRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `token_id` owned by `owner`.
    ///
    /// # Errors
    /// Returns `TokenTransferFailed` if the token already exists.
    pub fn mint(&mut self, token_id: TokenId, owner: Address) -> Result<()> {
        if self.owners.contains_key(&token_id) {
            return Err(MarketError::TokenTransferFailed {
                token: token_id,
                reason: "already minted".into(),
            });
        }
        self.owners.insert(token_id, owner);
        Ok(())
    }

    /// Approve `operator` for one token. Only the owner may approve.
    ///
    /// # Errors
    /// Returns `NotTokenOwner` if `owner` does not hold the token.
    pub fn approve(&mut self, owner: Address, token_id: TokenId, operator: Address) -> Result<()> {
        if self.owners.get(&token_id) != Some(&owner) {
            return Err(MarketError::NotTokenOwner {
                token: token_id,
                caller: owner,
            });
        }
        self.token_approvals.insert(token_id, operator);
        Ok(())
    }

    /// Grant or revoke `operator` over every token `owner` holds.
    pub fn set_approval_for_all(&mut self, owner: Address, operator: Address, approved: bool) {
        if approved {
            self.operator_approvals.insert((owner, operator));
        } else {
            self.operator_approvals.remove(&(owner, operator));
        }
    }

    /// Refuse (or allow again) transfers of `token_id`.
    pub fn set_frozen(&mut self, token_id: TokenId, frozen: bool) {
        if frozen {
            self.frozen.insert(token_id);
        } else {
            self.frozen.remove(&token_id);
        }
    }

    /// Tokens held by `owner`, in id order.
    #[must_use]
    pub fn tokens_of(&self, owner: Address) -> Vec<TokenId> {
        self.owners
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(t, _)| *t)
            .collect()
    }
}

impl TokenRegistry for InMemoryTokenRegistry {
    fn owner_of(&self, token_id: TokenId) -> Option<Address> {
        self.owners.get(&token_id).copied()
    }

    fn is_approved_for_transfer(&self, token_id: TokenId, operator: Address) -> bool {
        let Some(owner) = self.owners.get(&token_id) else {
            return false;
        };
        self.token_approvals.get(&token_id) == Some(&operator)
            || self.operator_approvals.contains(&(*owner, operator))
    }

    fn transfer(&mut self, token_id: TokenId, from: Address, to: Address) -> Result<()> {
        let refuse = |reason: String| MarketError::TokenTransferFailed {
            token: token_id,
            reason,
        };
        match self.owners.get(&token_id) {
            None => return Err(refuse("unknown token".into())),
            Some(owner) if *owner != from => {
                return Err(refuse(format!("{from} is not the owner")));
            }
            Some(_) => {}
        }
        if self.frozen.contains(&token_id) {
            return Err(refuse("token is frozen".into()));
        }
        self.owners.insert(token_id, to);
        self.token_approvals.remove(&token_id);
        tracing::debug!(token = %token_id, %from, %to, "Token transferred");
        Ok(())
    }
}
