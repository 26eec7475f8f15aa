//! Account lookup.

use std::collections::HashMap;

/// A server account the broker can act as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Account identifier as used in request descriptors
    pub name: String,
    /// Server base URI, e.g. `https://cloud.example.com`
    pub base_uri: String,
}

impl Account {
    pub fn new(name: impl Into<String>, base_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_uri: base_uri.into(),
        }
    }
}

/// Resolves account identifiers to accounts
pub trait AccountResolver: Send + Sync {
    fn account(&self, account_id: &str) -> Option<Account>;
}

/// Fixed set of accounts
#[derive(Debug, Default, Clone)]
pub struct StaticAccounts {
    accounts: HashMap<String, Account>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.insert(account.name.clone(), account);
        self
    }
}

impl AccountResolver for StaticAccounts {
    fn account(&self, account_id: &str) -> Option<Account> {
        self.accounts.get(account_id).cloned()
    }
}

impl FromIterator<Account> for StaticAccounts {
    fn from_iter<I: IntoIterator<Item = Account>>(iter: I) -> Self {
        Self {
            accounts: iter.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }
}
