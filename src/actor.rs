//! Acting party abstraction
//!
//! Users and corporate operators share one capability contract. Use cases
//! only ever talk to `dyn Actor`; nothing downstream branches on the
//! concrete type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ActorId, BalanceId, CorporateId};
use crate::error::LedgerError;
use crate::ledger::Balance;

/// Actor type, also the fee-schedule branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ActorKind {
    User = 1,
    Corporate = 2,
}

impl ActorKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ActorKind::User),
            2 => Some(ActorKind::Corporate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::User => "USER",
            ActorKind::Corporate => "CORPORATE",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of party on either side of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyType {
    User,
    Corporate,
    Bank,
    Biller,
    Card,
    Merchant,
}

impl From<ActorKind> for PartyType {
    fn from(kind: ActorKind) -> Self {
        match kind {
            ActorKind::User => PartyType::User,
            ActorKind::Corporate => PartyType::Corporate,
        }
    }
}

/// Denormalized party details kept on the transaction so history survives
/// later changes to the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub party_type: PartyType,
    pub institution: String,
    pub name: String,
    pub account: String,
}

impl ActorSnapshot {
    pub fn new(
        party_type: PartyType,
        institution: impl Into<String>,
        name: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            party_type,
            institution: institution.into(),
            name: name.into(),
            account: account.into(),
        }
    }

    /// Snapshot of a wallet balance's owner
    pub fn of_balance(party_type: PartyType, name: &str, balance: &Balance) -> Self {
        let account = balance
            .account_numbers
            .first()
            .cloned()
            .unwrap_or_else(|| balance.id.to_string());
        Self::new(party_type, balance.corporate_id.as_str(), name, account)
    }
}

/// Secret presented with a request. Opaque to the ledger; only the
/// [`CredentialVerifier`] interprets it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Credential {
    /// Encrypted PIN block
    Pin(String),
    /// Biometric assertion token
    Biometric(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Pin(_) => f.write_str("Pin(***)"),
            Credential::Biometric(_) => f.write_str("Biometric(***)"),
        }
    }
}

/// Capability set of whoever is moving money.
pub trait Actor: Send + Sync {
    fn id(&self) -> &ActorId;
    fn kind(&self) -> ActorKind;
    fn corporate_id(&self) -> &CorporateId;
    fn display_name(&self) -> &str;
    fn is_verified(&self) -> bool;
    /// Whether this actor may debit `balance`
    fn can_access_balance(&self, balance: &Balance) -> bool;
    /// Party snapshot for a transaction touching `balance`
    fn snapshot(&self, balance: &Balance) -> ActorSnapshot;
}

/// Decrypts and checks credentials. Provided by the authentication service.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, actor: &dyn Actor, credential: &Credential)
    -> Result<bool, LedgerError>;
}

/// Accepts one fixed PIN. Sandbox runs only.
#[derive(Debug, Clone)]
pub struct StaticPinVerifier {
    pin: String,
}

impl StaticPinVerifier {
    pub fn new(pin: impl Into<String>) -> Self {
        Self { pin: pin.into() }
    }
}

#[async_trait]
impl CredentialVerifier for StaticPinVerifier {
    async fn verify(&self, _actor: &dyn Actor, credential: &Credential) -> Result<bool, LedgerError> {
        Ok(match credential {
            Credential::Pin(pin) => *pin == self.pin,
            Credential::Biometric(token) => token == "ok",
        })
    }
}

/// Rejects every credential. For processes that only run background tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllVerifier;

#[async_trait]
impl CredentialVerifier for DenyAllVerifier {
    async fn verify(&self, _actor: &dyn Actor, _credential: &Credential) -> Result<bool, LedgerError> {
        Ok(false)
    }
}

/// End user owning one wallet balance
#[derive(Debug, Clone)]
pub struct UserActor {
    pub id: ActorId,
    pub corporate_id: CorporateId,
    pub name: String,
    pub verified: bool,
    /// Shared balances the user was granted on top of their own
    pub granted_balances: Vec<BalanceId>,
}

impl Actor for UserActor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn kind(&self) -> ActorKind {
        ActorKind::User
    }

    fn corporate_id(&self) -> &CorporateId {
        &self.corporate_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_verified(&self) -> bool {
        self.verified
    }

    fn can_access_balance(&self, balance: &Balance) -> bool {
        if balance.corporate_id != self.corporate_id {
            return false;
        }
        (balance.owner_type == ActorKind::User && balance.owner_id == self.id)
            || self.granted_balances.contains(&balance.id)
    }

    fn snapshot(&self, balance: &Balance) -> ActorSnapshot {
        ActorSnapshot::of_balance(PartyType::User, &self.name, balance)
    }
}

/// Operator acting on behalf of a corporate
#[derive(Debug, Clone)]
pub struct CorporateActor {
    pub id: ActorId,
    pub corporate_id: CorporateId,
    pub name: String,
    pub verified: bool,
    /// Operator may use every balance of the corporate
    pub full_access: bool,
    pub granted_balances: Vec<BalanceId>,
}

impl Actor for CorporateActor {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn kind(&self) -> ActorKind {
        ActorKind::Corporate
    }

    fn corporate_id(&self) -> &CorporateId {
        &self.corporate_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_verified(&self) -> bool {
        self.verified
    }

    fn can_access_balance(&self, balance: &Balance) -> bool {
        balance.corporate_id == self.corporate_id
            && (self.full_access || self.granted_balances.contains(&balance.id))
    }

    fn snapshot(&self, balance: &Balance) -> ActorSnapshot {
        ActorSnapshot::of_balance(PartyType::Corporate, &self.name, balance)
    }
}
