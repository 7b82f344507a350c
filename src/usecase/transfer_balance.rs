use serde::{Deserialize, Serialize};
use validator::Validate;

use super::TransactionService;
use super::validation::{AmountLimits, check_currency};
use crate::actor::{Actor, ActorSnapshot, Credential, PartyType};
use crate::core_types::{Amount, BalanceId};
use crate::error::LedgerError;
use crate::ledger::{Statement, StatementType};
use crate::transaction::{Transaction, TransactionMethod, TransactionType};

/// Wallet to wallet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferBalanceRequest {
    pub source_balance_id: BalanceId,
    pub destination_balance_id: BalanceId,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    #[serde(default)]
    pub description: String,
    pub credential: Credential,
}

/// Payment to a merchant balance resolved from a scanned QR code
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PayQrRequest {
    pub source_balance_id: BalanceId,
    pub merchant_balance_id: BalanceId,
    #[validate(length(min = 1))]
    pub merchant_name: String,
    /// Reference printed in the QR payload
    #[serde(default)]
    pub qr_reference: String,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    pub credential: Credential,
}

/// Cash pickup at a partner outlet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferCashRequest {
    pub source_balance_id: BalanceId,
    #[validate(length(min = 1))]
    pub outlet: String,
    #[validate(length(min = 1))]
    pub recipient_name: String,
    #[serde(default)]
    pub recipient_phone: String,
    #[validate(range(min = 1))]
    pub amount: Amount,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    #[serde(default)]
    pub description: String,
    pub credential: Credential,
}

/// Balance-to-balance movement shared by wallet transfers and QR payments
struct InternalTransfer<'a> {
    transaction_type: TransactionType,
    method: TransactionMethod,
    limits: AmountLimits,
    source_balance_id: &'a BalanceId,
    destination_balance_id: &'a BalanceId,
    /// Overrides the destination snapshot's display name
    destination_name: Option<&'a str>,
    amount: Amount,
    external_id: &'a str,
    description: String,
    credential: &'a Credential,
}

impl TransactionService {
    pub async fn transfer_balance(
        &self,
        actor: &dyn Actor,
        req: TransferBalanceRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let description = if req.description.is_empty() {
            "Transfer".to_string()
        } else {
            req.description.clone()
        };
        self.internal_transfer(
            actor,
            InternalTransfer {
                transaction_type: TransactionType::TransferToWallet,
                method: TransactionMethod::Balance,
                limits: self.limits.transfer_balance,
                source_balance_id: &req.source_balance_id,
                destination_balance_id: &req.destination_balance_id,
                destination_name: None,
                amount: req.amount,
                external_id: &req.external_id,
                description,
                credential: &req.credential,
            },
        )
        .await
    }

    pub async fn pay_qr(
        &self,
        actor: &dyn Actor,
        req: PayQrRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let description = if req.qr_reference.is_empty() {
            format!("QR payment to {}", req.merchant_name)
        } else {
            format!("QR payment to {} ({})", req.merchant_name, req.qr_reference)
        };
        self.internal_transfer(
            actor,
            InternalTransfer {
                transaction_type: TransactionType::PayQr,
                method: TransactionMethod::Qr,
                limits: self.limits.pay_qr,
                source_balance_id: &req.source_balance_id,
                destination_balance_id: &req.merchant_balance_id,
                destination_name: Some(&req.merchant_name),
                amount: req.amount,
                external_id: &req.external_id,
                description,
                credential: &req.credential,
            },
        )
        .await
    }

    async fn internal_transfer(
        &self,
        actor: &dyn Actor,
        op: InternalTransfer<'_>,
    ) -> Result<Transaction, LedgerError> {
        if op.source_balance_id == op.destination_balance_id {
            return Err(LedgerError::SameBalance);
        }
        let source = self
            .authorized_balance(actor, Some(op.credential), op.source_balance_id)
            .await?;
        if let Some(existing) = self
            .existing(&source.corporate_id, &source.id, op.transaction_type, op.external_id)
            .await?
        {
            if existing.destination_balance_id.as_ref() != Some(op.destination_balance_id) {
                return Err(LedgerError::DuplicateRequest(format!(
                    "external id {} is already used",
                    op.external_id
                )));
            }
            return Ok(existing);
        }
        op.limits.check(op.amount)?;
        let destination = self.load_balance(op.destination_balance_id).await?;
        check_currency(&source, &destination)?;

        let mut destination_party = ActorSnapshot::of_balance(
            destination.owner_type.into(),
            &destination.name,
            &destination,
        );
        if let Some(name) = op.destination_name {
            destination_party.party_type = PartyType::Merchant;
            destination_party.name = name.to_string();
        }

        let mut transaction = Transaction::new(
            op.transaction_type,
            op.method,
            source.corporate_id.clone(),
            actor.snapshot(&source),
            destination_party,
            source.currency.clone(),
            op.external_id,
        );
        transaction.source_balance_id = Some(source.id.clone());
        transaction.destination_balance_id = Some(destination.id.clone());
        transaction.sub_amount = op.amount;
        transaction.description = op.description;

        let primary = Statement::transfer_pair(
            source.id.clone(),
            destination.id.clone(),
            transaction.sub_amount,
            transaction.code.clone(),
            &transaction.description,
            StatementType::Transaction,
            transaction.created_at,
        )
        .to_vec();
        let transaction = self.charge(actor.kind(), transaction, primary).await?;
        self.settled(&transaction);
        Ok(transaction)
    }

    /// Withdraw for cash pickup. The outlet pays out; the ledger only debits.
    pub async fn transfer_cash(
        &self,
        actor: &dyn Actor,
        req: TransferCashRequest,
    ) -> Result<Transaction, LedgerError> {
        req.validate()?;
        let source = self
            .authorized_balance(actor, Some(&req.credential), &req.source_balance_id)
            .await?;
        if let Some(existing) = self
            .existing(
                &source.corporate_id,
                &source.id,
                TransactionType::TransferToCash,
                &req.external_id,
            )
            .await?
        {
            return Ok(existing);
        }
        self.limits.transfer_cash.check(req.amount)?;

        let mut transaction = Transaction::new(
            TransactionType::TransferToCash,
            TransactionMethod::Manual,
            source.corporate_id.clone(),
            actor.snapshot(&source),
            ActorSnapshot::new(
                PartyType::Merchant,
                req.outlet.as_str(),
                req.recipient_name.as_str(),
                req.recipient_phone.as_str(),
            ),
            source.currency.clone(),
            req.external_id.clone(),
        );
        transaction.source_balance_id = Some(source.id.clone());
        transaction.sub_amount = req.amount;
        transaction.description = if req.description.is_empty() {
            format!("Cash pickup at {}", req.outlet)
        } else {
            req.description.clone()
        };

        let primary = vec![Statement::withdraw(
            source.id.clone(),
            transaction.sub_amount,
            transaction.code.clone(),
            transaction.description.as_str(),
            StatementType::Transaction,
            transaction.created_at,
        )];
        let transaction = self.charge(actor.kind(), transaction, primary).await?;
        self.settled(&transaction);
        Ok(transaction)
    }
}
