#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use agrs::{Aggregate, Event, EventDescriptor, HandlerRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalletEvent {
    Created { owner: String },
    Funded { amount: i64 },
    Withdrawn { amount: i64 },
}

impl Event for WalletEvent {
    const DESCRIPTORS: &'static [EventDescriptor] = &[
        EventDescriptor {
            tag: "wallet.created",
            fallbacks: &[],
        },
        EventDescriptor {
            tag: "wallet.funded",
            fallbacks: &["wallet.transaction"],
        },
        EventDescriptor {
            tag: "wallet.withdrawn",
            fallbacks: &["wallet.transaction"],
        },
    ];

    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::Created { .. } => "wallet.created",
            WalletEvent::Funded { .. } => "wallet.funded",
            WalletEvent::Withdrawn { .. } => "wallet.withdrawn",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletState {
    pub owner: String,
    pub balance: i64,
}

pub struct Wallet;

impl Aggregate for Wallet {
    const NAME: &'static str = "wallet";
    type State = WalletState;
    type Event = WalletEvent;

    fn register_handlers(registry: &mut HandlerRegistry<Self>) {
        registry
            .on("wallet.created", |state, event| {
                if let WalletEvent::Created { owner } = event {
                    state.owner = owner.clone();
                }
            })
            .on("wallet.funded", |state, event| {
                if let WalletEvent::Funded { amount } = event {
                    state.balance += amount;
                }
            })
            .on("wallet.withdrawn", |state, event| {
                if let WalletEvent::Withdrawn { amount } = event {
                    state.balance -= amount;
                }
            });
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditState {
    pub transactions: u32,
}

/// Reads the same event union as [`Wallet`], but folds every money movement through the
/// shared `wallet.transaction` fallback tag and ignores everything else.
pub struct WalletAudit;

impl Aggregate for WalletAudit {
    const NAME: &'static str = "wallet_audit";
    type State = AuditState;
    type Event = WalletEvent;

    fn register_handlers(registry: &mut HandlerRegistry<Self>) {
        registry
            .lenient()
            .on("wallet.transaction", |state, _| state.transactions += 1);
    }
}
