//! In-memory merchant and payment registry
//!
//! Three maps: merchants by address, payments by tx hash, and a skill
//! index from tag to offering merchants. All keys are canonical
//! lowercase addresses. The registry is purely in-memory and logically
//! single-threaded: every mutation goes through the clearing core's
//! writer lock, so methods take `&mut self` and assume exclusivity.
//!
//! Registry state is always a consequence of an already-committed
//! on-ledger mutation; a violation of the coupling invariants here is a
//! programmer error and aborts the process.

use std::collections::{BTreeSet, HashMap};

use aegis_types::{Address, Amount, Merchant, Payment, PaymentStatus, TxHash};

/// The clearinghouse's in-memory tables
#[derive(Default)]
pub struct Registry {
    merchants: HashMap<Address, Merchant>,
    payments: HashMap<TxHash, Payment>,
    skill_index: HashMap<String, BTreeSet<Address>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merchant(&self, address: &Address) -> Option<&Merchant> {
        self.merchants.get(address)
    }

    pub fn payment(&self, tx_hash: &TxHash) -> Option<&Payment> {
        self.payments.get(tx_hash)
    }

    pub fn contains_payment(&self, tx_hash: &TxHash) -> bool {
        self.payments.contains_key(tx_hash)
    }

    pub fn merchants(&self) -> impl Iterator<Item = &Merchant> {
        self.merchants.values()
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    pub fn merchant_count(&self) -> usize {
        self.merchants.len()
    }

    /// Merchants offering `skill`, in address order
    pub fn skill_candidates(&self, skill: &str) -> Vec<Address> {
        self.skill_index
            .get(skill)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or overwrite a merchant and index its skills
    pub fn upsert_merchant(&mut self, merchant: Merchant) {
        let address = merchant.address.clone();

        // Drop index entries for skills the merchant no longer offers.
        if let Some(previous) = self.merchants.get(&address) {
            for skill in previous.skills.difference(&merchant.skills) {
                if let Some(set) = self.skill_index.get_mut(skill) {
                    set.remove(&address);
                    if set.is_empty() {
                        self.skill_index.remove(skill);
                    }
                }
            }
        }

        if merchant.active {
            for skill in &merchant.skills {
                self.skill_index
                    .entry(skill.clone())
                    .or_default()
                    .insert(address.clone());
            }
        }

        self.merchants.insert(address, merchant);
    }

    /// Record a new pending payment and add its amount to the merchant's
    /// exposure. The caller has already committed the matching on-ledger
    /// `record_payment`.
    pub fn record_pending(&mut self, payment: Payment) {
        assert!(
            !self.payments.contains_key(&payment.tx_hash),
            "duplicate payment insert for {}",
            payment.tx_hash
        );
        assert_eq!(payment.status, PaymentStatus::Pending);

        let merchant = self
            .merchants
            .get_mut(&payment.merchant)
            .unwrap_or_else(|| panic!("payment recorded for unknown merchant {}", payment.merchant));
        merchant.exposure = merchant
            .exposure
            .checked_add(payment.amount)
            .expect("merchant exposure overflow");

        self.payments.insert(payment.tx_hash.clone(), payment);
    }

    /// Move a pending payment into a terminal state and release its
    /// exposure; a slash additionally burns the merchant's stake. The
    /// caller has already committed the matching on-ledger mutation.
    pub fn finish_payment(&mut self, tx_hash: &TxHash, status: PaymentStatus) -> &Payment {
        assert!(status.is_terminal(), "finish_payment needs a terminal status");

        let payment = self
            .payments
            .get_mut(tx_hash)
            .unwrap_or_else(|| panic!("finishing unknown payment {tx_hash}"));
        assert_eq!(
            payment.status,
            PaymentStatus::Pending,
            "payment {tx_hash} already terminal"
        );
        payment.status = status;

        let merchant = self
            .merchants
            .get_mut(&payment.merchant)
            .unwrap_or_else(|| panic!("payment {tx_hash} references unknown merchant"));
        merchant.exposure = merchant
            .exposure
            .checked_sub(payment.amount)
            .expect("merchant exposure underflow");
        if status == PaymentStatus::Slashed {
            merchant.stake = merchant
                .stake
                .checked_sub(payment.amount)
                .expect("merchant stake underflow");
        }

        payment
    }

    /// Assert the coupling invariants between merchants, payments and
    /// the skill index. Called from tests after every transition.
    pub fn check_invariants(&self) {
        for merchant in self.merchants.values() {
            assert!(
                merchant.exposure <= merchant.credit_limit,
                "exposure {} exceeds credit limit {} for {}",
                merchant.exposure,
                merchant.credit_limit,
                merchant.address
            );

            let pending: Amount = self
                .payments
                .values()
                .filter(|p| p.merchant == merchant.address && p.status == PaymentStatus::Pending)
                .map(|p| p.amount)
                .sum();
            assert_eq!(
                merchant.exposure, pending,
                "exposure mismatch for {}",
                merchant.address
            );

            for skill in &merchant.skills {
                assert_eq!(
                    self.skill_index
                        .get(skill)
                        .map(|set| set.contains(&merchant.address))
                        .unwrap_or(false),
                    merchant.active,
                    "skill index out of sync for {} / {}",
                    merchant.address,
                    skill
                );
            }
        }

        for (skill, set) in &self.skill_index {
            for address in set {
                let merchant = self
                    .merchants
                    .get(address)
                    .unwrap_or_else(|| panic!("skill index references unknown merchant {address}"));
                assert!(
                    merchant.active && merchant.skills.contains(skill),
                    "stale skill index entry {address} / {skill}"
                );
            }
        }
    }
}
