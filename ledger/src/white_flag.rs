//! White-Flag traversal.
//!
//! A post-order depth-first walk over the bundles a milestone references,
//! driven by an explicit stack so that deep histories cannot overflow the
//! call stack. A bundle is applied only after everything it references has
//! been applied, trunk side before branch side.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tangle_store::{BundleStore, LedgerStore, MilestoneStore, TransactionStore};
use tangle_types::{Address, Hash, MilestoneIndex, TOTAL_SUPPLY};

use crate::WhiteFlagError;

/// Result of confirming one milestone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WhiteFlagConfirmation {
    /// Tails of the applied bundles, in application order.
    pub tails: Vec<Hash>,
    /// New balance of every address touched by an applied bundle.
    pub new_address_state: BTreeMap<Address, u64>,
}

/// Walk the cone referenced by the milestone whose bundle tail is
/// `milestone_tail` and compute the resulting ledger mutations.
///
/// The walk is seeded with the milestone bundle's tail transaction, not its
/// head: the tail is the first candidate checked, and the head's trunk and
/// branch are the first parents visited.
///
/// Value-less bundles are traversed but leave no trace in the result.
/// Bundles that would drive a balance below zero or above the total supply
/// are conflicting: they are traversed but not applied.
pub fn compute_white_flag_mutations<S>(
    store: &S,
    milestone_index: MilestoneIndex,
    milestone_tail: Hash,
) -> Result<WhiteFlagConfirmation, WhiteFlagError>
where
    S: TransactionStore + BundleStore + LedgerStore + MilestoneStore + ?Sized,
{
    let mut confirmation = WhiteFlagConfirmation::default();
    let mut visited: HashSet<Hash> = HashSet::new();
    let mut stack: VecDeque<Hash> = VecDeque::new();
    stack.push_front(milestone_tail);

    while let Some(&current) = stack.front() {
        ensure_tail(store, &current)?;

        let bundle = store
            .get_bundle_by_tail(&current)?
            .ok_or(WhiteFlagError::MissingBundle(current))?;
        if !bundle.valid {
            return Err(WhiteFlagError::MilestoneApprovedInvalidBundle {
                tail: current,
                reason: "bundle is invalid".into(),
            });
        }
        if !bundle.valid_strict_semantics {
            return Err(WhiteFlagError::MilestoneApprovedInvalidBundle {
                tail: current,
                reason: "bundle violates strict semantics".into(),
            });
        }

        let trunk_done = parent_done(store, &bundle.head_trunk, milestone_index, &visited)?;
        let branch_done = if bundle.head_branch == bundle.head_trunk {
            trunk_done
        } else {
            parent_done(store, &bundle.head_branch, milestone_index, &visited)?
        };

        if !trunk_done {
            stack.push_front(bundle.head_trunk);
            continue;
        }
        if !branch_done {
            stack.push_front(bundle.head_branch);
            continue;
        }

        stack.pop_front();
        visited.insert(current);

        if bundle.is_value_spam() {
            continue;
        }

        match patch_balances(store, &confirmation.new_address_state, &bundle.ledger_changes)? {
            Some(patched) => {
                confirmation.tails.push(current);
                confirmation.new_address_state.extend(patched);
            }
            None => {
                tracing::debug!(
                    milestone = %milestone_index,
                    tail = %current,
                    "skipping conflicting bundle"
                );
            }
        }
    }

    tracing::debug!(
        milestone = %milestone_index,
        applied = confirmation.tails.len(),
        visited = visited.len(),
        "white-flag traversal finished"
    );

    Ok(confirmation)
}

fn ensure_tail<S>(store: &S, hash: &Hash) -> Result<(), WhiteFlagError>
where
    S: TransactionStore + ?Sized,
{
    let tx = store
        .get_transaction(hash)?
        .ok_or(WhiteFlagError::MissingTransaction(*hash))?;
    if !tx.is_tail {
        return Err(WhiteFlagError::MilestoneApprovedInvalidBundle {
            tail: *hash,
            reason: "referenced transaction is not a tail".into(),
        });
    }
    Ok(())
}

/// Whether `parent` needs no further traversal: already applied, part of
/// the snapshot, or confirmed by an earlier milestone.
fn parent_done<S>(
    store: &S,
    parent: &Hash,
    milestone_index: MilestoneIndex,
    visited: &HashSet<Hash>,
) -> Result<bool, WhiteFlagError>
where
    S: TransactionStore + MilestoneStore + ?Sized,
{
    if visited.contains(parent) || store.is_solid_entry_point(parent) {
        return Ok(true);
    }

    let tx = store
        .get_transaction(parent)?
        .ok_or(WhiteFlagError::MissingTransaction(*parent))?;
    if !tx.is_tail {
        return Err(WhiteFlagError::MilestoneApprovedInvalidBundle {
            tail: *parent,
            reason: "referenced transaction is not a tail".into(),
        });
    }

    Ok(tx.confirmed_by_other_than(milestone_index))
}

/// Apply `changes` on top of the in-progress state (falling back to the
/// committed balance). `None` if any resulting balance is out of range.
fn patch_balances<S>(
    store: &S,
    in_progress: &BTreeMap<Address, u64>,
    changes: &BTreeMap<Address, i64>,
) -> Result<Option<Vec<(Address, u64)>>, WhiteFlagError>
where
    S: LedgerStore + ?Sized,
{
    let mut patched = Vec::with_capacity(changes.len());

    for (address, delta) in changes {
        let balance = match in_progress.get(address) {
            Some(balance) => *balance,
            None => store.get_balance(address)?,
        };

        let new_balance = balance as i128 + *delta as i128;
        if new_balance < 0 || new_balance > TOTAL_SUPPLY as i128 {
            return Ok(None);
        }
        patched.push((*address, new_balance as u64));
    }

    Ok(Some(patched))
}
