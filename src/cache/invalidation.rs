//! Mutation-invalidation mapper.
//!
//! A static table maps every write operation of every family to the cache
//! prefixes it makes stale. The mapper applies a rule synchronously, so the
//! mutation path can finish invalidating before it hands its result back.

use tracing::{debug, warn};

use super::key::KeyPrefix;
use super::layer::QueryCache;
use crate::resources::descriptor::{CREATE, DELETE, UPDATE};
use crate::resources::Resource;

/// One region a rule invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
  /// Every list read of the mutated family
  OwnLists,
  /// The single-entity read of the mutated id
  OwnEntity,
  /// Every read of another family
  Family(Resource),
  /// Every list read of another family
  Lists(Resource),
}

/// `(resource family, operation) -> targets`.
#[derive(Debug, Clone, Copy)]
pub struct InvalidationRule {
  pub resource: Resource,
  pub operation: &'static str,
  pub targets: &'static [Target],
}

impl InvalidationRule {
  /// Concrete prefixes for a mutation of `id` (absent for creates).
  pub fn prefixes(&self, id: Option<&str>) -> Vec<KeyPrefix> {
    self
      .targets
      .iter()
      .filter_map(|target| match *target {
        Target::OwnLists => Some(KeyPrefix::lists(self.resource)),
        Target::OwnEntity => id.map(|id| KeyPrefix::entity(self.resource, id)),
        Target::Family(other) => Some(KeyPrefix::family(other)),
        Target::Lists(other) => Some(KeyPrefix::lists(other)),
      })
      .collect()
  }
}

/// Look up the rule for a write operation.
pub fn rule_for(resource: Resource, operation: &str) -> Option<&'static InvalidationRule> {
  RULES
    .iter()
    .find(|r| r.resource == resource && r.operation == operation)
}

/// Applies invalidation rules to a [`QueryCache`].
#[derive(Clone)]
pub struct InvalidationMapper {
  cache: QueryCache,
}

impl InvalidationMapper {
  pub fn new(cache: QueryCache) -> Self {
    Self { cache }
  }

  /// Mark every prefix of the operation's rule stale. Returns the number of
  /// cache entries touched.
  pub fn apply(&self, resource: Resource, operation: &str, id: Option<&str>) -> usize {
    let prefixes = match rule_for(resource, operation) {
      Some(rule) => rule.prefixes(id),
      None => {
        warn!(%resource, operation, "no invalidation rule; invalidating whole family");
        vec![KeyPrefix::family(resource)]
      }
    };

    let touched = prefixes.iter().map(|p| self.cache.invalidate(p)).sum();
    debug!(%resource, operation, touched, "mutation invalidated cache");
    touched
  }
}

// ============================================================================
// Rule table
// ============================================================================

const fn rule(
  resource: Resource,
  operation: &'static str,
  targets: &'static [Target],
) -> InvalidationRule {
  InvalidationRule {
    resource,
    operation,
    targets,
  }
}

use Resource::*;
use Target::*;

/// New entity: lists may now include it.
const ADDED: &[Target] = &[OwnLists];
/// Changed or removed entity: lists and its own detail read.
const CHANGED: &[Target] = &[OwnLists, OwnEntity];

const LEAD_CONVERTED: &[Target] = &[
  OwnLists,
  OwnEntity,
  Family(Customers),
  Family(Deals),
  Family(Contacts),
];
const CUSTOMER_REMOVED: &[Target] = &[OwnLists, OwnEntity, Lists(Contacts), Lists(Deals)];
const ROLE_CHANGED: &[Target] = &[OwnLists, OwnEntity, Family(Users)];
const USER_ROLES_CHANGED: &[Target] = &[OwnLists, OwnEntity, Lists(Roles)];
const QUOTATION_CONVERTED: &[Target] = &[OwnLists, OwnEntity, Family(Orders)];
const CONTRACT_CHANGED: &[Target] = &[OwnLists, OwnEntity, Lists(Customers)];

static RULES: &[InvalidationRule] = &[
  // leads
  rule(Leads, CREATE, ADDED),
  rule(Leads, UPDATE, CHANGED),
  rule(Leads, DELETE, CHANGED),
  rule(Leads, "convert", LEAD_CONVERTED),
  rule(Leads, "assign", CHANGED),
  rule(Leads, "qualify", CHANGED),
  rule(Leads, "disqualify", CHANGED),
  // deals
  rule(Deals, CREATE, ADDED),
  rule(Deals, UPDATE, CHANGED),
  rule(Deals, DELETE, CHANGED),
  rule(Deals, "win", CHANGED),
  rule(Deals, "lose", CHANGED),
  rule(Deals, "move-stage", CHANGED),
  rule(Deals, "assign", CHANGED),
  // contacts
  rule(Contacts, CREATE, ADDED),
  rule(Contacts, UPDATE, CHANGED),
  rule(Contacts, DELETE, CHANGED),
  // tickets
  rule(Tickets, CREATE, ADDED),
  rule(Tickets, UPDATE, CHANGED),
  rule(Tickets, DELETE, CHANGED),
  rule(Tickets, "assign", CHANGED),
  rule(Tickets, "escalate", CHANGED),
  rule(Tickets, "resolve", CHANGED),
  rule(Tickets, "close", CHANGED),
  rule(Tickets, "reopen", CHANGED),
  // customers
  rule(Customers, CREATE, ADDED),
  rule(Customers, UPDATE, CHANGED),
  rule(Customers, DELETE, CUSTOMER_REMOVED),
  rule(Customers, "activate", CHANGED),
  rule(Customers, "deactivate", CHANGED),
  // tenants
  rule(Tenants, CREATE, ADDED),
  rule(Tenants, UPDATE, CHANGED),
  rule(Tenants, "activate", CHANGED),
  rule(Tenants, "suspend", CHANGED),
  // users
  rule(Users, CREATE, ADDED),
  rule(Users, UPDATE, CHANGED),
  rule(Users, DELETE, CHANGED),
  rule(Users, "activate", CHANGED),
  rule(Users, "deactivate", CHANGED),
  rule(Users, "assign-roles", USER_ROLES_CHANGED),
  rule(Users, "reset-password", CHANGED),
  // roles
  rule(Roles, CREATE, ADDED),
  rule(Roles, UPDATE, ROLE_CHANGED),
  rule(Roles, DELETE, ROLE_CHANGED),
  rule(Roles, "assign-permissions", ROLE_CHANGED),
  // campaigns
  rule(Campaigns, CREATE, ADDED),
  rule(Campaigns, UPDATE, CHANGED),
  rule(Campaigns, DELETE, CHANGED),
  rule(Campaigns, "launch", CHANGED),
  rule(Campaigns, "pause", CHANGED),
  rule(Campaigns, "complete", CHANGED),
  // contracts
  rule(Contracts, CREATE, ADDED),
  rule(Contracts, UPDATE, CHANGED),
  rule(Contracts, DELETE, CHANGED),
  rule(Contracts, "sign", CONTRACT_CHANGED),
  rule(Contracts, "terminate", CONTRACT_CHANGED),
  rule(Contracts, "renew", CONTRACT_CHANGED),
  // orders
  rule(Orders, CREATE, ADDED),
  rule(Orders, UPDATE, CHANGED),
  rule(Orders, DELETE, CHANGED),
  rule(Orders, "confirm", CHANGED),
  rule(Orders, "ship", CHANGED),
  rule(Orders, "cancel", CHANGED),
  // quotations
  rule(Quotations, CREATE, ADDED),
  rule(Quotations, UPDATE, CHANGED),
  rule(Quotations, DELETE, CHANGED),
  rule(Quotations, "send", CHANGED),
  rule(Quotations, "accept", CHANGED),
  rule(Quotations, "reject", CHANGED),
  rule(Quotations, "convert", QUOTATION_CONVERTED),
  // webhooks
  rule(Webhooks, CREATE, ADDED),
  rule(Webhooks, UPDATE, CHANGED),
  rule(Webhooks, DELETE, CHANGED),
  rule(Webhooks, "test", CHANGED),
  rule(Webhooks, "enable", CHANGED),
  rule(Webhooks, "disable", CHANGED),
  // workflows
  rule(Workflows, CREATE, ADDED),
  rule(Workflows, UPDATE, CHANGED),
  rule(Workflows, DELETE, CHANGED),
  rule(Workflows, "activate", CHANGED),
  rule(Workflows, "deactivate", CHANGED),
  rule(Workflows, "execute", CHANGED),
  // reports
  rule(Reports, CREATE, ADDED),
  rule(Reports, DELETE, CHANGED),
  rule(Reports, "generate", CHANGED),
];
